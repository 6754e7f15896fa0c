//! Posting work back to the control loop thread.
//!
//! Background workers never run user callbacks themselves. They post boxed
//! closures through a [`MainThreadHandle`]; the thread that owns the
//! [`MainLooper`] runs them in posting order.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send>;

/// Cloneable sender side, handed to background workers.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: Sender<Task>,
}

impl MainThreadHandle {
    /// Queue a closure for the main thread.
    ///
    /// Returns `false` if the looper is gone and the closure was dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Receiving side, owned by the control loop.
pub struct MainLooper {
    rx: Receiver<Task>,
}

/// Create a connected handle and looper.
pub fn main_thread() -> (MainThreadHandle, MainLooper) {
    let (tx, rx) = mpsc::channel();
    (MainThreadHandle { tx }, MainLooper { rx })
}

impl MainLooper {
    /// Run every task already queued, without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it.
    ///
    /// Returns `false` on timeout or when every handle has been dropped.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_tasks_run_on_looper_thread_in_order() {
        let (handle, looper) = main_thread();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let looper_thread = thread::current().id();

        let worker = {
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..3 {
                    let seen = Arc::clone(&seen);
                    assert!(handle.post(move || {
                        assert_eq!(thread::current().id(), looper_thread);
                        seen.lock().unwrap().push(i);
                    }));
                }
            })
        };
        worker.join().unwrap();

        assert!(seen.lock().unwrap().is_empty(), "nothing runs until pumped");
        assert_eq!(looper.run_pending(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_run_one_times_out_when_idle() {
        let (_handle, looper) = main_thread();
        assert!(!looper.run_one(Duration::from_millis(10)));
    }

    #[test]
    fn test_post_after_looper_dropped() {
        let (handle, looper) = main_thread();
        drop(looper);
        assert!(!handle.post(|| {}));
    }
}
