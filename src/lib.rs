//! stabcam library crate.
//!
//! This module exposes the internal components for the binary and for
//! integration testing.

pub mod capture;
pub mod config;
pub mod control;
pub mod devices;
pub mod main_thread;
pub mod media_store;
pub mod permissions;
pub mod pipeline;
pub mod recorder;
pub mod stabilizer;
