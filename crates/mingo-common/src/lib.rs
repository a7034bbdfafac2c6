//! Common utilities for mingo
//!
//! This crate provides the error type shared by every mingo crate.

pub mod error;

pub use error::{MingoError, Result};
