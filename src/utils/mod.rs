//! Utility functions and helpers for the image cache.
//!
//! This module provides cross-cutting concerns like structured logging,
//! verbosity throttling, retry with backoff and a swappable clock.
//!
//! # Submodules
//!
//! - `clock`: Wall-clock abstraction used for timestamps and expiry.
//! - `logging`: Tracing initialization, verbosity levels and summary throttling.
//! - `retry`: Bounded exponential-backoff retry.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod clock;
pub mod logging;
pub mod retry;
