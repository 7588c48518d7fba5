//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller operation:
//!     → engine.rs (bounded attempt loop: setup once, then prepare + attempt)
//!     → On transient failure: wait (base delay, extended by any
//!       server-suggested delay), then next attempt
//!     → On fatal failure, cancellation, or exhaustion: abort with the full
//!       ordered error history
//! ```
//!
//! # Design Decisions
//! - Classification is pluggable: the operation's error type decides what is
//!   transient via the `Retryable` trait
//! - Every wait observes the cancellation token and the overall timeout
//!   budget; nothing blocks indefinitely
//! - Attempts are strictly sequential within one run

pub mod engine;

pub use engine::{
    CancelReason, EngineError, ErrorHistory, Operation, RetryConfig, RetryEngine, Retryable,
};
