//! Resilience helpers for the remote source.
//!
//! # Design Decisions
//! - Startup fetches are bounded by a timeout and never retried (fail fast)
//! - Long-poll failures after startup retry forever with capped backoff

pub mod backoff;
