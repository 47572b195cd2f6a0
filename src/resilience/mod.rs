//! Caller-side resilience helpers.

pub mod retry;
