//! Internal, non-public implementation details for the tiered analysis pipeline.
//!
//! `retry` supplies the backoff policy and circuit breaker shared by the LLM
//! client (C3).

pub mod retry;
