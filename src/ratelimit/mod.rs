//! Abuse protection for the public verification path
//!
//! Two tiers with separate lifetimes: a process-local sliding window of attempt
//! timestamps, and a durable block list in the relational store. Blocking
//! decisions are driven by the durable record, so losing the volatile counters
//! (e.g. on restart) can only undercount, never block spuriously.

pub mod blocklist;
pub mod limiter;
pub mod window;

pub use blocklist::BlockList;
pub use limiter::{AbuseRateLimiter, AttemptDecision, RateLimitPolicy};
pub use window::{AttemptKey, AttemptWindowStore, MemoryAttemptStore};
