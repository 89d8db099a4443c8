//! Keylimit - Per-Key Rate Limiting
//!
//! This crate implements an in-process rate limiter where every key carries
//! its own fixed-window quota. Concurrent callers can ask whether a key may
//! be used right now, or block until it may. Unrelated keys never serialize
//! on each other: a table lock guards only the key set, and each key's
//! window is guarded by its own lock.
//!
//! ```
//! use std::time::Duration;
//! use keylimit::LimiterTable;
//!
//! let limiter: LimiterTable = LimiterTable::new();
//! limiter.configure("backend-a", 2, Duration::from_secs(1));
//!
//! assert!(limiter.check_allowed("backend-a"));
//! assert!(limiter.check_allowed("backend-a"));
//! assert!(!limiter.check_allowed("backend-a"));
//! assert!(limiter.check_allowed("never-configured"));
//! ```

pub mod config;
pub mod error;
pub mod probe;
pub mod ratelimit;

pub use error::{LimiterError, Result};
pub use ratelimit::{EntrySnapshot, LimiterTable, Quota};
