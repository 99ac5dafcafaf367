//! Rate-limited, deduplicating work queue for reconciliation controllers.
//!
//! Keys flow through the queue like this:
//!
//! - [`RateLimitingQueue::add`] makes a key pending unless it already is
//! - [`RateLimitingQueue::get`] leases a pending key to one worker as a [`WorkItem`]
//! - re-adding a leased key marks it dirty; it comes back once the lease drops
//! - [`RateLimitingQueue::add_rate_limited`] delays the add by the key's backoff
//! - [`RateLimitingQueue::forget`] resets that backoff
//!
//! # Example
//!
//! ```ignore
//! use workqueue::RateLimitingQueue;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = RateLimitingQueue::<String>::with_default_rate_limiter("crontabs");
//!     queue.add("default/backup".to_string());
//!
//!     while let Some(item) = queue.get().await {
//!         println!("processing {}", item.key());
//!         queue.forget(item.key());
//!         // dropping `item` marks the key done
//!     }
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod queue;
pub mod rate_limiter;

// Re-export main types
pub use error::{Error, Result};
pub use queue::{RateLimitingQueue, WorkItem};
pub use rate_limiter::{
    calculate_backoff, default_controller_rate_limiter, BucketRateLimiter,
    ItemExponentialFailureRateLimiter, ItemFastSlowRateLimiter, MaxOfRateLimiter, RateLimiter,
    RateLimiterConfig,
};
