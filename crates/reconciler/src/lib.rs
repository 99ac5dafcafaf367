//! Level-triggered reconciliation controller.
//!
//! This crate implements the controller pattern inspired by Kubernetes:
//!
//! - **Event adapter**: informer notifications become queue keys
//! - **Cache-sync barrier**: nothing is processed before the cache is full
//! - **Workers**: each leases a key, looks the object up and reconciles it
//! - **Retry**: failed keys come back with per-key exponential backoff
//!
//! Processing is driven by the current cached state, not by the events
//! themselves, so redelivering a key is always safe.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use informer::SharedInformer;
//! use reconciler::{Controller, ControllerConfig, ListerSyncHandler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> reconciler::Result<()> {
//!     let informer = Arc::new(SharedInformer::<CronTab>::new());
//!     let handler = Arc::new(ListerSyncHandler::new(informer.lister(), CronTabReconciler));
//!     let controller = Controller::new(&informer, handler, ControllerConfig::default())?;
//!
//!     let stop = CancellationToken::new();
//!     // Feed the informer from a source in another task, then:
//!     controller.run(2, stop).await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod report;
pub mod sync;

// Re-export main types
pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{Error, Result, SyncError};
pub use handler::EventHandler;
pub use report::{ErrorKind, ErrorReport, ErrorReporter, TracingErrorReporter};
pub use sync::{ListerSyncHandler, Reconcile, SyncHandler};
