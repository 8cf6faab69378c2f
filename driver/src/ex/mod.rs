//! Executive (ex)
//!
//! Executive services used by the proxy:
//!
//! - **Resources**: ERESOURCE reader-writer locks with owner transfer
//! - **Work queue**: deferral of work from dispatch level to worker threads

pub mod resource;
pub mod worker;

pub use resource::{EResource, ResourceOwner};
pub use worker::{WorkQueue, WorkQueueItem};
