//! Download jobs and their store.

pub mod model;
pub mod store;

pub use model::{DeliveryMode, Job, JobId, JobSpec, JobStatus, Quality, ResultLocator};
pub use store::JobStore;
