pub mod drives;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod stages;
pub mod tracker;

pub use drives::{DriveInfo, DriveInventoryProvider, DriveRegistry};
pub use events::{JobEvent, JobEventPayload};
pub use models::{Capability, DiscType, Drive, DriveStatus, Job, JobSnapshot, JobStatus, RingLog};
pub use tracker::{JobTracker, StartJobError};
