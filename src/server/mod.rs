//! Server mode
//!
//! The scheduler and the collaborator seams it runs on. The HTTP surface
//! that would sit above this lives elsewhere; everything here is callable
//! directly, which is also how the tests drive it.

pub mod catalog;
pub mod scheduler;
pub mod submission;

pub use catalog::{
    IdentityStore, NullStore, RunStore, StaticCatalog, StaticIdentityStore, Target, TargetCatalog,
};
pub use scheduler::{ProcessFactory, Scheduler, SessionFactory};
pub use submission::{
    CombinedStats, RejectReason, Rejection, SchedulerStatus, Submission, SubmissionRequest,
};
