//! Foundational pieces shared by the lode crates: a write-once value slot
//! and the worker-pool boundary used to execute background loads.

mod once_slot;
pub use once_slot::OnceSlot;

pub mod jobs;
pub use jobs::Job;
pub use jobs::JobPool;
pub use jobs::WorkClass;
pub use jobs::WorkerPool;
