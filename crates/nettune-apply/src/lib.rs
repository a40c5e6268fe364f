//! nettune apply - checkpoints and transactional application
//!
//! The [`ApplyEngine`] never leaves the host half-configured without saying
//! so: every attempt starts from a checkpoint and a failing step triggers a
//! restore. Only a failed restore ends in [`ApplyState::Inconsistent`].

pub mod checkpoint;
pub mod engine;
pub mod host;
pub mod lock;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointManager, CheckpointSettings, CheckpointSummary, RestoreResult,
    SnapshotResult,
};
pub use engine::{ApplyEngine, ApplySettings, ApplyState, ChangeReport};
pub use host::{HostState, InterfaceState};
pub use lock::{HostGuard, HostLock};
pub use store::{CheckpointStore, FsCheckpointStore, InMemoryCheckpointStore, StoreError};
