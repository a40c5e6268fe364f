//! nettune agent
//!
//! ```text
//! plan -> validate -> render -> apply (checkpoint, rollback on failure)
//!      -> benchmark before/after -> decide -> optional automatic restore
//! ```
//!
//! [`NetTuneAgent`] exposes each stage as one call and owns the shared
//! collaborators: command executor, audit sink, checkpoint store, card
//! registry and the host-wide lock.

pub mod agent;
pub mod config;
pub mod workflow;

pub use agent::{AgentError, AgentServices, NetTuneAgent, RenderResponse};
pub use config::{AgentConfig, ConfigError};
pub use workflow::{AutoRollbackOutcome, AutoRollbackReport};
