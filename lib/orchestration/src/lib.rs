//! Conversation orchestration for multichat.
//!
//! [`OrchestrationService`] is the single entry point: it validates a
//! request, serializes it on its session, assembles bounded context,
//! drives the completion dispatcher and persists the resulting message.

pub mod config;
pub mod error;
pub mod lock;
pub mod service;

pub use config::{OrchestrationConfig, SamplingProfiles, TimeoutConfig, TranscriptionConfig};
pub use error::OrchestrationError;
pub use lock::{SessionGuard, SessionLocks};
pub use service::{Collaborators, OrchestrationService};
