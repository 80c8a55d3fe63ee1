//! Conversation state for multichat.
//!
//! This crate provides:
//!
//! - **Sessions and messages**: the turn-by-turn data model and the
//!   `SessionStore` contract, with an in-memory store
//! - **Token budget**: deterministic estimates checked against a ceiling
//! - **Context builder**: sliding-window assembly of the backend context
//! - **Media**: image normalization into data URIs

pub mod budget;
pub mod context;
pub mod error;
pub mod media;
pub mod message;
pub mod session;
pub mod store;

pub use budget::TokenBudgetManager;
pub use context::{AssembledContext, ContextBuilder, NewTurn};
pub use error::{ContextError, MediaError, SessionError};
pub use media::{Base64ImageNormalizer, MediaNormalizer, NormalizedImage};
pub use message::{Message, MessageStatus, Modality};
pub use session::{DEFAULT_SESSION_NAME, Session, SessionStore};
pub use store::InMemorySessionStore;
