//! Core domain types and utilities for the multichat gateway.
//!
//! This crate provides the foundational types and error handling shared
//! by the conversation, AI and orchestration crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{MessageId, ParseIdError, RequestId, SessionId};
