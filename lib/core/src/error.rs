//! Error handling foundation for the multichat gateway.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Collaborator contracts (stores, backends, tools) return plain domain
//! enums; the engine layers wrap them in a [`Report`] and use `.context()`
//! to add layer-appropriate context as errors propagate up the stack.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// `C` is the current (outermost) context of the report.
pub type Result<T, C> = std::result::Result<T, Report<C>>;
