//! Console chat front end for the multichat engine.

pub mod config;
pub mod console;
pub mod repl;

pub use config::AppConfig;
pub use console::Console;
pub use repl::{Command, ParseError, parse_command};
