//! Console command parsing.

use std::fmt;
use std::path::PathBuf;

/// Usage shown for `/help` and unknown commands.
pub const HELP: &str = "\
commands:
  <text>                   send a message
  /new [id]                start a session
  /sessions                list sessions
  /switch <id>             switch session
  /rename <name>           rename the current session
  /name                    name the session from its conversation
  /image <path> <prompt>   ask about an image
  /audio <path>            send a voice message
  /history                 show the current session
  /delete                  delete the current session
  /quit                    exit";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    New(Option<String>),
    Sessions,
    Switch(String),
    Rename(String),
    Name,
    Image { path: PathBuf, prompt: String },
    Audio(PathBuf),
    History,
    Delete,
    Help,
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A command is missing a required argument.
    MissingArgument { usage: &'static str },
    /// The command is not recognized.
    Unknown { command: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument { usage } => write!(f, "usage: {usage}"),
            Self::Unknown { command } => write!(f, "unknown command '/{command}', try /help"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses a line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns a `ParseError` for unknown commands or missing arguments.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "new" => Command::New((!arg.is_empty()).then(|| arg.to_string())),
        "sessions" => Command::Sessions,
        "switch" => Command::Switch(required(arg, "/switch <id>")?.to_string()),
        "rename" => Command::Rename(required(arg, "/rename <name>")?.to_string()),
        "name" => Command::Name,
        "image" => {
            let usage = "/image <path> <prompt>";
            let (path, prompt) = required(arg, usage)?
                .split_once(char::is_whitespace)
                .ok_or(ParseError::MissingArgument { usage })?;
            Command::Image {
                path: PathBuf::from(path),
                prompt: required(prompt.trim(), usage)?.to_string(),
            }
        }
        "audio" => Command::Audio(PathBuf::from(required(arg, "/audio <path>")?)),
        "history" => Command::History,
        "delete" => Command::Delete,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(ParseError::Unknown {
                command: other.to_string(),
            });
        }
    };
    Ok(Some(command))
}

fn required<'a>(arg: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    if arg.is_empty() {
        Err(ParseError::MissingArgument { usage })
    } else {
        Ok(arg)
    }
}
