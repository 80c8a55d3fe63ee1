//! Interactive console loop.
//!
//! Reads one command per line and writes results back. Service failures
//! are printed and the loop continues; only I/O errors end it.

use crate::repl::{Command, HELP, parse_command};
use multichat_conversation::{Message, Modality};
use multichat_orchestration::{OrchestrationError, OrchestrationService};
use rootcause::Report;
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Console state: the service and the active session.
pub struct Console<'a, W> {
    service: &'a OrchestrationService,
    output: W,
    current: String,
}

impl<'a, W: AsyncWrite + Unpin> Console<'a, W> {
    /// Starts a console on a freshly created session.
    ///
    /// # Errors
    ///
    /// Returns an error if the first session cannot be created.
    pub async fn start(service: &'a OrchestrationService, output: W) -> io::Result<Self> {
        let session = service
            .create_session(None)
            .await
            .map_err(|report| io::Error::other(report.current_context().to_string()))?;
        Ok(Self {
            service,
            output,
            current: session.id.to_string(),
        })
    }

    /// Returns the active session id.
    #[must_use]
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Processes lines until `/quit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> io::Result<()> {
        let mut lines = input.lines();
        self.prompt().await?;
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await?,
                Err(e) => self.say(&e.to_string()).await?,
            }
            self.prompt().await?;
        }
        self.output.flush().await
    }

    async fn execute(&mut self, command: Command) -> io::Result<()> {
        match command {
            Command::Say(text) => {
                let result = self.service.converse(&self.current, &text).await;
                self.answer(result).await
            }
            Command::Image { path, prompt } => {
                let image = match read_file(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => return self.say(&e).await,
                };
                let result = self
                    .service
                    .converse_with_image(&self.current, &prompt, &image)
                    .await;
                self.answer(result).await
            }
            Command::Audio(path) => {
                let audio = match read_file(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => return self.say(&e).await,
                };
                let result = self.service.converse_with_audio(&self.current, &audio).await;
                self.answer(result).await
            }
            Command::New(id) => match self.service.create_session(id.as_deref()).await {
                Ok(session) => {
                    self.current = session.id.to_string();
                    self.say(&format!("switched to new session {}", session.id))
                        .await
                }
                Err(report) => self.fail(&report).await,
            },
            Command::Sessions => match self.service.list_sessions().await {
                Ok(sessions) => {
                    let mut listing = String::new();
                    for session in sessions {
                        let marker = if session.id.as_str() == self.current { '*' } else { ' ' };
                        listing.push_str(&format!(
                            "{marker} {}  {}  ({} tokens)\n",
                            session.id, session.name, session.token_count
                        ));
                    }
                    self.say(listing.trim_end()).await
                }
                Err(report) => self.fail(&report).await,
            },
            Command::Switch(id) => match self.service.get_session(&id).await {
                Ok(session) => {
                    self.current = session.id.to_string();
                    self.say(&format!("switched to {} ({})", session.id, session.name))
                        .await
                }
                Err(report) => self.fail(&report).await,
            },
            Command::Rename(name) => match self.service.rename_session(&self.current, &name).await {
                Ok(()) => self.say(&format!("renamed to {}", name.trim())).await,
                Err(report) => self.fail(&report).await,
            },
            Command::Name => match self.service.summarize_session_name(&self.current).await {
                Ok(name) => self.say(&format!("named {name}")).await,
                Err(report) => self.fail(&report).await,
            },
            Command::History => match self.service.list_messages(&self.current).await {
                Ok(messages) => {
                    let transcript: Vec<String> = messages.iter().map(format_message).collect();
                    self.say(&transcript.join("\n")).await
                }
                Err(report) => self.fail(&report).await,
            },
            Command::Delete => {
                if let Err(report) = self.service.delete_session(&self.current).await {
                    return self.fail(&report).await;
                }
                info!(session_id = %self.current, "session deleted from console");
                match self.service.create_session(None).await {
                    Ok(session) => {
                        self.current = session.id.to_string();
                        self.say(&format!("deleted; switched to new session {}", session.id))
                            .await
                    }
                    Err(report) => self.fail(&report).await,
                }
            }
            Command::Help => self.say(HELP).await,
            Command::Quit => Ok(()),
        }
    }

    async fn answer(
        &mut self,
        result: Result<Message, Report<OrchestrationError>>,
    ) -> io::Result<()> {
        match result {
            Ok(message) if message.modality == Modality::Audio => {
                self.say(&format!("(transcribed) {}", message.completion))
                    .await
            }
            Ok(message) => self.say(&message.completion).await,
            Err(report) => self.fail(&report).await,
        }
    }

    async fn fail(&mut self, report: &Report<OrchestrationError>) -> io::Result<()> {
        let error = report.current_context();
        warn!(%error, retryable = error.is_retryable(), "request failed");
        let hint = if error.is_retryable() { " (retry may help)" } else { "" };
        self.say(&format!("error: {error}{hint}")).await
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await
    }

    async fn prompt(&mut self) -> io::Result<()> {
        self.output.write_all(b"> ").await?;
        self.output.flush().await
    }

    /// Consumes the console, returning its output sink.
    pub fn into_output(self) -> W {
        self.output
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))
}

fn format_message(message: &Message) -> String {
    let prompt = match message.modality {
        Modality::Text => message.prompt.clone(),
        Modality::Image => format!("[image] {}", message.prompt),
        Modality::Audio => "[audio]".to_string(),
    };
    format!(
        "#{} {} > {}\n   {}",
        message.sequence, message.status, prompt, message.completion
    )
}
