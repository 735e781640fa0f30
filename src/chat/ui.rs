use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::chat::message::ChatMessage;

/// Connection state as shown to the user.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// The capability set the client exposes to a user interface. Message
/// records pass through opaquely; the UI decides how to render them.
pub trait ChatUi: Send + Sync + 'static {
    fn deliver(&self, message: &ChatMessage);
    fn set_status(&self, status: ConnectionStatus);
    fn set_roster(&self, roster: &[String]);
    fn prompt_for_file(&self) -> Option<PathBuf>;
}

/// An action the user asked the client to perform.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UiAction {
    SendText { recipient: String, content: String },
    SendFile { recipient: String, path: PathBuf },
    Quit,
}

/// The terminal-line UI: renders messages to stdout, reads commands from
/// stdin.
pub struct LineUi;

impl ChatUi for LineUi {
    fn deliver(&self, message: &ChatMessage) {
        match message {
            ChatMessage::Text { sender, content, .. } => {
                println!("<{}> {}", sender, content);
            }
            ChatMessage::File { sender, name, size, .. } => {
                println!("<{}> sent a file: {} ({} bytes)", sender, name, size);
            }
            ChatMessage::System { content, .. } => {
                println!("* {}", content);
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connecting => println!("* connecting..."),
            ConnectionStatus::Connected => println!("* connected"),
            ConnectionStatus::Disconnected => println!("* disconnected"),
        }
    }

    fn set_roster(&self, roster: &[String]) {
        println!("* online: {}", roster.join(", "));
    }

    fn prompt_for_file(&self) -> Option<PathBuf> {
        // the line UI takes the path inline with the /file command
        None
    }
}

/// Picks the UI implementation.
///
/// The graphical frontend is selected when `--gui` is given or no
/// interactive terminal is attached; it is an external collaborator, so a
/// build without one falls back to the line UI.
pub fn select_ui(force_gui: bool) -> Arc<dyn ChatUi> {
    if force_gui || !std::io::stdout().is_terminal() {
        warn!("no graphical frontend is linked into this build, using the line UI");
    }
    Arc::new(LineUi)
}

/// Parses one input line into an action. Recognized commands:
/// `/msg <recipient> <text>`, `/file <recipient> <path>`, `/quit`.
pub fn parse_line(line: &str) -> Option<UiAction> {
    let line = line.trim();

    if line == "/quit" {
        return Some(UiAction::Quit);
    }
    if let Some(rest) = line.strip_prefix("/msg ") {
        let (recipient, content) = rest.trim().split_once(' ')?;
        return Some(UiAction::SendText {
            recipient: recipient.to_string(),
            content: content.trim().to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("/file ") {
        let (recipient, path) = rest.trim().split_once(' ')?;
        return Some(UiAction::SendFile {
            recipient: recipient.to_string(),
            path: PathBuf::from(path.trim()),
        });
    }
    None
}

/// Reads stdin line by line and feeds parsed actions to the client. EOF on
/// stdin counts as a quit.
pub fn spawn_stdin_reader(actions: mpsc::UnboundedSender<UiAction>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_line(&line) {
                        Some(action) => {
                            let quit = action == UiAction::Quit;
                            if actions.send(action).is_err() || quit {
                                return;
                            }
                        }
                        None => {
                            println!("* commands: /msg <to> <text>, /file <to> <path>, /quit");
                        }
                    }
                }
                Ok(None) => {
                    let _ = actions.send(UiAction::Quit);
                    return;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    return;
                }
            }
        }
    })
}
