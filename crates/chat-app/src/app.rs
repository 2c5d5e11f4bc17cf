use std::time::Duration;

use formchat::{ChatCore, ChatEvent, ChatMessage, ChatStatus, Role, StatusPayload};
use formchat_client::{ClientError, create_transport};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::settings::{SettingsError, SettingsStore};

pub const HELP_TEXT: &str = "\
commands:
  /cancel          stop waiting for the pending reply
  /clear           start over with a new session
  /status          fetch the form status now
  /history         print the transcript
  /session         print the session id
  /endpoint <url>  switch (and save) the chat endpoint
  /help            show this help
  /quit            exit
anything else is sent as a chat message";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("failed to create chat transport on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to save settings on `{stage}`, {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to start runtime on `{stage}`: {source}"))]
    Runtime {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Cancel,
    Clear,
    Status,
    History,
    Session,
    Endpoint(String),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(name, argument)| (name, argument.trim()))
            .unwrap_or((command, ""));
        match (name, argument) {
            ("cancel", "") => Self::Cancel,
            ("clear", "") => Self::Clear,
            ("status", "") => Self::Status,
            ("history", "") => Self::History,
            ("session", "") => Self::Session,
            ("endpoint", url) if !url.is_empty() => Self::Endpoint(url.to_string()),
            ("help", "") => Self::Help,
            ("quit" | "exit", "") => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

pub fn format_message(message: &ChatMessage) -> String {
    let prefix = match message.role {
        Role::User => "you",
        Role::Assistant => "bot",
        Role::System => "--",
    };
    match &message.phase {
        Some(phase) => format!("{prefix} [{phase}]> {}", message.content),
        None => format!("{prefix}> {}", message.content),
    }
}

pub fn format_status(status: &ChatStatus) -> String {
    let mut line = format!("status: phase={}", status.phase);
    if let Some(form_id) = &status.form_id {
        line.push_str(&format!(" form={form_id}"));
    }
    if let Some(answers) = &status.answers {
        line.push_str(&format!(" answers={}", answers.len()));
    }
    if let Some(receiver) = &status.receiver {
        line.push_str(&format!(" receiver={receiver}"));
    }
    line
}

pub fn format_payload(payload: &StatusPayload) -> String {
    match payload {
        StatusPayload::Status(status) => format_status(status),
        StatusPayload::Failed(failure) => match &failure.details {
            Some(details) => format!("status unavailable: {} ({details})", failure.message),
            None => format!("status unavailable: {}", failure.message),
        },
    }
}

/// Line printed for an event, if the event is worth showing. Typed user input is not echoed.
pub fn render_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::MessageAppended(message) if message.role != Role::User => {
            Some(format_message(message))
        }
        ChatEvent::StatusChanged(Some(status)) => Some(format_status(status)),
        ChatEvent::LoadingChanged(true) => Some("(waiting for reply)".to_string()),
        ChatEvent::SessionChanged(Some(session_id)) => Some(format!("session {session_id}")),
        ChatEvent::HistoryCleared => Some("(conversation cleared)".to_string()),
        _ => None,
    }
}

struct ShellTasks {
    renderer: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

impl ShellTasks {
    fn abort(self) {
        self.renderer.abort();
        if let Some(poller) = self.poller {
            poller.abort();
        }
    }
}

/// Interactive terminal front end. Must run inside a `LocalSet`.
pub struct ChatShell {
    core: ChatCore,
    settings: SettingsStore,
    tasks: Option<ShellTasks>,
}

impl ChatShell {
    pub fn new(settings: SettingsStore) -> Result<Self, AppError> {
        let current = settings.settings();
        let transport = create_transport(&current.client_config()).context(TransportSnafu {
            stage: "create-transport",
        })?;
        let core = ChatCore::new(transport, current.core_config());
        Ok(Self {
            core,
            settings,
            tasks: None,
        })
    }

    pub fn core(&self) -> &ChatCore {
        &self.core
    }

    fn start_tasks(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.abort();
        }

        // Replay what is already on record, then follow new events.
        for message in self.core.history() {
            println!("{}", format_message(&message));
        }
        let mut events = self.core.subscribe();
        let renderer = tokio::task::spawn_local(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(line) = render_event(&event) {
                            println!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "renderer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let poller = self.settings.settings().status_poll_interval().map(|interval| {
            let core = self.core.clone();
            tokio::task::spawn_local(poll_status_every(core, interval))
        });

        self.tasks = Some(ShellTasks { renderer, poller });
    }

    /// Handles one input line. Returns `false` once the user asked to quit.
    pub async fn handle(&mut self, command: Command) -> Result<bool, AppError> {
        match command {
            Command::Empty => {}
            Command::Send(text) => {
                let core = self.core.clone();
                // Detached so input keeps flowing; a newer line preempts this one.
                tokio::task::spawn_local(async move {
                    if let Err(error) = core.send_message(text).await {
                        tracing::debug!(error = %error, "chat message did not complete");
                    }
                });
            }
            Command::Cancel => {
                if !self.core.cancel() {
                    println!("nothing to cancel");
                }
            }
            Command::Clear => {
                self.core.clear();
                let session_id = self.core.ensure_session();
                tracing::debug!(session_id = %session_id, "new session after clear");
            }
            Command::Status => {
                let core = self.core.clone();
                // Detached like sends so a slow backend never holds up `/cancel`.
                tokio::task::spawn_local(async move {
                    match core.refresh_status().await {
                        Some(payload) => println!("{}", format_payload(&payload)),
                        None => println!("no active session"),
                    }
                });
            }
            Command::History => {
                self.core.with_history(|history| {
                    for message in history {
                        println!("{}", format_message(message));
                    }
                });
            }
            Command::Session => match self.core.session_id() {
                Some(session_id) => println!("{session_id}"),
                None => println!("no active session"),
            },
            Command::Endpoint(url) => self.switch_endpoint(url)?,
            Command::Help => println!("{HELP_TEXT}"),
            Command::Quit => return Ok(false),
            Command::Unknown(line) => println!("unknown command '{line}', try /help"),
        }
        Ok(true)
    }

    /// Points the conversation at another backend, keeping session and transcript.
    fn switch_endpoint(&mut self, url: String) -> Result<(), AppError> {
        let updated = (*self.settings.settings())
            .clone()
            .with_chat_api_url(url)
            .normalized();
        let transport = match create_transport(&updated.client_config()) {
            Ok(transport) => transport,
            Err(error) => {
                println!("endpoint rejected: {error}");
                return Ok(());
            }
        };
        self.settings.update(updated).context(SaveSettingsSnafu {
            stage: "switch-endpoint",
        })?;

        // The pending send settles on the old core, so its note is carried over by hand.
        let cancelled = self.core.cancel();
        let mut history = self.core.history();
        if cancelled {
            history.push(ChatMessage::system(self.core.config().cancelled_note.clone()));
        }
        let session_id = self.core.session_id();

        let core = ChatCore::new(transport, self.settings.settings().core_config());
        core.clear();
        if let Some(session_id) = session_id
            && let Err(error) = core.adopt_session(session_id)
        {
            tracing::warn!(error = %error, "could not carry session over");
        }
        core.replace_history(history);
        self.core = core;

        println!("endpoint set to {}", self.settings.settings().chat_api_url);
        self.start_tasks();
        Ok(())
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        println!("type a message, /help for commands");
        self.start_tasks();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let Some(line) = lines.next_line().await.context(ReadInputSnafu {
                stage: "read-stdin-line",
            })?
            else {
                break;
            };
            if !self.handle(Command::parse(&line)).await? {
                break;
            }
        }

        self.core.cancel();
        if let Some(tasks) = self.tasks.take() {
            tasks.abort();
        }
        Ok(())
    }
}

async fn poll_status_every(core: ChatCore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Some(StatusPayload::Failed(failure)) = core.refresh_status().await {
            tracing::debug!(message = %failure.message, "scheduled status poll failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use formchat::{DEFAULT_CANCELLED_NOTE, StatusFetchError};
    use tokio::net::TcpListener;
    use tokio::task::LocalSet;

    use super::*;
    use crate::settings::{ChatSettings, SETTINGS_FILE_NAME};

    /// Shell pointed at a listener that accepts connections but never answers.
    async fn silent_backend_shell(directory: &tempfile::TempDir) -> (ChatShell, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
        let settings = SettingsStore::new(directory.path().join(SETTINGS_FILE_NAME));
        settings
            .update(ChatSettings::default().with_chat_api_url(endpoint))
            .unwrap();
        (ChatShell::new(settings).unwrap(), listener)
    }

    #[test]
    fn parses_commands_and_messages() {
        assert_eq!(Command::parse("  hello there "), Command::Send("hello there".to_string()));
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("/cancel"), Command::Cancel);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(
            Command::parse("/endpoint  http://localhost:9000/api/chat "),
            Command::Endpoint("http://localhost:9000/api/chat".to_string())
        );
        assert_eq!(
            Command::parse("/endpoint"),
            Command::Unknown("/endpoint".to_string())
        );
        assert_eq!(
            Command::parse("/clear now"),
            Command::Unknown("/clear now".to_string())
        );
    }

    #[test]
    fn renders_transcript_lines() {
        assert_eq!(
            render_event(&ChatEvent::MessageAppended(
                ChatMessage::assistant("Which date?").with_phase("collecting")
            )),
            Some("bot [collecting]> Which date?".to_string())
        );
        assert_eq!(
            render_event(&ChatEvent::MessageAppended(ChatMessage::user("typed"))),
            None
        );
        assert_eq!(render_event(&ChatEvent::LoadingChanged(false)), None);
    }

    #[test]
    fn formats_status_payloads() {
        let status = ChatStatus::new("collecting")
            .with_form_id("f1")
            .with_answer("name", "Ada");
        assert_eq!(
            format_payload(&StatusPayload::Status(status)),
            "status: phase=collecting form=f1 answers=1"
        );
        assert_eq!(
            format_payload(&StatusPayload::Failed(
                StatusFetchError::new("Could not fetch status").with_details("timeout")
            )),
            "status unavailable: Could not fetch status (timeout)"
        );
    }

    #[tokio::test]
    async fn clear_command_rotates_session() {
        let directory = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(directory.path().join(SETTINGS_FILE_NAME));
        let mut shell = ChatShell::new(settings).unwrap();

        LocalSet::new()
            .run_until(async {
                let before = shell.core().session_id().unwrap();
                assert!(shell.handle(Command::Clear).await.unwrap());
                let after = shell.core().session_id().unwrap();
                assert_ne!(before, after);
                assert!(!shell.handle(Command::Quit).await.unwrap());
            })
            .await;
    }

    #[tokio::test]
    async fn endpoint_switch_keeps_transcript_and_session() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join(SETTINGS_FILE_NAME);
        let mut shell = ChatShell::new(SettingsStore::new(path.clone())).unwrap();

        LocalSet::new()
            .run_until(async {
                let session_id = shell.core().session_id();
                let history = shell.core().history();

                shell
                    .handle(Command::Endpoint("http://localhost:9000/api/chat".to_string()))
                    .await
                    .unwrap();

                assert_eq!(shell.core().session_id(), session_id);
                assert_eq!(shell.core().history(), history);
                assert_eq!(
                    shell.settings.settings().chat_api_url,
                    "http://localhost:9000/api/chat"
                );
                assert!(path.exists());

                shell
                    .handle(Command::Endpoint("not a url".to_string()))
                    .await
                    .unwrap();
                assert_eq!(
                    shell.settings.settings().chat_api_url,
                    "http://localhost:9000/api/chat"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn status_command_does_not_block_input() {
        let directory = tempfile::tempdir().unwrap();
        let (mut shell, _listener) = silent_backend_shell(&directory).await;

        LocalSet::new()
            .run_until(async {
                let handled =
                    tokio::time::timeout(Duration::from_secs(1), shell.handle(Command::Status))
                        .await;
                assert!(matches!(handled, Ok(Ok(true))));
                assert!(shell.handle(Command::Cancel).await.unwrap());
            })
            .await;
    }

    #[tokio::test]
    async fn endpoint_switch_records_cancelled_send() {
        let directory = tempfile::tempdir().unwrap();
        let (mut shell, _listener) = silent_backend_shell(&directory).await;

        LocalSet::new()
            .run_until(async {
                shell.handle(Command::Send("slow".to_string())).await.unwrap();
                tokio::task::yield_now().await;
                assert!(shell.core().is_loading());

                shell
                    .handle(Command::Endpoint("http://localhost:9000/api/chat".to_string()))
                    .await
                    .unwrap();

                let history = shell.core().history();
                assert_eq!(history[history.len() - 2], ChatMessage::user("slow"));
                assert_eq!(
                    shell.core().last_message(),
                    Some(ChatMessage::system(DEFAULT_CANCELLED_NOTE))
                );
                assert!(!shell.core().is_loading());
            })
            .await;
    }
}
