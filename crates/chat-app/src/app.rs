//! Terminal front end.
//!
//! One task multiplexes stdin and stream events, so the controller (and through it the
//! thread store) only ever has a single writer.

use std::sync::Arc;

use portal_llm::{ProviderError, create_provider, find_model};
use portal_storage::{StoreError, Thread, ThreadId, ThreadStore};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::capture::{ScreencaptureCommand, ScreenshotCapture};
use crate::chat::{ChatController, ChatUpdate, ControllerError, ControllerEvent, SendOutcome};
use crate::settings::SettingsStore;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to open thread store on `{stage}`: {source}"))]
    OpenStore {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CommandParseError {
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { name: String },
    #[snafu(display("`/{name}` needs a thread number"))]
    MissingIndex { name: &'static str },
    #[snafu(display("`{raw}` is not a thread number"))]
    InvalidIndex { raw: String },
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    NewThread,
    ListThreads,
    /// 1-based position in the thread list.
    SelectThread(usize),
    DeleteThread(usize),
    Screenshot,
    Stop,
    Model(Option<String>),
    Quit,
    Prompt(String),
}

pub fn parse_command(line: &str) -> Result<Command, CommandParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Prompt(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    match name {
        "help" => Ok(Command::Help),
        "new" => Ok(Command::NewThread),
        "list" => Ok(Command::ListThreads),
        "select" => parse_index("select", argument).map(Command::SelectThread),
        "delete" => parse_index("delete", argument).map(Command::DeleteThread),
        "shot" => Ok(Command::Screenshot),
        "stop" => Ok(Command::Stop),
        "model" => Ok(Command::Model(
            Some(argument.to_string()).filter(|argument| !argument.is_empty()),
        )),
        "quit" | "exit" => Ok(Command::Quit),
        _ => Err(CommandParseError::UnknownCommand {
            name: name.to_string(),
        }),
    }
}

fn parse_index(name: &'static str, argument: &str) -> Result<usize, CommandParseError> {
    if argument.is_empty() {
        return Err(CommandParseError::MissingIndex { name });
    }

    argument
        .parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .ok_or_else(|| CommandParseError::InvalidIndex {
            raw: argument.to_string(),
        })
}

const HELP_TEXT: &str = "\
/new            start a new thread
/list           list threads
/select <n>     switch to thread n
/delete <n>     delete thread n
/shot           capture a screenshot for the next prompt
/stop           cancel the reply in the current thread
/model [id]     show or switch the model
/quit           exit
anything else is sent as a prompt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct ChatApp<W> {
    controller: ChatController,
    settings: SettingsStore,
    capture: Arc<dyn ScreenshotCapture>,
    pending_images: Vec<String>,
    output: W,
}

impl<W> ChatApp<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        controller: ChatController,
        settings: SettingsStore,
        capture: Arc<dyn ScreenshotCapture>,
        output: W,
    ) -> Self {
        Self {
            controller,
            settings,
            capture,
            pending_images: Vec::new(),
            output,
        }
    }

    pub fn controller(&self) -> &ChatController {
        &self.controller
    }

    pub async fn run<R>(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
        input: R,
    ) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.render_selected_thread().await?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context(ReadInputSnafu { stage: "read-input-line" })? else {
                        break;
                    };
                    if self.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
                Some(event) = events_rx.recv() => {
                    if let Some(update) = self.controller.handle_event(event) {
                        self.render_update(update).await?;
                    }
                }
            }
        }

        self.controller.cancel_all();
        self.output
            .flush()
            .await
            .context(WriteOutputSnafu { stage: "flush-on-exit" })
    }

    async fn handle_line(&mut self, line: &str) -> AppResult<Flow> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(error) => {
                self.write_line(&error.to_string()).await?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Empty => {}
            Command::Help => self.write_line(HELP_TEXT).await?,
            Command::NewThread => self.new_thread().await?,
            Command::ListThreads => self.list_threads().await?,
            Command::SelectThread(position) => self.select_thread(position).await?,
            Command::DeleteThread(position) => self.delete_thread(position).await?,
            Command::Screenshot => self.take_screenshot().await?,
            Command::Stop => self.stop_selected().await?,
            Command::Model(model_id) => self.switch_model(model_id).await?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Prompt(text) => self.send_prompt(&text).await?,
        }

        Ok(Flow::Continue)
    }

    async fn send_prompt(&mut self, text: &str) -> AppResult<()> {
        let thread_id = match self.controller.store().selected_id() {
            Some(thread_id) => thread_id,
            None => match self.controller.create_thread() {
                Ok(thread_id) => thread_id,
                Err(error) => return self.write_line(&error.to_string()).await,
            },
        };

        self.send_to(thread_id, text).await
    }

    /// Sends `text` with the pending screenshots; they stay pending if the send is refused.
    async fn send_to(&mut self, thread_id: ThreadId, text: &str) -> AppResult<()> {
        let outcome = self
            .controller
            .send(thread_id, text, self.pending_images.clone());
        if outcome.is_ok() {
            self.pending_images.clear();
        }

        match outcome {
            Ok(SendOutcome::Streaming(_)) => self.write("assistant> ").await,
            Ok(SendOutcome::Failed(failure)) => {
                self.write_line(&crate::chat::failure_notice(&failure)).await
            }
            Err(error @ ControllerError::EmptyPrompt { .. }) => {
                self.write_line(&error.to_string()).await
            }
            Err(error) => {
                tracing::warn!(thread_id = %thread_id, error = %error, "send failed");
                self.write_line(&error.to_string()).await
            }
        }
    }

    async fn new_thread(&mut self) -> AppResult<()> {
        match self.controller.create_thread() {
            Ok(_) => self.write_line("started a new thread").await,
            Err(error) => self.write_line(&error.to_string()).await,
        }
    }

    async fn list_threads(&mut self) -> AppResult<()> {
        let listing = render_thread_list(self.controller.store(), |thread_id| {
            self.controller.is_streaming(thread_id)
        });
        self.write(&listing).await
    }

    async fn select_thread(&mut self, position: usize) -> AppResult<()> {
        let Some(thread_id) = thread_at(self.controller.store(), position) else {
            return self.write_line(&format!("no thread #{position}")).await;
        };

        self.controller.select_thread(thread_id);
        self.render_selected_thread().await
    }

    async fn delete_thread(&mut self, position: usize) -> AppResult<()> {
        let Some(thread_id) = thread_at(self.controller.store(), position) else {
            return self.write_line(&format!("no thread #{position}")).await;
        };

        match self.controller.delete_thread(thread_id) {
            Ok(_) => self.write_line(&format!("deleted thread #{position}")).await,
            Err(error) => self.write_line(&error.to_string()).await,
        }
    }

    async fn take_screenshot(&mut self) -> AppResult<()> {
        match self.capture.capture().await {
            Ok(Some(url)) => {
                self.pending_images.push(url);
                let message = format!(
                    "screenshot attached ({} pending)",
                    self.pending_images.len()
                );
                self.write_line(&message).await
            }
            Ok(None) => self.write_line("screenshot cancelled").await,
            Err(error) => {
                tracing::warn!(error = %error, "screenshot capture failed");
                self.write_line("screenshot unavailable").await
            }
        }
    }

    async fn stop_selected(&mut self) -> AppResult<()> {
        let stopped = self
            .controller
            .store()
            .selected_id()
            .is_some_and(|thread_id| self.controller.cancel(thread_id));
        if stopped {
            self.write_line("\n[stopped]").await
        } else {
            self.write_line("nothing to stop").await
        }
    }

    async fn switch_model(&mut self, model_id: Option<String>) -> AppResult<()> {
        let Some(model_id) = model_id else {
            let listing = render_model_list(&self.controller);
            return self.write(&listing).await;
        };

        if !self.controller.set_model_id(&model_id) {
            return self.write_line("model id must not be blank").await;
        }
        if let Err(error) = self.settings.set_model(self.controller.model_id()) {
            tracing::warn!(error = %error, "failed to persist model choice");
        }

        let note = if find_model(self.controller.provider().models(), &model_id).is_some() {
            ""
        } else {
            " (not in the catalogue)"
        };
        let message = format!("model set to {}{note}", self.controller.model_id());
        self.write_line(&message).await
    }

    async fn render_update(&mut self, update: ChatUpdate) -> AppResult<()> {
        let selected = self.controller.store().selected_id();
        match update {
            ChatUpdate::Delta {
                thread_id,
                fragment,
            } if Some(thread_id) == selected => self.write(&fragment).await,
            ChatUpdate::Completed { thread_id } if Some(thread_id) == selected => {
                self.write_line("").await
            }
            ChatUpdate::Failed { thread_id, failure } if Some(thread_id) == selected => {
                let notice = format!("\n{}", crate::chat::failure_notice(&failure));
                self.write_line(&notice).await
            }
            ChatUpdate::Completed { thread_id } | ChatUpdate::Failed { thread_id, .. } => {
                let title = self
                    .controller
                    .store()
                    .thread(thread_id)
                    .map(|thread| thread.title.clone())
                    .unwrap_or_default();
                self.write_line(&format!("[reply finished in \"{title}\"]"))
                    .await
            }
            ChatUpdate::Opened { .. } | ChatUpdate::Delta { .. } => Ok(()),
        }
    }

    async fn render_selected_thread(&mut self) -> AppResult<()> {
        let transcript = self
            .controller
            .store()
            .selected()
            .map(render_transcript)
            .unwrap_or_else(|| "no thread selected, /new starts one\n".to_string());
        self.write(&transcript).await
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.output
            .write_all(text.as_bytes())
            .await
            .context(WriteOutputSnafu { stage: "write-output" })?;
        self.output
            .flush()
            .await
            .context(WriteOutputSnafu { stage: "flush-output" })
    }

    async fn write_line(&mut self, text: &str) -> AppResult<()> {
        self.write(&format!("{text}\n")).await
    }
}

fn thread_at(store: &ThreadStore, position: usize) -> Option<ThreadId> {
    position
        .checked_sub(1)
        .and_then(|index| store.threads().get(index))
        .map(|thread| thread.id)
}

pub fn render_thread_list(store: &ThreadStore, is_streaming: impl Fn(ThreadId) -> bool) -> String {
    if store.threads().is_empty() {
        return "no threads, /new starts one\n".to_string();
    }

    let selected = store.selected_id();
    store
        .threads()
        .iter()
        .enumerate()
        .map(|(index, thread)| {
            let marker = if Some(thread.id) == selected { '*' } else { ' ' };
            let streaming = if is_streaming(thread.id) { " …" } else { "" };
            format!("{marker} {}. {}{streaming}\n", index + 1, thread.title)
        })
        .collect()
}

fn render_model_list(controller: &ChatController) -> String {
    let provider = controller.provider();
    let mut listing = format!("{} models:\n", provider.name());
    for model in provider.models() {
        let marker = if model.id == controller.model_id() { '*' } else { ' ' };
        match &model.description {
            Some(description) => listing.push_str(&format!("{marker} {} - {description}\n", model.id)),
            None => listing.push_str(&format!("{marker} {}\n", model.id)),
        }
    }
    listing
}

pub fn render_transcript(thread: &Thread) -> String {
    let mut transcript = format!("== {} ==\n", thread.title);
    for message in &thread.messages {
        let attachments = match message.images.len() {
            0 => String::new(),
            count => format!(" [{count} image(s)]"),
        };
        transcript.push_str(&format!(
            "{}> {}{attachments}\n",
            message.role.as_str(),
            message.text_or_empty()
        ));
    }
    transcript
}

/// Wires settings, store, provider and capture together and drives stdin until EOF or `/quit`.
pub async fn run_terminal() -> AppResult<()> {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();

    let store = ThreadStore::open(settings.resolved_store_path()).context(OpenStoreSnafu {
        stage: "open-thread-store",
    })?;
    let provider = create_provider(
        settings.to_provider_config(),
        Arc::new(settings_store.credentials()),
    )
    .context(CreateProviderSnafu {
        stage: "create-provider",
    })?;

    tracing::info!(
        provider = provider.id(),
        model = %settings.model,
        store = ?store.path(),
        settings = ?settings_store.config_path(),
        "starting portal"
    );

    let (controller, events_rx) =
        ChatController::new(store, provider, settings.model.clone(), settings.keep_turns);
    let app = ChatApp::new(
        controller,
        settings_store,
        Arc::new(ScreencaptureCommand::default()),
        tokio::io::stdout(),
    );

    app.run(events_rx, BufReader::new(tokio::io::stdin())).await
}
