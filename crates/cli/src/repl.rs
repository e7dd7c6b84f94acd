use quill_chat::{ChatResult, ChatSession, CycleEvent, MessageId, Role, ViewEvent};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::settings::SettingsStore;
use crate::terminal::TerminalView;

const HELP: &str = "\
commands:
  /regen            regenerate the last answer
  /regen-user N     keep the N-th user turn and answer it again
  /attach NAME      attach a file reference to the next message
  /agent ID         switch agent and save the choice
  /new              start a new conversation
  /list             list conversations
  /switch N         open the N-th conversation
  /cancel           stop the current response
  /quit             exit
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Regenerate,
    RegenerateUser(usize),
    Attach(String),
    Agent(String),
    New,
    List,
    Switch(usize),
    Cancel,
    Help,
    Quit,
}

impl Command {
    /// `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        let parsed = match (name, argument) {
            ("regen", "") => Self::Regenerate,
            ("regen-user", index) => index
                .parse::<usize>()
                .ok()
                .filter(|index| *index > 0)
                .map_or(Self::Help, Self::RegenerateUser),
            ("attach", file) if !file.is_empty() => Self::Attach(file.to_string()),
            ("agent", id) if !id.is_empty() => Self::Agent(id.to_string()),
            ("new", "") => Self::New,
            ("list", "") => Self::List,
            ("switch", index) => index
                .parse::<usize>()
                .ok()
                .filter(|index| *index > 0)
                .map_or(Self::Help, Self::Switch),
            ("cancel", "") => Self::Cancel,
            ("quit" | "exit", "") => Self::Quit,
            _ => Self::Help,
        };
        Some(parsed)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

enum Input {
    Line(Option<String>),
    Cycle(CycleEvent),
    View(ViewEvent),
}

pub struct Repl {
    session: ChatSession,
    view_rx: mpsc::UnboundedReceiver<ViewEvent>,
    terminal: TerminalView,
    settings: SettingsStore,
    pending_attachment: Option<String>,
}

impl Repl {
    pub fn new(
        session: ChatSession,
        view_rx: mpsc::UnboundedReceiver<ViewEvent>,
        settings: SettingsStore,
        show_thoughts: bool,
    ) -> Self {
        let show_thoughts = show_thoughts || settings.settings().show_thoughts;
        Self {
            session,
            view_rx,
            terminal: TerminalView::new(show_thoughts),
            settings,
            pending_attachment: None,
        }
    }

    pub async fn run(mut self) -> Result<(), ReplError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        print!("{HELP}");

        loop {
            let input = tokio::select! {
                line = lines.next_line() => {
                    Input::Line(line.context(ReadInputSnafu { stage: "read-line" })?)
                }
                Some(event) = self.session.next_cycle_event() => Input::Cycle(event),
                Some(event) = self.view_rx.recv() => Input::View(event),
            };

            match input {
                Input::Line(None) => break,
                Input::Line(Some(line)) => {
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    if command == Command::Quit {
                        break;
                    }
                    self.execute(command);
                }
                Input::Cycle(event) => self.session.handle_cycle_event(event),
                Input::View(event) => print!("{}", self.terminal.render(event)),
            }
        }

        self.session.cancel_active_stream();
        Ok(())
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Send(text) => {
                let attachment = self.pending_attachment.take();
                if let Err(error) = self.session.submit(&text, attachment.as_deref()) {
                    println!("! {error}");
                }
            }
            Command::Regenerate => {
                let result = self
                    .last_message_with_role(Role::Assistant)
                    .map(|id| self.session.regenerate_from_assistant(id));
                report_regeneration(result);
            }
            Command::RegenerateUser(position) => {
                let result = self
                    .nth_message_with_role(Role::User, position)
                    .map(|id| self.session.regenerate_from_user(id));
                report_regeneration(result);
            }
            Command::Attach(name) => {
                println!("[next message will reference {name}]");
                self.pending_attachment = Some(name);
            }
            Command::Agent(id) => self.switch_agent(&id),
            Command::New => {
                self.session.new_conversation();
            }
            Command::List => {
                let active = self.session.active_conversation_id();
                for (position, conversation) in self.session.conversations().enumerate() {
                    let marker = if Some(conversation.id) == active { "*" } else { " " };
                    println!("{marker}{}: {}", position + 1, conversation.title);
                }
            }
            Command::Switch(position) => {
                let target = self
                    .session
                    .conversations()
                    .nth(position - 1)
                    .map(|conversation| conversation.id);
                match target {
                    Some(id) => {
                        self.session.select_conversation(id);
                    }
                    None => println!("! no conversation {position}"),
                }
            }
            Command::Cancel => {
                if !self.session.cancel_active_stream() {
                    println!("! nothing is streaming");
                }
            }
            Command::Help => print!("{HELP}"),
            Command::Quit => {}
        }
    }

    fn last_message_with_role(&self, role: Role) -> Option<MessageId> {
        self.session
            .active_conversation()?
            .transcript
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == role && !message.is_streaming())
            .map(|message| message.id)
    }

    fn nth_message_with_role(&self, role: Role, position: usize) -> Option<MessageId> {
        self.session
            .active_conversation()?
            .transcript
            .messages()
            .iter()
            .filter(|message| message.role == role)
            .nth(position.checked_sub(1)?)
            .map(|message| message.id)
    }

    fn switch_agent(&mut self, id: &str) {
        let mut settings = (*self.settings.settings()).clone();
        let Some(agent) = settings.agents.iter().find(|agent| agent.id == id) else {
            println!("! unknown agent '{id}'");
            return;
        };

        self.session.set_agent(Some(agent.to_profile()));
        settings.active_agent = id.to_string();
        if let Err(error) = self.settings.update(settings) {
            tracing::warn!(error = %error, "failed to save agent selection");
            println!("! {error}");
        }
        println!("[agent: {id}]");
    }
}

fn report_regeneration(result: Option<ChatResult<bool>>) {
    match result {
        Some(Ok(true)) => {}
        Some(Ok(false)) | None => println!("! nothing to regenerate"),
        Some(Err(error)) => println!("! {error}"),
    }
}
