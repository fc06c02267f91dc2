//! Slash command parsing and dispatch.
//!
//! Input that starts with `/` is a command.  The first whitespace-separated
//! token names it (case-insensitively) and the rest are positional
//! arguments.  Commands are looked up by exact name or alias in a table of
//! registered handlers; anything the table does not hold is answered with a
//! `system` message rather than an error, so a typo never breaks the
//! conversation.

pub mod builtin;
pub mod catalog;
pub mod remote;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::observability::{
    COMMANDS_DISPATCHED, COMMANDS_FAILED, COMMANDS_UNKNOWN, COMMANDS_UNSUPPORTED,
};
use crate::store::SessionStore;
use crate::types::{Message, MessageStatus, SessionId};

/// Name of the built-in help command.
pub const HELP_COMMAND: &str = "help";

/// A command split into its name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased name without the `/`.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<String>,
}

/// Splits `/name arg1 arg2` into a [`ParsedCommand`].
///
/// Returns `None` for input that is not a command.
///
/// # Examples
///
/// ```
/// # use codeius::commands::parse_command;
/// let parsed = parse_command("/Open 3f2a").unwrap();
/// assert_eq!(parsed.name, "open");
/// assert_eq!(parsed.args, vec!["3f2a".to_string()]);
/// assert!(parse_command("hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let mut tokens = rest.split_whitespace();
    let name = tokens.next().unwrap_or_default().to_lowercase();
    Some(ParsedCommand {
        name,
        args: tokens.map(str::to_string).collect(),
    })
}

/// How many arguments a command accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Arity {
    min: usize,
    max: Option<usize>,
}

impl Arity {
    /// No arguments.
    pub const fn none() -> Self {
        Self::exactly(0)
    }

    /// Exactly `n` arguments.
    pub const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    /// `n` or more arguments.
    pub const fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    /// Between `min` and `max` arguments, inclusive.
    pub const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Returns true if `count` arguments are acceptable.
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

/// Registration record of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name without the `/`.
    pub name: String,
    /// Other names that resolve to this command.
    pub aliases: Vec<String>,
    /// Argument synopsis shown in usage and help, e.g. `<id>`.
    pub args: String,
    /// One-line description.
    pub description: String,
    /// Accepted argument count.
    pub arity: Arity,
}

impl CommandSpec {
    /// Creates a spec for a command that takes no arguments.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            aliases: Vec::new(),
            args: String::new(),
            description: description.into(),
            arity: Arity::none(),
        }
    }

    /// Declares the argument synopsis and arity.
    pub fn with_args(mut self, args: impl Into<String>, arity: Arity) -> Self {
        self.args = args.into();
        self.arity = arity;
        self
    }

    /// Adds an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into().to_lowercase());
        self
    }

    /// Returns the usage line, e.g. `/open <id>`.
    pub fn usage(&self) -> String {
        if self.args.is_empty() {
            format!("/{}", self.name)
        } else {
            format!("/{} {}", self.name, self.args)
        }
    }
}

/// What a handler gets to work with.
pub struct CommandContext<'a> {
    /// Session the command was issued in.
    pub session_id: SessionId,
    /// The session store.  Handlers may switch the current session.
    pub store: &'a mut SessionStore,
}

impl<'a> CommandContext<'a> {
    /// Creates a context for `session_id`.
    pub fn new(session_id: SessionId, store: &'a mut SessionStore) -> Self {
        Self { session_id, store }
    }
}

/// Executes one command.
///
/// Handlers return the `system` messages to show.  Returning an error is
/// fine: the dispatcher turns it into a `system` message.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command with already arity-checked arguments.
    async fn execute(&self, args: &[String], ctx: &mut CommandContext<'_>)
    -> Result<Vec<Message>>;
}

/// Outcome of dispatching one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Not a command; send it to the assistant unchanged.
    Message(String),
    /// Consumed as a command; show these `system` messages.
    Handled(Vec<Message>),
}

struct Registration {
    spec: CommandSpec,
    handler: Arc<dyn CommandHandler>,
}

/// Exact-match command table.
pub struct CommandDispatcher {
    commands: Vec<Registration>,
    names: HashMap<String, usize>,
}

impl CommandDispatcher {
    /// Creates a dispatcher that only knows `/help`.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            names: HashMap::new(),
        }
    }

    /// Registers a handler under its name and aliases.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the name or an alias is empty, is
    /// `help`, is already taken, or appears twice in `spec`.  Nothing is
    /// registered in that case.
    pub fn register(
        &mut self,
        spec: CommandSpec,
        handler: impl CommandHandler + 'static,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for name in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(Error::validation(
                    format!("/{name} is listed twice by /{}", spec.name),
                    Some(name.clone()),
                ));
            }
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(Error::validation(
                    "command names must be a single non-empty word",
                    Some(name.clone()),
                ));
            }
            if name == HELP_COMMAND || self.names.contains_key(name) {
                return Err(Error::validation(
                    format!("/{name} is already registered"),
                    Some(name.clone()),
                ));
            }
        }
        let index = self.commands.len();
        for name in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            self.names.insert(name.clone(), index);
        }
        tracing::debug!(command = %spec.name, "registered command");
        self.commands.push(Registration {
            spec,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Returns the spec registered under `name` or one of its aliases.
    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.names
            .get(&name.to_lowercase())
            .map(|&index| &self.commands[index].spec)
    }

    /// Returns every registered command name, `help` included, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .commands
            .iter()
            .map(|registration| registration.spec.name.as_str())
            .chain(std::iter::once(HELP_COMMAND))
            .collect();
        names.sort_unstable();
        names
    }

    /// Renders the help listing.
    pub fn help_text(&self) -> String {
        let mut entries: Vec<(String, &str)> = self
            .commands
            .iter()
            .map(|registration| {
                let spec = &registration.spec;
                (spec.usage(), spec.description.as_str())
            })
            .chain(std::iter::once((
                format!("/{HELP_COMMAND}"),
                "Show this help message",
            )))
            .collect();
        entries.sort();
        let width = entries.iter().map(|(usage, _)| usage.len()).max().unwrap_or(0);
        let mut text = String::from("Available commands:");
        for (usage, description) in entries {
            text.push_str(&format!("\n  {usage:<width$}  {description}"));
        }
        text
    }

    /// Routes one submission.
    ///
    /// Plain text comes back as [`Dispatch::Message`].  Every command outcome,
    /// failures included, comes back as [`Dispatch::Handled`].
    pub async fn dispatch(&self, input: &str, ctx: &mut CommandContext<'_>) -> Dispatch {
        let Some(parsed) = parse_command(input) else {
            return Dispatch::Message(input.to_string());
        };
        COMMANDS_DISPATCHED.click();
        tracing::debug!(command = %parsed.name, args = parsed.args.len(), "dispatch");

        if parsed.name == HELP_COMMAND {
            return Dispatch::Handled(vec![Message::system(self.help_text())]);
        }
        let Some(&index) = self.names.get(&parsed.name) else {
            return Dispatch::Handled(vec![self.unregistered(&parsed.name)]);
        };

        let registration = &self.commands[index];
        if !registration.spec.arity.accepts(parsed.args.len()) {
            return Dispatch::Handled(vec![Message::system(format!(
                "Usage: {}",
                registration.spec.usage()
            ))]);
        }
        match registration.handler.execute(&parsed.args, ctx).await {
            Ok(messages) => Dispatch::Handled(messages),
            Err(err) => {
                COMMANDS_FAILED.click();
                tracing::warn!(command = %registration.spec.name, error = %err, "command failed");
                Dispatch::Handled(vec![error_message(format!(
                    "/{} failed: {err}",
                    registration.spec.name
                ))])
            }
        }
    }

    fn unregistered(&self, name: &str) -> Message {
        let err = if catalog::is_known(name) {
            COMMANDS_UNSUPPORTED.click();
            Error::unsupported_command(name)
        } else {
            COMMANDS_UNKNOWN.click();
            Error::unknown_command(name)
        };
        error_message(format!("{err}. Type /help to see available commands."))
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn error_message(text: String) -> Message {
    let mut message = Message::system(text);
    message.status = MessageStatus::Error;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::types::Sender;

    struct Echo;

    #[async_trait::async_trait]
    impl CommandHandler for Echo {
        async fn execute(
            &self,
            args: &[String],
            _: &mut CommandContext<'_>,
        ) -> Result<Vec<Message>> {
            Ok(vec![Message::system(args.join(" "))])
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl CommandHandler for Failing {
        async fn execute(&self, _: &[String], _: &mut CommandContext<'_>) -> Result<Vec<Message>> {
            Err(Error::transport("backend unreachable", None))
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher
            .register(
                CommandSpec::new("echo", "Repeat the arguments")
                    .with_args("<words...>", Arity::at_least(1))
                    .with_alias("say"),
                Echo,
            )
            .unwrap();
        dispatcher
            .register(CommandSpec::new("fail", "Always fails"), Failing)
            .unwrap();
        dispatcher
    }

    async fn run(dispatcher: &CommandDispatcher, input: &str) -> Dispatch {
        let mut store = SessionStore::open(MemoryStore::new());
        let session_id = store.current_session_id();
        let mut ctx = CommandContext::new(session_id, &mut store);
        dispatcher.dispatch(input, &mut ctx).await
    }

    fn handled(dispatch: Dispatch) -> Vec<Message> {
        match dispatch {
            Dispatch::Handled(messages) => messages,
            Dispatch::Message(text) => panic!("expected a command, got message {text:?}"),
        }
    }

    #[test]
    fn parse_splits_on_whitespace() {
        assert_eq!(
            parse_command("  /SWITCH   gpt-4   now "),
            Some(ParsedCommand {
                name: "switch".to_string(),
                args: vec!["gpt-4".to_string(), "now".to_string()],
            })
        );
        assert_eq!(parse_command("/").map(|p| p.name), Some(String::new()));
        assert!(parse_command("no slash").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn arity_bounds() {
        assert!(Arity::none().accepts(0));
        assert!(!Arity::none().accepts(1));
        assert!(Arity::between(0, 1).accepts(1));
        assert!(!Arity::between(0, 1).accepts(2));
        assert!(Arity::at_least(1).accepts(7));
        assert!(!Arity::at_least(1).accepts(0));
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        assert_eq!(
            run(&dispatcher(), "what does /etc/hosts do?").await,
            Dispatch::Message("what does /etc/hosts do?".to_string())
        );
    }

    #[tokio::test]
    async fn help_lists_every_registered_name() {
        let dispatcher = dispatcher();
        let messages = handled(run(&dispatcher, "/help").await);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::System);
        for name in dispatcher.registered_names() {
            assert!(messages[0].content.contains(&format!("/{name}")), "{name}");
        }
    }

    #[tokio::test]
    async fn names_and_aliases_are_case_insensitive() {
        let dispatcher = dispatcher();
        let messages = handled(run(&dispatcher, "/ECHO hi there").await);
        assert_eq!(messages[0].content, "hi there");
        let messages = handled(run(&dispatcher, "/say again").await);
        assert_eq!(messages[0].content, "again");
    }

    #[tokio::test]
    async fn wrong_arity_shows_usage() {
        let messages = handled(run(&dispatcher(), "/echo").await);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Usage: /echo <words...>");
    }

    #[tokio::test]
    async fn handler_failure_becomes_system_message() {
        let messages = handled(run(&dispatcher(), "/fail").await);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Error);
        assert!(messages[0].content.contains("backend unreachable"));
    }

    #[tokio::test]
    async fn catalog_commands_are_unsupported_not_unknown() {
        let messages = handled(run(&dispatcher(), "/security_scan").await);
        assert!(messages[0].content.contains("not supported"));
        assert!(messages[0].content.contains("/help"));

        let messages = handled(run(&dispatcher(), "/frobnicate").await);
        assert!(messages[0].content.starts_with("Unknown command: /frobnicate"));
        assert!(messages[0].content.contains("/help"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut dispatcher = dispatcher();
        assert!(
            dispatcher
                .register(CommandSpec::new("say", "clash"), Echo)
                .unwrap_err()
                .is_validation()
        );
        assert!(
            dispatcher
                .register(CommandSpec::new("help", "clash"), Echo)
                .is_err()
        );
        assert!(dispatcher.spec("say").is_some());
        assert_eq!(dispatcher.registered_names(), vec!["echo", "fail", "help"]);
    }

    #[test]
    fn spec_repeating_its_own_names_is_rejected() {
        let mut dispatcher = dispatcher();
        let self_alias = CommandSpec::new("list", "List chats").with_alias("LIST");
        assert!(dispatcher.register(self_alias, Echo).unwrap_err().is_validation());
        let twice = CommandSpec::new("list", "List chats")
            .with_alias("ls")
            .with_alias("ls");
        assert!(dispatcher.register(twice, Echo).unwrap_err().is_validation());
        assert!(dispatcher.spec("list").is_none());
        assert!(dispatcher.spec("ls").is_none());

        let fine = CommandSpec::new("list", "List chats").with_alias("ls");
        dispatcher.register(fine, Echo).unwrap();
        assert_eq!(
            dispatcher.registered_names(),
            vec!["echo", "fail", "help", "list"]
        );
    }
}
