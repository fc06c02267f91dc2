//! Commands that only need the session store.

use std::path::PathBuf;

use crate::commands::{Arity, CommandContext, CommandDispatcher, CommandHandler, CommandSpec};
use crate::error::{Error, Result};
use crate::export::{default_file_name, to_markdown, write_markdown};
use crate::search::{SearchFilter, SearchQuery, excerpt, search};
use crate::store::SessionStore;
use crate::types::{Message, SessionId};
use crate::utils::time::{now, relative_time};

const EXCERPT_WIDTH: usize = 60;

/// Registers `/clear`, `/new`, `/history`, `/open`, `/delete`, `/export` and
/// `/search`.  Exports without an explicit path land in `export_dir`.
pub fn register_builtins(dispatcher: &mut CommandDispatcher, export_dir: PathBuf) -> Result<()> {
    dispatcher.register(
        CommandSpec::new("clear", "Clear the conversation history"),
        ClearCommand,
    )?;
    dispatcher.register(
        CommandSpec::new("new", "Start a new chat").with_alias("new_chat"),
        NewCommand,
    )?;
    dispatcher.register(
        CommandSpec::new("history", "List saved chats").with_alias("sessions"),
        HistoryCommand,
    )?;
    dispatcher.register(
        CommandSpec::new("open", "Switch to a saved chat by id prefix")
            .with_args("<id>", Arity::exactly(1)),
        OpenCommand,
    )?;
    dispatcher.register(
        CommandSpec::new("delete", "Delete a saved chat by id prefix")
            .with_args("<id>", Arity::exactly(1)),
        DeleteCommand,
    )?;
    dispatcher.register(
        CommandSpec::new("export", "Export this chat as Markdown")
            .with_args("[path]", Arity::between(0, 1)),
        ExportCommand { export_dir },
    )?;
    dispatcher.register(
        CommandSpec::new("search", "Search all chats (filter:user|ai|code)")
            .with_args("<query...>", Arity::at_least(1))
            .with_alias("find"),
        SearchCommand,
    )?;
    Ok(())
}

/// `/clear`
pub struct ClearCommand;

#[async_trait::async_trait]
impl CommandHandler for ClearCommand {
    async fn execute(&self, _: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        ctx.store.clear_messages(&ctx.session_id);
        Ok(vec![Message::system("Conversation cleared.")])
    }
}

/// `/new`
pub struct NewCommand;

#[async_trait::async_trait]
impl CommandHandler for NewCommand {
    async fn execute(&self, _: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let id = ctx.store.create_session();
        Ok(vec![Message::system(format!("Started a new chat ({}).", short(&id)))])
    }
}

/// `/history`
pub struct HistoryCommand;

#[async_trait::async_trait]
impl CommandHandler for HistoryCommand {
    async fn execute(&self, _: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let sessions = ctx.store.list_sessions();
        if sessions.is_empty() {
            return Ok(vec![Message::system("No saved chats.")]);
        }
        let current = ctx.store.peek_current_session_id().cloned();
        let at = now();
        let mut text = String::from("Saved chats:");
        for summary in sessions {
            let marker = if current.as_ref() == Some(&summary.id) {
                '*'
            } else {
                ' '
            };
            text.push_str(&format!(
                "\n{marker} {}  {}  ({} messages, {})",
                short(&summary.id),
                summary.title,
                summary.message_count,
                relative_time(at, summary.last_modified)
            ));
        }
        Ok(vec![Message::system(text)])
    }
}

/// `/open <id>`
pub struct OpenCommand;

#[async_trait::async_trait]
impl CommandHandler for OpenCommand {
    async fn execute(&self, args: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let id = resolve(ctx.store, &args[0])?;
        ctx.store.set_current_session_id(id.clone());
        Ok(vec![Message::system(format!(
            "Switched to \"{}\".",
            title_of(ctx.store, &id)
        ))])
    }
}

/// `/delete <id>`
pub struct DeleteCommand;

#[async_trait::async_trait]
impl CommandHandler for DeleteCommand {
    async fn execute(&self, args: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let id = resolve(ctx.store, &args[0])?;
        let title = title_of(ctx.store, &id);
        ctx.store.delete_session(&id);
        Ok(vec![Message::system(format!("Deleted \"{title}\"."))])
    }
}

/// `/export [path]`
pub struct ExportCommand {
    export_dir: PathBuf,
}

impl ExportCommand {
    /// Creates the command; relative or missing paths resolve in `export_dir`.
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }
}

#[async_trait::async_trait]
impl CommandHandler for ExportCommand {
    async fn execute(&self, args: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let title = title_of(ctx.store, &ctx.session_id);
        let messages = ctx.store.load_messages(&ctx.session_id);
        if messages.is_empty() {
            return Err(Error::invalid_state("nothing to export yet"));
        }
        let path = match args.first() {
            Some(path) => self.export_dir.join(path),
            None => self.export_dir.join(default_file_name(&title)),
        };
        write_markdown(&path, &to_markdown(&title, &messages, now()))?;
        tracing::info!(session = %ctx.session_id, path = %path.display(), "exported session");
        Ok(vec![Message::system(format!(
            "Exported {} messages to {}",
            messages.len(),
            path.display()
        ))])
    }
}

/// `/search <query...>`, with an optional `filter:<all|user|ai|code>` token.
pub struct SearchCommand;

#[async_trait::async_trait]
impl CommandHandler for SearchCommand {
    async fn execute(&self, args: &[String], ctx: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let mut filter = SearchFilter::All;
        let mut words = Vec::new();
        for arg in args {
            match arg.strip_prefix("filter:") {
                Some(name) => filter = name.parse()?,
                None => words.push(arg.as_str()),
            }
        }
        if words.is_empty() {
            return Err(Error::validation("search needs some text", Some("query".to_string())));
        }
        let text = words.join(" ");
        let query = SearchQuery::new(text.clone()).with_filter(filter);
        let hits = search(ctx.store, Some(&ctx.session_id), &query);
        if hits.is_empty() {
            return Ok(vec![Message::system(format!("No messages match \"{text}\"."))]);
        }
        let mut out = format!("{} result(s) for \"{text}\" ({filter}):", hits.len());
        for hit in hits {
            let place = if hit.in_current_session {
                "this chat".to_string()
            } else {
                format!("{} {}", short(&hit.session_id), hit.session_title)
            };
            out.push_str(&format!(
                "\n  [{place}] {}: {}",
                hit.message.sender.label(),
                excerpt(&hit.message.content, &text, EXCERPT_WIDTH)
            ));
        }
        Ok(vec![Message::system(out)])
    }
}

fn resolve(store: &SessionStore, prefix: &str) -> Result<SessionId> {
    let mut matches = store.resolve_prefix(prefix);
    match matches.len() {
        0 => Err(Error::not_found(
            "no saved chat with that id",
            Some("session".to_string()),
            Some(prefix.to_string()),
        )),
        1 => Ok(matches.remove(0)),
        n => Err(Error::validation(
            format!("{n} chats start with {prefix:?}; type more of the id"),
            Some("id".to_string()),
        )),
    }
}

fn title_of(store: &SessionStore, id: &SessionId) -> String {
    store
        .summary(id)
        .map(|summary| summary.title.clone())
        .unwrap_or_else(|| crate::types::DEFAULT_TITLE.to_string())
}

fn short(id: &SessionId) -> &str {
    let s = id.as_str();
    s.get(..8).unwrap_or(s)
}
