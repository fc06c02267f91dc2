//! Markdown export of a conversation.

use std::fs;
use std::path::Path;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::types::Message;
use crate::utils::time::clock_time;

/// Renders a conversation as Markdown.
///
/// The document starts with the title and export time, then has one section
/// per message headed by the sender and the time it was written.  Streaming
/// placeholders are skipped.
pub fn to_markdown(title: &str, messages: &[Message], exported_at: OffsetDateTime) -> String {
    let stamp = exported_at
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| exported_at.date().to_string());
    let mut markdown = format!("# {title}\n\n*Exported on {stamp}*\n\n---\n\n");
    for message in messages.iter().filter(|m| !m.is_streaming()) {
        markdown.push_str(&format!(
            "### **{}** ({})\n\n{}\n\n---\n\n",
            message.sender.label(),
            clock_time(message.created_at),
            message.content
        ));
    }
    markdown
}

/// Suggests a file name for an exported session, e.g. `how-do-i-reverse.md`.
pub fn default_file_name(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "conversation.md".to_string()
    } else {
        format!("{slug}.md")
    }
}

/// Writes an export to `path`, creating parent directories.
pub fn write_markdown(path: &Path, markdown: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| Error::io(format!("cannot create {}", parent.display()), err))?;
    }
    fs::write(path, markdown)
        .map_err(|err| Error::io(format!("cannot write {}", path.display()), err))
}
