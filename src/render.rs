//! Renderer contract consumed by the session, and a plain-text renderer.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use time::OffsetDateTime;
use time::format_description;
use time::format_description::well_known::Rfc3339;

use crate::error::ArchiveError;
use crate::model::{AttachmentKind, Message};
use crate::window::MessageWindow;

/// Where a rendered batch goes relative to what is already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// Above the current content (older messages).
    Prepend,
    /// Below the current content (newer messages).
    Append,
}

/// Where a single message is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    Timeline,
    Pinned,
    Search,
}

/// Presentation layer driven by the session.
///
/// `window` is passed so implementations can resolve reply references.
pub trait Renderer {
    type Element;

    /// Show `messages` (already oldest first) before or after current content.
    fn render(&mut self, window: &MessageWindow, messages: &[&Message], mode: AppendMode);

    fn render_single(
        &mut self,
        window: &MessageWindow,
        message: &Message,
        context: RenderContext,
    ) -> Self::Element;

    fn clear(&mut self);

    fn set_highlight(&mut self, _id: &str, _on: bool) {}

    fn show_error(&mut self, _error: &ArchiveError) {}
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// Day first, 24 hour clock.
    #[default]
    Default,
    /// Month first, 12 hour clock.
    Us,
    Iso,
}

impl DateFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "us" => Ok(Self::Us),
            "iso" => Ok(Self::Iso),
            _ => bail!("invalid date_format: must be default, us or iso"),
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            DateFormat::Default => "[day]/[month]/[year], [hour]:[minute]:[second]",
            DateFormat::Us => {
                "[month padding:none]/[day padding:none]/[year], [hour repr:12 padding:none]:[minute]:[second] [period]"
            }
            DateFormat::Iso => "[year]-[month]-[day] [hour]:[minute]:[second]",
        }
    }

    /// Format an RFC 3339 timestamp, falling back to the raw text.
    pub fn format_timestamp(self, raw: &str) -> String {
        let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) else {
            return raw.to_string();
        };
        format_description::parse(self.pattern())
            .ok()
            .and_then(|fmt| parsed.format(&fmt).ok())
            .unwrap_or_else(|| raw.to_string())
    }
}

impl std::fmt::Display for DateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            DateFormat::Default => "default",
            DateFormat::Us => "us",
            DateFormat::Iso => "iso",
        };
        write!(f, "{value}")
    }
}

/// Truncate a string to max_chars, adding "..." if truncated
pub fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Short description of a message used in reply previews.
pub fn reference_preview(message: &Message) -> String {
    if !message.content.is_empty() {
        return truncate(&message.content, 50);
    }
    if let Some(attachment) = message.attachments.first() {
        return match attachment.kind() {
            AttachmentKind::Image => "Image",
            AttachmentKind::Video => "Video",
            AttachmentKind::Audio => "Audio",
            AttachmentKind::File => "File",
        }
        .to_string();
    }
    if !message.embeds.is_empty() {
        return "Embed".to_string();
    }
    "Unknown content".to_string()
}

#[derive(Debug, Clone)]
struct Block {
    id: String,
    text: String,
}

/// Renders messages as indented text blocks, kept in display order.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    blocks: VecDeque<Block>,
    highlighted: Option<String>,
    error: Option<String>,
    date_format: DateFormat,
}

impl TerminalRenderer {
    pub fn new(date_format: DateFormat) -> Self {
        Self {
            date_format,
            ..Default::default()
        }
    }

    /// Ids of rendered messages, top to bottom.
    pub fn rendered_ids(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Everything currently shown, as one string.
    pub fn screen(&self) -> String {
        if let Some(error) = &self.error {
            return format!("{error}\n");
        }
        let mut out = String::new();
        for block in &self.blocks {
            let marker = if self.highlighted.as_deref() == Some(block.id.as_str()) {
                ">> "
            } else {
                ""
            };
            for (i, line) in block.text.lines().enumerate() {
                if i == 0 {
                    out.push_str(marker);
                }
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    pub fn format_message(&self, window: &MessageWindow, message: &Message) -> String {
        let when = self.date_format.format_timestamp(&message.timestamp);
        let author = &message.author;
        let mut out = String::new();

        if let Some(reference) = &message.reference {
            match window.get(&reference.message_id) {
                Some(original) => out.push_str(&format!(
                    "  ↪ {}: {}\n",
                    original.author.name,
                    reference_preview(original)
                )),
                None => out.push_str("  ↪ Couldn't load the message\n"),
            }
        }

        if message.is_member_join() {
            out.push_str(&format!("→ @{} joined the server. {when}\n", author.name));
            return out;
        }
        if message.is_boost() {
            out.push_str(&format!("★ @{} just boosted the server! {when}\n", author.name));
            return out;
        }

        let bot = if author.is_bot { " [BOT]" } else { "" };
        let edited = message
            .timestamp_edited
            .as_deref()
            .map(|ts| format!(" (edited {})", self.date_format.format_timestamp(ts)))
            .unwrap_or_default();
        out.push_str(&format!("{}{bot}  {when}{edited}\n", author.name));
        for line in message.content.lines() {
            out.push_str(&format!("  {line}\n"));
        }

        for attachment in &message.attachments {
            let kind = match attachment.kind() {
                AttachmentKind::Image => "image",
                AttachmentKind::Audio => "audio",
                AttachmentKind::Video => "video",
                AttachmentKind::File => "file",
            };
            out.push_str(&format!("  [{kind}] {} {}\n", attachment.file_name, attachment.url));
        }

        for embed in &message.embeds {
            if let Some(embed_author) = &embed.author {
                out.push_str(&format!("  | {}\n", embed_author.name));
            }
            if let Some(title) = &embed.title {
                out.push_str(&format!("  | {title}\n"));
            }
            if let Some(description) = &embed.description {
                for line in description.lines() {
                    out.push_str(&format!("  | {line}\n"));
                }
            }
            for field in &embed.fields {
                out.push_str(&format!("  | {}: {}\n", field.name, field.value));
            }
            if let Some(image) = embed.image.as_ref().or(embed.thumbnail.as_ref()) {
                out.push_str(&format!("  | {}\n", image.url));
            }
            if let Some(footer) = &embed.footer {
                out.push_str(&format!("  | {}\n", footer.text));
            }
        }

        if !message.reactions.is_empty() {
            let reactions: Vec<String> = message
                .reactions
                .iter()
                .map(|r| format!("{} x{}", r.emoji.name, r.count))
                .collect();
            out.push_str(&format!("  ({})\n", reactions.join(", ")));
        }
        out
    }
}

impl Renderer for TerminalRenderer {
    type Element = String;

    fn render(&mut self, window: &MessageWindow, messages: &[&Message], mode: AppendMode) {
        self.error = None;
        let blocks: Vec<Block> = messages
            .iter()
            .map(|m| Block {
                id: m.id.clone(),
                text: self.format_message(window, m),
            })
            .collect();
        match mode {
            AppendMode::Prepend => {
                for block in blocks.into_iter().rev() {
                    self.blocks.push_front(block);
                }
            }
            AppendMode::Append => self.blocks.extend(blocks),
        }
    }

    fn render_single(
        &mut self,
        window: &MessageWindow,
        message: &Message,
        context: RenderContext,
    ) -> String {
        let body = self.format_message(window, message);
        match context {
            RenderContext::Timeline => body,
            RenderContext::Pinned => format!("[pinned {}]\n{body}", message.id),
            RenderContext::Search => format!("[{}]\n{body}", message.id),
        }
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.highlighted = None;
        self.error = None;
    }

    fn set_highlight(&mut self, id: &str, on: bool) {
        if on {
            self.highlighted = Some(id.to_string());
        } else if self.highlighted.as_deref() == Some(id) {
            self.highlighted = None;
        }
    }

    fn show_error(&mut self, error: &ArchiveError) {
        self.blocks.clear();
        self.highlighted = None;
        self.error = Some(format!("{} ({error})", error.user_message()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, Reference};
    use crate::test_utils::{indexed_window, numbered_messages};

    // ===== truncate tests =====

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_unicode() {
        // Truncate by character count, not bytes
        assert_eq!(truncate("日本語テスト", 3), "日本語...");
    }

    // ===== date formats =====

    #[test]
    fn test_date_formats() {
        let ts = "2021-03-04T15:04:05.123+00:00";
        assert_eq!(DateFormat::Default.format_timestamp(ts), "04/03/2021, 15:04:05");
        assert_eq!(DateFormat::Us.format_timestamp(ts), "3/4/2021, 3:04:05 PM");
        assert_eq!(DateFormat::Iso.format_timestamp(ts), "2021-03-04 15:04:05");
        assert_eq!(DateFormat::Iso.format_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn test_date_format_parse() {
        assert_eq!(DateFormat::parse(" ISO ").unwrap(), DateFormat::Iso);
        assert!(DateFormat::parse("rfc").is_err());
    }

    // ===== rendering =====

    #[test]
    fn prepend_and_append_keep_display_order() {
        let window = indexed_window(numbered_messages(6), 100);
        let all = window.messages();
        let mut renderer = TerminalRenderer::new(DateFormat::Iso);
        renderer.render(&window, &[&all[3], &all[4]], AppendMode::Prepend);
        renderer.render(&window, &[&all[1], &all[2]], AppendMode::Prepend);
        renderer.render(&window, &[&all[5]], AppendMode::Append);
        assert_eq!(renderer.rendered_ids(), vec!["2", "3", "4", "5", "6"]);
    }

    #[test]
    fn reply_preview_resolves_through_window() {
        let mut messages = numbered_messages(3);
        messages[0].content = "the original question".to_string();
        messages[2].reference = Some(Reference {
            message_id: "1".to_string(),
            channel_id: None,
        });
        messages[1].reference = Some(Reference {
            message_id: "999".to_string(),
            channel_id: None,
        });
        let window = indexed_window(messages, 100);
        let renderer = TerminalRenderer::new(DateFormat::Iso);

        let text = renderer.format_message(&window, &window.messages()[2]);
        assert!(text.starts_with("  ↪ user1: the original question\n"));
        let text = renderer.format_message(&window, &window.messages()[1]);
        assert!(text.contains("Couldn't load the message"));
    }

    #[test]
    fn reference_preview_by_content_kind() {
        let mut message = numbered_messages(1).remove(0);
        message.content = String::new();
        message.attachments.push(Attachment {
            file_name: "clip.mp4".to_string(),
            ..Default::default()
        });
        assert_eq!(reference_preview(&message), "Video");
        message.attachments.clear();
        assert_eq!(reference_preview(&message), "Unknown content");
        message.content = "x".repeat(60);
        assert_eq!(reference_preview(&message), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn system_messages() {
        let mut messages = numbered_messages(2);
        messages[0].kind = "GuildMemberJoin".to_string();
        messages[1].kind = "8".to_string();
        let window = indexed_window(messages, 100);
        let renderer = TerminalRenderer::new(DateFormat::Iso);
        assert!(renderer.format_message(&window, &window.messages()[0]).contains("joined the server"));
        assert!(renderer.format_message(&window, &window.messages()[1]).contains("boosted the server"));
    }

    #[test]
    fn highlight_and_error_screen() {
        let window = indexed_window(numbered_messages(2), 100);
        let all: Vec<&Message> = window.messages().iter().collect();
        let mut renderer = TerminalRenderer::new(DateFormat::Iso);
        renderer.render(&window, &all, AppendMode::Append);
        renderer.set_highlight("2", true);
        assert!(renderer.screen().contains(">> user2"));
        renderer.set_highlight("2", false);
        assert!(renderer.highlighted().is_none());

        renderer.show_error(&ArchiveError::NotFound("servers/1/0.json".into()));
        assert!(renderer.rendered_ids().is_empty());
        assert!(renderer.screen().starts_with("Not found."));
    }

    #[test]
    fn render_single_contexts() {
        let window = indexed_window(numbered_messages(1), 100);
        let mut renderer = TerminalRenderer::new(DateFormat::Iso);
        let message = &window.messages()[0];
        let pinned = renderer.render_single(&window, message, RenderContext::Pinned);
        assert!(pinned.starts_with("[pinned 1]\n"));
        let plain = renderer.render_single(&window, message, RenderContext::Timeline);
        assert!(plain.starts_with("user1"));
    }
}
