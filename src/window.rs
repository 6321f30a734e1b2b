//! The message window: indexed chunk messages plus the visible range.
//!
//! `loaded` holds positions into `messages` in processing order, newest
//! first, so position 0 of `loaded` is the newest message of the chunk. The
//! visible window is `loaded[backward..filled]`. Paging older advances
//! `forward` by a page, paging newer retreats `backward`. While ingest is
//! still running `filled` can trail `forward`; [`MessageWindow::catch_up`]
//! hands out the gap as later slices index it, so no position below
//! `forward` is ever skipped. Everything handed out for display is reversed
//! into chronological order.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::model::{Author, Message};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Which way a slice of `loaded` extends from its starting position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward older messages: `[start, start + count)`.
    Older,
    /// Toward newer messages: `[start - count, start)`.
    Newer,
}

/// A range of `loaded` positions that was just added to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: usize,
    pub end: usize,
}

impl Page {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Default)]
pub struct MessageWindow {
    messages: Vec<Message>,
    /// id -> (chunk position, `loaded` position)
    by_id: HashMap<String, (usize, usize)>,
    loaded: Vec<usize>,
    member_keys: HashSet<(String, String)>,
    members: Vec<Author>,
    pinned: Vec<usize>,
    processed: usize,
    forward: usize,
    /// End of `loaded` handed out on the older side; never above `forward`.
    filled: usize,
    backward: usize,
    page_size: usize,
}

impl MessageWindow {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Default::default()
        }
    }

    /// Window over a chunk's messages; nothing is indexed until ingested.
    pub fn with_messages(messages: Vec<Message>, page_size: usize) -> Self {
        Self {
            messages,
            ..Self::new(page_size)
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// All messages of the chunk, in chunk (chronological) order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn total(&self) -> usize {
        self.messages.len()
    }

    pub fn indexed(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_fully_indexed(&self) -> bool {
        self.processed == self.messages.len()
    }

    /// Register the message at chunk position `pos` (ingest only).
    pub(crate) fn index_message(&mut self, pos: usize) {
        let Some(message) = self.messages.get(pos) else {
            return;
        };
        self.processed += 1;
        if self.by_id.contains_key(&message.id) {
            warn!(id = %message.id, "duplicate message id in chunk, keeping first");
            return;
        }
        self.by_id.insert(message.id.clone(), (pos, self.loaded.len()));
        self.loaded.push(pos);

        let author = &message.author;
        if self
            .member_keys
            .insert((author.name.clone(), author.discriminator.clone()))
        {
            self.members.push(author.clone());
        }
        if message.is_pinned {
            self.pinned.push(pos);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).map(|&(pos, _)| &self.messages[pos])
    }

    /// Position of `id` in `loaded`, if indexed.
    pub fn loaded_position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).map(|&(_, idx)| idx)
    }

    /// Indexed ids in processing order (newest first).
    pub fn loaded_ids(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(|&pos| self.messages[pos].id.as_str())
    }

    pub fn members(&self) -> &[Author] {
        &self.members
    }

    /// Pinned messages in processing order (newest first).
    pub fn pinned(&self) -> Vec<&Message> {
        self.pinned.iter().map(|&pos| &self.messages[pos]).collect()
    }

    pub fn forward_cursor(&self) -> usize {
        self.forward
    }

    pub fn backward_cursor(&self) -> usize {
        self.backward
    }

    /// Range of `loaded` currently shown.
    pub fn visible(&self) -> Page {
        let end = self.filled.min(self.loaded.len());
        Page {
            start: self.backward.min(end),
            end,
        }
    }

    pub fn is_visible(&self, id: &str) -> bool {
        let visible = self.visible();
        self.loaded_position(id)
            .is_some_and(|idx| (visible.start..visible.end).contains(&idx))
    }

    /// Visible messages in display order.
    pub fn visible_messages(&self) -> Vec<&Message> {
        self.page_messages(self.visible())
    }

    /// Messages of a `loaded` range, oldest first.
    pub fn page_messages(&self, page: Page) -> Vec<&Message> {
        let end = page.end.min(self.loaded.len());
        let start = page.start.min(end);
        self.loaded[start..end]
            .iter()
            .rev()
            .map(|&pos| &self.messages[pos])
            .collect()
    }

    /// Up to `count` messages from `start` in `direction`, oldest first.
    pub fn window_slice(&self, start: usize, count: usize, direction: Direction) -> Vec<&Message> {
        let page = match direction {
            Direction::Older => Page {
                start,
                end: start.saturating_add(count),
            },
            Direction::Newer => Page {
                start: start.saturating_sub(count),
                end: start,
            },
        };
        self.page_messages(page)
    }

    /// Show the newest page and reset both cursors.
    pub fn initial_page(&mut self) -> Page {
        self.backward = 0;
        self.forward = self.page_size;
        self.filled = self.page_size.min(self.loaded.len());
        self.visible()
    }

    /// The window promises older messages that have not been indexed yet.
    fn has_gap(&self) -> bool {
        self.filled < self.forward && self.filled < self.loaded.len()
    }

    pub fn can_extend_older(&self) -> bool {
        self.has_gap() || (self.forward > 0 && self.forward < self.loaded.len())
    }

    pub fn can_extend_newer(&self) -> bool {
        self.backward > 0
    }

    /// Hand out positions indexed since the window's older edge was last
    /// filled, up to `forward`; `None` when nothing is pending.
    pub fn catch_up(&mut self) -> Option<Page> {
        if !self.has_gap() {
            return None;
        }
        let start = self.filled;
        let end = self.forward.min(self.loaded.len());
        self.filled = end;
        Some(Page { start, end })
    }

    /// Add the next older page above the window; `None` when exhausted.
    pub fn extend_older(&mut self) -> Option<Page> {
        if let Some(page) = self.catch_up() {
            return Some(page);
        }
        if !self.can_extend_older() {
            return None;
        }
        let start = self.forward;
        self.forward += self.page_size;
        let end = self.forward.min(self.loaded.len());
        self.filled = end;
        Some(Page { start, end })
    }

    /// Add the next newer page below the window; `None` when exhausted.
    pub fn extend_newer(&mut self) -> Option<Page> {
        if !self.can_extend_newer() {
            return None;
        }
        let end = self.backward.min(self.loaded.len());
        let start = self.backward.saturating_sub(self.page_size);
        self.backward = start;
        Some(Page { start, end })
    }

    /// Rebuild the window around the `loaded` position `idx`: half a page on
    /// each side, clamped to the indexed range and always containing `idx`.
    pub fn center_on(&mut self, idx: usize) -> Page {
        let half = self.page_size / 2;
        let start = idx.saturating_sub(half);
        let end = (idx + half).max(idx + 1).min(self.loaded.len());
        self.backward = start;
        self.forward = end;
        self.filled = end;
        self.visible()
    }
}
