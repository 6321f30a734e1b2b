//! Viewer session: owns the window for the active chunk and drives loading,
//! ingest, scrolling and jumps.
//!
//! All window state lives here; nothing is global. Each chunk load gets a new
//! generation. Load tickets and ingest tasks remember the generation they
//! belong to, and anything tagged with an older generation is discarded
//! without touching the window.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::archive::{Archive, ChannelAccess};
use crate::error::{ArchiveError, ErrorKind};
use crate::ingest::{DEFAULT_BATCH_SIZE, IngestTask};
use crate::model::{Chunk, ChunkChannel, ChunkMap, Guild};
use crate::render::{AppendMode, Renderer};
use crate::window::{DEFAULT_PAGE_SIZE, MessageWindow};

/// How long a jumped-to message stays highlighted, with scroll paging off.
pub const HIGHLIGHT_DURATION: Duration = Duration::from_secs(1);

/// Scroll position (top / height) at or below which older messages load.
pub const TOP_THRESHOLD: f64 = 0.15;
/// Scroll position at or above which newer messages load.
pub const BOTTOM_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Populated,
    Error { kind: ErrorKind, message: String },
}

/// Handed out by [`Session::begin_load`]; redeemed by [`Session::finish_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Installed,
    /// A newer load started before this one finished; nothing changed.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Ignored,
    ExtendedOlder(usize),
    ExtendedNewer(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    /// Already on screen; highlighted in place.
    Highlighted,
    /// Window rebuilt around the message, then highlighted.
    Recentered,
}

/// Metadata of the chunk being shown.
#[derive(Debug, Clone)]
pub struct ActiveChunk {
    pub channel: ChunkChannel,
    pub map: ChunkMap,
    pub guild: Option<Guild>,
}

#[derive(Debug)]
struct Highlight {
    id: String,
    until: Instant,
}

#[derive(Debug)]
pub struct Session {
    generation: u64,
    state: ViewState,
    window: MessageWindow,
    active: Option<ActiveChunk>,
    ingest: Option<IngestTask>,
    scroll_enabled: bool,
    highlight: Option<Highlight>,
    page_size: usize,
    batch_size: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_BATCH_SIZE)
    }
}

impl Session {
    pub fn new(page_size: usize, batch_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            generation: 0,
            state: ViewState::Idle,
            window: MessageWindow::new(page_size),
            active: None,
            ingest: None,
            scroll_enabled: false,
            highlight: None,
            page_size,
            batch_size: batch_size.max(1),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    pub fn active(&self) -> Option<&ActiveChunk> {
        self.active.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingest.is_some()
    }

    pub fn scroll_enabled(&self) -> bool {
        self.scroll_enabled
    }

    /// Start a load: invalidate everything from the previous one and clear
    /// the window in a single step.
    pub fn begin_load<R: Renderer>(&mut self, renderer: &mut R) -> LoadTicket {
        self.generation += 1;
        self.window = MessageWindow::new(self.page_size);
        self.active = None;
        self.ingest = None;
        self.scroll_enabled = false;
        self.highlight = None;
        self.state = ViewState::Loading;
        renderer.clear();
        debug!(generation = self.generation, "load started");
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Install a fetched chunk (or its failure) for `ticket`.
    ///
    /// On success the first ingest slice runs immediately and the newest page
    /// is painted; the rest is indexed by [`Session::pump`].
    pub fn finish_load<R: Renderer>(
        &mut self,
        ticket: LoadTicket,
        result: Result<Chunk, ArchiveError>,
        renderer: &mut R,
    ) -> Result<LoadOutcome, ArchiveError> {
        if ticket.generation != self.generation {
            debug!(
                stale = ticket.generation,
                current = self.generation,
                "dropping stale load"
            );
            return Ok(LoadOutcome::Stale);
        }

        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                self.state = ViewState::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                renderer.show_error(&err);
                return Err(err);
            }
        };

        info!(
            channel = %chunk.channel.id,
            chunk = chunk.map.current,
            messages = chunk.messages.len(),
            "chunk loaded"
        );
        self.active = Some(ActiveChunk {
            channel: chunk.channel,
            map: chunk.map,
            guild: chunk.guild,
        });
        let total = chunk.messages.len();
        self.window = MessageWindow::with_messages(chunk.messages, self.page_size);
        self.ingest = Some(IngestTask::new(self.generation, total, self.batch_size));
        self.state = ViewState::Populated;
        self.pump(renderer);
        Ok(LoadOutcome::Installed)
    }

    /// Fetch and install a chunk in one go.
    pub fn load_chunk<R: Renderer>(
        &mut self,
        archive: &Archive,
        channel: &ChannelAccess,
        chunk_index: u32,
        renderer: &mut R,
    ) -> Result<LoadOutcome, ArchiveError> {
        let ticket = self.begin_load(renderer);
        let result = archive.fetch_chunk(&channel.channel_id, chunk_index, &channel.key);
        self.finish_load(ticket, result, renderer)
    }

    /// Run one ingest slice. Returns whether more slices remain.
    ///
    /// Messages the slice indexes inside the window's promised range are
    /// rendered right away.
    pub fn pump<R: Renderer>(&mut self, renderer: &mut R) -> bool {
        let Some(task) = self.ingest.as_mut() else {
            return false;
        };
        if task.generation() != self.generation {
            self.ingest = None;
            return false;
        }

        let report = task.step(&mut self.window);
        if report.first {
            self.first_paint(renderer);
        } else if let Some(page) = self.window.catch_up() {
            let messages = self.window.page_messages(page);
            renderer.render(&self.window, &messages, AppendMode::Prepend);
        }
        if !report.remaining {
            self.ingest = None;
        }
        report.remaining
    }

    /// Run every remaining ingest slice.
    pub fn drain<R: Renderer>(&mut self, renderer: &mut R) {
        while self.pump(renderer) {}
    }

    fn first_paint<R: Renderer>(&mut self, renderer: &mut R) {
        let page = self.window.initial_page();
        let messages = self.window.page_messages(page);
        renderer.clear();
        renderer.render(&self.window, &messages, AppendMode::Prepend);
        self.scroll_enabled = true;
    }

    /// React to the scroll position `ratio` (scroll top / scroll height).
    pub fn on_scroll<R: Renderer>(&mut self, ratio: f64, renderer: &mut R) -> ScrollOutcome {
        if !self.scroll_enabled {
            return ScrollOutcome::Ignored;
        }
        if ratio <= TOP_THRESHOLD {
            if let Some(page) = self.window.extend_older() {
                let messages = self.window.page_messages(page);
                renderer.render(&self.window, &messages, AppendMode::Prepend);
                return ScrollOutcome::ExtendedOlder(page.len());
            }
        }
        if ratio >= BOTTOM_THRESHOLD {
            if let Some(page) = self.window.extend_newer() {
                let messages = self.window.page_messages(page);
                renderer.render(&self.window, &messages, AppendMode::Append);
                return ScrollOutcome::ExtendedNewer(page.len());
            }
        }
        ScrollOutcome::Ignored
    }

    /// Bring `message_id` into view and highlight it until `now +
    /// HIGHLIGHT_DURATION`. Scroll paging is off while the highlight lasts.
    pub fn jump_to<R: Renderer>(
        &mut self,
        message_id: &str,
        now: Instant,
        renderer: &mut R,
    ) -> Result<JumpOutcome, ArchiveError> {
        if self.state != ViewState::Populated {
            return Err(ArchiveError::NotFound(message_id.to_string()));
        }
        if self.window.get(message_id).is_none() && self.ingest.is_some() {
            self.drain(renderer);
        }
        let Some(idx) = self.window.loaded_position(message_id) else {
            return Err(ArchiveError::NotFound(message_id.to_string()));
        };

        if let Some(previous) = self.highlight.take() {
            renderer.set_highlight(&previous.id, false);
        }

        let outcome = if self.window.is_visible(message_id) {
            JumpOutcome::Highlighted
        } else {
            let page = self.window.center_on(idx);
            let messages = self.window.page_messages(page);
            renderer.clear();
            renderer.render(&self.window, &messages, AppendMode::Append);
            JumpOutcome::Recentered
        };

        renderer.set_highlight(message_id, true);
        self.scroll_enabled = false;
        self.highlight = Some(Highlight {
            id: message_id.to_string(),
            until: now + HIGHLIGHT_DURATION,
        });
        Ok(outcome)
    }

    /// Clear an expired highlight and turn scroll paging back on.
    pub fn tick<R: Renderer>(&mut self, now: Instant, renderer: &mut R) {
        let expired = self
            .highlight
            .as_ref()
            .is_some_and(|highlight| now >= highlight.until);
        if expired {
            if let Some(highlight) = self.highlight.take() {
                renderer.set_highlight(&highlight.id, false);
            }
            self.scroll_enabled = self.state == ViewState::Populated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{DateFormat, TerminalRenderer};
    use crate::test_utils::{chunk_of, numbered_messages};

    fn loaded(n: usize, page: usize, batch: usize) -> (Session, TerminalRenderer) {
        let mut session = Session::new(page, batch);
        let mut renderer = TerminalRenderer::new(DateFormat::Iso);
        let ticket = session.begin_load(&mut renderer);
        let outcome = session
            .finish_load(ticket, Ok(chunk_of("100", numbered_messages(n))), &mut renderer)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Installed);
        (session, renderer)
    }

    fn rendered(renderer: &TerminalRenderer) -> Vec<u32> {
        renderer.rendered_ids().iter().map(|id| id.parse().unwrap()).collect()
    }

    #[test]
    fn first_paint_after_first_slice() {
        let (session, renderer) = loaded(250, 100, 100);
        assert_eq!(session.state(), &ViewState::Populated);
        assert!(session.is_ingesting());
        assert_eq!(session.window().indexed(), 100);
        assert!(session.scroll_enabled());
        assert_eq!(rendered(&renderer), (151..=250).collect::<Vec<_>>());
    }

    #[test]
    fn scroll_before_background_ingest_is_noop() {
        let (mut session, mut renderer) = loaded(250, 100, 100);
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);
        assert_eq!(session.window().forward_cursor(), 100);

        assert!(session.pump(&mut renderer));
        assert_eq!(session.on_scroll(0.1, &mut renderer), ScrollOutcome::ExtendedOlder(100));
        assert_eq!(session.window().forward_cursor(), 200);
    }

    #[test]
    fn scroll_scenario_250() {
        let (mut session, mut renderer) = loaded(250, 100, 100);
        session.drain(&mut renderer);
        assert!(!session.is_ingesting());

        assert_eq!(session.on_scroll(0.5, &mut renderer), ScrollOutcome::Ignored);
        assert_eq!(session.on_scroll(0.15, &mut renderer), ScrollOutcome::ExtendedOlder(100));
        assert_eq!(rendered(&renderer), (51..=250).collect::<Vec<_>>());
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::ExtendedOlder(50));
        assert_eq!(rendered(&renderer), (1..=250).collect::<Vec<_>>());
        assert_eq!(session.window().forward_cursor(), 300);

        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);
        assert_eq!(session.window().forward_cursor(), 300);
        // backward cursor is 0 after the initial page
        assert_eq!(session.on_scroll(1.0, &mut renderer), ScrollOutcome::Ignored);
    }

    #[test]
    fn stale_ticket_is_ignored() {
        let mut session = Session::new(100, 100);
        let mut renderer = TerminalRenderer::new(DateFormat::Iso);
        let first = session.begin_load(&mut renderer);
        let second = session.begin_load(&mut renderer);

        let outcome = session
            .finish_load(first, Ok(chunk_of("1", numbered_messages(10))), &mut renderer)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Stale);
        assert_eq!(session.state(), &ViewState::Loading);
        assert_eq!(session.window().total(), 0);

        session
            .finish_load(second, Ok(chunk_of("2", numbered_messages(3))), &mut renderer)
            .unwrap();
        assert_eq!(session.active().unwrap().channel.id, "2");
        assert_eq!(session.window().total(), 3);
    }

    #[test]
    fn new_load_cancels_running_ingest() {
        let (mut session, mut renderer) = loaded(250, 100, 10);
        assert!(session.is_ingesting());
        let ticket = session.begin_load(&mut renderer);
        assert!(!session.is_ingesting());
        assert!(!session.pump(&mut renderer));
        assert_eq!(session.window().indexed(), 0);

        session
            .finish_load(ticket, Ok(chunk_of("2", numbered_messages(5))), &mut renderer)
            .unwrap();
        session.drain(&mut renderer);
        assert_eq!(session.window().indexed(), 5);
        assert_eq!(rendered(&renderer), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn failed_load_sets_error_state() {
        let (mut session, mut renderer) = loaded(20, 100, 100);
        let ticket = session.begin_load(&mut renderer);
        let err = session
            .finish_load(
                ticket,
                Err(ArchiveError::Decryption("bad padding".into())),
                &mut renderer,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decryption);
        assert!(matches!(
            session.state(),
            ViewState::Error { kind: ErrorKind::Decryption, .. }
        ));
        assert_eq!(session.window().total(), 0);
        assert!(session.active().is_none());
        assert!(renderer.error().is_some());
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);
    }

    #[test]
    fn jump_to_visible_message_highlights() {
        let (mut session, mut renderer) = loaded(250, 100, 100);
        let now = Instant::now();
        let outcome = session.jump_to("200", now, &mut renderer).unwrap();
        assert_eq!(outcome, JumpOutcome::Highlighted);
        assert_eq!(renderer.highlighted(), Some("200"));
        assert!(!session.scroll_enabled());
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);

        session.tick(now + Duration::from_millis(500), &mut renderer);
        assert_eq!(renderer.highlighted(), Some("200"));
        session.tick(now + HIGHLIGHT_DURATION, &mut renderer);
        assert_eq!(renderer.highlighted(), None);
        assert!(session.scroll_enabled());
    }

    #[test]
    fn jump_to_unindexed_message_drains_and_recenters() {
        let (mut session, mut renderer) = loaded(250, 100, 100);
        let now = Instant::now();
        let outcome = session.jump_to("100", now, &mut renderer).unwrap();
        assert_eq!(outcome, JumpOutcome::Recentered);
        assert!(!session.is_ingesting());
        assert_eq!(rendered(&renderer), (51..=150).collect::<Vec<_>>());
        assert_eq!(renderer.highlighted(), Some("100"));
        assert_eq!(session.window().backward_cursor(), 100);

        session.tick(now + HIGHLIGHT_DURATION, &mut renderer);
        assert_eq!(session.on_scroll(0.9, &mut renderer), ScrollOutcome::ExtendedNewer(100));
        assert_eq!(rendered(&renderer), (51..=250).collect::<Vec<_>>());
        assert_eq!(session.on_scroll(0.05, &mut renderer), ScrollOutcome::ExtendedOlder(50));
        assert_eq!(rendered(&renderer), (1..=250).collect::<Vec<_>>());
    }

    #[test]
    fn jump_to_other_chunk_is_not_found_and_keeps_window() {
        let (mut session, mut renderer) = loaded(250, 100, 100);
        session.drain(&mut renderer);
        let before = session.window().visible();
        let rendered_before = rendered(&renderer);

        let err = session.jump_to("9999", Instant::now(), &mut renderer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(session.window().visible(), before);
        assert_eq!(rendered(&renderer), rendered_before);
        assert!(session.scroll_enabled());
    }

    fn assert_each_rendered_once(renderer: &TerminalRenderer, n: u32) {
        let ids = rendered(renderer);
        assert_eq!(ids, (1..=n).collect::<Vec<_>>(), "display order or coverage");
    }

    fn scroll_to_top(session: &mut Session, renderer: &mut TerminalRenderer) {
        while session.on_scroll(0.0, renderer) != ScrollOutcome::Ignored {}
    }

    fn pump_and_scroll(session: &mut Session, renderer: &mut TerminalRenderer) {
        loop {
            let more = session.pump(renderer);
            let scrolled = session.on_scroll(0.0, renderer);
            if !more && scrolled == ScrollOutcome::Ignored {
                break;
            }
        }
    }

    #[test]
    fn small_batches_fill_the_first_page() {
        let (mut session, mut renderer) = loaded(250, 100, 30);
        assert_eq!(rendered(&renderer), (221..=250).collect::<Vec<_>>());
        assert!(session.pump(&mut renderer));
        assert_eq!(rendered(&renderer), (191..=250).collect::<Vec<_>>());

        session.drain(&mut renderer);
        assert_eq!(rendered(&renderer), (151..=250).collect::<Vec<_>>());
        scroll_to_top(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);
        assert_eq!(session.window().forward_cursor(), 300);
    }

    #[test]
    fn small_batches_with_scrolls_between_slices() {
        let (mut session, mut renderer) = loaded(250, 100, 50);
        pump_and_scroll(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);

        let (mut session, mut renderer) = loaded(250, 100, 30);
        pump_and_scroll(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);
    }

    #[test]
    fn scroll_waits_for_unindexed_page() {
        let (mut session, mut renderer) = loaded(250, 100, 50);
        // the first page is only half indexed and nothing older exists yet
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);
        assert!(session.pump(&mut renderer));
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::Ignored);
        assert!(session.pump(&mut renderer));
        // page 2 is only partly indexed; the rest arrives with the next slice
        assert_eq!(session.on_scroll(0.0, &mut renderer), ScrollOutcome::ExtendedOlder(50));
        assert_eq!(rendered(&renderer), (101..=250).collect::<Vec<_>>());
        assert!(session.pump(&mut renderer));
        assert_eq!(rendered(&renderer), (51..=250).collect::<Vec<_>>());
    }

    #[test]
    fn large_batches_page_evenly() {
        let (mut session, mut renderer) = loaded(250, 40, 100);
        assert_eq!(rendered(&renderer), (211..=250).collect::<Vec<_>>());
        session.drain(&mut renderer);
        assert_eq!(rendered(&renderer).len(), 40);
        scroll_to_top(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);

        let (mut session, mut renderer) = loaded(250, 40, 100);
        pump_and_scroll(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);

        let (mut session, mut renderer) = loaded(250, 40, 70);
        pump_and_scroll(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);
    }

    #[test]
    fn recenter_then_scroll_both_ways_with_small_batches() {
        let (mut session, mut renderer) = loaded(250, 100, 30);
        let now = Instant::now();
        session.jump_to("40", now, &mut renderer).unwrap();
        session.tick(now + HIGHLIGHT_DURATION, &mut renderer);
        while session.on_scroll(1.0, &mut renderer) != ScrollOutcome::Ignored {}
        scroll_to_top(&mut session, &mut renderer);
        assert_each_rendered_once(&renderer, 250);
    }

    #[test]
    fn empty_chunk_populates_without_messages() {
        let (session, renderer) = loaded(0, 100, 100);
        assert_eq!(session.state(), &ViewState::Populated);
        assert!(!session.is_ingesting());
        assert!(renderer.rendered_ids().is_empty());
    }
}
