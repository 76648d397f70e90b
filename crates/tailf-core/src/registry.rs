//! Session registry: surface identity to engine state.
//!
//! The registry is an explicit object; nothing here is global. Every entry
//! point takes the host and the surface id it acts on. Ingestion for every
//! binding kind funnels into one pipeline:
//!
//! ```text
//! bytes ──► LineSplitter ──► lines ──► Annotator::append_batch ──► host
//!                                                 │
//!                                                 ▼
//!                                  ViewportFollow::follow_new_content
//!                                                 │
//!                                                 ▼
//!                                       host.batch_complete()
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::annotate::Annotator;
use crate::config::{Config, ConfigPatch, PausedOffsetPolicy};
use crate::error::{Error, Result};
use crate::process::OutputStream;
use crate::session::{SessionSnapshot, TailSession};
use crate::source::{FileReader, FileSystem, ProcessBinding, ReadOutcome, SourceBinding};
use crate::surface::{ContentSurface, Host, NavigationEvent, SurfaceId, ViewportHost};
use crate::timestamps::Clock;

/// Marker appended after the followed file shrank.
pub const TRUNCATION_MARKER: &str = "[file truncated; following from start]";

/// Marker appended when a followed process exits.
#[must_use]
pub fn exit_marker(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("[process exited with status {code}]"),
        None => "[process terminated by signal]".to_string(),
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Bytes were read; `lines` complete lines were appended.
    Ingested { bytes: usize, lines: usize },
    NoChange,
    /// The file shrank and the offset was reset.
    Truncated,
    /// The file is missing or unreadable.
    Unavailable,
    /// The session is disabled; nothing was appended.
    Paused,
    /// The session is not file-backed.
    NotPolled,
}

/// Registry of tail sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    config: Config,
    annotator: Annotator,
    sessions: HashMap<SurfaceId, TailSession>,
}

impl SessionRegistry {
    /// Registry stamping with the wall clock.
    pub fn new(config: Config) -> Result<Self> {
        let annotator = Annotator::from_config(&config)?;
        Ok(Self {
            config,
            annotator,
            sessions: HashMap::new(),
        })
    }

    pub fn with_clock(config: Config, clock: Box<dyn Clock>) -> Result<Self> {
        let annotator = Annotator::with_clock(&config, clock)?;
        Ok(Self {
            config,
            annotator,
            sessions: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Merge `patch` into the active configuration. Later calls override
    /// earlier ones key by key. On error nothing changes.
    pub fn configure(&mut self, patch: &ConfigPatch) -> Result<()> {
        let next = self.config.merged(patch)?;
        self.annotator.reconfigure(&next)?;
        self.config = next;
        debug!(?patch, "Configuration updated");
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.sessions.contains_key(&surface)
    }

    #[must_use]
    pub fn session(&self, surface: SurfaceId) -> Option<&TailSession> {
        self.sessions.get(&surface)
    }

    /// Registered surfaces in ascending order.
    #[must_use]
    pub fn surfaces(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session_mut(&mut self, surface: SurfaceId) -> &mut TailSession {
        self.sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Enable following. Creates the session if needed, delivers lines held
    /// while disabled (stamped with their arrival time), and pins every
    /// viewport to the bottom.
    pub fn enable<H: Host + ?Sized>(&mut self, host: &mut H, surface: SurfaceId) {
        let session = self
            .sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface));
        if !session.enabled {
            info!(%surface, binding = ?session.binding.kind(), "Follow enabled");
        }
        session.enabled = true;

        for batch in session.take_held() {
            ingest_lines(&self.annotator, session, host, batch.lines, &batch.arrived);
        }

        let total = host.line_count(surface);
        session.follow.pin_all(host, surface, total);
    }

    /// Disable following without discarding state. Unknown surfaces are a no-op.
    pub fn disable(&mut self, surface: SurfaceId) {
        if let Some(session) = self.sessions.get_mut(&surface) {
            if session.enabled {
                info!(%surface, "Follow disabled");
            }
            session.enabled = false;
        }
    }

    /// Flip the enabled flag; returns the new value.
    pub fn toggle<H: Host + ?Sized>(&mut self, host: &mut H, surface: SurfaceId) -> bool {
        if self.sessions.get(&surface).is_some_and(|s| s.enabled) {
            self.disable(surface);
            false
        } else {
            self.enable(host, surface);
            true
        }
    }

    /// Drop a session entirely. Returns whether it existed.
    pub fn teardown(&mut self, surface: SurfaceId) -> bool {
        let removed = self.sessions.remove(&surface).is_some();
        if removed {
            info!(%surface, "Session torn down");
        }
        removed
    }

    // =========================================================================
    // Source binding
    // =========================================================================

    /// Bind `surface` to a file. Unless `from_start`, reading begins at the
    /// file's current end so only new content is shown.
    pub fn attach_file<F: FileSystem + ?Sized>(
        &mut self,
        fs: &F,
        surface: SurfaceId,
        path: impl Into<PathBuf>,
        from_start: bool,
    ) {
        let path = path.into();
        let offset = if from_start {
            0
        } else {
            fs.stat(&path)
                .ok()
                .filter(|stat| stat.exists)
                .map_or(0, |stat| stat.size)
        };
        info!(%surface, path = %path.display(), offset, "Attached file source");

        let session = self.session_mut(surface);
        session.binding = SourceBinding::File(FileReader::with_offset(path, offset));
        session.reset_splitters();
        session.outage = None;
    }

    /// Bind `surface` to a process whose output arrives through
    /// [`on_chunk`](Self::on_chunk) and [`on_exit`](Self::on_exit).
    pub fn attach_process(&mut self, surface: SurfaceId, handle: u64) {
        info!(%surface, handle, "Attached process source");
        let session = self.session_mut(surface);
        session.binding = SourceBinding::Process(ProcessBinding {
            handle,
            exhausted: false,
        });
        session.reset_splitters();
    }

    /// Mark `surface` as filled by someone else; see
    /// [`on_external_append`](Self::on_external_append).
    pub fn attach_foreign(&mut self, surface: SurfaceId) {
        let session = self.session_mut(surface);
        session.binding = SourceBinding::Foreign;
        session.reset_splitters();
    }

    // =========================================================================
    // Annotation commands
    // =========================================================================

    pub fn timestamps_enable<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) {
        let session = self
            .sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface));
        self.annotator
            .enable_timestamps(&mut session.annotations, host, surface, backfill);
    }

    pub fn timestamps_disable<H: Host + ?Sized>(&mut self, host: &mut H, surface: SurfaceId) {
        if let Some(session) = self.sessions.get_mut(&surface) {
            self.annotator
                .disable_timestamps(&mut session.annotations, host, surface);
        }
    }

    pub fn timestamps_toggle<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) -> bool {
        let session = self
            .sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface));
        self.annotator
            .toggle_timestamps(&mut session.annotations, host, surface, backfill)
    }

    pub fn severity_hl_enable<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) {
        let session = self
            .sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface));
        self.annotator
            .enable_severity(&mut session.annotations, host, surface, backfill);
    }

    pub fn severity_hl_disable<H: Host + ?Sized>(&mut self, host: &mut H, surface: SurfaceId) {
        if let Some(session) = self.sessions.get_mut(&surface) {
            self.annotator
                .disable_severity(&mut session.annotations, host, surface);
        }
    }

    pub fn severity_hl_toggle<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) -> bool {
        let session = self
            .sessions
            .entry(surface)
            .or_insert_with(|| TailSession::new(surface));
        self.annotator
            .toggle_severity(&mut session.annotations, host, surface, backfill)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Recompute the follow state of the viewport that moved.
    pub fn on_navigation<H: ContentSurface + ViewportHost + ?Sized>(
        &mut self,
        host: &H,
        event: NavigationEvent,
    ) {
        let Some(session) = self.sessions.get_mut(&event.surface) else {
            return;
        };
        session.follow.on_navigation(
            event.viewport,
            host.cursor_line(event.viewport),
            host.line_count(event.surface),
            host.visible_height(event.viewport),
        );
    }

    /// Poll a file-backed session once.
    pub fn tick<H: Host + ?Sized, F: FileSystem + ?Sized>(
        &mut self,
        host: &mut H,
        fs: &F,
        surface: SurfaceId,
    ) -> Result<TickOutcome> {
        let max_bytes = self.config.follow.max_read_bytes;
        let policy = self.config.follow.paused_offset;
        let session = self
            .sessions
            .get_mut(&surface)
            .ok_or(Error::UnknownSurface(surface))?;

        let SourceBinding::File(reader) = &mut session.binding else {
            return Ok(TickOutcome::NotPolled);
        };

        if !session.enabled {
            if policy == PausedOffsetPolicy::Skip {
                reader.skip_to_end(fs);
                session.splitter.reset();
            }
            trace!(%surface, ?policy, "Tick on disabled session");
            return Ok(TickOutcome::Paused);
        }

        match reader.poll(fs, max_bytes) {
            ReadOutcome::Data(bytes) => {
                let offset = reader.offset();
                session.mark_available();
                let lines = session.splitter.push(&bytes);
                let count = lines.len();
                debug!(%surface, bytes = bytes.len(), lines = count, offset, "Read appended bytes");
                let now = self.annotator.now();
                ingest_lines(&self.annotator, session, host, lines, &now);
                Ok(TickOutcome::Ingested {
                    bytes: bytes.len(),
                    lines: count,
                })
            }
            ReadOutcome::NoChange => {
                session.mark_available();
                Ok(TickOutcome::NoChange)
            }
            ReadOutcome::Truncated {
                previous_offset,
                size,
            } => {
                session.mark_available();
                session.splitter.reset();
                session.counters.truncations += 1;
                info!(%surface, previous_offset, size, "File truncated, following from start");
                let now = self.annotator.now();
                ingest_lines(
                    &self.annotator,
                    session,
                    host,
                    vec![TRUNCATION_MARKER.to_string()],
                    &now,
                );
                Ok(TickOutcome::Truncated)
            }
            ReadOutcome::Unavailable { reason } => {
                if session.outage.is_none() {
                    let path = reader.path().display().to_string();
                    warn!(%surface, %path, %reason, "Source unavailable, will keep polling");
                    session.counters.outages += 1;
                    session.outage = Some(reason);
                }
                Ok(TickOutcome::Unavailable)
            }
        }
    }

    /// Feed a chunk of process output read from `stream`. Each stream is
    /// split into lines on its own.
    ///
    /// Chunks for unknown, non-process or exhausted sessions are dropped.
    /// While disabled, complete lines are held (or discarded under
    /// [`PausedOffsetPolicy::Skip`]).
    pub fn on_chunk<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        stream: OutputStream,
        bytes: &[u8],
    ) {
        let policy = self.config.follow.paused_offset;
        let cap = self.config.follow.max_held_lines;
        let Some(session) = self.sessions.get_mut(&surface) else {
            trace!(%surface, "Chunk for unknown surface dropped");
            return;
        };
        let SourceBinding::Process(process) = &session.binding else {
            trace!(%surface, "Chunk for non-process session dropped");
            return;
        };
        if process.exhausted {
            debug!(%surface, "Chunk after process exit dropped");
            return;
        }

        let lines = session.splitter_for(stream).push(bytes);
        let now = self.annotator.now();
        if session.enabled {
            ingest_lines(&self.annotator, session, host, lines, &now);
        } else if policy == PausedOffsetPolicy::Hold {
            let dropped = session.hold(now, lines, cap);
            if dropped > 0 {
                debug!(%surface, dropped, cap, "Hold buffer full, dropped oldest lines");
            }
        } else {
            session.reset_splitters();
        }
    }

    /// The process behind `surface` exited. Any unterminated output becomes a
    /// final line, followed by one exit marker. Later exits are ignored.
    ///
    /// A disabled session keeps the marker until the next enable, under
    /// either paused policy.
    pub fn on_exit<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        code: Option<i32>,
    ) {
        let policy = self.config.follow.paused_offset;
        let cap = self.config.follow.max_held_lines;
        let Some(session) = self.sessions.get_mut(&surface) else {
            return;
        };
        let SourceBinding::Process(process) = &mut session.binding else {
            return;
        };
        if process.exhausted {
            return;
        }
        process.exhausted = true;
        info!(%surface, handle = process.handle, ?code, "Process exited");

        let mut lines = session.flush_splitters();
        if !session.enabled && policy == PausedOffsetPolicy::Skip {
            lines.clear();
        }
        lines.push(exit_marker(code));

        let now = self.annotator.now();
        if session.enabled {
            ingest_lines(&self.annotator, session, host, lines, &now);
        } else {
            session.hold(now, lines, cap);
        }
    }

    /// Lines were appended to `surface` by someone else, starting at
    /// `first_new_line` (0-based). Annotates them and applies follow.
    pub fn on_external_append<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        first_new_line: usize,
    ) {
        let Some(session) = self.sessions.get_mut(&surface) else {
            return;
        };
        if !session.enabled {
            return;
        }
        self.annotator
            .annotate_appended(&mut session.annotations, host, surface, first_new_line);
        let total = host.line_count(surface);
        let appended = total.saturating_sub(first_new_line);
        session.counters.lines_ingested += appended as u64;
        session.follow.follow_new_content(host, surface, total);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self, surface: SurfaceId) -> Option<SessionSnapshot> {
        self.sessions.get(&surface).map(TailSession::snapshot)
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.surfaces()
            .into_iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Whether every session is a process binding that has exited.
    #[must_use]
    pub fn all_sources_ended(&self) -> bool {
        !self.sessions.is_empty()
            && self
                .sessions
                .values()
                .all(|s| s.binding.at_end() && !s.has_held())
    }
}

impl TailSession {
    fn mark_available(&mut self) {
        if let Some(reason) = self.outage.take() {
            info!(surface = %self.id(), %reason, "Source available again");
        }
    }
}

/// Append, annotate and follow one batch of complete lines that arrived at
/// `arrived`.
fn ingest_lines<H: Host + ?Sized>(
    annotator: &Annotator,
    session: &mut TailSession,
    host: &mut H,
    lines: Vec<String>,
    arrived: &DateTime<FixedOffset>,
) {
    if lines.is_empty() {
        return;
    }
    let surface = session.id();
    let count = lines.len();
    let first = annotator.append_batch_at(&mut session.annotations, host, surface, lines, arrived);
    let total = host.line_count(surface);
    let scrolled = session.follow.follow_new_content(host, surface, total);

    session.counters.lines_ingested += count as u64;
    session.counters.batches += 1;
    host.batch_complete(surface);
    trace!(%surface, first, count, scrolled, "Batch applied");
}
