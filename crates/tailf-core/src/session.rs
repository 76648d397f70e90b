//! Per-surface engine state.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::annotate::AnnotationState;
use crate::follow::{FollowState, ViewportFollow};
use crate::process::OutputStream;
use crate::source::{BindingKind, SourceBinding};
use crate::splitter::LineSplitter;
use crate::surface::{SurfaceId, ViewportId};

/// Lifetime counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub lines_ingested: u64,
    pub batches: u64,
    pub truncations: u64,
    pub outages: u64,
    /// Held process lines discarded because the hold buffer was full.
    pub held_dropped: u64,
}

/// Process lines that arrived while the session was disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeldBatch {
    pub(crate) arrived: DateTime<FixedOffset>,
    pub(crate) lines: Vec<String>,
}

/// Engine state for one tailed surface.
#[derive(Debug)]
pub struct TailSession {
    id: SurfaceId,
    pub(crate) binding: SourceBinding,
    pub(crate) enabled: bool,
    /// Splits file content and process stdout.
    pub(crate) splitter: LineSplitter,
    /// Splits process stderr.
    pub(crate) err_splitter: LineSplitter,
    pub(crate) annotations: AnnotationState,
    pub(crate) follow: ViewportFollow,
    pub(crate) counters: SessionCounters,
    /// Reason of the outage in progress, if the source is unavailable.
    pub(crate) outage: Option<String>,
    /// Complete lines received while disabled, delivered on the next enable.
    held: VecDeque<HeldBatch>,
    held_lines: usize,
}

impl TailSession {
    /// A disabled session with no source.
    #[must_use]
    pub fn new(id: SurfaceId) -> Self {
        Self {
            id,
            binding: SourceBinding::Foreign,
            enabled: false,
            splitter: LineSplitter::new(),
            err_splitter: LineSplitter::new(),
            annotations: AnnotationState::default(),
            follow: ViewportFollow::new(),
            counters: SessionCounters::default(),
            outage: None,
            held: VecDeque::new(),
            held_lines: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn binding(&self) -> &SourceBinding {
        &self.binding
    }

    #[must_use]
    pub fn annotations(&self) -> &AnnotationState {
        &self.annotations
    }

    #[must_use]
    pub fn follow(&self) -> &ViewportFollow {
        &self.follow
    }

    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Bytes buffered as an unterminated line (stdout for processes).
    #[must_use]
    pub fn partial(&self) -> &[u8] {
        self.splitter.partial()
    }

    pub(crate) fn splitter_for(&mut self, stream: OutputStream) -> &mut LineSplitter {
        match stream {
            OutputStream::Stdout => &mut self.splitter,
            OutputStream::Stderr => &mut self.err_splitter,
        }
    }

    pub(crate) fn reset_splitters(&mut self) {
        self.splitter.reset();
        self.err_splitter.reset();
    }

    /// Flush both unterminated tails as final lines, stdout first.
    pub(crate) fn flush_splitters(&mut self) -> Vec<String> {
        self.splitter
            .flush()
            .into_iter()
            .chain(self.err_splitter.flush())
            .collect()
    }

    /// Hold `lines` until the next enable, keeping at most `cap` lines in
    /// total. Returns how many of the oldest lines were dropped.
    pub(crate) fn hold(
        &mut self,
        arrived: DateTime<FixedOffset>,
        lines: Vec<String>,
        cap: usize,
    ) -> usize {
        if lines.is_empty() {
            return 0;
        }
        self.held_lines += lines.len();
        self.held.push_back(HeldBatch { arrived, lines });

        let mut dropped = 0;
        while self.held_lines > cap {
            let Some(oldest) = self.held.front_mut() else {
                break;
            };
            let excess = (self.held_lines - cap).min(oldest.lines.len());
            oldest.lines.drain(..excess);
            if oldest.lines.is_empty() {
                self.held.pop_front();
            }
            self.held_lines -= excess;
            dropped += excess;
        }
        self.counters.held_dropped += dropped as u64;
        dropped
    }

    pub(crate) fn take_held(&mut self) -> VecDeque<HeldBatch> {
        self.held_lines = 0;
        std::mem::take(&mut self.held)
    }

    pub(crate) fn has_held(&self) -> bool {
        self.held_lines > 0
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let (path, exhausted) = match &self.binding {
            SourceBinding::File(reader) => (Some(reader.path().to_path_buf()), false),
            SourceBinding::Process(process) => (None, process.exhausted),
            SourceBinding::Foreign => (None, false),
        };

        SessionSnapshot {
            surface: self.id,
            enabled: self.enabled,
            binding: self.binding.kind(),
            path,
            offset: self.binding.offset(),
            exhausted,
            partial_len: self.splitter.partial().len() + self.err_splitter.partial().len(),
            held_lines: self.held_lines,
            timestamps: self.annotations.timestamps_enabled(),
            severity: self.annotations.severity_enabled(),
            stamped_lines: self.annotations.stamps().len(),
            unavailable: self.outage.is_some(),
            viewports: self
                .follow
                .states()
                .iter()
                .map(|(&viewport, &state)| ViewportSnapshot { viewport, state })
                .collect(),
            counters: self.counters,
        }
    }
}

/// Follow state of one viewport at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSnapshot {
    pub viewport: ViewportId,
    pub state: FollowState,
}

/// Serializable view of a session for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub surface: SurfaceId,
    pub enabled: bool,
    pub binding: BindingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub exhausted: bool,
    pub partial_len: usize,
    pub held_lines: usize,
    pub timestamps: bool,
    pub severity: bool,
    pub stamped_lines: usize,
    pub unavailable: bool,
    pub viewports: Vec<ViewportSnapshot>,
    pub counters: SessionCounters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileReader;

    #[test]
    fn new_session_is_disabled_and_foreign() {
        let session = TailSession::new(SurfaceId(4));
        assert!(!session.is_enabled());
        assert_eq!(session.binding().kind(), BindingKind::Foreign);
        assert!(session.partial().is_empty());
    }

    #[test]
    fn snapshot_serializes_file_binding() {
        let mut session = TailSession::new(SurfaceId(2));
        session.binding = SourceBinding::File(FileReader::with_offset("/var/log/app.log", 42));
        session.splitter.push(b"half a li");
        session.counters.truncations = 1;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.offset, Some(42));
        assert_eq!(snapshot.partial_len, 9);

        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["binding"], "file");
        assert_eq!(json["path"], "/var/log/app.log");
        assert_eq!(json["counters"]["truncations"], 1);

        let back: SessionSnapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, snapshot);
    }

    fn at(minute: u32) -> DateTime<FixedOffset> {
        use chrono::TimeZone;
        FixedOffset::east_opt(0)
            .expect("offset")
            .with_ymd_and_hms(2025, 3, 1, 9, minute, 0)
            .single()
            .expect("valid time")
    }

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn hold_drops_oldest_lines_past_the_cap() {
        let mut session = TailSession::new(SurfaceId(1));
        assert_eq!(session.hold(at(0), strings(&["a", "b"]), 3), 0);
        assert_eq!(session.hold(at(1), strings(&["c", "d"]), 3), 1);
        assert_eq!(session.snapshot().held_lines, 3);
        assert_eq!(session.counters().held_dropped, 1);

        let held: Vec<HeldBatch> = session.take_held().into_iter().collect();
        assert_eq!(
            held,
            vec![
                HeldBatch {
                    arrived: at(0),
                    lines: strings(&["b"])
                },
                HeldBatch {
                    arrived: at(1),
                    lines: strings(&["c", "d"])
                },
            ]
        );
        assert!(!session.has_held());
    }

    #[test]
    fn stream_splitters_are_independent() {
        let mut session = TailSession::new(SurfaceId(1));
        assert!(session.splitter_for(OutputStream::Stdout).push(b"out-").is_empty());
        assert_eq!(
            session.splitter_for(OutputStream::Stderr).push(b"err\n"),
            strings(&["err"])
        );
        assert_eq!(session.snapshot().partial_len, 4);
        assert_eq!(session.flush_splitters(), strings(&["out-"]));
    }

    #[test]
    fn snapshot_omits_offset_for_foreign() {
        let json = serde_json::to_value(TailSession::new(SurfaceId(1)).snapshot())
            .expect("serialize");
        assert!(json.get("offset").is_none());
        assert!(json.get("path").is_none());
    }
}
