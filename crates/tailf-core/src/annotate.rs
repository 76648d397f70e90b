//! Timestamp and severity annotation.
//!
//! The [`Annotator`] holds the shared, configured transforms (stamp format,
//! keyword matcher, clock). Per-session state lives in [`AnnotationState`]:
//! the two enable flags plus a ledger of every line this session has stamped.
//!
//! A line is stamped at most once. The guard is twofold: the ledger catches
//! stamps this session applied (virtual stamps leave no trace in the text),
//! and [`TimestampFormat::is_stamped`] catches text that already begins with
//! something shaped like a stamp.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::severity::SeverityMatcher;
use crate::surface::{Annotation, Host, Namespace, SurfaceId};
use crate::timestamps::{Clock, SystemClock, TimestampFormat, TimestampStyle};

/// A stamp this session applied to one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampRecord {
    pub text: String,
    /// Prefix written into the content for inline stamps; `None` for virtual.
    pub inline_prefix: Option<String>,
}

/// Per-session annotation flags and stamp ledger.
#[derive(Debug, Clone, Default)]
pub struct AnnotationState {
    timestamps: bool,
    severity: bool,
    stamps: BTreeMap<usize, StampRecord>,
}

impl AnnotationState {
    #[must_use]
    pub fn timestamps_enabled(&self) -> bool {
        self.timestamps
    }

    #[must_use]
    pub fn severity_enabled(&self) -> bool {
        self.severity
    }

    /// Stamps applied by this session, keyed by 0-based line.
    #[must_use]
    pub fn stamps(&self) -> &BTreeMap<usize, StampRecord> {
        &self.stamps
    }

    /// Forget stamps on lines the host no longer retains.
    fn release_before(&mut self, line: usize) {
        if self.stamps.first_key_value().is_some_and(|(&first, _)| first < line) {
            self.stamps = self.stamps.split_off(&line);
        }
    }
}

/// The part of `range` the host still retains.
fn retained<H: Host + ?Sized>(host: &H, surface: SurfaceId, range: Range<usize>) -> Range<usize> {
    let end = range.end.min(host.line_count(surface));
    let start = range.start.max(host.first_retained_line(surface)).min(end);
    start..end
}

/// Configured annotation transforms.
pub struct Annotator {
    format: TimestampFormat,
    highlight: String,
    style: TimestampStyle,
    separator: String,
    matcher: SeverityMatcher,
    clock: Box<dyn Clock>,
}

impl fmt::Debug for Annotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotator")
            .field("format", &self.format.as_str())
            .field("highlight", &self.highlight)
            .field("style", &self.style)
            .field("separator", &self.separator)
            .field("keywords", &self.matcher.keywords().len())
            .finish_non_exhaustive()
    }
}

impl Annotator {
    /// Build from config using the wall clock.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Box<dyn Clock>) -> Result<Self> {
        Ok(Self {
            format: TimestampFormat::new(&config.timestamps.format)?,
            highlight: config.timestamps.highlight.clone(),
            style: config.timestamps.style,
            separator: config.timestamps.separator.clone(),
            matcher: SeverityMatcher::new(&config.severity.keywords)?,
            clock,
        })
    }

    /// Swap in new transforms, keeping the clock. Nothing changes on error.
    pub fn reconfigure(&mut self, config: &Config) -> Result<()> {
        let format = TimestampFormat::new(&config.timestamps.format)?;
        let matcher = SeverityMatcher::new(&config.severity.keywords)?;
        self.format = format;
        self.matcher = matcher;
        self.highlight.clone_from(&config.timestamps.highlight);
        self.style = config.timestamps.style;
        self.separator.clone_from(&config.timestamps.separator);
        Ok(())
    }

    #[must_use]
    pub fn style(&self) -> TimestampStyle {
        self.style
    }

    #[must_use]
    pub fn format(&self) -> &TimestampFormat {
        &self.format
    }

    /// Current time from the configured clock.
    #[must_use]
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Append a batch of complete lines and annotate them.
    ///
    /// All lines of one batch share a single stamp time. Returns the index of
    /// the first appended line.
    pub fn append_batch<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        lines: Vec<String>,
    ) -> usize {
        self.append_batch_at(state, host, surface, lines, &self.clock.now())
    }

    /// [`append_batch`](Self::append_batch) with the stamp time given by the
    /// caller, for lines that arrived earlier than they are appended.
    pub fn append_batch_at<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        mut lines: Vec<String>,
        now: &DateTime<FixedOffset>,
    ) -> usize {
        state.release_before(host.first_retained_line(surface));
        let first = host.line_count(surface);
        if lines.is_empty() {
            return first;
        }

        if state.timestamps && self.style == TimestampStyle::Inline {
            for (i, line) in lines.iter_mut().enumerate() {
                if let Some(record) = self.stamp_inline(line, now) {
                    state.stamps.insert(first + i, record);
                }
            }
        }

        host.append_lines(surface, &lines);
        let range = first..first + lines.len();

        if state.timestamps && self.style == TimestampStyle::Virtual {
            self.stamp_virtual(state, host, surface, range.clone(), now);
        }
        if state.severity {
            self.tag_range(host, surface, range);
        }
        first
    }

    /// Annotate lines someone else already appended, from `first` to the end.
    pub fn annotate_appended<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        first: usize,
    ) {
        state.release_before(host.first_retained_line(surface));
        let range = retained(host, surface, first..host.line_count(surface));
        if range.is_empty() {
            return;
        }
        if state.timestamps {
            let now = self.clock.now();
            self.stamp_range(state, host, surface, range.clone(), &now);
        }
        if state.severity {
            self.tag_range(host, surface, range);
        }
    }

    // =========================================================================
    // Timestamp transform
    // =========================================================================

    /// Start stamping new lines. With `backfill`, also stamp every existing
    /// line that is not stamped yet.
    pub fn enable_timestamps<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) {
        state.timestamps = true;
        if !backfill {
            return;
        }
        let now = self.clock.now();
        let total = host.line_count(surface);
        let stamped = self.stamp_range(state, host, surface, 0..total, &now);
        debug!(%surface, stamped, total, "Timestamp backfill complete");
    }

    /// Stop stamping and remove every stamp this session applied.
    pub fn disable_timestamps<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
    ) {
        state.timestamps = false;
        host.clear_annotations(surface, Namespace::Timestamps);

        let ledger = std::mem::take(&mut state.stamps);
        if ledger.values().all(|r| r.inline_prefix.is_none()) {
            return;
        }

        let kept = retained(host, surface, 0..usize::MAX);
        let mut content = host.lines(surface, kept.clone());
        let mut changed = false;
        for (line, record) in ledger.range(kept.start..) {
            let (Some(prefix), Some(text)) = (
                &record.inline_prefix,
                content.get_mut(line - kept.start),
            ) else {
                continue;
            };
            if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                *text = rest.to_string();
                changed = true;
            }
        }

        if changed {
            host.replace_all_lines(surface, content);
            if state.severity {
                self.rescan_severity(host, surface);
            }
        }
    }

    /// Flip timestamping; returns the new state.
    pub fn toggle_timestamps<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) -> bool {
        if state.timestamps {
            self.disable_timestamps(state, host, surface);
        } else {
            self.enable_timestamps(state, host, surface, backfill);
        }
        state.timestamps
    }

    /// Stamp every unstamped line in `range` in the configured style.
    /// Returns how many lines were stamped.
    fn stamp_range<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        range: Range<usize>,
        now: &DateTime<FixedOffset>,
    ) -> usize {
        match self.style {
            TimestampStyle::Virtual => self.stamp_virtual(state, host, surface, range, now),
            TimestampStyle::Inline => {
                let kept = retained(host, surface, 0..usize::MAX);
                let mut content = host.lines(surface, kept.clone());
                let mut stamped = 0;
                for index in range.start.max(kept.start)..range.end {
                    if state.stamps.contains_key(&index) {
                        continue;
                    }
                    let Some(line) = content.get_mut(index - kept.start) else {
                        break;
                    };
                    if let Some(record) = self.stamp_inline(line, now) {
                        state.stamps.insert(index, record);
                        stamped += 1;
                    }
                }
                if stamped > 0 {
                    host.replace_all_lines(surface, content);
                    if state.severity {
                        self.rescan_severity(host, surface);
                    }
                }
                stamped
            }
        }
    }

    fn stamp_virtual<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        range: Range<usize>,
        now: &DateTime<FixedOffset>,
    ) -> usize {
        let text = self.format.render(now);
        let range = retained(host, surface, range);
        let start = range.start;
        let lines = host.lines(surface, range);
        let mut stamped = 0;
        for (offset, line) in lines.iter().enumerate() {
            let index = start + offset;
            if state.stamps.contains_key(&index) || self.format.is_stamped(line) {
                continue;
            }
            host.set_span_annotation(
                surface,
                index,
                0..0,
                Annotation::Timestamp {
                    text: text.clone(),
                    highlight: self.highlight.clone(),
                },
            );
            state.stamps.insert(
                index,
                StampRecord {
                    text: text.clone(),
                    inline_prefix: None,
                },
            );
            stamped += 1;
        }
        stamped
    }

    /// Prefix `line` with a stamp unless it already starts with one.
    fn stamp_inline(&self, line: &mut String, now: &DateTime<FixedOffset>) -> Option<StampRecord> {
        if self.format.is_stamped(line) {
            return None;
        }
        let text = self.format.render(now);
        let prefix = format!("{text}{}", self.separator);
        line.insert_str(0, &prefix);
        Some(StampRecord {
            text,
            inline_prefix: Some(prefix),
        })
    }

    // =========================================================================
    // Severity transform
    // =========================================================================

    /// Start tagging new lines. With `backfill`, retag the whole surface.
    pub fn enable_severity<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) {
        state.severity = true;
        if backfill {
            self.rescan_severity(host, surface);
        }
    }

    /// Stop tagging and clear the severity namespace.
    pub fn disable_severity<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
    ) {
        state.severity = false;
        host.clear_annotations(surface, Namespace::Severity);
    }

    pub fn toggle_severity<H: Host + ?Sized>(
        &self,
        state: &mut AnnotationState,
        host: &mut H,
        surface: SurfaceId,
        backfill: bool,
    ) -> bool {
        if state.severity {
            self.disable_severity(state, host, surface);
        } else {
            self.enable_severity(state, host, surface, backfill);
        }
        state.severity
    }

    fn rescan_severity<H: Host + ?Sized>(&self, host: &mut H, surface: SurfaceId) {
        host.clear_annotations(surface, Namespace::Severity);
        let total = host.line_count(surface);
        let tagged = self.tag_range(host, surface, 0..total);
        debug!(%surface, tagged, total, "Severity rescan complete");
    }

    fn tag_range<H: Host + ?Sized>(
        &self,
        host: &mut H,
        surface: SurfaceId,
        range: Range<usize>,
    ) -> usize {
        let range = retained(host, surface, range);
        let start = range.start;
        let lines = host.lines(surface, range);
        let mut tagged = 0;
        for (offset, line) in lines.iter().enumerate() {
            for found in self.matcher.scan(line) {
                host.set_span_annotation(
                    surface,
                    start + offset,
                    found.span,
                    Annotation::Severity {
                        category: found.category,
                        keyword: found.keyword,
                    },
                );
                tagged += 1;
            }
        }
        tagged
    }
}
