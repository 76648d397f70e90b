//! Capabilities the engine consumes from its host.
//!
//! The engine never owns text or windows. A host (an editor, a terminal, or the
//! in-memory [`MemoryHost`]) exposes content surfaces, the viewports showing
//! them, and a way to attach non-destructive span annotations.
//!
//! Conventions:
//! - content line indices are 0-based (`lines(0..n)`)
//! - cursor lines reported by viewports are 1-based, like an editor's
//! - annotation columns are byte ranges within a line

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::severity::Severity;

/// Opaque identity of a content surface (a buffer, a pane, a log view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface:{}", self.0)
    }
}

/// Opaque identity of a viewport showing some surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewportId(pub u64);

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewport:{}", self.0)
    }
}

/// A user moved the cursor or scrolled a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationEvent {
    pub viewport: ViewportId,
    pub surface: SurfaceId,
}

/// Annotation namespaces, cleared independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Timestamps,
    Severity,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamps => write!(f, "tailf.timestamps"),
            Self::Severity => write!(f, "tailf.severity"),
        }
    }
}

/// Payload attached to a span of a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    /// Arrival stamp rendered beside the line (zero-width span at column 0).
    Timestamp { text: String, highlight: String },
    /// A severity keyword match.
    Severity { category: Severity, keyword: String },
}

impl Annotation {
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Timestamp { .. } => Namespace::Timestamps,
            Self::Severity { .. } => Namespace::Severity,
        }
    }
}

/// Text storage for a surface.
pub trait ContentSurface {
    /// Append lines at the end of the surface.
    fn append_lines(&mut self, surface: SurfaceId, lines: &[String]);

    /// Number of lines appended so far, including released ones.
    fn line_count(&self, surface: SurfaceId) -> usize;

    /// Lines in `range` (0-based, end-exclusive). Out-of-range and released
    /// indices are clamped away.
    fn lines(&self, surface: SurfaceId, range: Range<usize>) -> Vec<String>;

    /// Replace every retained line, from
    /// [`first_retained_line`](Self::first_retained_line) to the end.
    fn replace_all_lines(&mut self, surface: SurfaceId, lines: Vec<String>);

    /// Lines before this index have been released by the host (printed and
    /// dropped, say) and are never read again.
    fn first_retained_line(&self, _surface: SurfaceId) -> usize {
        0
    }

    /// Called once after every ingestion batch has been appended and annotated.
    fn batch_complete(&mut self, _surface: SurfaceId) {}
}

/// Windows showing surfaces.
pub trait ViewportHost {
    /// Viewports currently displaying `surface`.
    fn viewports_for(&self, surface: SurfaceId) -> Vec<ViewportId>;

    /// 1-based cursor line.
    fn cursor_line(&self, viewport: ViewportId) -> usize;

    /// Move the cursor (and thereby the scroll position) to a 1-based line.
    fn set_cursor_line(&mut self, viewport: ViewportId, line: usize);

    /// Number of text rows the viewport can show.
    fn visible_height(&self, viewport: ViewportId) -> usize;
}

/// Non-destructive span annotations.
pub trait AnnotationSink {
    fn set_span_annotation(
        &mut self,
        surface: SurfaceId,
        line: usize,
        columns: Range<usize>,
        annotation: Annotation,
    );

    fn clear_annotations(&mut self, surface: SurfaceId, namespace: Namespace);
}

/// Everything the engine needs from a host.
pub trait Host: ContentSurface + ViewportHost + AnnotationSink {}

impl<T> Host for T where T: ContentSurface + ViewportHost + AnnotationSink {}

// =============================================================================
// In-memory host
// =============================================================================

/// An annotation placed on a surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanAnnotation {
    pub line: usize,
    pub columns: Range<usize>,
    pub annotation: Annotation,
}

#[derive(Debug, Default)]
struct MemorySurface {
    lines: Vec<String>,
    annotations: Vec<SpanAnnotation>,
    batches: u64,
}

#[derive(Debug, Clone, Copy)]
struct MemoryViewport {
    surface: SurfaceId,
    cursor_line: usize,
    height: usize,
}

/// Host that keeps everything in memory.
///
/// Used by the CLI renderer and throughout the tests.
#[derive(Debug, Default)]
pub struct MemoryHost {
    surfaces: HashMap<SurfaceId, MemorySurface>,
    viewports: HashMap<ViewportId, MemoryViewport>,
    next_viewport: u64,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a surface with initial content.
    pub fn create_surface(&mut self, surface: SurfaceId, lines: Vec<String>) {
        self.surfaces.insert(
            surface,
            MemorySurface {
                lines,
                ..MemorySurface::default()
            },
        );
    }

    /// Drop a surface and every viewport showing it.
    pub fn remove_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
        self.viewports.retain(|_, vp| vp.surface != surface);
    }

    /// Open a viewport on `surface` with the cursor on the last line.
    pub fn open_viewport(&mut self, surface: SurfaceId, height: usize) -> ViewportId {
        self.next_viewport += 1;
        let id = ViewportId(self.next_viewport);
        let cursor_line = self.line_count(surface).max(1);
        self.viewports.insert(
            id,
            MemoryViewport {
                surface,
                cursor_line,
                height,
            },
        );
        id
    }

    pub fn close_viewport(&mut self, viewport: ViewportId) {
        self.viewports.remove(&viewport);
    }

    /// Full content of a surface.
    #[must_use]
    pub fn content(&self, surface: SurfaceId) -> &[String] {
        self.surfaces
            .get(&surface)
            .map_or(&[][..], |s| s.lines.as_slice())
    }

    /// All annotations on a surface, in insertion order.
    #[must_use]
    pub fn annotations(&self, surface: SurfaceId) -> &[SpanAnnotation] {
        self.surfaces
            .get(&surface)
            .map_or(&[][..], |s| s.annotations.as_slice())
    }

    /// Annotations of one namespace, sorted by line then column.
    #[must_use]
    pub fn annotations_in(&self, surface: SurfaceId, namespace: Namespace) -> Vec<SpanAnnotation> {
        let mut spans: Vec<SpanAnnotation> = self
            .annotations(surface)
            .iter()
            .filter(|span| span.annotation.namespace() == namespace)
            .cloned()
            .collect();
        spans.sort_by_key(|span| (span.line, span.columns.start));
        spans
    }

    /// Annotations for one line.
    #[must_use]
    pub fn annotations_on(&self, surface: SurfaceId, line: usize) -> Vec<&SpanAnnotation> {
        self.annotations(surface)
            .iter()
            .filter(|span| span.line == line)
            .collect()
    }

    /// Number of completed ingestion batches seen for a surface.
    #[must_use]
    pub fn batches(&self, surface: SurfaceId) -> u64 {
        self.surfaces.get(&surface).map_or(0, |s| s.batches)
    }
}

impl ContentSurface for MemoryHost {
    fn append_lines(&mut self, surface: SurfaceId, lines: &[String]) {
        self.surfaces
            .entry(surface)
            .or_default()
            .lines
            .extend_from_slice(lines);
    }

    fn line_count(&self, surface: SurfaceId) -> usize {
        self.surfaces.get(&surface).map_or(0, |s| s.lines.len())
    }

    fn lines(&self, surface: SurfaceId, range: Range<usize>) -> Vec<String> {
        let content = self.content(surface);
        let end = range.end.min(content.len());
        let start = range.start.min(end);
        content[start..end].to_vec()
    }

    fn replace_all_lines(&mut self, surface: SurfaceId, lines: Vec<String>) {
        self.surfaces.entry(surface).or_default().lines = lines;
    }

    fn batch_complete(&mut self, surface: SurfaceId) {
        self.surfaces.entry(surface).or_default().batches += 1;
    }
}

impl ViewportHost for MemoryHost {
    fn viewports_for(&self, surface: SurfaceId) -> Vec<ViewportId> {
        let mut ids: Vec<ViewportId> = self
            .viewports
            .iter()
            .filter(|(_, vp)| vp.surface == surface)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn cursor_line(&self, viewport: ViewportId) -> usize {
        self.viewports.get(&viewport).map_or(1, |vp| vp.cursor_line)
    }

    fn set_cursor_line(&mut self, viewport: ViewportId, line: usize) {
        if let Some(vp) = self.viewports.get_mut(&viewport) {
            vp.cursor_line = line.max(1);
        }
    }

    fn visible_height(&self, viewport: ViewportId) -> usize {
        self.viewports.get(&viewport).map_or(1, |vp| vp.height)
    }
}

impl AnnotationSink for MemoryHost {
    fn set_span_annotation(
        &mut self,
        surface: SurfaceId,
        line: usize,
        columns: Range<usize>,
        annotation: Annotation,
    ) {
        self.surfaces
            .entry(surface)
            .or_default()
            .annotations
            .push(SpanAnnotation {
                line,
                columns,
                annotation,
            });
    }

    fn clear_annotations(&mut self, surface: SurfaceId, namespace: Namespace) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.annotations
                .retain(|span| span.annotation.namespace() != namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_clamps_out_of_range() {
        let mut host = MemoryHost::new();
        let s = SurfaceId(1);
        host.create_surface(s, vec!["a".into(), "b".into()]);
        assert_eq!(host.lines(s, 1..10), vec!["b".to_string()]);
        assert!(host.lines(s, 5..10).is_empty());
    }

    #[test]
    fn clear_annotations_only_touches_namespace() {
        let mut host = MemoryHost::new();
        let s = SurfaceId(1);
        host.create_surface(s, vec!["ERROR x".into()]);
        host.set_span_annotation(
            s,
            0,
            0..0,
            Annotation::Timestamp {
                text: "t".into(),
                highlight: "Comment".into(),
            },
        );
        host.set_span_annotation(
            s,
            0,
            0..5,
            Annotation::Severity {
                category: Severity::Error,
                keyword: "ERROR".into(),
            },
        );

        host.clear_annotations(s, Namespace::Severity);
        assert_eq!(host.annotations(s).len(), 1);
        assert_eq!(
            host.annotations(s)[0].annotation.namespace(),
            Namespace::Timestamps
        );
    }

    #[test]
    fn viewports_are_scoped_to_their_surface() {
        let mut host = MemoryHost::new();
        let a = host.open_viewport(SurfaceId(1), 10);
        let _b = host.open_viewport(SurfaceId(2), 10);
        assert_eq!(host.viewports_for(SurfaceId(1)), vec![a]);
        host.remove_surface(SurfaceId(1));
        assert!(host.viewports_for(SurfaceId(1)).is_empty());
    }
}
