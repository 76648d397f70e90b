//! Terminal host: prints each ingested batch to a writer.
//!
//! Lines are written at `batch_complete`, after the engine has annotated
//! them, so stamps and severity tags are always known when a line is printed.
//! Printed lines are not kept.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;

use serde::Serialize;
use tailf_core::severity::Severity;
use tailf_core::surface::{
    Annotation, AnnotationSink, ContentSurface, Namespace, SpanAnnotation, SurfaceId, ViewportHost,
    ViewportId,
};
use tracing::debug;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text, optionally colored.
    Text { color: bool },
    /// One JSON object per line.
    Json,
}

fn severity_color(category: Severity) -> &'static str {
    match category {
        Severity::Trace => "\x1b[35m",
        Severity::Debug => "\x1b[34m",
        Severity::Info => "\x1b[32m",
        Severity::Warn => "\x1b[33m",
        Severity::Error => "\x1b[1;31m",
    }
}

#[derive(Debug, Serialize)]
struct JsonTag<'a> {
    keyword: &'a str,
    category: Severity,
    start: usize,
    end: usize,
}

#[derive(Debug, Serialize)]
struct JsonLine<'a> {
    line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    severity: Vec<JsonTag<'a>>,
}

/// Render one line with its annotations.
#[must_use]
pub fn render_line(
    index: usize,
    text: &str,
    annotations: &[&SpanAnnotation],
    format: OutputFormat,
) -> String {
    let timestamp = annotations.iter().find_map(|span| match &span.annotation {
        Annotation::Timestamp { text, .. } => Some(text.as_str()),
        Annotation::Severity { .. } => None,
    });

    let mut tags: Vec<(Range<usize>, &str, Severity)> = annotations
        .iter()
        .filter_map(|span| match &span.annotation {
            Annotation::Severity { category, keyword } => {
                Some((span.columns.clone(), keyword.as_str(), *category))
            }
            Annotation::Timestamp { .. } => None,
        })
        .collect();
    tags.sort_by_key(|(range, _, _)| range.start);

    match format {
        OutputFormat::Json => {
            let line = JsonLine {
                line: index,
                timestamp,
                text,
                severity: tags
                    .iter()
                    .map(|(range, keyword, category)| JsonTag {
                        keyword,
                        category: *category,
                        start: range.start,
                        end: range.end,
                    })
                    .collect(),
            };
            serde_json::to_string(&line).unwrap_or_default()
        }
        OutputFormat::Text { color } => {
            let mut out = String::with_capacity(text.len() + 32);
            if let Some(stamp) = timestamp {
                if color {
                    out.push_str(DIM);
                    out.push_str(stamp);
                    out.push_str(RESET);
                } else {
                    out.push_str(stamp);
                }
                out.push(' ');
            }

            if !color {
                out.push_str(text);
                return out;
            }

            let mut cursor = 0;
            for (range, _, category) in &tags {
                let Some(before) = text.get(cursor..range.start) else {
                    continue;
                };
                let Some(word) = text.get(range.clone()) else {
                    continue;
                };
                out.push_str(before);
                out.push_str(severity_color(*category));
                out.push_str(word);
                out.push_str(RESET);
                cursor = range.end;
            }
            out.push_str(text.get(cursor..).unwrap_or_default());
            out
        }
    }
}

/// Host that prints one surface to a terminal.
///
/// Lines and their annotations are kept only until they are printed at
/// `batch_complete`, then released. `line_count` still counts every line
/// ever appended, and `first_retained_line` tells the engine where the
/// retained window starts.
pub struct TerminalHost<W: Write> {
    surface: SurfaceId,
    out: W,
    format: OutputFormat,
    released: usize,
    pending: Vec<String>,
    annotations: BTreeMap<usize, Vec<SpanAnnotation>>,
    broken: bool,
}

impl<W: Write> TerminalHost<W> {
    pub fn new(out: W, format: OutputFormat, surface: SurfaceId) -> Self {
        Self {
            surface,
            out,
            format,
            released: 0,
            pending: Vec::new(),
            annotations: BTreeMap::new(),
            broken: false,
        }
    }

    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.out
    }

    fn flush_pending(&mut self) -> std::io::Result<()> {
        for (offset, text) in self.pending.iter().enumerate() {
            let index = self.released + offset;
            let spans: Vec<&SpanAnnotation> = self
                .annotations
                .get(&index)
                .map(|spans| spans.iter().collect())
                .unwrap_or_default();
            let rendered = render_line(index, text, &spans, self.format);
            writeln!(self.out, "{rendered}")?;
        }
        self.out.flush()
    }

    fn release_pending(&mut self) {
        self.released += self.pending.len();
        self.pending.clear();
        self.annotations.clear();
    }
}

impl<W: Write> ContentSurface for TerminalHost<W> {
    fn append_lines(&mut self, surface: SurfaceId, lines: &[String]) {
        if surface == self.surface {
            self.pending.extend_from_slice(lines);
        }
    }

    fn line_count(&self, surface: SurfaceId) -> usize {
        if surface == self.surface {
            self.released + self.pending.len()
        } else {
            0
        }
    }

    fn lines(&self, surface: SurfaceId, range: Range<usize>) -> Vec<String> {
        if surface != self.surface {
            return Vec::new();
        }
        let end = range.end.min(self.line_count(surface)).max(self.released);
        let start = range.start.max(self.released).min(end);
        self.pending[start - self.released..end - self.released].to_vec()
    }

    fn replace_all_lines(&mut self, surface: SurfaceId, lines: Vec<String>) {
        if surface == self.surface {
            self.pending = lines;
            let end = self.released + self.pending.len();
            self.annotations.retain(|&line, _| line < end);
        }
    }

    fn first_retained_line(&self, surface: SurfaceId) -> usize {
        if surface == self.surface {
            self.released
        } else {
            0
        }
    }

    fn batch_complete(&mut self, surface: SurfaceId) {
        if surface != self.surface {
            return;
        }
        if !self.broken {
            if let Err(err) = self.flush_pending() {
                debug!(error = %err, "Output closed, no longer printing");
                self.broken = true;
            }
        }
        self.release_pending();
    }
}

impl<W: Write> ViewportHost for TerminalHost<W> {
    fn viewports_for(&self, _surface: SurfaceId) -> Vec<ViewportId> {
        Vec::new()
    }

    fn cursor_line(&self, _viewport: ViewportId) -> usize {
        1
    }

    fn set_cursor_line(&mut self, _viewport: ViewportId, _line: usize) {}

    fn visible_height(&self, _viewport: ViewportId) -> usize {
        1
    }
}

impl<W: Write> AnnotationSink for TerminalHost<W> {
    fn set_span_annotation(
        &mut self,
        surface: SurfaceId,
        line: usize,
        columns: Range<usize>,
        annotation: Annotation,
    ) {
        if surface != self.surface || line < self.released {
            return;
        }
        self.annotations
            .entry(line)
            .or_default()
            .push(SpanAnnotation {
                line,
                columns,
                annotation,
            });
    }

    fn clear_annotations(&mut self, surface: SurfaceId, namespace: Namespace) {
        if surface != self.surface {
            return;
        }
        self.annotations.retain(|_, spans| {
            spans.retain(|span| span.annotation.namespace() != namespace);
            !spans.is_empty()
        });
    }
}
