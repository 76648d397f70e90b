//! End-to-end tailing of real files on disk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{FixedOffset, TimeZone};
use tailf_core::config::Config;
use tailf_core::registry::{SessionRegistry, TRUNCATION_MARKER, TickOutcome};
use tailf_core::source::StdFileSystem;
use tailf_core::surface::{ContentSurface, MemoryHost, Namespace, SurfaceId, ViewportHost};
use tailf_core::timestamps::FixedClock;
use tempfile::TempDir;

const S: SurfaceId = SurfaceId(10);

fn registry() -> SessionRegistry {
    let at = FixedOffset::east_opt(2 * 3600)
        .expect("offset")
        .with_ymd_and_hms(2024, 11, 5, 8, 30, 0)
        .single()
        .expect("valid time");
    SessionRegistry::with_clock(Config::default(), Box::new(FixedClock(at))).expect("registry")
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(text.as_bytes()).expect("append");
}

struct Fixture {
    _dir: TempDir,
    path: std::path::PathBuf,
    host: MemoryHost,
    registry: SessionRegistry,
    fs: StdFileSystem,
}

impl Fixture {
    fn new(existing: &str, from_start: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("service.log");
        fs::write(&path, existing).expect("seed");

        let mut host = MemoryHost::new();
        host.create_surface(S, Vec::new());
        let mut registry = registry();
        let fs = StdFileSystem;
        registry.attach_file(&fs, S, &path, from_start);
        registry.enable(&mut host, S);

        Self {
            _dir: dir,
            path,
            host,
            registry,
            fs,
        }
    }

    fn tick(&mut self) -> TickOutcome {
        self.registry
            .tick(&mut self.host, &self.fs, S)
            .expect("tick")
    }

    fn content(&self) -> Vec<&str> {
        self.host.content(S).iter().map(String::as_str).collect()
    }
}

#[test]
fn follows_appends_from_current_end() {
    let mut fx = Fixture::new("history\n", false);
    assert_eq!(fx.tick(), TickOutcome::NoChange);

    append(&fx.path, "one\ntwo\n");
    assert_eq!(fx.tick(), TickOutcome::Ingested { bytes: 8, lines: 2 });
    append(&fx.path, "three\n");
    fx.tick();

    assert_eq!(fx.content(), vec!["one", "two", "three"]);
}

#[test]
fn from_start_replays_existing_content() {
    let mut fx = Fixture::new("a\nb\npartial", true);
    fx.tick();
    assert_eq!(fx.content(), vec!["a", "b"]);

    append(&fx.path, " done\n");
    fx.tick();
    assert_eq!(fx.content(), vec!["a", "b", "partial done"]);
}

#[test]
fn truncate_in_place_restarts_from_zero() {
    let mut fx = Fixture::new("", true);
    append(&fx.path, &"x".repeat(499));
    append(&fx.path, "\n");
    fx.tick();

    fs::write(&fx.path, "012345678\n").expect("truncate");
    assert_eq!(fx.tick(), TickOutcome::Truncated);
    assert_eq!(fx.registry.snapshot(S).expect("session").offset, Some(0));

    fx.tick();
    let content = fx.content();
    assert_eq!(&content[1..], &[TRUNCATION_MARKER, "012345678"]);
}

#[test]
fn rotation_is_survived() {
    let mut fx = Fixture::new("", true);
    append(&fx.path, "before rotation\n");
    fx.tick();

    fs::remove_file(&fx.path).expect("remove");
    assert_eq!(fx.tick(), TickOutcome::Unavailable);
    assert_eq!(fx.tick(), TickOutcome::Unavailable);

    fs::write(&fx.path, "new\n").expect("recreate");
    assert_eq!(fx.tick(), TickOutcome::Truncated);
    fx.tick();

    assert_eq!(
        fx.content(),
        vec!["before rotation", TRUNCATION_MARKER, "new"]
    );
    let snapshot = fx.registry.snapshot(S).expect("session");
    assert_eq!(snapshot.counters.outages, 1);
    assert_eq!(snapshot.counters.truncations, 1);
}

#[test]
fn annotated_tail_with_scrolled_back_reader() {
    let mut fx = Fixture::new("", true);
    fx.registry.timestamps_enable(&mut fx.host, S, true);
    fx.registry.severity_hl_enable(&mut fx.host, S, true);

    let follower = fx.host.open_viewport(S, 4);
    let reader = fx.host.open_viewport(S, 4);

    let body: String = (1..=20).map(|i| format!("INFO line {i}\n")).collect();
    append(&fx.path, &body);
    fx.tick();
    assert_eq!(fx.host.cursor_line(follower), 20);

    fx.host.set_cursor_line(reader, 3);
    fx.registry.on_navigation(
        &fx.host,
        tailf_core::surface::NavigationEvent {
            viewport: reader,
            surface: S,
        },
    );

    append(&fx.path, "ERROR: disk full\n");
    fx.tick();

    assert_eq!(fx.host.cursor_line(follower), 21);
    assert_eq!(fx.host.cursor_line(reader), 3);
    assert_eq!(fx.host.line_count(S), 21);
    assert_eq!(fx.host.annotations_in(S, Namespace::Timestamps).len(), 21);

    let last_line_tags: Vec<_> = fx
        .host
        .annotations_in(S, Namespace::Severity)
        .into_iter()
        .filter(|span| span.line == 20)
        .collect();
    assert_eq!(last_line_tags.len(), 1);
    assert_eq!(last_line_tags[0].columns, 0..5);
}
