//! Poll/event scheduler.
//!
//! The [`Scheduler`] owns the registry, the host and the filesystem and runs
//! every pipeline on one task. File-backed sessions are polled from the
//! scheduler's own tick table at a fixed interval; process output, commands
//! and navigation arrive as [`SchedulerEvent`]s on a bounded channel.
//!
//! Removing a surface from the tick table happens inside the loop, before the
//! next wait, so a torn-down session can never be ticked again.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ConfigPatch;
use crate::process::ProcessEvent;
use crate::registry::{SessionRegistry, TickOutcome};
use crate::source::{FileSystem, SourceBinding};
use crate::surface::{Host, NavigationEvent, SurfaceId};

/// On/off/flip for a switchable feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Switch {
    On,
    Off,
    Toggle,
}

/// Host commands, mirroring the registry's entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enable(SurfaceId),
    Disable(SurfaceId),
    Toggle(SurfaceId),
    AttachFile {
        surface: SurfaceId,
        path: PathBuf,
        from_start: bool,
    },
    AttachProcess {
        surface: SurfaceId,
        handle: u64,
    },
    AttachForeign(SurfaceId),
    Timestamps {
        surface: SurfaceId,
        switch: Switch,
        backfill: bool,
    },
    SeverityHighlight {
        surface: SurfaceId,
        switch: Switch,
        backfill: bool,
    },
    Configure(ConfigPatch),
    ExternalAppend {
        surface: SurfaceId,
        first_new_line: usize,
    },
    Teardown(SurfaceId),
}

/// Everything the scheduler loop reacts to besides its own ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Command(Command),
    Process(ProcessEvent),
    Navigation(NavigationEvent),
    Shutdown,
}

impl From<ProcessEvent> for SchedulerEvent {
    fn from(event: ProcessEvent) -> Self {
        Self::Process(event)
    }
}

impl From<Command> for SchedulerEvent {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

/// Cloneable sender half.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Queue an event. Returns `false` if the scheduler has stopped.
    pub async fn send(&self, event: impl Into<SchedulerEvent>) -> bool {
        self.tx.send(event.into()).await.is_ok()
    }

    /// Queue an event without waiting. Returns `false` if the channel is full
    /// or the scheduler has stopped.
    pub fn try_send(&self, event: impl Into<SchedulerEvent>) -> bool {
        self.tx.try_send(event.into()).is_ok()
    }

    /// Raw sender, e.g. for [`spawn_process`](crate::process::spawn_process).
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<SchedulerEvent> {
        self.tx.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SchedulerEvent::Shutdown).await;
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Ticks run against file-backed sessions.
    pub ticks: u64,
    /// Ticks that appended at least one line.
    pub productive_ticks: u64,
    /// Events received on the channel.
    pub events: u64,
    /// Process chunks applied.
    pub chunks: u64,
}

/// Serializable snapshot of scheduler state for status output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Surfaces with a live timer.
    pub scheduled: Vec<SurfaceId>,
    /// Current tick interval in milliseconds.
    pub interval_ms: u64,
    pub metrics: SchedulerMetrics,
}

#[derive(Debug, Clone, Copy)]
struct TickEntry {
    next_due: Instant,
}

/// Single-task driver for a [`SessionRegistry`].
pub struct Scheduler<H, F> {
    registry: SessionRegistry,
    host: H,
    fs: F,
    ticks: HashMap<SurfaceId, TickEntry>,
    interval: Duration,
    tx: mpsc::Sender<SchedulerEvent>,
    rx: mpsc::Receiver<SchedulerEvent>,
    stop_when_sources_end: bool,
    metrics: SchedulerMetrics,
}

impl<H: Host, F: FileSystem> Scheduler<H, F> {
    /// Wrap a registry. File-backed sessions already in it are scheduled to
    /// tick immediately.
    pub fn new(registry: SessionRegistry, host: H, fs: F) -> Self {
        let follow = &registry.config().follow;
        let interval = follow.poll_interval();
        let (tx, rx) = mpsc::channel(follow.channel_buffer.max(1));

        let mut scheduler = Self {
            registry,
            host,
            fs,
            ticks: HashMap::new(),
            interval,
            tx,
            rx,
            stop_when_sources_end: false,
            metrics: SchedulerMetrics::default(),
        };
        for surface in scheduler.registry.surfaces() {
            scheduler.sync_timer(surface);
        }
        scheduler
    }

    /// Stop the loop once every session is a finished process.
    #[must_use]
    pub fn stop_when_sources_end(mut self, stop: bool) -> Self {
        self.stop_when_sources_end = stop;
        self
    }

    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
    }

    #[must_use]
    pub fn is_scheduled(&self, surface: SurfaceId) -> bool {
        self.ticks.contains_key(&surface)
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut scheduled: Vec<SurfaceId> = self.ticks.keys().copied().collect();
        scheduled.sort_unstable();
        SchedulerSnapshot {
            scheduled,
            interval_ms: u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            metrics: self.metrics,
        }
    }

    /// Run until [`SchedulerEvent::Shutdown`], or until every source has
    /// ended when [`stop_when_sources_end`](Self::stop_when_sources_end) is
    /// set. Returns the scheduler so callers can inspect final state.
    pub async fn run(mut self) -> Self {
        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler started");
        loop {
            // Due ticks go ahead of queued events.
            self.run_due_ticks(Instant::now());
            if self.should_stop() {
                break;
            }
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                event = self.rx.recv() => {
                    // The scheduler holds a sender, so the channel never closes.
                    let Some(event) = event else { break };
                    if self.handle_event(event).is_break() {
                        break;
                    }
                }
                () = wait_until(deadline) => {}
            }
        }
        info!(metrics = ?self.metrics, "Scheduler stopped");
        self
    }

    fn should_stop(&self) -> bool {
        self.stop_when_sources_end && self.ticks.is_empty() && self.registry.all_sources_ended()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.ticks.values().map(|entry| entry.next_due).min()
    }

    /// Tick every session whose timer is due, in surface order.
    pub fn run_due_ticks(&mut self, now: Instant) {
        let mut due: Vec<SurfaceId> = self
            .ticks
            .iter()
            .filter(|(_, entry)| entry.next_due <= now)
            .map(|(&surface, _)| surface)
            .collect();
        due.sort_unstable();

        for surface in due {
            if let Some(entry) = self.ticks.get_mut(&surface) {
                entry.next_due = now + self.interval;
            }
            self.metrics.ticks += 1;
            match self.registry.tick(&mut self.host, &self.fs, surface) {
                Ok(TickOutcome::Ingested { lines, .. }) if lines > 0 => {
                    self.metrics.productive_ticks += 1;
                }
                Ok(outcome) => trace!(%surface, ?outcome, "Tick"),
                Err(err) => {
                    warn!(%surface, error = %err, "Tick failed, unscheduling");
                    self.ticks.remove(&surface);
                }
            }
        }
    }

    /// Apply one event. Returns `Break` on shutdown.
    pub fn handle_event(&mut self, event: SchedulerEvent) -> ControlFlow<()> {
        self.metrics.events += 1;
        match event {
            SchedulerEvent::Shutdown => return ControlFlow::Break(()),
            SchedulerEvent::Navigation(nav) => self.registry.on_navigation(&self.host, nav),
            SchedulerEvent::Process(ProcessEvent::Chunk {
                surface,
                stream,
                bytes,
            }) => {
                self.metrics.chunks += 1;
                self.registry
                    .on_chunk(&mut self.host, surface, stream, &bytes);
            }
            SchedulerEvent::Process(ProcessEvent::Exited { surface, code }) => {
                self.registry.on_exit(&mut self.host, surface, code);
            }
            SchedulerEvent::Command(command) => self.apply_command(command),
        }
        ControlFlow::Continue(())
    }

    fn apply_command(&mut self, command: Command) {
        let host = &mut self.host;
        match command {
            Command::Enable(surface) => self.registry.enable(host, surface),
            Command::Disable(surface) => self.registry.disable(surface),
            Command::Toggle(surface) => {
                self.registry.toggle(host, surface);
            }
            Command::AttachFile {
                surface,
                path,
                from_start,
            } => {
                self.registry.attach_file(&self.fs, surface, path, from_start);
                self.sync_timer(surface);
            }
            Command::AttachProcess { surface, handle } => {
                self.registry.attach_process(surface, handle);
                self.sync_timer(surface);
            }
            Command::AttachForeign(surface) => {
                self.registry.attach_foreign(surface);
                self.sync_timer(surface);
            }
            Command::Timestamps {
                surface,
                switch,
                backfill,
            } => match switch {
                Switch::On => self.registry.timestamps_enable(host, surface, backfill),
                Switch::Off => self.registry.timestamps_disable(host, surface),
                Switch::Toggle => {
                    self.registry.timestamps_toggle(host, surface, backfill);
                }
            },
            Command::SeverityHighlight {
                surface,
                switch,
                backfill,
            } => match switch {
                Switch::On => self.registry.severity_hl_enable(host, surface, backfill),
                Switch::Off => self.registry.severity_hl_disable(host, surface),
                Switch::Toggle => {
                    self.registry.severity_hl_toggle(host, surface, backfill);
                }
            },
            Command::Configure(patch) => match self.registry.configure(&patch) {
                Ok(()) => {
                    let interval = self.registry.config().follow.poll_interval();
                    if interval != self.interval {
                        debug!(?interval, "Tick interval changed");
                        self.interval = interval;
                    }
                }
                Err(err) => warn!(error = %err, "Rejected configuration patch"),
            },
            Command::ExternalAppend {
                surface,
                first_new_line,
            } => self
                .registry
                .on_external_append(host, surface, first_new_line),
            Command::Teardown(surface) => {
                self.ticks.remove(&surface);
                self.registry.teardown(surface);
            }
        }
    }

    /// Add or remove the timer for `surface` to match its binding.
    fn sync_timer(&mut self, surface: SurfaceId) {
        let is_file = self
            .registry
            .session(surface)
            .is_some_and(|s| matches!(s.binding(), SourceBinding::File(_)));
        if is_file {
            self.ticks.entry(surface).or_insert(TickEntry {
                next_due: Instant::now(),
            });
        } else {
            self.ticks.remove(&surface);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
