//! Watches directories for changes and reports each changed path once it
//! has settled.
//!
//! Editors and compilers tend to write a file in several steps, so every
//! create/modify event only pushes the path's deadline out; the handler
//! runs once no further event arrived for the debounce interval.

use crate::canon::canon_path;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const DEBOUNCE: Duration = Duration::from_millis(400);

/// Longest time to block when no deadline is pending.
const MAX_WAIT: Duration = Duration::from_secs(256);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

/// A single change observed in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The watched directory joined with the entry name.  Directories get a
    /// trailing slash.
    pub path: String,
    pub kind: EventKind,
}

/// Produces raw change events for a set of directories.  Watches are not
/// recursive.
pub trait EventSource: Send {
    fn add(&mut self, dir: &str) -> anyhow::Result<()>;

    fn remove(&mut self, dir: &str) -> anyhow::Result<()>;

    /// Block for at most `timeout` and return whatever arrived, possibly
    /// nothing.
    fn wait(&mut self, timeout: Duration) -> anyhow::Result<Vec<RawEvent>>;
}

/// Per-path deadlines.
pub struct Debouncer {
    interval: Duration,
    deadlines: BTreeMap<String, Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Debouncer {
            interval,
            deadlines: BTreeMap::new(),
        }
    }

    /// Record an event on `path`, replacing any earlier deadline.
    pub fn touch(&mut self, path: String, now: Instant) {
        self.deadlines.insert(path, now + self.interval);
    }

    /// Call `handler` for, and forget, every path whose deadline has passed.
    pub fn fire<F: FnMut(&str)>(&mut self, now: Instant, handler: &mut F) {
        self.deadlines.retain(|path, deadline| {
            if *deadline <= now {
                handler(path);
                false
            } else {
                true
            }
        });
    }

    /// How long until the next deadline.
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.deadlines
            .values()
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

pub struct ChangeMonitor {
    source: Box<dyn EventSource>,
    debounce: Debouncer,
}

impl ChangeMonitor {
    /// A monitor using the platform's native change notifications where
    /// available, polling otherwise.
    #[cfg(target_os = "linux")]
    pub fn new() -> anyhow::Result<Self> {
        let source = crate::watch_inotify::Inotify::new()?;
        Ok(ChangeMonitor::with_source(Box::new(source)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new() -> anyhow::Result<Self> {
        let source = crate::watch_notify::Notify::recommended()?;
        Ok(ChangeMonitor::with_source(Box::new(source)))
    }

    /// A monitor that rescans its directories every `interval`, for
    /// filesystems without change notifications.
    pub fn polling(interval: Duration) -> anyhow::Result<Self> {
        let source = crate::watch_notify::Notify::polling(interval)?;
        Ok(ChangeMonitor::with_source(Box::new(source)))
    }

    pub fn with_source(source: Box<dyn EventSource>) -> Self {
        ChangeMonitor {
            source,
            debounce: Debouncer::new(DEBOUNCE),
        }
    }

    pub fn set_debounce(&mut self, interval: Duration) {
        self.debounce.interval = interval;
    }

    pub fn add(&mut self, dir: &str) -> anyhow::Result<()> {
        self.source.add(&canon_path(dir)?)
    }

    pub fn remove(&mut self, dir: &str) -> anyhow::Result<()> {
        self.source.remove(&canon_path(dir)?)
    }

    /// One round: wait for events or the next deadline, run the handler for
    /// every settled path, then record the new events.
    pub fn step<F: FnMut(&str)>(&mut self, handler: &mut F) -> anyhow::Result<()> {
        let timeout = self.debounce.next_wait(Instant::now());
        let events = self.source.wait(timeout)?;

        let now = Instant::now();
        self.debounce.fire(now, handler);
        for event in events {
            match event.kind {
                EventKind::Create | EventKind::Modify => self.debounce.touch(event.path, now),
                EventKind::Delete => {
                    // Deletions aren't dispatched; a removed input only
                    // matters once something recreates it.
                    tracing::trace!("ignoring delete of {}", event.path);
                }
            }
        }
        Ok(())
    }

    /// Run `handler` on every settled change, forever.  Only returns on
    /// error.
    pub fn listen<F: FnMut(&str)>(&mut self, mut handler: F) -> anyhow::Result<()> {
        loop {
            self.step(&mut handler)?;
        }
    }
}
