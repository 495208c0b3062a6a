//! Change notification through the `notify` crate: the platform's native
//! watcher where inotify isn't available, or a polling watcher for
//! filesystems that don't deliver notifications.

use crate::watch::{EventKind, EventSource, RawEvent};
use anyhow::{anyhow, bail};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

pub struct Notify<W> {
    watcher: W,
    events: mpsc::Receiver<notify::Result<notify::Event>>,
}

impl Notify<PollWatcher> {
    /// Rescan watched directories every `interval`.  File contents are
    /// hashed too, so a rewrite within one mtime tick still registers.
    pub fn polling(interval: Duration) -> anyhow::Result<Self> {
        let (send, events) = mpsc::channel();
        let config = notify::Config::default()
            .with_poll_interval(interval)
            .with_compare_contents(true);
        let watcher = PollWatcher::new(send, config)?;
        Ok(Notify { watcher, events })
    }
}

impl Notify<RecommendedWatcher> {
    pub fn recommended() -> anyhow::Result<Self> {
        let (send, events) = mpsc::channel();
        let watcher = notify::recommended_watcher(send)?;
        Ok(Notify { watcher, events })
    }
}

fn kind(kind: &notify::EventKind) -> Option<EventKind> {
    use notify::EventKind as K;
    match kind {
        K::Create(_) => Some(EventKind::Create),
        // Only a content timestamp means the file changed; access times and
        // the like don't.
        K::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => {
            Some(EventKind::Modify)
        }
        K::Modify(ModifyKind::Metadata(_)) => None,
        K::Modify(_) => Some(EventKind::Modify),
        K::Remove(_) => Some(EventKind::Delete),
        K::Access(_) | K::Any | K::Other => None,
    }
}

fn is_dir(kind: &notify::EventKind) -> bool {
    matches!(
        kind,
        notify::EventKind::Create(CreateKind::Folder)
            | notify::EventKind::Remove(RemoveKind::Folder)
    )
}

fn translate(event: notify::Event, out: &mut Vec<RawEvent>) {
    let Some(mapped) = kind(&event.kind) else {
        tracing::trace!("ignoring {:?}", event.kind);
        return;
    };
    let dir = is_dir(&event.kind);
    for path in event.paths {
        let mut path = path.to_string_lossy().into_owned();
        if dir && !path.ends_with('/') {
            path.push('/');
        }
        out.push(RawEvent { path, kind: mapped });
    }
}

impl<W: Watcher + Send> EventSource for Notify<W> {
    fn add(&mut self, dir: &str) -> anyhow::Result<()> {
        self.watcher
            .watch(Path::new(dir), RecursiveMode::NonRecursive)
            .map_err(|err| anyhow!("watch {}: {}", dir, err))?;
        tracing::debug!("watching {}", dir);
        Ok(())
    }

    fn remove(&mut self, dir: &str) -> anyhow::Result<()> {
        self.watcher
            .unwatch(Path::new(dir))
            .map_err(|err| anyhow!("unwatch {}: {}", dir, err))
    }

    fn wait(&mut self, timeout: Duration) -> anyhow::Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        let first = match self.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => return Ok(events),
            Err(mpsc::RecvTimeoutError::Disconnected) => bail!("watcher stopped"),
        };
        for event in std::iter::once(first).chain(self.events.try_iter()) {
            match event {
                Ok(event) => translate(event, &mut events),
                // A missed event only delays a rebuild until the next change.
                Err(err) => tracing::warn!("watch: {}", err),
            }
        }
        Ok(events)
    }
}
