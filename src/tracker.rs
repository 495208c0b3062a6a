//! Tracks which targets need rebuilding, and when they become ready.
//!
//! The tracker holds a reverse dependency graph (dependency -> dependents)
//! and a per-target count of outstanding rebuild causes:
//!
//! - absent: up to date.
//! - 1: ready to build; the only remaining cause is the target itself.
//! - 2 or more: waiting on at least one dirty dependency.
//!
//! When a source file changes, each direct dependent gets a count of 1 and is
//! queued, and every target further downstream is bumped once per dirty path
//! leading into it.  As builds succeed, the counts are walked back down and
//! a target is queued the moment its count drops to 1.
//!
//! All state sits behind one mutex; workers block in `compile_pop` on the
//! paired condvar.

use crate::translate::TargetId;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Returned from `compile_pop` when the run flag was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

impl std::fmt::Display for Stopped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stop requested")
    }
}

impl std::error::Error for Stopped {}

#[derive(Default)]
struct Graph {
    /// Maps a dependency to the targets that depend on it.
    dependents: FxHashMap<TargetId, Vec<TargetId>>,
    /// Targets with at least one dependency.  Anything else is a source.
    generated: FxHashSet<TargetId>,
}

impl Graph {
    fn dependents(&self, id: TargetId) -> &[TargetId] {
        self.dependents.get(&id).map_or(&[], |deps| deps.as_slice())
    }

    fn is_generated(&self, id: TargetId) -> bool {
        self.generated.contains(&id)
    }
}

#[derive(Default)]
struct Pending {
    counts: FxHashMap<TargetId, usize>,
    ready: FxHashSet<TargetId>,
    failed: FxHashSet<TargetId>,
    /// Set whenever something is queued, so the caller knows to wake workers.
    queued: bool,
}

impl Pending {
    fn count(&self, id: TargetId) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    fn enqueue(&mut self, id: TargetId) {
        self.ready.insert(id);
        self.queued = true;
    }

    /// Record a new rebuild cause for `id`.  `from_source` means the cause is
    /// a source file `id` reads directly, so `id` can build right away.
    fn inc(&mut self, graph: &Graph, id: TargetId, from_source: bool) {
        let count = self.count(id);
        if count > 0 {
            // Already pending; downstream was marked on the first arrival.
            let count = if from_source { count } else { count + 1 };
            self.counts.insert(id, count);
            if count <= 1 && self.failed.contains(&id) {
                self.enqueue(id);
            }
            return;
        }

        if from_source {
            self.counts.insert(id, 1);
            self.enqueue(id);
        } else {
            self.counts.insert(id, 2);
        }
        for &dep in graph.dependents(id) {
            self.inc(graph, dep, false);
        }
    }

    /// Resolve one cause of `id`.  `start` is true for the target that just
    /// built, false for the dependents it propagates to.
    fn dec(&mut self, graph: &Graph, id: TargetId, start: bool) {
        let count = self.count(id);
        if count == 0 {
            // A dependent whose own state already resolved still has to
            // rebuild after its input did.
            if !start {
                self.enqueue(id);
            }
            return;
        }

        let count = count - 1;
        if count == 0 {
            self.counts.remove(&id);
            for &dep in graph.dependents(id) {
                self.dec(graph, dep, false);
            }
        } else {
            self.counts.insert(id, count);
            if count == 1 {
                self.enqueue(id);
            }
        }
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.ready.clear();
        self.failed.clear();
    }
}

#[derive(Default)]
struct State {
    graph: Graph,
    pending: Pending,
}

#[derive(Default)]
pub struct DependencyTracker {
    state: Mutex<State>,
    cond: Condvar,
}

fn sorted(ids: impl Iterator<Item = TargetId>) -> Vec<TargetId> {
    let mut ids: Vec<TargetId> = ids.collect();
    ids.sort();
    ids
}

impl DependencyTracker {
    pub fn new() -> Self {
        DependencyTracker::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn wake(&self, state: &mut State) {
        if state.pending.queued {
            state.pending.queued = false;
            self.cond.notify_all();
        }
    }

    /// Wake every thread blocked in `compile_pop`, e.g. to observe a stop.
    pub fn notify_all(&self) {
        // Taking the lock orders this after any waiter's flag check.
        let _state = self.lock();
        self.cond.notify_all();
    }

    /// Replace the dependency list of `id`, `old` -> `new`.  Order and
    /// duplicates in either list don't matter.
    pub fn update_deps(&self, id: TargetId, mut old: Vec<TargetId>, mut new: Vec<TargetId>) {
        let mut state = self.lock();
        let State { graph, pending } = &mut *state;

        if new.is_empty() {
            graph.generated.remove(&id);
        } else {
            graph.generated.insert(id);
        }

        old.sort();
        old.dedup();
        new.sort();
        new.dedup();

        for &dep in new.iter().filter(|dep| old.binary_search(dep).is_err()) {
            graph.dependents.entry(dep).or_default().push(id);
            let from_source = !graph.is_generated(dep);
            pending.inc(graph, id, from_source);
        }

        for &dep in old.iter().filter(|dep| new.binary_search(dep).is_err()) {
            if let Some(deps) = graph.dependents.get_mut(&dep) {
                deps.retain(|&d| d != id);
                if deps.is_empty() {
                    graph.dependents.remove(&dep);
                }
            }
            // The severed dependency was holding `id` back; release that.
            if pending.count(dep) > 0 {
                pending.dec(graph, id, false);
            }
        }

        self.wake(&mut state);
    }

    /// Note that the file behind `id` changed on disk.
    pub fn changed(&self, id: TargetId) {
        let mut state = self.lock();
        let State { graph, pending } = &mut *state;

        if graph.is_generated(id) {
            // Outputs touched from outside the build aren't rebuilt here;
            // only changes to their inputs trigger them.
            tracing::debug!("ignoring change to generated target {}", id);
            return;
        }
        for &dep in graph.dependents(id) {
            pending.inc(graph, dep, true);
        }

        self.wake(&mut state);
    }

    /// Block until a target is ready and take it.  Fails with `Stopped` once
    /// `run` is cleared, even if targets are still queued.
    pub fn compile_pop(&self, run: &AtomicBool) -> Result<TargetId, Stopped> {
        let mut state = self.lock();
        loop {
            if !run.load(Ordering::SeqCst) {
                return Err(Stopped);
            }
            if let Some(&id) = state.pending.ready.iter().next() {
                state.pending.ready.remove(&id);
                return Ok(id);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// The build of `id` failed.  It stays pending, and is retried on the
    /// next change that reaches it.
    pub fn compile_fail(&self, id: TargetId) {
        self.lock().pending.failed.insert(id);
    }

    pub fn compile_success(&self, id: TargetId) {
        let mut state = self.lock();
        let State { graph, pending } = &mut *state;
        pending.failed.remove(&id);
        pending.dec(graph, id, true);
        self.wake(&mut state);
    }

    /// Forget all pending work but keep the graph.
    pub fn clear_state(&self) {
        self.lock().pending.clear();
    }

    /// Forget everything, graph included.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.pending.clear();
        state.graph = Graph::default();
    }

    pub fn pending_count(&self, id: TargetId) -> usize {
        self.lock().pending.count(id)
    }

    pub fn is_generated(&self, id: TargetId) -> bool {
        self.lock().graph.is_generated(id)
    }

    /// Targets depending on `id`, sorted.
    pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
        sorted(self.lock().graph.dependents(id).iter().copied())
    }

    /// Snapshot of the ready set, sorted.
    pub fn ready(&self) -> Vec<TargetId> {
        sorted(self.lock().pending.ready.iter().copied())
    }

    /// Snapshot of the failed set, sorted.
    pub fn failed(&self) -> Vec<TargetId> {
        sorted(self.lock().pending.failed.iter().copied())
    }
}
