//! Build orchestration: ties the registry, the dependency tracker and the
//! change monitor together and runs targets on a pool of worker threads.

use crate::canon::is_synthetic;
use crate::process::Termination;
use crate::progress::Progress;
use crate::target::{Registry, TaskResult};
use crate::tracker::{DependencyTracker, Stopped};
use crate::translate::{TargetId, Translator};
use crate::watch::ChangeMonitor;
use anyhow::{anyhow, bail};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

/// State shared between the orchestrating thread, the watcher and workers.
struct Shared {
    registry: Registry,
    tracker: DependencyTracker,
    translator: Mutex<Translator>,
    /// The dependency ids last fed to the tracker, per target.
    deps: DashMap<TargetId, Vec<TargetId>>,
    progress: Box<dyn Progress>,
    run: AtomicBool,
    /// Errors that should take the whole process down.
    fatal: Mutex<mpsc::Sender<anyhow::Error>>,
}

pub struct Work {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<anyhow::Result<()>>>,
    fatal: mpsc::Receiver<anyhow::Error>,
}

/// Order targets so each comes after every target it depends on.  Targets
/// occupy ids `0..deps.len()`; larger ids are sources.
fn seed_order(registry: &Registry, deps: &[Vec<TargetId>]) -> anyhow::Result<Vec<TargetId>> {
    let n = deps.len();
    let mut waiting = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, ids) in deps.iter().enumerate() {
        let mut targets: Vec<usize> = ids.iter().map(|id| id.index()).filter(|&d| d < n).collect();
        targets.sort_unstable();
        targets.dedup();
        waiting[i] = targets.len();
        for d in targets {
            dependents[d].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(TargetId::from(i));
        for &dep in &dependents[i] {
            waiting[dep] -= 1;
            if waiting[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }

    if order.len() < n {
        let stuck = (0..n).find(|&i| waiting[i] > 0).unwrap_or(0);
        let name = registry.get(TargetId::from(stuck))?.name();
        bail!("dependency cycle involving {}", name);
    }
    Ok(order)
}

impl Shared {
    /// Translate the current dependency list of `id`.
    fn find_deps(&self, id: TargetId) -> anyhow::Result<Vec<TargetId>> {
        let names = self.registry.get(id)?.find_deps()?;
        self.translator.lock().unwrap().get_all(&names)
    }

    /// Pick up dependencies the target's last build revealed.
    fn refresh_deps(&self, id: TargetId) -> anyhow::Result<()> {
        let mut new = self.find_deps(id)?;
        new.sort();
        new.dedup();
        let old = self.deps.get(&id).map(|deps| deps.value().clone()).unwrap_or_default();
        if new != old {
            tracing::debug!("{}: {} deps -> {}", id, old.len(), new.len());
            self.tracker.update_deps(id, old, new.clone());
            self.deps.insert(id, new);
        }
        Ok(())
    }

    fn build(&self, id: TargetId) -> anyhow::Result<()> {
        let target = self.registry.get(id)?;
        self.progress.task_started(id, target);
        let result = match target.compile() {
            Ok(result) => result,
            Err(err) => {
                // Leave the target retryable, like any other failed build.
                let result = TaskResult {
                    termination: Termination::Failure,
                    output: format!("{}\n", err).into_bytes(),
                };
                self.tracker.compile_fail(id);
                self.progress.task_finished(id, target, &result);
                bail!("{}: {}", target.name(), err);
            }
        };
        self.progress.task_finished(id, target, &result);

        if result.termination != Termination::Success {
            self.tracker.compile_fail(id);
            return Ok(());
        }
        // Before reporting success, so new dirty deps keep the target pending.
        if let Err(err) = self.refresh_deps(id) {
            tracing::warn!("{}: rediscovering deps: {}", target.name(), err);
            self.tracker.compile_fail(id);
            return Ok(());
        }
        self.tracker.compile_success(id);
        Ok(())
    }

    fn worker(&self) -> anyhow::Result<()> {
        loop {
            let id = match self.tracker.compile_pop(&self.run) {
                Ok(id) => id,
                Err(Stopped) => return Ok(()),
            };
            if let Err(err) = self.build(id) {
                tracing::error!("worker stopping on {}: {}", id, err);
                self.fail(anyhow!("{}", err));
                return Err(err);
            }
        }
    }

    fn fail(&self, err: anyhow::Error) {
        // Nobody listening means nobody is waiting in `watch` either.
        let _ = self.fatal.lock().unwrap().send(err);
    }

    fn file_changed(&self, path: &str) {
        let id = match self.translator.lock().unwrap().get(path) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!("{}: {}", path, err);
                return;
            }
        };
        tracing::debug!("changed {} ({})", path, id);
        self.tracker.changed(id);
    }
}

impl Work {
    pub fn new(registry: Registry, progress: Box<dyn Progress>) -> Self {
        let (send, fatal) = mpsc::channel();
        Work {
            shared: Arc::new(Shared {
                registry,
                tracker: DependencyTracker::new(),
                translator: Mutex::new(Translator::new()),
                deps: DashMap::new(),
                progress,
                run: AtomicBool::new(false),
                fatal: Mutex::new(send),
            }),
            workers: Vec::new(),
            fatal,
        }
    }

    /// Load the dependency graph from the registry.  With `compile_on_start`
    /// every target is queued for building, otherwise nothing is until a
    /// source changes.
    pub fn init(&self, compile_on_start: bool) -> anyhow::Result<()> {
        let shared = &self.shared;
        let registry = &shared.registry;

        let names = registry
            .all()
            .par_iter()
            .map(|target| {
                target
                    .find_deps()
                    .map_err(|err| anyhow!("{}: {}", target.name(), err))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let deps = {
            let mut translator = shared.translator.lock().unwrap();
            translator.clear();
            for (id, target) in registry.iter() {
                let name = target.name();
                // Output names only canonicalize once their directory exists.
                if !is_synthetic(name) {
                    if let Some(parent) = Path::new(name).parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|err| anyhow!("mkdir for {}: {}", name, err))?;
                    }
                }
                translator.add(name, id)?;
            }
            names
                .iter()
                .map(|names| translator.get_all(names))
                .collect::<anyhow::Result<Vec<_>>>()?
        };

        let order = seed_order(registry, &deps)?;
        shared.tracker.clear();
        shared.deps.clear();
        for id in order {
            let mut ids = deps[id.index()].clone();
            ids.sort();
            ids.dedup();
            shared.tracker.update_deps(id, Vec::new(), ids.clone());
            shared.deps.insert(id, ids);
        }
        if !compile_on_start {
            shared.tracker.clear_state();
        }
        tracing::info!("loaded {} targets", registry.len());
        Ok(())
    }

    /// Feed a changed path into the tracker.
    pub fn file_changed(&self, path: &str) {
        self.shared.file_changed(path);
    }

    /// Watch `dirs` with `monitor` and feed every settled change into the
    /// tracker.  Only returns on error: either the monitor's, or the first
    /// unexpected error a worker died with.
    pub fn watch(&self, mut monitor: ChangeMonitor, dirs: &[String]) -> anyhow::Result<()> {
        for dir in dirs {
            monitor.add(dir)?;
        }
        self.shared
            .progress
            .log(&format!("watching {} directories", dirs.len()));
        let shared = self.shared.clone();
        std::thread::Builder::new()
            .name("watcher".to_string())
            .spawn(move || {
                let changed = shared.clone();
                if let Err(err) = monitor.listen(move |path| changed.file_changed(path)) {
                    tracing::error!("watcher stopping: {}", err);
                    shared.fail(err);
                }
            })?;
        match self.fatal.recv() {
            Ok(err) => Err(err),
            Err(_) => bail!("watch stopped"),
        }
    }

    /// Start `n` worker threads, replacing any running pool.
    pub fn start_workers(&mut self, n: usize) -> anyhow::Result<()> {
        self.stop_workers()?;
        self.shared.run.store(true, Ordering::SeqCst);
        for i in 0..n {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || shared.worker())?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Stop and join all workers.  Builds already running finish first.
    /// Returns the first error a worker died with.
    pub fn stop_workers(&mut self) -> anyhow::Result<()> {
        self.shared.run.store(false, Ordering::SeqCst);
        self.shared.tracker.notify_all();
        let mut result = Ok(());
        for handle in self.workers.drain(..) {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow!("worker panicked")),
            };
            if let Err(err) = outcome {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.shared.tracker
    }

    pub fn id(&self, name: &str) -> anyhow::Result<TargetId> {
        self.shared.translator.lock().unwrap().get(name)
    }

    pub fn name(&self, id: TargetId) -> Option<String> {
        let translator = self.shared.translator.lock().unwrap();
        translator.name(id).map(str::to_string)
    }
}

impl Drop for Work {
    fn drop(&mut self) {
        if let Err(err) = self.stop_workers() {
            tracing::error!("{}", err);
        }
    }
}
