//! Build progress reporting, for the purpose of display to the user.

use crate::{process::Termination, target::Target, target::TaskResult, translate::TargetId};
use dashmap::DashMap;
use std::io::Write;
use std::time::Instant;

/// Trait for build progress notifications.  Called from worker threads.
pub trait Progress: Send + Sync {
    /// Called when a task starts.
    fn task_started(&self, id: TargetId, target: &dyn Target);

    /// Called when a task completes.
    fn task_finished(&self, id: TargetId, target: &dyn Target, result: &TaskResult);

    /// Log a line of output.
    fn log(&self, msg: &str);
}

/// Progress implementation that prints nothing.
pub struct NoProgress;

impl Progress for NoProgress {
    fn task_started(&self, _id: TargetId, _target: &dyn Target) {}
    fn task_finished(&self, _id: TargetId, _target: &dyn Target, _result: &TaskResult) {}
    fn log(&self, _msg: &str) {}
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// When each running task started.
    started: DashMap<TargetId, Instant>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        DumbConsoleProgress {
            verbose,
            ..Default::default()
        }
    }

    fn print(&self, msg: &str, output: &[u8]) {
        // Held across the whole message so parallel tasks don't interleave.
        let mut stdout = std::io::stdout().lock();
        // A closed stdout isn't worth stopping the build for.
        let _ = writeln!(stdout, "{}", msg);
        if !output.is_empty() {
            let _ = stdout.write_all(output);
            if !output.ends_with(b"\n") {
                let _ = writeln!(stdout);
            }
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn task_started(&self, id: TargetId, target: &dyn Target) {
        self.started.insert(id, Instant::now());
        if self.verbose {
            self.print(target.command().unwrap_or(target.description()), &[]);
        }
    }

    fn task_finished(&self, id: TargetId, target: &dyn Target, result: &TaskResult) {
        let elapsed = match self.started.remove(&id) {
            Some((_, start)) => format!(" ({:.1}s)", start.elapsed().as_secs_f64()),
            None => String::new(),
        };
        let msg = match result.termination {
            Termination::Success => format!("built {}{}", target.description(), elapsed),
            Termination::Interrupted => format!("interrupted: {}", target.description()),
            Termination::Failure => format!("failed: {}{}", target.description(), elapsed),
        };
        self.print(&msg, &result.output);
    }

    fn log(&self, msg: &str) {
        self.print(msg, &[]);
    }
}
