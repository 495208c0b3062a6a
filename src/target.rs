//! Build targets and the registry that addresses them by id.

use crate::canon::is_synthetic;
use crate::depfile;
use crate::process::{run_command, Termination};
use crate::translate::TargetId;
use anyhow::bail;
use std::path::Path;

/// The result of building a target.
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
}

/// A unit of work the scheduler can build.
pub trait Target: Send + Sync {
    /// Output path, or a `!`-prefixed synthetic name.
    fn name(&self) -> &str;

    /// Everything this target reads.  Queried at startup and again after
    /// each successful build, so it may change as the target's own output
    /// reveals more (e.g. a depfile).
    fn find_deps(&self) -> anyhow::Result<Vec<String>>;

    /// Build the target.  A failing build is reported through the
    /// TaskResult; an Err means something broke outside the build itself.
    fn compile(&self) -> anyhow::Result<TaskResult>;

    /// Message to display while building.
    fn description(&self) -> &str {
        self.name()
    }

    /// Command line, for verbose output.
    fn command(&self) -> Option<&str> {
        None
    }
}

/// A target built by running a shell command.
pub struct CommandTarget {
    out: String,
    command: String,
    inputs: Vec<String>,
    depfile: Option<String>,
    desc: Option<String>,
}

impl CommandTarget {
    pub fn new(out: impl Into<String>, command: impl Into<String>) -> Self {
        CommandTarget {
            out: out.into(),
            command: command.into(),
            inputs: Vec::new(),
            depfile: None,
            desc: None,
        }
    }

    pub fn inputs<S: Into<String>>(mut self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    /// Extra dependencies are read from this depfile once it exists.
    pub fn depfile(mut self, path: impl Into<String>) -> Self {
        self.depfile = Some(path.into());
        self
    }

    /// Message shown instead of the output path.
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }
}

impl Target for CommandTarget {
    fn name(&self) -> &str {
        &self.out
    }

    fn find_deps(&self) -> anyhow::Result<Vec<String>> {
        let mut deps = self.inputs.clone();
        if let Some(path) = &self.depfile {
            if let Some(discovered) = depfile::read(path)? {
                for dep in discovered.deps {
                    if !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
        }
        Ok(deps)
    }

    fn compile(&self) -> anyhow::Result<TaskResult> {
        if !is_synthetic(&self.out) {
            if let Some(parent) = Path::new(&self.out).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let (termination, output) = run_command(&self.command)?;
        Ok(TaskResult {
            termination,
            output,
        })
    }

    fn description(&self) -> &str {
        self.desc.as_deref().unwrap_or(&self.out)
    }

    fn command(&self) -> Option<&str> {
        Some(&self.command)
    }
}

type Action = Box<dyn Fn() -> anyhow::Result<Termination> + Send + Sync>;

/// A target that runs a function rather than producing a file, such as a
/// hook fired whenever its inputs are rebuilt.
pub struct ActionTarget {
    name: String,
    inputs: Vec<String>,
    action: Action,
}

impl ActionTarget {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
        action: impl Fn() -> anyhow::Result<Termination> + Send + Sync + 'static,
    ) -> Self {
        ActionTarget {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            action: Box::new(action),
        }
    }

    /// An action that re-executes the running program, e.g. when the
    /// program's own binary is one of the targets being rebuilt.
    pub fn restart<S: Into<String>>(
        name: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
    ) -> Self {
        ActionTarget::new(name, inputs, restart)
    }
}

#[cfg(unix)]
fn restart() -> anyhow::Result<Termination> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    tracing::info!("restarting {}", exe.display());
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    bail!("restart {}: {}", exe.display(), err)
}

#[cfg(not(unix))]
fn restart() -> anyhow::Result<Termination> {
    bail!("restart is only supported on unix")
}

impl Target for ActionTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_deps(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.inputs.clone())
    }

    fn compile(&self) -> anyhow::Result<TaskResult> {
        Ok(TaskResult {
            termination: (self.action)()?,
            output: Vec::new(),
        })
    }
}

/// All targets, addressed by their position.  The orchestrator gives each
/// target the id matching its position.
#[derive(Default)]
pub struct Registry {
    targets: Vec<Box<dyn Target>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn push(&mut self, target: impl Target + 'static) -> TargetId {
        self.push_boxed(Box::new(target))
    }

    pub fn push_boxed(&mut self, target: Box<dyn Target>) -> TargetId {
        let id = TargetId::from(self.targets.len());
        self.targets.push(target);
        id
    }

    pub fn get(&self, id: TargetId) -> anyhow::Result<&dyn Target> {
        match self.targets.get(id.index()) {
            Some(target) => Ok(target.as_ref()),
            None => bail!("no target with id {}", id),
        }
    }

    pub fn all(&self) -> &[Box<dyn Target>] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &dyn Target)> {
        self.targets
            .iter()
            .enumerate()
            .map(|(i, target)| (TargetId::from(i), target.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
