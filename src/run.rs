use crate::{
    canon::is_synthetic, manifest, progress::DumbConsoleProgress, watch::ChangeMonitor,
    work::Work,
};
use anyhow::{anyhow, bail};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

#[derive(argh::FromArgs)]
/// livebuild, rebuilds targets as their sources change
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// target manifest [default=livebuild.json]
    #[argh(option, short = 'f', default = "String::from(\"livebuild.json\")")]
    manifest_file: String,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// directory to watch, repeatable [default: directories of all inputs
    /// declared at startup; directories only named by later depfiles are
    /// not watched]
    #[argh(option, short = 'w')]
    watch: Vec<String>,

    /// only build targets once their sources change
    #[argh(switch)]
    incremental: bool,

    /// poll for changes every MS milliseconds instead of using inotify
    #[argh(option)]
    poll: Option<u64>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Silent unless RUST_LOG asks for something.
    if std::env::var("RUST_LOG").is_ok() {
        let filter = EnvFilter::from_default_env();
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
    }
}

/// The directories holding every input that isn't itself a target.
fn default_watch_dirs(registry: &crate::target::Registry) -> anyhow::Result<Vec<String>> {
    let outputs: BTreeSet<&str> = registry.iter().map(|(_, target)| target.name()).collect();
    let mut dirs = BTreeSet::new();
    for (_, target) in registry.iter() {
        for dep in target.find_deps()? {
            if is_synthetic(&dep) || outputs.contains(dep.as_str()) {
                continue;
            }
            let dir = match Path::new(&dep).parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    parent.to_string_lossy().into_owned()
                }
                _ => ".".to_string(),
            };
            dirs.insert(dir);
        }
    }
    Ok(dirs.into_iter().collect())
}

pub fn run() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();
    init_tracing();

    if let Some(dir) = &opts.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let parallelism = match opts.parallelism {
        Some(0) => bail!("invalid -j 0"),
        Some(n) => n,
        None => usize::from(std::thread::available_parallelism()?),
    };

    let registry = manifest::load(&opts.manifest_file)?;
    if registry.is_empty() {
        bail!("{}: no targets", opts.manifest_file);
    }
    let dirs = if opts.watch.is_empty() {
        default_watch_dirs(&registry)?
    } else {
        opts.watch
    };

    let monitor = match opts.poll {
        Some(ms) => ChangeMonitor::polling(Duration::from_millis(ms))?,
        None => ChangeMonitor::new()?,
    };

    let mut work = Work::new(registry, Box::new(DumbConsoleProgress::new(opts.verbose)));
    work.init(!opts.incremental)?;
    work.start_workers(parallelism)?;
    tracing::info!("watching {:?}", dirs);
    work.watch(monitor, &dirs)?;
    work.stop_workers()?;
    Ok(0)
}
