//! Support code for e2e tests, which run livebuild as a binary.

mod basic;
mod failure;

use std::io::BufRead;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// How long to wait for an expected line of output.
const TIMEOUT: Duration = Duration::from_secs(20);

pub fn livebuild_command(args: &[&str]) -> std::process::Command {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_livebuild"));
    cmd.args(args);
    cmd
}

/// Manages a temporary directory for invoking livebuild.
pub struct TestSpace {
    dir: tempfile::TempDir,
    /// Bumped for every write, so each write gets a distinct mtime even on
    /// coarse filesystems.
    mtime: std::cell::Cell<i64>,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace {
            dir,
            mtime: std::cell::Cell::new(1_000_000),
        })
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> anyhow::Result<()> {
        let path = self.dir.path().join(path);
        std::fs::write(&path, content)?;
        let mtime = self.mtime.get() + 1;
        self.mtime.set(mtime);
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(mtime, 0))?;
        Ok(())
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.dir.path().join(path))
    }

    /// Run livebuild to completion, for invocations that exit.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Start livebuild in the background.  It is killed when the returned
    /// handle drops.
    pub fn spawn(&self, cmd: &mut std::process::Command) -> anyhow::Result<Running> {
        let mut child = cmd
            .current_dir(self.dir.path())
            .stdout(std::process::Stdio::piped())
            .spawn()?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => anyhow::bail!("no stdout"),
        };
        let (send, lines) = mpsc::channel();
        std::thread::spawn(move || {
            for line in std::io::BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if send.send(line).is_err() {
                    break;
                }
            }
        });
        Ok(Running {
            child,
            lines,
            unmatched: Vec::new(),
        })
    }
}

pub struct Running {
    child: std::process::Child,
    lines: mpsc::Receiver<String>,
    /// Output lines not yet matched by an expectation.
    unmatched: Vec<String>,
}

impl Running {
    /// Wait for a line of output starting with `text`.  Lines are matched in
    /// any order, but each line only once.
    pub fn expect_line(&mut self, text: &str) -> anyhow::Result<()> {
        if let Some(pos) = self.unmatched.iter().position(|l| l.starts_with(text)) {
            self.unmatched.remove(pos);
            return Ok(());
        }
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(left) {
                Ok(line) if line.starts_with(text) => return Ok(()),
                Ok(line) => self.unmatched.push(line),
                Err(_) => anyhow::bail!(
                    "expected output line {:?} but got:\n{}",
                    text,
                    self.unmatched.join("\n")
                ),
            }
        }
    }

    /// Fail if a line starting with `text` shows up within `wait`.
    pub fn expect_no_line(&mut self, text: &str, wait: Duration) -> anyhow::Result<()> {
        if let Some(line) = self.unmatched.iter().find(|l| l.starts_with(text)) {
            anyhow::bail!("unexpected output line {:?}", line);
        }
        let deadline = Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(left) {
                Ok(line) if line.starts_with(text) => {
                    anyhow::bail!("unexpected output line {:?}", line)
                }
                Ok(line) => self.unmatched.push(line),
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(()),
                Err(mpsc::RecvTimeoutError::Disconnected) => anyhow::bail!("livebuild exited"),
            }
        }
    }

    /// Wait until the watcher has taken its first look at the directories,
    /// so later writes register as changes.
    pub fn wait_watching(&mut self) -> anyhow::Result<()> {
        self.expect_line("watching ")
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
