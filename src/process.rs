//! Runs build commands as subprocesses.

#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// How a build step ended.  Anything but Success is a build failure, as
/// opposed to an error in running the build at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

#[cfg(unix)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}

/// Executes a command line through the shell, returning how it ended along
/// with its stdout and stderr.
/// Returns an Err() if we failed outside of the process itself.
pub fn run_command(cmdline: &str) -> anyhow::Result<(Termination, Vec<u8>)> {
    let cmd = shell(cmdline).output()?;
    let mut output = cmd.stdout;
    output.extend_from_slice(&cmd.stderr);

    let mut termination = Termination::Success;
    if !cmd.status.success() {
        termination = Termination::Failure;
        #[cfg(unix)]
        if let Some(sig) = cmd.status.signal() {
            match sig {
                libc::SIGINT => {
                    write!(output, "interrupted")?;
                    termination = Termination::Interrupted;
                }
                _ => write!(output, "signal {}", sig)?,
            }
        }
    }

    Ok((termination, output))
}
