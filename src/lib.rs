pub mod canon;
pub mod depfile;
pub mod manifest;
pub mod process;
pub mod progress;
pub mod run;
pub mod target;
pub mod tracker;
pub mod translate;
pub mod watch;
#[cfg(target_os = "linux")]
mod watch_inotify;
mod watch_notify;
pub mod work;
