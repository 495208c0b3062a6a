//! Change notification through Linux inotify.

use crate::watch::{EventKind, EventSource, RawEvent};
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd};
use std::time::Duration;

/// Size of `struct inotify_event` before its name.
const HEADER_LEN: usize = 16;

// IN_MOVED_TO and IN_CLOSE_WRITE are left out, so editors that save by
// renaming a temp file over the original go unnoticed.
const WATCH_MASK: u32 = libc::IN_MODIFY | libc::IN_CREATE | libc::IN_DELETE;

pub struct Inotify {
    fd: File,
    dirs: FxHashMap<libc::c_int, String>,
    wds: FxHashMap<String, libc::c_int>,
    buf: EventBuffer,
}

impl Inotify {
    pub fn new() -> anyhow::Result<Self> {
        // Safety: plain syscall, the result is checked below.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            bail!("inotify_init1: {}", std::io::Error::last_os_error());
        }
        Ok(Inotify {
            // Safety: fd is a fresh descriptor owned by nothing else.
            fd: unsafe { File::from_raw_fd(fd) },
            dirs: FxHashMap::default(),
            wds: FxHashMap::default(),
            buf: EventBuffer::default(),
        })
    }

    fn poll(&self, timeout: Duration) -> anyhow::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // Round up so a sub-millisecond deadline doesn't spin.
        let ms = timeout.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128);
        // Safety: pfd outlives the call.
        let ret = unsafe { libc::poll(&mut pfd, 1, ms as libc::c_int) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            bail!("poll: {}", err);
        }
        Ok(ret > 0)
    }
}

impl EventSource for Inotify {
    fn add(&mut self, dir: &str) -> anyhow::Result<()> {
        if self.wds.contains_key(dir) {
            return Ok(());
        }
        let path = std::ffi::CString::new(dir)?;
        // Safety: path is a valid C string for the duration of the call.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), path.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            bail!("watch {}: {}", dir, std::io::Error::last_os_error());
        }
        tracing::debug!("watching {}", dir);
        self.dirs.insert(wd, dir.to_string());
        self.wds.insert(dir.to_string(), wd);
        Ok(())
    }

    fn remove(&mut self, dir: &str) -> anyhow::Result<()> {
        let wd = match self.wds.remove(dir) {
            Some(wd) => wd,
            None => bail!("{} is not watched", dir),
        };
        self.dirs.remove(&wd);
        // Safety: plain syscall.
        if unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), wd) } < 0 {
            bail!("unwatch {}: {}", dir, std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> anyhow::Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        if !self.poll(timeout)? {
            return Ok(events);
        }
        let mut chunk = [0u8; 4096];
        loop {
            let n = match self.fd.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => bail!("read inotify: {}", err),
            };
            if n == 0 {
                break;
            }
            self.buf.extend(&chunk[..n]);
            while let Some(raw) = self.buf.next_event() {
                if let Some(event) = self.translate(raw) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }
}

impl Inotify {
    fn translate(&self, raw: InotifyEvent) -> Option<RawEvent> {
        let kind = if raw.mask & libc::IN_CREATE != 0 {
            EventKind::Create
        } else if raw.mask & libc::IN_MODIFY != 0 {
            EventKind::Modify
        } else if raw.mask & libc::IN_DELETE != 0 {
            EventKind::Delete
        } else {
            // IN_IGNORED, IN_Q_OVERFLOW and the like.
            tracing::debug!("inotify mask {:#x} on wd {}", raw.mask, raw.wd);
            return None;
        };
        let dir = self.dirs.get(&raw.wd)?;
        let mut path = format!("{}/{}", dir.trim_end_matches('/'), raw.name);
        if raw.mask & libc::IN_ISDIR != 0 {
            path.push('/');
        }
        Some(RawEvent { path, kind })
    }
}

#[derive(Debug, PartialEq)]
struct InotifyEvent {
    wd: libc::c_int,
    mask: u32,
    name: String,
}

/// Accumulates raw reads and splits them into events.  A record cut off at
/// the end of a read stays buffered until the rest arrives.
#[derive(Default)]
struct EventBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl EventBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.data.drain(..self.pos);
        self.pos = 0;
        self.data.extend_from_slice(bytes);
    }

    fn next_event(&mut self) -> Option<InotifyEvent> {
        let rest = &self.data[self.pos..];
        if rest.len() < HEADER_LEN {
            return None;
        }
        let field = |i: usize| [rest[i], rest[i + 1], rest[i + 2], rest[i + 3]];
        let wd = libc::c_int::from_ne_bytes(field(0));
        let mask = u32::from_ne_bytes(field(4));
        // Bytes 8..12 hold the rename cookie.
        let len = u32::from_ne_bytes(field(12)) as usize;
        if rest.len() < HEADER_LEN + len {
            return None;
        }
        // The name is padded with NULs.
        let name = &rest[HEADER_LEN..HEADER_LEN + len];
        let name = match name.iter().position(|&b| b == 0) {
            Some(end) => &name[..end],
            None => name,
        };
        let name = String::from_utf8_lossy(name).into_owned();
        self.pos += HEADER_LEN + len;
        Some(InotifyEvent { wd, mask, name })
    }
}
