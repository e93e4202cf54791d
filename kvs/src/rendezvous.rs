//! Bootstrap channel: a Unix stream socket that introduces clients to the
//! shared region and lets the server track live client processes.
//!
//! Protocol, per connection: the client sends its 4-byte native-endian pid;
//! the server replies with a 4-byte region handle and records the pid. The
//! handle is informational (clients attach the region by its well-known
//! name), but the roster lets the server signal its clients at shutdown.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the accept loop sleeps between polls of the listener and the
/// termination flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Server side of the rendezvous.
pub struct Rendezvous {
    listener: UnixListener,
    path: PathBuf,
    region_handle: i32,
    clients: Vec<u32>,
}

impl Rendezvous {
    /// Binds the socket, replacing any stale file from a previous run.
    pub fn bind<P: AsRef<Path>>(path: P, region_handle: i32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        info!(path = %path.display(), "rendezvous listening");
        Ok(Self {
            listener,
            path,
            region_handle,
            clients: Vec::new(),
        })
    }

    /// Accepts clients until `terminated` is set.
    pub fn run(&mut self, terminated: &AtomicBool) {
        while !terminated.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.greet(stream) {
                        warn!(error = %e, "client handshake failed");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }
    }

    fn greet(&mut self, mut stream: UnixStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf)?;
        let pid = u32::from_ne_bytes(buf);

        stream.write_all(&self.region_handle.to_ne_bytes())?;

        debug!(pid, "client announced");
        self.clients.push(pid);
        Ok(())
    }

    /// Pids of every client that has announced itself.
    pub fn clients(&self) -> &[u32] {
        &self.clients
    }

    /// Asks every recorded client to terminate.
    pub fn signal_shutdown(&self) {
        self.signal_all(Signal::SIGTERM);
    }

    /// Advises every recorded client to pause between operations.
    pub fn signal_pause(&self) {
        self.signal_all(Signal::SIGUSR1);
    }

    /// Advises paused clients to resume.
    pub fn signal_resume(&self) {
        self.signal_all(Signal::SIGUSR2);
    }

    fn signal_all(&self, signal: Signal) {
        for &pid in &self.clients {
            match kill(Pid::from_raw(pid as i32), signal) {
                Ok(()) => debug!(pid, ?signal, "signalled client"),
                Err(e) => debug!(pid, error = %e, "client already gone"),
            }
        }
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Client side: announce our pid, receive the region handle.
pub fn announce<P: AsRef<Path>>(path: P) -> io::Result<i32> {
    let mut stream = UnixStream::connect(path)?;
    stream.write_all(&std::process::id().to_ne_bytes())?;

    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}
