use crate::deadline::Deadline;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How long the process group gets between SIGTERM and SIGKILL.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on draining buffered output after the process group was
/// terminated.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How often a silent command gives the sink a chance to check its caller.
const IDLE_TICK: Duration = Duration::from_millis(200);

/// Poll interval while waiting for a command whose pipes are closed.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn tag(self) -> &'static str {
        match self {
            Stream::Stdout => "[OUT]",
            Stream::Stderr => "[ERR]",
        }
    }
}

/// Destination for output lines. A failed write means nobody is listening
/// any more and the run is aborted.
pub trait LineSink {
    fn emit(&mut self, line: &str) -> io::Result<()>;

    /// Called periodically while the command produces no output. An error
    /// aborts the run like a failed [`LineSink::emit`].
    fn idle(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LineSink for Vec<String> {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_owned());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] io::Error),
    #[error("command timeout after {:.1?}", .elapsed)]
    Timeout { elapsed: Duration },
    #[error("command failed: {}", describe_exit(.code, .signal))]
    Failed {
        code: Option<i32>,
        signal: Option<i32>,
    },
    #[error("output stream closed: {0}")]
    Disconnected(#[source] io::Error),
    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(c), _) => format!("exit status {c}"),
        (None, Some(s)) => format!("killed by signal {s}"),
        (None, None) => "unknown exit status".to_owned(),
    }
}

/// Runs shell commands and streams their output line by line.
///
/// Each command gets its own process group so that terminating it also
/// terminates everything it started.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: PathBuf,
    shell_args: Vec<String>,
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new("/bin/bash", &["-lc"])
    }
}

impl ProcessRunner {
    pub fn new(shell: impl Into<PathBuf>, shell_args: &[&str]) -> Self {
        Self {
            shell: shell.into(),
            shell_args: shell_args.iter().map(|s| (*s).to_owned()).collect(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn from_parts(shell: impl Into<PathBuf>, shell_args: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            shell_args,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Run `command` until it exits or `deadline` passes.
    ///
    /// Every line is handed to `sink` as `"[OUT] ..."` or `"[ERR] ..."` while
    /// the command runs. Both pipes are drained and their readers joined
    /// before the result is returned.
    pub fn run<S: LineSink + ?Sized>(
        &self,
        command: &str,
        deadline: Deadline,
        sink: &mut S,
    ) -> Result<(), RunError> {
        debug!("spawning {} {:?} {command:?}", self.shell.display(), self.shell_args);
        let started = Instant::now();
        let mut child = Command::new(&self.shell)
            .args(&self.shell_args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(RunError::Spawn)?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Stream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let aborted = self.forward(&rx, deadline, sink, &mut child, started);

        // Lines already read before an abort still belong to the caller.
        let drained = match &aborted {
            None => true,
            Some(RunError::Timeout { .. }) => drain(&rx, Some(sink)),
            Some(_) => drain::<S>(&rx, None),
        };
        if drained {
            for reader in readers {
                if reader.join().is_err() {
                    warn!("output reader thread panicked");
                }
            }
        } else {
            warn!("output readers still busy after termination; detaching them");
        }

        let status = child.wait().map_err(RunError::Wait)?;
        if let Some(err) = aborted {
            return Err(err);
        }
        if status.success() {
            debug!("command finished in {:.1?}", started.elapsed());
            Ok(())
        } else {
            Err(RunError::Failed {
                code: status.code(),
                signal: status.signal(),
            })
        }
    }

    /// Move lines from the readers to the sink until both pipes close and
    /// the command exits. Returns the reason for stopping early, if any.
    fn forward<S: LineSink + ?Sized>(
        &self,
        rx: &Receiver<(Stream, String)>,
        deadline: Deadline,
        sink: &mut S,
        child: &mut Child,
        started: Instant,
    ) -> Option<RunError> {
        loop {
            if deadline.expired() {
                self.terminate(child);
                return Some(RunError::Timeout {
                    elapsed: started.elapsed(),
                });
            }
            let tick = deadline.remaining().map_or(IDLE_TICK, |left| left.min(IDLE_TICK));
            let written = match rx.recv_timeout(tick) {
                Ok((stream, line)) => sink.emit(&format!("{} {line}", stream.tag())),
                Err(RecvTimeoutError::Timeout) => sink.idle(),
                Err(RecvTimeoutError::Disconnected) => {
                    return self.await_exit(deadline, sink, child, started);
                }
            };
            if let Err(e) = written {
                warn!("output sink closed, terminating command: {e}");
                self.terminate(child);
                return Some(RunError::Disconnected(e));
            }
        }
    }

    /// Both pipes are closed but the command may still be running, e.g.
    /// after redirecting its output elsewhere. Wait for it under the same
    /// deadline.
    fn await_exit<S: LineSink + ?Sized>(
        &self,
        deadline: Deadline,
        sink: &mut S,
        child: &mut Child,
        started: Instant,
    ) -> Option<RunError> {
        let mut last_idle = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return None,
                Ok(None) => {}
                // Reported by the final wait().
                Err(_) => return None,
            }
            if deadline.expired() {
                debug!("command closed its output but outlived its deadline");
                self.terminate(child);
                return Some(RunError::Timeout {
                    elapsed: started.elapsed(),
                });
            }
            if last_idle.elapsed() >= IDLE_TICK {
                last_idle = Instant::now();
                if let Err(e) = sink.idle() {
                    warn!("output sink closed, terminating command: {e}");
                    self.terminate(child);
                    return Some(RunError::Disconnected(e));
                }
            }
            let pause = deadline.remaining().map_or(EXIT_POLL, |left| left.min(EXIT_POLL));
            std::thread::sleep(pause);
        }
    }

    /// SIGTERM the process group, then SIGKILL it once the grace period is
    /// over or the leader has exited, whichever comes first.
    fn terminate(&self, child: &mut Child) {
        let Ok(pgid) = i32::try_from(child.id()) else {
            let _ = child.kill();
            return;
        };
        debug!("sending SIGTERM to process group {pgid}");
        signal_group(pgid, libc::SIGTERM);
        let until = Instant::now() + self.kill_grace;
        while Instant::now() < until {
            if matches!(child.try_wait(), Ok(Some(_))) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        // Stragglers that ignored SIGTERM or outlived the leader.
        signal_group(pgid, libc::SIGKILL);
    }
}

#[allow(unsafe_code)]
fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: kill() has no memory-safety preconditions; a negative pid
    // addresses every process in the group.
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret != 0 {
        let errno = io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to signal process group {pgid}: {errno}");
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    stream: Stream,
    tx: Sender<(Stream, String)>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("reading {} failed: {e}", stream.tag());
                    break;
                }
            }
        }
    })
}

/// Empty the channel after an abort, forwarding to `sink` when given.
/// Returns false if the readers did not finish within the grace period.
fn drain<S: LineSink + ?Sized>(rx: &Receiver<(Stream, String)>, mut sink: Option<&mut S>) -> bool {
    let until = Instant::now() + DRAIN_GRACE;
    loop {
        let left = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok((stream, line)) => {
                if let Some(s) = sink.as_deref_mut() {
                    if s.emit(&format!("{} {line}", stream.tag())).is_err() {
                        sink = None;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}
