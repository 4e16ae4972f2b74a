//! Bounded child-process execution.
//!
//! Every external decoder call (`ffprobe`, `ffmpeg`, archive extraction) goes
//! through [`ScopedProcess`]: spawn with piped output, wait at most the given
//! timeout, and kill every descendant before returning. The child itself is
//! killed too unless it already exited. The kill also runs from `Drop`, so a
//! panic between spawn and reap cannot leak a process.
//!
//! Each child is tagged with a unique `SCREENMACHINE_SCOPE` environment
//! entry. Descendants inherit it, which keeps them findable after the child
//! exits and they are re-parented.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use screenmachine::process::ScopedProcess;
//!
//! let output = ScopedProcess::new("ffprobe", Duration::from_secs(5))
//!     .args(["-v", "error", "-show_format", "input.mp4"])
//!     .run()?;
//! assert!(output.success());
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```

use std::{
    collections::HashSet,
    ffi::OsStr,
    io::{ErrorKind, Read},
    process::{Child, Command, ExitStatus, Stdio},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::error::ScreenMachineError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output readers may keep draining after the tree is dead.
const READER_GRACE: Duration = Duration::from_millis(250);

const SCOPE_ENV: &str = "SCREENMACHINE_SCOPE";

static LIVE_CHILDREN: AtomicUsize = AtomicUsize::new(0);
static NEXT_SCOPE: AtomicU64 = AtomicU64::new(0);

/// Number of children spawned through [`ScopedProcess`] that have not been
/// reaped yet.
pub fn live_children() -> usize {
    LIVE_CHILDREN.load(Ordering::Acquire)
}

/// Captured result of a finished child.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status of the child.
    pub status: ExitStatus,
    /// Everything the child wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything the child wrote to stderr.
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Convert a non-zero exit into [`ScreenMachineError::SubprocessFailed`].
    pub fn into_success(self, program: &str) -> Result<Self, ScreenMachineError> {
        if self.success() {
            return Ok(self);
        }
        Err(ScreenMachineError::SubprocessFailed {
            program: program.to_string(),
            status: self.status.to_string(),
            stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
        })
    }
}

/// A command that is guaranteed to be terminated, descendants included,
/// before [`run`](ScopedProcess::run) returns.
#[must_use]
pub struct ScopedProcess {
    program: String,
    command: Command,
    timeout: Duration,
    scope: String,
}

impl ScopedProcess {
    /// Prepare `program` with an execution bound of `timeout`.
    pub fn new<S: AsRef<OsStr>>(program: S, timeout: Duration) -> Self {
        let program_ref = program.as_ref();
        let scope = format!(
            "{}-{}",
            std::process::id(),
            NEXT_SCOPE.fetch_add(1, Ordering::Relaxed)
        );
        let mut command = Command::new(program_ref);
        command
            .env(SCOPE_ENV, &scope)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        Self {
            program: program_ref.to_string_lossy().to_string(),
            command,
            timeout,
            scope,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Spawn the child, collect its output and wait for it within the bound.
    ///
    /// A non-zero exit is not an error here; see
    /// [`ProcessOutput::into_success`].
    ///
    /// # Errors
    ///
    /// - [`ScreenMachineError::DecoderUnavailable`] if the program does not exist.
    /// - [`ScreenMachineError::SubprocessTimeout`] if the bound was exceeded;
    ///   the child and its descendants have been killed by then.
    /// - [`ScreenMachineError::IoError`] for other spawn or wait failures.
    pub fn run(mut self) -> Result<ProcessOutput, ScreenMachineError> {
        log::trace!("Spawning {} (timeout {:?})", self.program, self.timeout);

        let child = self.command.spawn().map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ScreenMachineError::DecoderUnavailable(format!("{} not found", self.program))
            } else {
                ScreenMachineError::IoError(error)
            }
        })?;
        let mut guard = ChildGuard::new(child, self.scope.clone());

        let stdout_reader = spawn_reader(guard.child.stdout.take());
        let stderr_reader = spawn_reader(guard.child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match guard.child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    break Err(ScreenMachineError::SubprocessTimeout {
                        program: self.program.clone(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(error) => break Err(ScreenMachineError::IoError(error)),
            }
        };

        match status {
            Ok(status) => {
                guard.mark_reaped();
                // Background descendants may still hold the output pipes.
                kill_tree(None, &self.scope);
                let join_deadline = deadline.max(Instant::now() + READER_GRACE);
                let stdout = join_reader(stdout_reader, join_deadline);
                let stderr = join_reader(stderr_reader, join_deadline);
                Ok(ProcessOutput {
                    status,
                    stdout,
                    stderr,
                })
            }
            Err(error) => {
                log::warn!("{}; terminating process tree", error);
                // Killing the tree closes the pipes, which lets the readers finish.
                drop(guard);
                let join_deadline = Instant::now() + READER_GRACE;
                join_reader(stdout_reader, join_deadline);
                join_reader(stderr_reader, join_deadline);
                Err(error)
            }
        }
    }
}

/// Owns a running child until it is reaped; kills the whole tree otherwise.
struct ChildGuard {
    child: Child,
    scope: String,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child, scope: String) -> Self {
        LIVE_CHILDREN.fetch_add(1, Ordering::AcqRel);
        Self {
            child,
            scope,
            reaped: false,
        }
    }

    fn mark_reaped(&mut self) {
        if !self.reaped {
            self.reaped = true;
            LIVE_CHILDREN.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        kill_tree(Some(&mut self.child), &self.scope);
        // Errors here mean the child is already gone.
        let _ = self.child.wait();
        self.mark_reaped();
    }
}

/// Kill every process tagged with `scope`, every descendant of those, and
/// `child` if it has not been reaped.
///
/// Descendants are collected before the root dies so that re-parenting to
/// init cannot hide them.
fn kill_tree(child: Option<&mut Child>, scope: &str) {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_environ(UpdateKind::Always),
    );

    let marker = format!("{SCOPE_ENV}={scope}");
    let root = child.as_ref().map(|child| Pid::from_u32(child.id()));
    let mut tree: HashSet<Pid> = system
        .processes()
        .iter()
        .filter(|(_, process)| {
            process
                .environ()
                .iter()
                .any(|entry| AsRef::<OsStr>::as_ref(entry) == OsStr::new(&marker))
        })
        .map(|(pid, _)| *pid)
        .chain(root)
        .collect();
    loop {
        let before = tree.len();
        for (pid, process) in system.processes() {
            if process.parent().is_some_and(|parent| tree.contains(&parent)) {
                tree.insert(*pid);
            }
        }
        if tree.len() == before {
            break;
        }
    }

    if let Some(child) = child
        && let Err(error) = child.kill()
    {
        log::debug!("Kill of pid {} failed: {error}", child.id());
    }
    for pid in tree.iter().filter(|pid| Some(**pid) != root) {
        if let Some(process) = system.process(*pid) {
            log::debug!("Killing leftover descendant {pid}");
            process.kill();
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    source.map(|mut source| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            // Partial output is still useful for diagnostics.
            let _ = source.read_to_end(&mut buffer);
            buffer
        })
    })
}

/// Collect a reader's output, giving up at `deadline`. An abandoned reader
/// thread ends on its own once the pipe closes.
fn join_reader(reader: Option<JoinHandle<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    let Some(handle) = reader else {
        return Vec::new();
    };
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if !handle.is_finished() {
        log::debug!("Output pipe still open at deadline; abandoning reader");
        return Vec::new();
    }
    handle.join().unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let output = ScopedProcess::new("sh", Duration::from_secs(5))
            .args(["-c", "printf hello; exit 3"])
            .run()
            .unwrap();
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.status.code(), Some(3));
        assert!(output.into_success("sh").is_err());
    }

    #[test]
    fn missing_program_is_unavailable() {
        let result = ScopedProcess::new("definitely-not-a-real-binary-42", Duration::from_secs(1))
            .run();
        assert!(matches!(
            result,
            Err(ScreenMachineError::DecoderUnavailable(_))
        ));
    }

    #[test]
    fn timeout_kills_descendants() {
        // The background sleep inherits stdout; if it survived, the reader
        // join would block for the full 30 seconds.
        let started = Instant::now();
        let result = ScopedProcess::new("sh", Duration::from_millis(300))
            .args(["-c", "sleep 30 & sleep 30"])
            .run();
        assert!(matches!(
            result,
            Err(ScreenMachineError::SubprocessTimeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn normal_exit_kills_background_descendants() {
        let started = Instant::now();
        let output = ScopedProcess::new("sh", Duration::from_millis(300))
            .args(["-c", "sleep 4 & echo $!; exit 0"])
            .run()
            .unwrap();
        assert!(output.success());
        assert!(started.elapsed() < Duration::from_secs(2));

        let pid: u32 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();
        thread::sleep(Duration::from_millis(100));
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let alive = system
            .process(Pid::from_u32(pid))
            .is_some_and(|process| process.status() != sysinfo::ProcessStatus::Zombie);
        assert!(!alive, "background sleep {pid} survived");
    }
}
