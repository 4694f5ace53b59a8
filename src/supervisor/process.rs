//! Child process handles.
//!
//! A [`ProcessHandle`] owns one `std::process::Child` with piped stdout/stderr.
//! On unix every child leads its own process group, and termination targets the
//! whole group: helpers started by a shell step or an interpreter go down with
//! it. Termination escalates from SIGTERM to SIGKILL once the grace period is
//! over, and dropping a handle kills whatever is left of the group.

use encoding_rs::Encoding;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::config::{AcquisitionConfig, ControlConfig};
use crate::error::{AppResult, DaqError};
use crate::pipeline::decode_line;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// What to launch and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    /// Executable, interpreter or script
    pub program: PathBuf,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Working directory of the child
    pub working_dir: PathBuf,
}

impl ProcessCommand {
    /// Command running `program` from its own folder.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let working_dir = parent_or_current(&program);
        Self {
            program,
            args: Vec::new(),
            working_dir,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Acquisition executable from configuration.
    pub fn acquisition(config: &AcquisitionConfig) -> Self {
        Self::new(&config.executable)
            .args(config.args.iter().cloned())
            .with_working_dir(config.working_dir())
    }

    /// Control script from configuration.
    pub fn control(config: &ControlConfig) -> Self {
        Self::new(&config.program)
            .args(config.args.iter().cloned())
            .with_working_dir(config.working_dir())
    }

    /// File name of the program, as it appears in the process table.
    pub fn process_name(&self) -> Option<&OsStr> {
        self.program.file_name()
    }

    fn resolve(&self, role: &'static str) -> AppResult<PathBuf> {
        if self.program.as_os_str().is_empty() {
            return Err(DaqError::Configuration(format!("{role} program is not configured")));
        }
        if !self.working_dir.is_dir() {
            return Err(DaqError::Configuration(format!(
                "{role} working directory {} does not exist",
                self.working_dir.display()
            )));
        }
        // Bare names go through PATH; anything path-like must exist up front.
        if self.program.is_absolute() || self.program.components().count() > 1 {
            if !self.program.is_file() {
                return Err(DaqError::ExecutableNotFound(self.program.clone()));
            }
            return Ok(std::fs::canonicalize(&self.program)?);
        }
        Ok(self.program.clone())
    }
}

fn parent_or_current(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// A launched child process.
pub struct ProcessHandle {
    role: &'static str,
    child: Child,
    started: Instant,
    exit: Option<ExitStatus>,
    /// Cleared once no member of the child's process group is left.
    group_active: bool,
}

impl ProcessHandle {
    /// Launch `command` with stdin closed and stdout/stderr piped.
    ///
    /// A missing program yields [`DaqError::ExecutableNotFound`]; any other launch
    /// failure yields [`DaqError::Spawn`] naming `role`.
    pub fn launch(role: &'static str, command: &ProcessCommand) -> AppResult<Self> {
        let program = command.resolve(role)?;

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);
        let child = cmd.spawn().map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                DaqError::ExecutableNotFound(command.program.clone())
            } else {
                DaqError::Spawn { what: role, source }
            }
        })?;

        info!(
            role,
            pid = child.id(),
            program = %program.display(),
            cwd = %command.working_dir.display(),
            "Launched process"
        );
        Ok(Self {
            role,
            child,
            started: Instant::now(),
            exit: None,
            group_active: true,
        })
    }

    /// Operating-system process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Role given at launch ("acquisition", "control script").
    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Time since launch.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take the stdout pipe. `None` on the second call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr pipe. `None` on the second call.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Non-blocking liveness check. Returns the exit status once the child is gone.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => warn!(role = self.role, error = %e, "Failed to poll process status"),
            }
        }
        self.exit
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Whether the child or anything it started in its process group is still
    /// running.
    pub fn is_group_alive(&mut self) -> bool {
        let leader_alive = self.is_alive();
        #[cfg(unix)]
        let members_alive = self.signal_group(None);
        #[cfg(not(unix))]
        let members_alive = false;
        leader_alive || members_alive
    }

    /// Exit code, if the child exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|status| status.code())
    }

    /// Wait up to `timeout` for the child to exit on its own.
    pub fn wait_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_exit() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL);
        }
    }

    /// Send `signal` (or check that it exists with `None`) to the child's process group.
    /// Returns whether any member received it.
    #[cfg(unix)]
    fn signal_group(&mut self, signal: Option<nix::sys::signal::Signal>) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid as UnixPid;

        if !self.group_active {
            return false;
        }
        let Ok(raw) = i32::try_from(self.pid()) else {
            return false;
        };
        match killpg(UnixPid::from_raw(raw), signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => {
                // The group id may be reused from here on; never signal it again.
                self.group_active = false;
                false
            }
            Err(e) => {
                warn!(role = self.role, pgid = raw, error = %e, "Failed to signal process group");
                self.group_active = false;
                false
            }
        }
    }

    /// Ask the child and its process group to exit.
    fn request_terminate(&mut self) {
        debug!(role = self.role, pid = self.pid(), "Requesting termination");
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            if self.signal_group(Some(Signal::SIGTERM)) {
                return;
            }
        }
        self.force_kill();
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            self.signal_group(Some(nix::sys::signal::Signal::SIGKILL));
        }
        if !self.is_alive() {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!(role = self.role, error = %e, "Failed to kill process");
        }
        match self.child.wait() {
            Ok(status) => self.exit = Some(status),
            Err(e) => warn!(role = self.role, error = %e, "Failed to reap process"),
        }
    }

    /// Terminate gracefully, killing after `timeout`.
    pub fn terminate(&mut self, timeout: Duration) -> Option<ExitStatus> {
        terminate_all(&mut [&mut *self], timeout);
        self.exit
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("role", &self.role)
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_group_alive() {
            warn!(role = self.role, pid = self.pid(), "Killing processes left running");
            self.force_kill();
        }
    }
}

/// Ask every process group to exit, wait up to `timeout` for all of them, then
/// kill what is still running.
pub fn terminate_all(handles: &mut [&mut ProcessHandle], timeout: Duration) {
    for handle in handles.iter_mut() {
        handle.request_terminate();
    }

    let deadline = Instant::now() + timeout;
    loop {
        let mut alive = false;
        for handle in handles.iter_mut() {
            alive |= handle.is_group_alive();
        }
        if !alive || Instant::now() >= deadline {
            break;
        }
        thread::sleep(EXIT_POLL);
    }

    for handle in handles.iter_mut() {
        if handle.is_group_alive() {
            warn!(
                role = handle.role,
                pid = handle.pid(),
                timeout_ms = timeout.as_millis() as u64,
                "Process ignored termination request, killing"
            );
            handle.force_kill();
        }
    }
}

/// Kill every process named `name` other than this one. Returns how many were
/// signalled.
pub fn kill_by_name(name: &OsStr) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let own = Pid::from_u32(std::process::id());

    let killed = system
        .processes_by_exact_name(name)
        .filter(|process| process.pid() != own && process.status() != ProcessStatus::Zombie)
        .filter(|process| process.kill())
        .count();
    if killed > 0 {
        warn!(name = %name.to_string_lossy(), killed, "Killed leftover processes by name");
    }
    killed
}

/// Whether a live (non-zombie) process with this pid exists.
pub fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// Read `source` line by line on a named thread until EOF, decoding with
/// `encoding` and handing each non-empty line to `on_line`.
pub fn forward_lines<R, F>(
    name: &str,
    source: R,
    encoding: &'static Encoding,
    mut on_line: F,
) -> AppResult<JoinHandle<()>>
where
    R: Read + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut reader = BufReader::new(source);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(encoding, &buf);
                        let line = line.trim_end();
                        if !line.is_empty() {
                            on_line(line.to_string());
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "Output forwarding ended");
                        break;
                    }
                }
            }
        })
        .map_err(|source| DaqError::Thread {
            name: name.to_string(),
            source,
        })
}
