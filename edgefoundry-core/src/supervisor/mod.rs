//! Worker process supervision.
//!
//! The supervisor starts, stops and reports on exactly one detached worker
//! process. The PID file and the process table are the only sources of
//! truth, so a fresh CLI invocation can manage a worker started by an
//! earlier one.
//!
//! A recorded pid only counts as the worker when the live process carries
//! the worker's launch signature: same program file name and every marker
//! argument present. A recycled pid that now belongs to something else reads
//! as "not running".

pub mod pidfile;
pub mod process;

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::{ConfigSummary, WorkspacePaths, read_config_file};
use crate::error::ProcessError;
use process::{ProcessProbe, ProcessSnapshot};

/// Delay between launching the worker and confirming it stayed up.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// How long `stop` waits for the worker to exit after SIGTERM.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Exit polling interval during `stop`.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Subcommand the CLI binary runs as the worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// How to launch the worker and how to recognize it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Arguments that must all appear in a live worker's command line.
    pub markers: Vec<String>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            markers: Vec::new(),
        }
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// `<current executable> worker --workspace <root>`.
    pub fn current_exe(root: &Path) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(
            exe,
            [
                OsString::from(WORKER_SUBCOMMAND),
                OsString::from("--workspace"),
                root.as_os_str().to_os_string(),
            ],
        )
        .with_markers([WORKER_SUBCOMMAND]))
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    /// Last known configuration, reported while the worker is down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSummary>,
}

impl ProcessStatus {
    fn stopped(config: Option<ConfigSummary>) -> Self {
        Self {
            running: false,
            pid: None,
            uptime_secs: None,
            memory_mb: None,
            cpu_percent: None,
            config,
        }
    }
}

/// Supervisor of the workspace's worker process.
#[derive(Debug, Clone)]
pub struct Supervisor {
    paths: WorkspacePaths,
    command: WorkerCommand,
    settle_delay: Duration,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl Supervisor {
    pub fn new(paths: WorkspacePaths, command: WorkerCommand) -> Self {
        Self {
            paths,
            command,
            settle_delay: SETTLE_DELAY,
            stop_timeout: STOP_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// A supervisor launching this executable's `worker` subcommand.
    pub fn for_workspace(paths: WorkspacePaths) -> Result<Self, ProcessError> {
        let command = WorkerCommand::current_exe(paths.root())
            .map_err(|e| ProcessError::io("locate executable", paths.root(), e))?;
        Ok(Self::new(paths, command))
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    /// The recorded pid, if it belongs to a live worker.
    pub fn live_pid(&self) -> Option<u32> {
        let pid = pidfile::read(&self.paths.pid_file())?;
        let snapshot = process::inspect(pid)?;
        if snapshot.zombie {
            return None;
        }
        if !snapshot.matches(&self.command.program, &self.command.markers) {
            tracing::debug!(pid, program = ?snapshot.program, "PID belongs to another process");
            return None;
        }
        Some(pid)
    }

    pub fn is_running(&self) -> bool {
        self.live_pid().is_some()
    }

    /// Launch the worker and return its pid.
    pub async fn start(&self) -> Result<u32, ProcessError> {
        if let Some(pid) = self.live_pid() {
            return Err(ProcessError::AlreadyRunning { pid });
        }
        let config_file = self.paths.config_file();
        if !config_file.exists() {
            return Err(ProcessError::NotConfigured { path: config_file });
        }

        let log_file = self.paths.log_file();
        let stdout = File::create(&log_file)
            .map_err(|e| ProcessError::io("open log file", &log_file, e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| ProcessError::io("open log file", &log_file, e))?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .current_dir(self.paths.root())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::io("spawn worker", &self.command.program, e))?;
        let pid = child.id();
        if let Err(e) = pidfile::write(&self.paths.pid_file(), pid) {
            tracing::error!(pid, error = %e, "Could not record worker pid, killing it");
            if let Err(kill_err) = child.kill() {
                tracing::warn!(pid, error = %kill_err, "Failed to kill unrecorded worker");
            }
            let _ = child.wait();
            return Err(e);
        }
        tracing::info!(pid, log = %log_file.display(), "Worker launched");

        let reaper = std::thread::Builder::new()
            .name("edgefoundry-reaper".into())
            .spawn(move || {
                if let Ok(status) = child.wait() {
                    tracing::debug!(pid, %status, "Worker exited");
                }
            });
        if let Err(e) = reaper {
            tracing::warn!(error = %e, "Could not spawn reaper thread");
        }

        tokio::time::sleep(self.settle_delay).await;
        if !self.is_running() {
            tracing::warn!(pid, "Worker exited during startup");
            return Err(ProcessError::StartFailed { log_file });
        }
        Ok(pid)
    }

    /// Terminate the worker and return the pid it had.
    pub async fn stop(&self) -> Result<u32, ProcessError> {
        let pid_file = self.paths.pid_file();
        let Some(pid) = self.live_pid() else {
            pidfile::remove(&pid_file);
            return Err(ProcessError::NotRunning);
        };

        let mut probe = ProcessProbe::new();
        probe.refresh(pid);
        if !probe.terminate(pid) {
            tracing::warn!(pid, "SIGTERM was not delivered");
        }

        let deadline = Instant::now() + self.stop_timeout;
        let outcome = loop {
            if !process::is_alive(pid) {
                break Ok(pid);
            }
            if Instant::now() >= deadline {
                break Err(ProcessError::StopTimedOut {
                    pid,
                    timeout_secs: self.stop_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        pidfile::remove(&pid_file);
        match &outcome {
            Ok(_) => tracing::info!(pid, "Worker stopped"),
            Err(e) => tracing::warn!(pid, error = %e, "Worker did not stop"),
        }
        outcome
    }

    /// Liveness plus resource usage, or the configuration summary when down.
    pub async fn status(&self) -> ProcessStatus {
        let Some(pid) = self.live_pid() else {
            return self.stopped_status();
        };

        let mut probe = ProcessProbe::new();
        probe.refresh(pid);
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        probe.refresh(pid);
        self.running_status(pid, probe.snapshot(pid))
    }

    fn stopped_status(&self) -> ProcessStatus {
        let config = read_config_file(&self.paths)
            .ok()
            .flatten()
            .map(|c| c.summary());
        ProcessStatus::stopped(config)
    }

    /// `snapshot` is `None` when the worker exited after the liveness check.
    fn running_status(&self, pid: u32, snapshot: Option<ProcessSnapshot>) -> ProcessStatus {
        match snapshot {
            Some(snap) if !snap.zombie => ProcessStatus {
                running: true,
                pid: Some(pid),
                uptime_secs: Some(snap.run_time_secs),
                memory_mb: Some(snap.memory_bytes as f64 / 1024.0 / 1024.0),
                cpu_percent: Some(snap.cpu_percent),
                config: None,
            },
            _ => self.stopped_status(),
        }
    }

    /// The last `lines` lines of the worker log.
    pub fn tail_logs(&self, lines: usize) -> Result<Vec<String>, ProcessError> {
        let log_file = self.paths.log_file();
        let bytes = match std::fs::read(&log_file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::LogMissing { path: log_file });
            }
            Err(e) => return Err(ProcessError::io("read log file", &log_file, e)),
        };
        let text = String::from_utf8_lossy(&bytes);
        let all: Vec<&str> = text.lines().collect();
        let skip = all.len().saturating_sub(lines);
        Ok(all[skip..].iter().map(|l| l.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> Supervisor {
        let command = WorkerCommand::new("edgefoundry", ["worker"]).with_markers(["worker"]);
        Supervisor::new(WorkspacePaths::new(dir.path()), command)
    }

    #[tokio::test]
    async fn test_stop_when_not_running_cleans_stale_pid() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        std::fs::create_dir_all(sup.paths().working_dir()).unwrap();
        std::fs::write(sup.paths().pid_file(), "999999999").unwrap();

        let err = sup.stop().await.unwrap_err();
        assert!(matches!(err, ProcessError::NotRunning));
        assert!(!sup.paths().pid_file().exists());
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let dir = TempDir::new().unwrap();
        let err = supervisor(&dir).start().await.unwrap_err();
        assert!(matches!(err, ProcessError::NotConfigured { .. }));
    }

    #[test]
    fn test_pid_of_foreign_process_is_not_the_worker() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        pidfile::write(&sup.paths().pid_file(), std::process::id()).unwrap();
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_status_when_down_reports_config() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        crate::config::save_config(sup.paths(), &crate::config::AgentConfig::default()).unwrap();

        let status = sup.status().await;
        assert!(!status.running);
        assert!(status.pid.is_none());
        assert_eq!(status.config.unwrap().runtime, "llama_cpp");
    }

    #[test]
    fn test_worker_gone_during_status_reports_config() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        crate::config::save_config(sup.paths(), &crate::config::AgentConfig::default()).unwrap();

        let status = sup.running_status(4242, None);
        assert!(!status.running);
        assert!(status.pid.is_none());
        assert_eq!(status.config.unwrap().runtime, "llama_cpp");
    }

    #[test]
    fn test_running_status_from_snapshot() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let snapshot = ProcessSnapshot {
            pid: 4242,
            program: Some("edgefoundry".into()),
            exe: None,
            args: vec!["worker".into()],
            zombie: false,
            memory_bytes: 3 * 1024 * 1024,
            cpu_percent: 1.5,
            run_time_secs: 90,
        };

        let status = sup.running_status(4242, Some(snapshot));
        assert!(status.running);
        assert_eq!(status.pid, Some(4242));
        assert_eq!(status.uptime_secs, Some(90));
        assert_eq!(status.memory_mb, Some(3.0));
        assert!(status.config.is_none());
    }

    #[test]
    fn test_tail_logs() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        assert!(matches!(
            sup.tail_logs(50).unwrap_err(),
            ProcessError::LogMissing { .. }
        ));

        std::fs::create_dir_all(sup.paths().working_dir()).unwrap();
        let body: String = (1..=60).map(|i| format!("line {i}\n")).collect();
        std::fs::write(sup.paths().log_file(), body).unwrap();

        let tail = sup.tail_logs(3).unwrap();
        assert_eq!(tail, vec!["line 58", "line 59", "line 60"]);
        assert_eq!(sup.tail_logs(500).unwrap().len(), 60);
    }

    #[test]
    fn test_current_exe_command_carries_marker() {
        let cmd = WorkerCommand::current_exe(Path::new("/srv/agent")).unwrap();
        assert_eq!(cmd.markers, vec![WORKER_SUBCOMMAND.to_string()]);
        assert_eq!(cmd.args[0], OsString::from("worker"));
        assert_eq!(cmd.args[2], OsString::from("/srv/agent"));
    }
}
