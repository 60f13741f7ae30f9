//! OS process inspection through `sysinfo`.

use std::ffi::OsStr;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

/// What the supervisor needs to know about one live process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    /// File name of `argv[0]`.
    pub program: Option<String>,
    /// File name of the resolved executable.
    pub exe: Option<String>,
    /// Arguments after `argv[0]`.
    pub args: Vec<String>,
    pub zombie: bool,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub run_time_secs: u64,
}

impl ProcessSnapshot {
    /// Whether this is the process `program` launched with every marker argument.
    pub fn matches(&self, program: &Path, markers: &[String]) -> bool {
        let Some(expected) = program.file_name().map(lossy) else {
            return false;
        };
        let name_matches = self.program.as_deref() == Some(expected.as_str())
            || self.exe.as_deref() == Some(expected.as_str());
        name_matches && markers.iter().all(|m| self.args.iter().any(|a| a == m))
    }
}

fn lossy<S: AsRef<OsStr> + ?Sized>(s: &S) -> String {
    s.as_ref().to_string_lossy().into_owned()
}

/// A reusable process table scoped to single pids.
pub struct ProcessProbe {
    system: System,
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh the entry for `pid`. CPU usage needs two refreshes
    /// at least [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] apart.
    pub fn refresh(&mut self, pid: u32) {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
    }

    /// The last refreshed view of `pid`, if it is in the process table.
    pub fn snapshot(&self, pid: u32) -> Option<ProcessSnapshot> {
        let process = self.system.process(Pid::from_u32(pid))?;
        let cmd = process.cmd();
        let program = cmd
            .first()
            .and_then(|argv0| Path::new(argv0).file_name().map(lossy));
        Some(ProcessSnapshot {
            pid,
            program,
            exe: process.exe().and_then(Path::file_name).map(lossy),
            args: cmd.iter().skip(1).map(lossy).collect(),
            zombie: process.status() == sysinfo::ProcessStatus::Zombie,
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
            run_time_secs: process.run_time(),
        })
    }

    /// Send SIGTERM. Returns `false` if the process is gone or the signal
    /// could not be delivered.
    pub fn terminate(&self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .and_then(|p| p.kill_with(Signal::Term))
            .unwrap_or(false)
    }
}

/// One-shot lookup of `pid`.
pub fn inspect(pid: u32) -> Option<ProcessSnapshot> {
    let mut probe = ProcessProbe::new();
    probe.refresh(pid);
    probe.snapshot(pid)
}

/// Whether `pid` exists and has not exited.
pub fn is_alive(pid: u32) -> bool {
    inspect(pid).is_some_and(|p| !p.zombie)
}
