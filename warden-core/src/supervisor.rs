//! The signal-driven reap loop.
//!
//! Single-threaded and cooperative: all concurrency here is between
//! processes (the supervisor and its children), not threads. Signal
//! handlers only ever set a flag; all real work happens in
//! [`Supervisor::next_loop`], called from ordinary, non-handler code.

use crate::child::{ChildRecord, ChildStatus, ChildTable, KILL_GRACE_PERIOD};
use os_ext::{
    execve, fork, kill, pid_t, process_exists, sigaction, sigaction_siginfo, setitimer_real,
    sigprocmask_block, sigwait, waitpid, Wait,
    SA_NODEFER, SA_NOCLDSTOP, SA_RESTART, SIGALRM, SIGCHLD, SIGHUP, SIGINT, SIGPIPE, SIGTERM,
};
use std::{
    ffi::CString,
    io,
    os::unix::process::ExitStatusExt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

static SIGNALED: AtomicBool = AtomicBool::new(false);
static TERMINATED: AtomicBool = AtomicBool::new(false);

const ALARM_INTERVAL: Duration = Duration::from_millis(20);

extern "C" fn on_sigchld(_signum: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void)
{
    SIGNALED.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate(_signum: libc::c_int)
{
    TERMINATED.store(true, Ordering::SeqCst);
}

/// Tracks running children and reaps them as they exit.
pub struct Supervisor
{
    children: ChildTable,
}

impl Supervisor
{
    /// Install signal handlers and arm the 20ms wakeup alarm. Must be
    /// called exactly once, before the first call to
    /// [`next_loop`][Self::next_loop].
    pub fn install_signal_handlers() -> io::Result<()>
    {
        sigaction_siginfo(
            SIGCHLD,
            on_sigchld,
            SA_RESTART | SA_NOCLDSTOP | SA_NODEFER,
        )?;

        for signum in [SIGINT, SIGTERM, SIGHUP, SIGPIPE] {
            sigaction(signum, on_terminate, SA_RESTART)?;
        }

        sigprocmask_block(&[SIGALRM, SIGINT, SIGTERM])?;
        setitimer_real(ALARM_INTERVAL)?;

        Ok(())
    }

    /// Create a supervisor with an empty child table.
    pub fn new() -> Self
    {
        Self{children: ChildTable::new()}
    }

    /// Access the child table, e.g. so a launcher can register new
    /// children before the next iteration observes them.
    pub fn children_mut(&mut self) -> &mut ChildTable
    {
        &mut self.children
    }

    /// Run one iteration: reap exited children, then block until the
    /// next wakeup signal.
    ///
    /// Returns `false` once a termination signal has been observed and
    /// the loop should stop; children still running at that point are
    /// left for the init process's reaper.
    pub fn next_loop<F>(&mut self, mut child_changed_status: F) -> io::Result<bool>
        where F: FnMut(&ChildRecord)
    {
        while !TERMINATED.load(Ordering::SeqCst)
            && (SIGNALED.swap(false, Ordering::SeqCst) || !self.children.exited_is_empty())
        {
            self.check_children(&mut child_changed_status)?;
        }

        if TERMINATED.load(Ordering::SeqCst) {
            return Ok(false);
        }

        sigwait(&[SIGALRM, SIGINT, SIGTERM])?;

        Ok(!TERMINATED.load(Ordering::SeqCst))
    }

    /// Scan every running child once: reap it if it exited, otherwise
    /// apply kill escalation if a deadline has passed.
    fn check_children<F>(&mut self, child_changed_status: &mut F) -> io::Result<()>
        where F: FnMut(&ChildRecord)
    {
        let pids: Vec<pid_t> = self.children.running_pids().collect();

        for pid in pids {
            match waitpid(pid, libc::WNOHANG) {
                Ok(Wait::Exited(status)) => {
                    let terminal = match status.code() {
                        Some(code) => ChildStatus::Exited(code),
                        None       => ChildStatus::Signaled(status.signal().unwrap_or(0)),
                    };

                    if let Some(record) = self.children.mark_exited(pid, terminal) {
                        log::info!("reaped pid {pid} (transaction {}): {terminal:?}", record.transaction_id);
                        child_changed_status(&record);
                        self.children.drain_exited(pid);
                    }

                    continue;
                },
                Ok(Wait::StillRunning) => {},
                Err(e) => {
                    log::error!("waitpid({pid}, WNOHANG) failed: {e}");
                    continue;
                },
            }

            if process_exists(pid) {
                self.apply_kill_escalation(pid);
            } else if let Some(record) = self.children.mark_exited(pid, ChildStatus::Vanished) {
                log::info!("pid {pid} (transaction {}) vanished", record.transaction_id);
                child_changed_status(&record);
                self.children.drain_exited(pid);
            }
        }

        Ok(())
    }

    fn apply_kill_escalation(&mut self, pid: pid_t)
    {
        let Some(record) = self.children.running_mut(pid) else { return };
        let Some(deadline) = record.deadline else { return };

        if Instant::now() < deadline {
            return;
        }

        log::info!("kill escalation: sending SIGTERM to pid {pid}");

        if let Err(e) = kill(pid, SIGTERM) {
            log::error!("escalating kill against pid {pid} failed: {e}");
        }

        if let Some(kill_pid) = record.kill_pid {
            if process_exists(kill_pid) {
                log::info!("kill escalation: sending SIGKILL to kill-command pid {kill_pid}");
                if let Err(e) = kill(kill_pid, libc::SIGKILL) {
                    log::error!("killing kill-command pid {kill_pid} failed: {e}");
                }
            }
        }

        record.deadline = Some(Instant::now() + KILL_GRACE_PERIOD);
    }

    /// Cancel a running child.
    ///
    /// If the child was launched with a `kill` command override, that
    /// command is spawned (not waited on) and recorded as the child's
    /// `kill_pid` with an initial escalation deadline; subsequent
    /// [`next_loop`][Self::next_loop] iterations escalate to `SIGTERM`
    /// and finally `SIGKILL` on the kill-command itself if the target
    /// is still alive past the deadline.
    ///
    /// Without an override, this sends `SIGKILL` immediately and waits
    /// synchronously for the child to be reaped.
    pub fn request_kill<F>(&mut self, pid: pid_t, mut child_changed_status: F) -> io::Result<()>
        where F: FnMut(&ChildRecord)
    {
        let Some(record) = self.children.running_mut(pid) else { return Ok(()) };

        let Some(command) = record.kill_command.clone() else {
            return self.kill_process(pid, &mut child_changed_status);
        };

        match spawn_detached(&command) {
            Ok(kill_pid) => {
                log::info!("spawned kill command for pid {pid} as pid {kill_pid}");
                record.kill_pid = Some(kill_pid);
                record.deadline = Some(Instant::now() + KILL_GRACE_PERIOD);
                Ok(())
            },
            Err(e) => {
                log::error!("spawning kill command {command:?} for pid {pid} failed: {e}; falling back to SIGKILL");
                self.kill_process(pid, &mut child_changed_status)
            },
        }
    }

    /// Kill a child immediately and wait synchronously for it to exit,
    /// moving it to the exited table and reporting it exactly once.
    pub fn kill_process<F>(&mut self, pid: pid_t, child_changed_status: &mut F) -> io::Result<()>
        where F: FnMut(&ChildRecord)
    {
        kill(pid, libc::SIGKILL)?;
        let status = waitpid(pid, 0)?;

        let terminal = match status {
            Wait::Exited(status) => match status.code() {
                Some(code) => ChildStatus::Exited(code),
                None       => ChildStatus::Signaled(status.signal().unwrap_or(libc::SIGKILL)),
            },
            Wait::StillRunning => unreachable!("waitpid without WNOHANG always reaps"),
        };

        if let Some(record) = self.children.mark_exited(pid, terminal) {
            log::info!("killed pid {pid} (transaction {}): {terminal:?}", record.transaction_id);
            child_changed_status(&record);
            self.children.drain_exited(pid);
        }

        Ok(())
    }
}

/// Fork and `execve` `command` as `$SHELL -c command`, without waiting
/// for it. Used to launch a user-supplied kill command.
fn spawn_detached(command: &str) -> io::Result<pid_t>
{
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());

    let path = CString::new(shell.clone())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "SHELL contains a NUL"))?;
    let argv = [
        CString::new(shell).unwrap(),
        CString::new("-c").unwrap(),
        CString::new(command)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "kill command contains a NUL"))?,
    ];
    let envp: Vec<CString> = std::env::vars()
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();

    // SAFETY: the supervisor process is single-threaded by design, so
    // no other thread can be holding a lock across this fork.
    let pid = unsafe { fork()? };

    match pid {
        None => {
            let err = execve(&path, &argv, &envp);
            eprintln!("exec of kill command failed: {err}");
            std::process::exit(127);
        },
        Some(pid) => Ok(pid),
    }
}

impl Default for Supervisor
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn check_children_reaps_exited_child() -> io::Result<()>
    {
        // SAFETY: test process is single-threaded at this point.
        let pid = unsafe { os_ext::fork()? };

        match pid {
            None => std::process::exit(0),
            Some(pid) => {
                let mut supervisor = Supervisor::new();
                supervisor.children_mut().insert_running(pid, crate::child::NewChild{
                    transaction_id: 1,
                    ..Default::default()
                });

                let mut seen = Vec::new();
                for _ in 0 .. 100 {
                    supervisor.check_children(&mut |record| seen.push(record.clone()))?;
                    if !seen.is_empty() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }

                assert_eq!(seen.len(), 1);
                assert_eq!(seen[0].status, ChildStatus::Exited(0));
                Ok(())
            },
        }
    }

    #[test]
    fn kill_process_reaps_signaled_child() -> io::Result<()>
    {
        // SAFETY: test process is single-threaded at this point.
        let pid = unsafe { os_ext::fork()? };

        match pid {
            None => {
                std::thread::sleep(Duration::from_secs(30));
                std::process::exit(0);
            },
            Some(pid) => {
                let mut supervisor = Supervisor::new();
                supervisor.children_mut().insert_running(pid, crate::child::NewChild{
                    transaction_id: 1,
                    ..Default::default()
                });

                let mut seen = Vec::new();
                supervisor.kill_process(pid, &mut |record| seen.push(record.clone()))?;

                assert!(!process_exists(pid));
                assert_eq!(seen.len(), 1);
                assert_eq!(seen[0].status, ChildStatus::Signaled(libc::SIGKILL));
                Ok(())
            },
        }
    }

    #[test]
    fn request_kill_without_override_kills_immediately()
    {
        // SAFETY: test process is single-threaded at this point.
        let pid = unsafe { os_ext::fork().unwrap() };

        match pid {
            None => {
                std::thread::sleep(Duration::from_secs(30));
                std::process::exit(0);
            },
            Some(pid) => {
                let mut supervisor = Supervisor::new();
                supervisor.children_mut().insert_running(pid, crate::child::NewChild{
                    transaction_id: 1,
                    ..Default::default()
                });

                let mut seen = Vec::new();
                supervisor.request_kill(pid, |record| seen.push(record.clone())).unwrap();

                assert!(!process_exists(pid));
                assert_eq!(seen.len(), 1);
            },
        }
    }
}
