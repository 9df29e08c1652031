//! Tracking running and exited children.

use os_ext::pid_t;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// The terminal or non-terminal state of a tracked child.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChildStatus
{
    /// Still running, as far as the supervisor knows.
    Running,
    /// Exited normally with the given status code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// No longer exists, but neither `waitpid` nor a signal delivery
    /// observed how it ended (e.g. it was reparented away).
    Vanished,
}

impl ChildStatus
{
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool
    {
        !matches!(self, ChildStatus::Running)
    }
}

/// Everything the supervisor tracks about one launched child.
#[derive(Clone, Debug)]
pub struct ChildRecord
{
    /// The child's pid.
    pub pid: pid_t,
    /// The transaction id of the request that launched it.
    pub transaction_id: i64,
    /// Current status.
    pub status: ChildStatus,
    /// The pid of a still-running user-supplied kill command, if one
    /// has been issued against this child.
    pub kill_pid: Option<pid_t>,
    /// When kill escalation next applies (SIGTERM, then SIGKILL to the
    /// killer itself).
    pub deadline: Option<Instant>,
    /// The spec's `kill` override, run instead of an immediate
    /// `SIGKILL` when this child is cancelled.
    pub kill_command: Option<String>,
    /// The spec's `after` hook, run once this child reaches a terminal
    /// state, before the caller is notified.
    pub after_command: Option<String>,
}

impl ChildRecord
{
    fn new(pid: pid_t, new: NewChild) -> Self
    {
        Self{
            pid,
            transaction_id: new.transaction_id,
            status: ChildStatus::Running,
            kill_pid: None,
            deadline: None,
            kill_command: new.kill_command,
            after_command: new.after_command,
        }
    }
}

/// Everything [`ChildTable::insert_running`] needs about a freshly
/// launched child, beyond its pid.
#[derive(Clone, Debug, Default)]
pub struct NewChild
{
    /// The transaction id of the request that launched it.
    pub transaction_id: i64,
    /// The spec's `kill` override, if any.
    pub kill_command: Option<String>,
    /// The spec's `after` hook, if any.
    pub after_command: Option<String>,
}

/// The default grace period before kill escalation proceeds to the
/// next stage.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// An index of running and exited children, keyed by pid.
///
/// Owned exclusively by the supervisor's event loop; the launcher only
/// inserts new records before the loop observes them.
#[derive(Default)]
pub struct ChildTable
{
    running: HashMap<pid_t, ChildRecord>,
    exited: HashMap<pid_t, ChildRecord>,
}

impl ChildTable
{
    /// Create an empty table.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a newly launched child as running. See [`NewChild`]
    /// for what is tracked about it beyond its pid.
    ///
    /// [`Supervisor::request_kill`]: crate::supervisor::Supervisor::request_kill
    pub fn insert_running(&mut self, pid: pid_t, new: NewChild)
    {
        self.running.insert(pid, ChildRecord::new(pid, new));
    }

    /// Iterate over the pids currently believed to be running.
    pub fn running_pids(&self) -> impl Iterator<Item = pid_t> + '_
    {
        self.running.keys().copied()
    }

    /// Borrow a running child's record, mutably.
    pub fn running_mut(&mut self, pid: pid_t) -> Option<&mut ChildRecord>
    {
        self.running.get_mut(&pid)
    }

    /// Whether there are no running children left.
    pub fn is_empty(&self) -> bool
    {
        self.running.is_empty()
    }

    /// Whether the exited table has no undrained entries left. The
    /// event loop keeps calling `check_children` while this is false.
    pub fn exited_is_empty(&self) -> bool
    {
        self.exited.is_empty()
    }

    /// Move a child from the running table to the exited table with
    /// the given terminal status. Returns the record, so the caller
    /// can report it exactly once.
    pub fn mark_exited(&mut self, pid: pid_t, status: ChildStatus) -> Option<ChildRecord>
    {
        debug_assert!(status.is_terminal());

        let mut record = self.running.remove(&pid)?;
        record.status = status;
        self.exited.insert(pid, record.clone());
        Some(record)
    }

    /// Look up an exited child's record by pid.
    pub fn exited(&self, pid: pid_t) -> Option<&ChildRecord>
    {
        self.exited.get(&pid)
    }

    /// Remove and return an exited child's record, once it has been
    /// reported to the caller. Keeps the exited table from growing
    /// without bound and from keeping `next_loop` spinning forever.
    pub fn drain_exited(&mut self, pid: pid_t) -> Option<ChildRecord>
    {
        self.exited.remove(&pid)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn fresh_child_is_running()
    {
        let mut table = ChildTable::new();
        table.insert_running(42, NewChild{transaction_id: 1, ..Default::default()});
        assert!(!table.is_empty());
        assert_eq!(table.running_mut(42).unwrap().status, ChildStatus::Running);
    }

    #[test]
    fn mark_exited_moves_out_of_running()
    {
        let mut table = ChildTable::new();
        table.insert_running(42, NewChild{transaction_id: 1, ..Default::default()});

        let record = table.mark_exited(42, ChildStatus::Exited(0)).unwrap();
        assert_eq!(record.status, ChildStatus::Exited(0));
        assert!(table.is_empty());
        assert_eq!(table.exited(42).unwrap().status, ChildStatus::Exited(0));
    }

    #[test]
    fn mark_exited_on_unknown_pid_is_none()
    {
        let mut table = ChildTable::new();
        assert!(table.mark_exited(99, ChildStatus::Vanished).is_none());
    }
}
