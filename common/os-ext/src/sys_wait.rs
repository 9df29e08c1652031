use std::{io, os::unix::process::ExitStatusExt, process::ExitStatus};

/// Outcome of a non-blocking [`waitpid`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wait
{
    /// The child has not changed state.
    StillRunning,

    /// The child has exited or was terminated by a signal.
    Exited(ExitStatus),
}

/// Call waitpid(2) for a specific pid with the given flags.
///
/// `EINTR` is retried automatically. If `WNOHANG` is included in
/// `options` and the child has not changed state, returns
/// [`Wait::StillRunning`].
pub fn waitpid(pid: libc::pid_t, options: libc::c_int) -> io::Result<Wait>
{
    loop {
        let mut wstatus = 0;

        // SAFETY: Always safe.
        let result = unsafe { libc::waitpid(pid, &mut wstatus, options) };

        if result == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if result == 0 {
            return Ok(Wait::StillRunning);
        }

        return Ok(Wait::Exited(ExitStatus::from_raw(wstatus)));
    }
}

/// Call kill(2) with the given arguments.
pub fn kill(pid: libc::pid_t, sig: libc::c_int) -> io::Result<()>
{
    // SAFETY: Always safe.
    let result = unsafe { libc::kill(pid, sig) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Check whether a process exists, by sending the null signal.
///
/// Returns `true` if the process (or a zombie of it) still exists.
pub fn process_exists(pid: libc::pid_t) -> bool
{
    match kill(pid, 0) {
        Ok(())                                                   => true,
        Err(err) if err.raw_os_error() == Some(libc::ESRCH)      => false,
        // EPERM means the process exists but we cannot signal it.
        Err(err) if err.raw_os_error() == Some(libc::EPERM)      => true,
        Err(_)                                                   => false,
    }
}
