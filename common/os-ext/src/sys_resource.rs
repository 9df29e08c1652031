use std::io;

/// Call getrlimit(2) for the given resource.
pub fn getrlimit(resource: libc::c_int) -> io::Result<libc::rlimit>
{
    let mut limit = libc::rlimit{rlim_cur: 0, rlim_max: 0};

    // SAFETY: limit points to a valid, appropriately-sized local.
    let result = unsafe { libc::getrlimit(resource, &mut limit) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(limit)
}

/// Call setrlimit(2) for the given resource.
pub fn setrlimit(resource: libc::c_int, limit: libc::rlimit) -> io::Result<()>
{
    // SAFETY: limit is a valid rlimit value.
    let result = unsafe { libc::setrlimit(resource, &limit) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call setpriority(2) for [`PRIO_PROCESS`][`libc::PRIO_PROCESS`].
pub fn setpriority(pid: libc::pid_t, nice: libc::c_int) -> io::Result<()>
{
    // setpriority(2) legitimately returns -1 on success when the
    // resulting priority is -1, so errno must be cleared and checked.
    // SAFETY: Always safe.
    unsafe { *libc::__errno_location() = 0; }

    // SAFETY: Always safe.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };

    if result == -1 {
        let errno = unsafe { *libc::__errno_location() };
        if errno != 0 {
            return Err(io::Error::from_raw_os_error(errno));
        }
    }

    Ok(())
}

/// Return the maximum number of file descriptors the process may open,
/// as reported by `getrlimit(RLIMIT_NOFILE, ...)`.
///
/// Falls back to a conservative default if the limit cannot be read
/// or is reported as unlimited.
pub fn nofile_ceiling() -> libc::rlim_t
{
    const FALLBACK: libc::rlim_t = 1024;

    match getrlimit(libc::RLIMIT_NOFILE) {
        Ok(limit) if limit.rlim_max != libc::RLIM_INFINITY => limit.rlim_max,
        _ => FALLBACK,
    }
}
