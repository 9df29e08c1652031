//! Signal handling primitives.

use std::{io, mem::zeroed, time::Duration};

/// Install a plain signal handler via sigaction(2).
///
/// `handler` must be async-signal-safe: see signal-safety(7).
pub fn sigaction(
    signum: libc::c_int,
    handler: extern "C" fn(libc::c_int),
    flags: libc::c_int,
) -> io::Result<()>
{
    // SAFETY: sact is fully initialized below before use.
    let mut sact: libc::sigaction = unsafe { zeroed() };
    sact.sa_sigaction = handler as usize;
    sact.sa_flags = flags;

    // SAFETY: sact.sa_mask is zeroed, meaning no additional signals blocked.
    unsafe { libc::sigemptyset(&mut sact.sa_mask); }

    // SAFETY: sact is a fully initialized sigaction.
    let result = unsafe { libc::sigaction(signum, &sact, std::ptr::null_mut()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Install a `SA_SIGINFO` signal handler via sigaction(2).
///
/// `handler` must be async-signal-safe: see signal-safety(7).
pub fn sigaction_siginfo(
    signum: libc::c_int,
    handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void),
    flags: libc::c_int,
) -> io::Result<()>
{
    // SAFETY: sact is fully initialized below before use.
    let mut sact: libc::sigaction = unsafe { zeroed() };
    sact.sa_sigaction = handler as usize;
    sact.sa_flags = flags | libc::SA_SIGINFO;

    // SAFETY: sact.sa_mask is zeroed, meaning no additional signals blocked.
    unsafe { libc::sigemptyset(&mut sact.sa_mask); }

    // SAFETY: sact is a fully initialized sigaction.
    let result = unsafe { libc::sigaction(signum, &sact, std::ptr::null_mut()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Build a [`libc::sigset_t`] containing exactly the given signals.
fn sigset(signals: &[libc::c_int]) -> io::Result<libc::sigset_t>
{
    // SAFETY: set is initialized by sigemptyset below before any other use.
    let mut set: libc::sigset_t = unsafe { zeroed() };

    // SAFETY: set is a valid, owned sigset_t.
    if unsafe { libc::sigemptyset(&mut set) } == -1 {
        return Err(io::Error::last_os_error());
    }

    for &signum in signals {
        // SAFETY: set is a valid, owned sigset_t.
        if unsafe { libc::sigaddset(&mut set, signum) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(set)
}

/// Block the given signals in the calling thread's signal mask,
/// via sigprocmask(2) with `SIG_BLOCK`.
///
/// Previously blocked signals remain blocked.
pub fn sigprocmask_block(signals: &[libc::c_int]) -> io::Result<()>
{
    let set = sigset(signals)?;

    // SAFETY: set is a valid sigset_t, no old-set pointer requested.
    let result = unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call sigwait(3) for exactly the given set of signals.
///
/// Blocks until one of the given signals is pending, consumes it,
/// and returns its number. The given signals must already be
/// blocked (see [`sigprocmask_block`]), or behavior is unspecified.
pub fn sigwait(signals: &[libc::c_int]) -> io::Result<libc::c_int>
{
    let set = sigset(signals)?;
    let mut sig = 0;

    loop {
        // SAFETY: set is a valid sigset_t, sig is a valid out-parameter.
        let result = unsafe { libc::sigwait(&set, &mut sig) };

        match result {
            0 => return Ok(sig),
            libc::EINTR => continue,
            errno => return Err(io::Error::from_raw_os_error(errno)),
        }
    }
}

/// Arm `ITIMER_REAL` to repeatedly deliver `SIGALRM` at the given interval.
///
/// The first delivery happens after `interval` has elapsed.
pub fn setitimer_real(interval: Duration) -> io::Result<()>
{
    let micros = |d: Duration| libc::timeval{
        tv_sec:  d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    };

    let value = libc::itimerval{
        it_interval: micros(interval),
        it_value:    micros(interval),
    };

    // SAFETY: value is a fully initialized itimerval, no old-value requested.
    let result = unsafe {
        libc::setitimer(libc::ITIMER_REAL, &value, std::ptr::null_mut())
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
