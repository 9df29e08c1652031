use std::{
    ffi::CStr,
    io,
    os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
};

/// Equivalent to [`openat`] with [`None`] passed for `dirfd`.
pub fn open(
    pathname: &CStr,
    flags: libc::c_int,
    mode: libc::mode_t,
) -> io::Result<OwnedFd>
{
    openat(None, pathname, flags, mode)
}

/// Call openat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
pub fn openat(
    dirfd:    Option<BorrowedFd>,
    pathname: &CStr,
    flags:    libc::c_int,
    mode:     libc::mode_t,
) -> io::Result<OwnedFd>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);
    let flags = flags | libc::O_CLOEXEC;

    // SAFETY: path is NUL-terminated.
    let fd = unsafe { libc::openat(dirfd, pathname.as_ptr(), flags, mode) };

    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: fd is a new, open file descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Call pipe2(2) with the given flags.
///
/// Returns the read end and the write end, in that order.
pub fn pipe2(flags: libc::c_int) -> io::Result<(OwnedFd, OwnedFd)>
{
    let mut fds = [0; 2];
    let flags = flags | libc::O_CLOEXEC;

    // SAFETY: fds points to a two-element array.
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), flags) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe2 created two new, open file descriptors.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Set or clear `O_NONBLOCK` on an already-open descriptor, via
/// `fcntl(F_GETFL)` followed by `fcntl(F_SETFL)`.
pub fn set_nonblocking(fd: BorrowedFd, nonblocking: bool) -> io::Result<()>
{
    // SAFETY: fd is a valid, open descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }

    let flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };

    // SAFETY: fd is a valid, open descriptor for the duration of the call.
    let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
