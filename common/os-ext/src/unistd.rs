use {
    crate::retry_on_eintr,
    std::{
        ffi::{CStr, CString},
        io,
        os::unix::{ffi::OsStrExt, io::{AsRawFd, BorrowedFd, RawFd}},
        path::Path,
    },
};

/// Call chdir(2) with the given argument.
pub fn chdir(path: &CStr) -> io::Result<()>
{
    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::chdir(path.as_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call chroot(2) with the given argument.
pub fn chroot(path: &CStr) -> io::Result<()>
{
    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::chroot(path.as_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call chown(2) with the given arguments.
pub fn chown(path: &CStr, uid: libc::uid_t, gid: libc::gid_t) -> io::Result<()>
{
    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::chown(path.as_ptr(), uid, gid) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call access(2) with the given arguments.
pub fn access(path: &CStr, mode: libc::c_int) -> io::Result<()>
{
    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::access(path.as_ptr(), mode) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call dup2(2), duplicating `oldfd` onto the fixed descriptor number `newfd`.
///
/// Unlike the rest of this crate, the resulting descriptor does
/// *not* have `FD_CLOEXEC` set, matching the semantics of dup2(2);
/// this is what is wanted for arranging a child process's stdio.
pub fn dup2(oldfd: BorrowedFd, newfd: RawFd) -> io::Result<()>
{
    retry_on_eintr(|| {
        // SAFETY: oldfd is a valid, open file descriptor.
        let result = unsafe { libc::dup2(oldfd.as_raw_fd(), newfd) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}

/// Close an arbitrary, possibly-foreign file descriptor by number.
///
/// This is unlike the rest of the crate, which works with owned or
/// borrowed descriptors. It exists for closing descriptors this
/// process did not itself open, such as inherited directory fds
/// discovered by scanning `/proc/self/fd` before a chroot.
pub fn close_raw(fd: RawFd) -> io::Result<()>
{
    // SAFETY: Closing an arbitrary fd number is safe; at worst it fails
    // with EBADF if the fd is not open.
    let result = unsafe { libc::close(fd) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call execve(2) with the given arguments.
///
/// On success, this function does not return.
/// On failure, the error that execve(2) reported is returned.
pub fn execve(path: &CStr, argv: &[CString], envp: &[CString]) -> io::Error
{
    let mut argv: Vec<*const libc::c_char> =
        argv.iter().map(|a| a.as_ptr()).chain([std::ptr::null()]).collect();
    let mut envp: Vec<*const libc::c_char> =
        envp.iter().map(|e| e.as_ptr()).chain([std::ptr::null()]).collect();

    // SAFETY: path is NUL-terminated, argv and envp are NULL-terminated.
    unsafe {
        libc::execve(path.as_ptr(), argv.as_mut_ptr(), envp.as_mut_ptr());
    }

    io::Error::last_os_error()
}

/// Call fork(2).
///
/// Returns [`None`] in the child process, and the child's pid in the parent.
///
/// # Safety
///
/// The caller must be prepared for the restrictions that apply
/// to a forked child of a multi-threaded process: in particular,
/// only async-signal-safe functions may be called in the child
/// until it either `exec`s or `_exit`s, if other threads might be
/// holding a lock (e.g. the heap allocator's) at the time of the fork.
pub unsafe fn fork() -> io::Result<Option<libc::pid_t>>
{
    // SAFETY: Caller upholds the fork safety contract.
    let pid = unsafe { libc::fork() };

    if pid == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(if pid == 0 { None } else { Some(pid) })
}

/// Return the real user ID of the calling process.
pub fn getuid() -> libc::uid_t
{
    // SAFETY: Always safe.
    unsafe { libc::getuid() }
}

/// Return the real group ID of the calling process.
pub fn getgid() -> libc::gid_t
{
    // SAFETY: Always safe.
    unsafe { libc::getgid() }
}

/// Return the effective user ID of the calling process.
pub fn geteuid() -> libc::uid_t
{
    // SAFETY: Always safe.
    unsafe { libc::geteuid() }
}

/// Return the effective group ID of the calling process.
pub fn getegid() -> libc::gid_t
{
    // SAFETY: Always safe.
    unsafe { libc::getegid() }
}

/// Call setresuid(2) with the given arguments.
///
/// Passing [`None`] for a component leaves it unchanged.
pub fn setresuid(
    ruid: Option<libc::uid_t>,
    euid: Option<libc::uid_t>,
    suid: Option<libc::uid_t>,
) -> io::Result<()>
{
    let keep = |x: Option<libc::uid_t>| x.map(|x| x as libc::c_int).unwrap_or(-1) as libc::uid_t;

    // SAFETY: Always safe.
    let result = unsafe { libc::setresuid(keep(ruid), keep(euid), keep(suid)) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call setresgid(2) with the given arguments.
///
/// Passing [`None`] for a component leaves it unchanged.
pub fn setresgid(
    rgid: Option<libc::gid_t>,
    egid: Option<libc::gid_t>,
    sgid: Option<libc::gid_t>,
) -> io::Result<()>
{
    let keep = |x: Option<libc::gid_t>| x.map(|x| x as libc::c_int).unwrap_or(-1) as libc::gid_t;

    // SAFETY: Always safe.
    let result = unsafe { libc::setresgid(keep(rgid), keep(egid), keep(sgid)) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call getresuid(2).
///
/// Returns the real, effective, and saved user IDs, in that order.
pub fn getresuid() -> io::Result<(libc::uid_t, libc::uid_t, libc::uid_t)>
{
    let (mut ruid, mut euid, mut suid) = (0, 0, 0);

    // SAFETY: Pointers are to valid, appropriately-sized local variables.
    let result = unsafe { libc::getresuid(&mut ruid, &mut euid, &mut suid) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok((ruid, euid, suid))
}

/// Call getresgid(2).
///
/// Returns the real, effective, and saved group IDs, in that order.
pub fn getresgid() -> io::Result<(libc::gid_t, libc::gid_t, libc::gid_t)>
{
    let (mut rgid, mut egid, mut sgid) = (0, 0, 0);

    // SAFETY: Pointers are to valid, appropriately-sized local variables.
    let result = unsafe { libc::getresgid(&mut rgid, &mut egid, &mut sgid) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok((rgid, egid, sgid))
}

/// Equivalent to [`readlink`] with [`None`] passed for `dirfd`.
pub fn readlink(pathname: &Path) -> io::Result<CString>
{
    readlinkat(None, pathname)
}

/// Call readlinkat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
///
/// readlinkat(2) truncates the target if it does not fit into the buffer.
/// When this happens, the wrapper function automatically retries the call
/// with a bigger buffer, until it fits.
pub fn readlinkat(dirfd: Option<BorrowedFd>, pathname: &Path)
    -> io::Result<CString>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);
    let pathname = CString::new(pathname.as_os_str().as_bytes())?;

    // NOTE: When changing the initial buffer size,
    //       adjust sizes of symlinks in testdata.
    let mut buf: Vec<u8> = Vec::with_capacity(256);

    retry_on_eintr(|| {
        loop {
            // SAFETY: pathname is NUL-terminated, buffer size is correct.
            let len = unsafe {
                libc::readlinkat(
                    dirfd,
                    pathname.as_ptr(),
                    buf.as_mut_ptr() as *mut libc::c_char,
                    buf.capacity(),
                )
            };

            if len == -1 {
                return Err(io::Error::last_os_error());
            }

            // SAFETY: readlinkat(2) wrote this many bytes.
            unsafe { buf.set_len(len as usize); }

            if buf.len() == buf.capacity() {
                // There may have been a truncation.
                // Grow the buffer and try again.
                buf.reserve(1);
                continue;
            }

            buf.shrink_to_fit();
            break Ok(());
        }
    })?;

    // SAFETY: Symbolic links do not contain nuls.
    Ok(unsafe { CString::from_vec_unchecked(buf) })
}

/// Equivalent to [`symlink`] with [`None`] passed for `newdirfd`.
pub fn symlink(target: &CStr, linkpath: &Path) -> io::Result<()>
{
    symlinkat(target, None, linkpath)
}

/// Call symlinkat(2) with the given arguments.
///
/// If `newdirfd` is [`None`], `AT_FDCWD` is passed.
pub fn symlinkat(target: &CStr, newdirfd: Option<BorrowedFd>, linkpath: &Path)
    -> io::Result<()>
{
    let newdirfd = newdirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);
    let linkpath = CString::new(linkpath.as_os_str().as_bytes())?;

    retry_on_eintr(|| {
        // SAFETY: target and linkpath are NUL-terminated.
        let result = unsafe {
            libc::symlinkat(target.as_ptr(), newdirfd, linkpath.as_ptr())
        };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}


#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn readlinkat_loop()
    {
        for len in [10, 255, 256, 257, 512] {
            let expected: String = "0123456789".chars().cycle().take(len).collect();
            let symlink = format!("testdata/{}-byte-symlink", len);
            let actual = readlinkat(None, Path::new(&symlink)).unwrap();
            assert_eq!(actual.as_bytes(), expected.as_bytes());
        }
    }
}
