use std::{
    ffi::CString,
    io,
    os::unix::io::{FromRawFd, OwnedFd},
};

/// Call mkdtemp(3) with the given arguments.
pub fn mkdtemp(template: CString) -> io::Result<CString>
{
    // CString::as_mut_ptr does not exist.
    let mut template = template.into_bytes_with_nul();

    // SAFETY: template is NUL-terminated.
    let ptr = unsafe {
        libc::mkdtemp(template.as_mut_ptr() as *mut libc::c_char)
    };

    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: mkdtemp does not inject NULs.
    Ok(unsafe { CString::from_vec_with_nul_unchecked(template) })
}

/// Call mkstemp(3) with the given arguments.
///
/// Returns the open file descriptor and the path that was created.
/// The descriptor is opened read-write without `O_CLOEXEC`,
/// matching mkstemp(3); callers that `exec` across it should
/// close it explicitly, or re-open by path.
pub fn mkstemp(template: CString) -> io::Result<(OwnedFd, CString)>
{
    let mut template = template.into_bytes_with_nul();

    // SAFETY: template is NUL-terminated.
    let fd = unsafe {
        libc::mkstemp(template.as_mut_ptr() as *mut libc::c_char)
    };

    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: mkstemp does not inject NULs.
    let path = unsafe { CString::from_vec_with_nul_unchecked(template) };

    // SAFETY: fd is a new, open file descriptor.
    Ok((unsafe { OwnedFd::from_raw_fd(fd) }, path))
}
