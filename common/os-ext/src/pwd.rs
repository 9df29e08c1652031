use std::{ffi::CStr, io, mem::MaybeUninit, ptr::null_mut};

/// Look up a user by name via getpwnam_r(3).
///
/// Returns [`None`] if no such user exists.
pub fn getpwnam_uid(name: &CStr) -> io::Result<Option<libc::uid_t>>
{
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = null_mut();

    // getpwnam_r does not specify a fixed buffer size upfront;
    // grow it until the call stops reporting ERANGE.
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        // SAFETY: pwd and result are valid out-parameters, buf has buf.len() bytes.
        let err = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        match err {
            0 if result.is_null() => return Ok(None),
            0 => {
                // SAFETY: getpwnam_r initialized pwd and pointed result at it.
                let pwd = unsafe { pwd.assume_init() };
                return Ok(Some(pwd.pw_uid));
            },
            libc::ERANGE => {
                buf.resize(buf.len() * 2, 0);
                continue;
            },
            errno => return Err(io::Error::from_raw_os_error(errno)),
        }
    }
}
