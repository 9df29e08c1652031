//! Constructing the confinement directory and dropping into it.
//!
//! Staging, closing escape-prone descriptors, `chroot`, and the final
//! permanent privilege drop all happen in the same process that goes
//! on to `exec` the user command: `chroot(2)` only affects the calling
//! process and its descendants from that point on, so splitting this
//! across two forked children would leave the second one outside the
//! jail.

use crate::fs_stager::FsStager;
use os_ext::{
    chdir, chroot, chown, close_raw, fdopendir, fstat_raw, getpwnam_uid, getrlimit, mkdir,
    nofile_ceiling, readdir, setrlimit, S_IFDIR, S_IFMT,
};
use std::{
    ffi::CString,
    fs,
    io,
    os::unix::{ffi::OsStrExt, io::AsRawFd},
    path::{Path, PathBuf},
};
use warden_core::{CommandSpec, Error, PrivilegeGate, Result};

const ATTEMPTS: usize = 10;
const UNPRIVILEGED_FLOOR: libc::uid_t = 0xFFFF;

/// Constructs the confinement directory for one launch and, once
/// called from inside the forked child, drops the process into it.
pub struct SandboxBuilder
{
    confinement_root: PathBuf,
    confinement_mode: u32,
}

impl SandboxBuilder
{
    /// Build a sandbox builder rooted at `confinement_root`, using
    /// `confinement_mode` for both the root and each per-launch
    /// confinement directory.
    pub fn new(confinement_root: PathBuf, confinement_mode: u32) -> Self
    {
        Self{confinement_root, confinement_mode}
    }

    /// Choose the unprivileged identity for a launch: the spec's named
    /// user if given, otherwise a random uid above
    /// [`UNPRIVILEGED_FLOOR`], found within [`ATTEMPTS`] reads of
    /// `/dev/urandom`.
    pub fn choose_uid(&self, spec: &CommandSpec) -> Result<libc::uid_t>
    {
        if let Some(name) = &spec.user {
            let cname = CString::new(name.as_str())
                .map_err(|_| Error::BadRequest("user name contains a NUL".to_owned()))?;
            return getpwnam_uid(&cname)
                .map_err(Error::FsError)?
                .ok_or_else(|| Error::NotFound(format!("user {name}")));
        }

        let mut urandom = fs::File::open("/dev/urandom").map_err(Error::FsError)?;

        for _ in 0 .. ATTEMPTS {
            let mut buf = [0u8; 4];
            io::Read::read_exact(&mut urandom, &mut buf).map_err(Error::FsError)?;
            let candidate = u32::from_ne_bytes(buf);
            if candidate > UNPRIVILEGED_FLOOR {
                log::debug!("chose uid {candidate} for transaction {}", spec.transaction_id);
                return Ok(candidate);
            }
        }

        Err(Error::PrivilegeError(
            format!("no candidate uid above {UNPRIVILEGED_FLOOR:#x} in {ATTEMPTS} attempts"),
        ))
    }

    /// Ensure `confinement_root` exists and is root-owned, then create
    /// `{confinement_root}/{uid}` owned by `uid:uid`. Must be called
    /// while still privileged. Returns the created directory's path.
    pub fn prepare_confinement_dir(&self, uid: libc::uid_t) -> Result<PathBuf>
    {
        ensure_root_owned_dir(&self.confinement_root, self.confinement_mode)?;

        let dir = self.confinement_root.join(uid.to_string());
        let cdir = path_to_cstring(&dir)?;

        match mkdir(&cdir, self.confinement_mode) {
            Ok(())                                                      => {},
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists          => {},
            Err(e)                                                      => return Err(Error::FsError(e)),
        }

        chown(&cdir, uid, uid).map_err(Error::FsError)?;

        log::debug!("prepared confinement directory {}", dir.display());

        Ok(dir)
    }

    /// Drop into the sandbox: stage each of `binaries` and its
    /// dependency closure, close any directory descriptor that would
    /// escape the chroot,
    /// change root, apply the requested file-descriptor limit, and
    /// permanently drop privileges to `uid`/`gid`.
    ///
    /// Must be called from inside a forked child, immediately before
    /// the child `exec`s the user command. Every step here runs in
    /// that one process; none of it may be split across a fork.
    pub fn enter_sandbox(
        confinement_dir: &Path,
        uid: libc::uid_t,
        gid: libc::gid_t,
        binaries: &[&Path],
        nofiles: Option<u64>,
    ) -> Result<()>
    {
        PrivilegeGate::temp_drop(uid, gid).map_err(|e| {
            log::error!("temp_drop to {uid}:{gid} failed: {e}");
            e
        })?;

        let mut stager = FsStager::new(confinement_dir);
        for binary in binaries {
            stager.stage(binary).map_err(|e| {
                log::error!("staging {} failed: {e}", binary.display());
                e
            })?;
        }

        PrivilegeGate::restore()?;

        close_directory_descriptors().map_err(Error::FsError)?;

        let cdir = path_to_cstring(confinement_dir)?;
        chdir(&cdir).map_err(Error::FsError)?;
        chroot(&cdir).map_err(Error::FsError)?;

        if let Some(nofiles) = nofiles {
            apply_nofile_limit(nofiles)?;
        }

        PrivilegeGate::perm_drop(uid, gid).map_err(|e| {
            log::error!("perm_drop to {uid}:{gid} failed: {e}");
            e
        })?;

        Ok(())
    }
}

fn ensure_root_owned_dir(dir: &Path, mode: u32) -> Result<()>
{
    let cdir = path_to_cstring(dir)?;

    match mkdir(&cdir, mode) {
        Ok(())                                                 => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists      => {},
        Err(e)                                                 => return Err(Error::FsError(e)),
    }

    let meta = fs::metadata(dir).map_err(Error::FsError)?;
    use std::os::unix::fs::MetadataExt;
    if meta.uid() != 0 {
        return Err(Error::FsError(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is not root-owned", dir.display()),
        )));
    }

    Ok(())
}

fn apply_nofile_limit(nofiles: u64) -> Result<()>
{
    let mut limit = getrlimit(libc::RLIMIT_NOFILE).map_err(Error::FsError)?;
    limit.rlim_cur = nofiles.min(limit.rlim_max);
    setrlimit(libc::RLIMIT_NOFILE, limit).map_err(Error::FsError)
}

/// Close every open file descriptor, other than stdio, that refers to
/// a directory. Left open, such a descriptor would let the process
/// navigate (via `openat`/`fchdir`) outside of the new root.
fn close_directory_descriptors() -> io::Result<()>
{
    let ceiling = nofile_ceiling();

    let proc_fd = os_ext::open(
        os_ext::cstr!("/proc/self/fd"),
        os_ext::O_RDONLY | os_ext::O_DIRECTORY,
        0,
    )?;
    let proc_fd_num = proc_fd.as_raw_fd();

    let mut dir = fdopendir(proc_fd)?;

    let mut to_close = Vec::new();

    while let Some(entry) = readdir(&mut dir)? {
        let Some(name) = entry.d_name.to_str() else { continue };
        let Ok(fd) = name.parse::<i32>() else { continue };

        if fd <= 2 || fd as u64 >= ceiling || fd == proc_fd_num {
            continue;
        }

        // SAFETY: fd is an open descriptor in this process, borrowed
        // only long enough to fstat it.
        if is_directory_fd(fd)? {
            to_close.push(fd);
        }
    }

    drop(dir);

    for fd in to_close {
        close_raw(fd)?;
    }

    Ok(())
}

fn is_directory_fd(fd: i32) -> io::Result<bool>
{
    match fstat_raw(fd) {
        Ok(st)                                                 => Ok(st.st_mode & S_IFMT == S_IFDIR),
        Err(e) if e.kind() == io::ErrorKind::NotFound           => Ok(false),
        Err(e)                                                 => Err(e),
    }
}

fn path_to_cstring(path: &Path) -> Result<CString>
{
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::BadRequest(format!("{} contains a NUL", path.display())))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use warden_core::Redirect;

    fn spec_with_user(user: Option<&str>) -> CommandSpec
    {
        CommandSpec{
            transaction_id: 1,
            command: "/bin/true".to_owned(),
            cd: String::new(),
            env: Vec::new(),
            kill: None,
            nice: None,
            user: user.map(str::to_owned),
            stdout: Redirect::Null,
            stderr: Redirect::Null,
            before: None,
            after: None,
            nofiles: None,
        }
    }

    #[test]
    fn random_uid_is_above_floor()
    {
        let builder = SandboxBuilder::new(PathBuf::from("/tmp/unused"), 0o750);
        let uid = builder.choose_uid(&spec_with_user(None)).unwrap();
        assert!(uid > UNPRIVILEGED_FLOOR);
    }

    #[test]
    fn unknown_named_user_is_not_found()
    {
        let builder = SandboxBuilder::new(PathBuf::from("/tmp/unused"), 0o750);
        let spec = spec_with_user(Some("definitely-not-a-real-user-xyz"));
        assert!(matches!(builder.choose_uid(&spec), Err(Error::NotFound(_))));
    }
}
