//! Privilege transitions as an explicit, readback-verified state machine.
//!
//! Every `setresuid`/`setresgid` call's return value is checked, and
//! every transition's postcondition is verified by reading the
//! resulting ids back. Ignoring these return values is a known defect
//! class in the system this was distilled from, and is not reproduced
//! here.

use crate::error::{Error, Result};
use os_ext::{getegid, geteuid, getresgid, getresuid, setresgid, setresuid, gid_t, uid_t};

/// Drops privileges to `uid`/`gid`, reversibly or irreversibly, with
/// every transition verified by readback.
///
/// All methods are intended to be called from a forked child; calling
/// them from a multi-child supervisor process would affect every
/// future fork from that process.
pub struct PrivilegeGate;

impl PrivilegeGate
{
    /// Set the effective uid/gid to `uid`/`gid`, keeping the real and
    /// saved ids unchanged so [`restore`][Self::restore] can undo this.
    pub fn temp_drop(uid: uid_t, gid: gid_t) -> Result<()>
    {
        setresgid(None, Some(gid), None)
            .map_err(|e| Error::PrivilegeError(format!("setresgid: {e}")))?;
        setresuid(None, Some(uid), None)
            .map_err(|e| Error::PrivilegeError(format!("setresuid: {e}")))?;

        if geteuid() != uid || getegid() != gid {
            return Err(Error::PrivilegeError(
                "readback after temp_drop did not match requested ids".to_owned(),
            ));
        }

        Ok(())
    }

    /// Set the real, effective, and saved uid/gid all to `uid`/`gid`.
    /// Irreversible: once saved is overwritten, [`restore`][Self::restore]
    /// can no longer recover the prior identity.
    pub fn perm_drop(uid: uid_t, gid: gid_t) -> Result<()>
    {
        setresgid(Some(gid), Some(gid), Some(gid))
            .map_err(|e| Error::PrivilegeError(format!("setresgid: {e}")))?;
        setresuid(Some(uid), Some(uid), Some(uid))
            .map_err(|e| Error::PrivilegeError(format!("setresuid: {e}")))?;

        let (ruid, euid, suid) = getresuid()
            .map_err(|e| Error::PrivilegeError(format!("getresuid: {e}")))?;
        let (rgid, egid, sgid) = getresgid()
            .map_err(|e| Error::PrivilegeError(format!("getresgid: {e}")))?;

        if (ruid, euid, suid) != (uid, uid, uid) || (rgid, egid, sgid) != (gid, gid, gid) {
            return Err(Error::PrivilegeError(
                "readback after perm_drop did not match requested ids".to_owned(),
            ));
        }

        Ok(())
    }

    /// Re-assume the saved uid/gid as effective. Must be called only
    /// before any [`perm_drop`][Self::perm_drop].
    pub fn restore() -> Result<()>
    {
        let (_, _, suid) = getresuid()
            .map_err(|e| Error::PrivilegeError(format!("getresuid: {e}")))?;
        let (_, _, sgid) = getresgid()
            .map_err(|e| Error::PrivilegeError(format!("getresgid: {e}")))?;

        setresgid(None, Some(sgid), None)
            .map_err(|e| Error::PrivilegeError(format!("setresgid: {e}")))?;
        setresuid(None, Some(suid), None)
            .map_err(|e| Error::PrivilegeError(format!("setresuid: {e}")))?;

        if geteuid() != suid || getegid() != sgid {
            return Err(Error::PrivilegeError(
                "readback after restore did not match saved ids".to_owned(),
            ));
        }

        Ok(())
    }
}
