//! The error taxonomy shared by every stage of a launch.

use std::io;

/// Everything that can go wrong while decoding, staging, or launching
/// a single request.
#[derive(Debug, thiserror::Error)]
pub enum Error
{
    /// The request frame was malformed or named an unrecognized or
    /// out-of-range option.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A binary or one of its dependencies could not be located.
    #[error("not found: {0}")]
    NotFound(String),

    /// A staging target was not a valid ELF object.
    #[error("not an ELF object: {0}")]
    NotElf(String),

    /// A filesystem operation (mkdir, chown, copy, chmod) failed while
    /// preparing the confinement directory.
    #[error("filesystem error: {0}")]
    FsError(#[source] io::Error),

    /// A privilege transition failed, or its postcondition readback
    /// did not match what was requested.
    #[error("privilege error: {0}")]
    PrivilegeError(String),

    /// `execve` was reached but returned.
    #[error("exec failed: {0}")]
    ExecFailed(#[source] io::Error),

    /// A before/after hook exited non-zero.
    #[error("hook failed ({which}): {detail}")]
    HookFailed
    {
        /// Which hook failed.
        which: HookKind,
        /// The hook's captured stderr, or an errno message.
        detail: String,
    },

    /// The `mount` option was requested; it is reserved and unimplemented.
    #[error("reserved option: {0}")]
    Reserved(&'static str),

    /// Startup configuration (CLI flags or a config file) was invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Which hook of a launch failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookKind
{
    /// The hook that runs before the main command.
    Before,
    /// The hook that runs after the main command.
    After,
}

impl std::fmt::Display for HookKind
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            HookKind::Before => write!(f, "before"),
            HookKind::After  => write!(f, "after"),
        }
    }
}

/// Convenience alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
