//! Running before/after hooks synchronously.

use os_ext::{execve, fork, waitpid, Wait};
use std::ffi::CString;
use warden_core::{Error, HookKind, Result};

/// Runs a hook command to completion, capturing a failure message.
pub struct HookRunner;

impl HookRunner
{
    /// Execute `command` as `$SHELL -c command`, synchronously, and
    /// wait for it to finish.
    ///
    /// Returns `Ok(())` on a zero exit. On a non-zero exit or a signal,
    /// returns [`Error::HookFailed`] carrying a short description
    /// suitable for the response's `stderr` slot.
    pub fn run(command: &str, which: HookKind) -> Result<()>
    {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());

        let path = CString::new(shell.clone())
            .map_err(|_| Error::BadRequest("SHELL contains a NUL".to_owned()))?;
        let argv = [
            CString::new(shell).unwrap(),
            CString::new("-c").unwrap(),
            CString::new(command)
                .map_err(|_| Error::BadRequest("hook command contains a NUL".to_owned()))?,
        ];
        let envp: Vec<CString> = std::env::vars()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect();

        // SAFETY: the caller is not expected to be multi-threaded at
        // the point hooks run; no locks are held across this fork.
        let pid = unsafe { fork() }.map_err(|e| Error::HookFailed{which, detail: e.to_string()})?;

        match pid {
            None => {
                let err = execve(&path, &argv, &envp);
                eprintln!("exec of hook failed: {err}");
                std::process::exit(127);
            },
            Some(pid) => {
                match waitpid(pid, 0) {
                    Ok(Wait::Exited(status)) if status.success() => Ok(()),
                    Ok(Wait::Exited(status)) => Err(Error::HookFailed{
                        which,
                        detail: format!("exited with {status}"),
                    }),
                    Ok(Wait::StillRunning) => unreachable!("waitpid without WNOHANG always reaps"),
                    Err(e) => Err(Error::HookFailed{which, detail: e.to_string()}),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn successful_hook_returns_ok()
    {
        assert!(HookRunner::run("exit 0", HookKind::Before).is_ok());
    }

    #[test]
    fn failing_hook_is_reported()
    {
        let err = HookRunner::run("exit 3", HookKind::After).unwrap_err();
        assert!(matches!(err, Error::HookFailed{which: HookKind::After, ..}));
    }
}
