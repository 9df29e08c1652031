//! Forking and exec'ing the user command, with hooks, stdio
//! redirection, and script handling.

use crate::{hook::HookRunner, path_resolver::PathResolver, sandbox::SandboxBuilder};
use os_ext::{dup2, execve, fork, mkstemp, setpriority, pid_t};
use scope_exit::ScopeExit;
use std::{
    ffi::CString,
    fs,
    io::Write,
    mem::forget,
    os::unix::io::{AsFd, BorrowedFd},
    path::PathBuf,
    time::Duration,
};
use warden_core::{ChildTable, CommandSpec, Error, HookKind, NewChild, Redirect, Result};

const DEFAULT_LD_LIBRARY_PATH: &str = "/lib;/usr/lib;/usr/local/lib";
const DEFAULT_HOME: &str = "/mnt";
const SCRIPT_UNLINK_ATTEMPTS: u32 = 200;
const SCRIPT_UNLINK_INTERVAL: Duration = Duration::from_micros(100);

/// What the forked child should ultimately `exec`.
enum ExecTarget
{
    /// A `#!`-prefixed script body, materialized to a temp file and
    /// exec'd directly so the kernel honors its shebang line.
    Script{path: PathBuf, cleanup: PathBuf},
    /// An ordinary command, exec'd via `$SHELL -c command`. `binary`
    /// is the resolved path of the command's first word, staged into
    /// the confinement directory alongside the shell itself.
    ShellCommand{binary: PathBuf, shell: PathBuf, command: String},
}

/// Forks and execs a validated [`CommandSpec`] inside a sandbox.
pub struct Launcher<'a>
{
    sandbox: &'a SandboxBuilder,
    default_path: &'a str,
}

impl<'a> Launcher<'a>
{
    /// Build a launcher using `sandbox` to construct confinement
    /// directories and `default_path` as the `PATH` fallback for
    /// resolving bare command names.
    pub fn new(sandbox: &'a SandboxBuilder, default_path: &'a str) -> Self
    {
        Self{sandbox, default_path}
    }

    /// Run the before hook (if any), fork, stage and confine, exec the
    /// command, and register the new child in `children`.
    pub fn launch(&self, spec: &mut CommandSpec, children: &mut ChildTable) -> Result<pid_t>
    {
        apply_env_defaults(&mut spec.env);

        if let Some(before) = spec.before.clone() {
            if let Err(e) = HookRunner::run(&before, HookKind::Before) {
                log::warn!("before hook failed for transaction {}: {e}", spec.transaction_id);
                return Err(e);
            }
        }

        let uid = self.sandbox.choose_uid(spec)?;
        let gid = uid;

        let confinement_dir = if spec.cd.is_empty() {
            let dir = self.sandbox.prepare_confinement_dir(uid)?;
            spec.cd = dir.to_string_lossy().into_owned();
            dir
        } else {
            PathBuf::from(&spec.cd)
        };

        let target = self.resolve_exec_target(&spec.command)?;

        let env = build_envp(&spec.env)?;
        let stdout = spec.stdout.clone();
        let stderr = spec.stderr.clone();
        let nofiles = spec.nofiles;

        // SAFETY: the supervisor process is single-threaded by design
        // (see the Supervisor module), so no other thread can be
        // holding a lock across this fork.
        let pid = unsafe { fork() }.map_err(Error::FsError)?;

        match pid {
            None => {
                run_in_child(&confinement_dir, uid, gid, &target, &stdout, &stderr, &env, nofiles);
            },
            Some(pid) => {
                if let Some(nice) = spec.nice {
                    let _ = setpriority(pid, nice);
                }

                if let ExecTarget::Script{cleanup, ..} = &target {
                    unlink_after_start(pid, cleanup);
                }

                log::info!(
                    "launched pid {pid} for transaction {} ({})",
                    spec.transaction_id, spec.command,
                );
                children.insert_running(pid, NewChild{
                    transaction_id: spec.transaction_id,
                    kill_command: spec.kill.clone(),
                    after_command: spec.after.clone(),
                });

                Ok(pid)
            },
        }
    }

    fn resolve_exec_target(&self, command: &str) -> Result<ExecTarget>
    {
        if let Some(body) = command.strip_prefix("#!") {
            let template = CString::new(format!(
                "{}/warden-script-XXXXXX",
                std::env::temp_dir().display(),
            )).map_err(|_| Error::BadRequest("temp dir path contains a NUL".to_owned()))?;

            let (fd, path) = mkstemp(template).map_err(Error::FsError)?;
            let path = PathBuf::from(path.to_string_lossy().into_owned());

            // If anything below fails, the temp file would otherwise be
            // left behind with no child ever pointing at it.
            let cleanup = ScopeExit::new(|| { let _ = fs::remove_file(&path); });

            let mut file = fs::File::from(fd);
            file.write_all(b"#!").map_err(Error::FsError)?;
            file.write_all(body.as_bytes()).map_err(Error::FsError)?;
            drop(file);

            fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o700))
                .map_err(Error::FsError)?;

            forget(cleanup);
            return Ok(ExecTarget::Script{path: path.clone(), cleanup: path});
        }

        let first_word = command.split_whitespace().next()
            .ok_or_else(|| Error::BadRequest("empty command".to_owned()))?;

        let resolver = PathResolver::new(self.default_path);
        let binary = resolver.resolve(first_word)?;
        let shell = resolver.resolve(&shell_name())?;

        Ok(ExecTarget::ShellCommand{binary, shell, command: command.to_owned()})
    }
}

fn shell_name() -> String
{
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned())
}

fn apply_env_defaults(env: &mut Vec<String>)
{
    if !env.iter().any(|e| e.starts_with("LD_LIBRARY_PATH=")) {
        env.push(format!("LD_LIBRARY_PATH={DEFAULT_LD_LIBRARY_PATH}"));
    }
    if !env.iter().any(|e| e.starts_with("HOME=")) {
        env.push(format!("HOME={DEFAULT_HOME}"));
    }
}

fn build_envp(env: &[String]) -> Result<Vec<CString>>
{
    env.iter()
        .map(|e| CString::new(e.as_str())
            .map_err(|_| Error::BadRequest(format!("env entry {e:?} contains a NUL"))))
        .collect()
}

/// Poll, for a bounded time, to see whether the child has started
/// (so the tempfile's name has already been resolved by `execve`)
/// before unlinking it. Best-effort: a failure here is not fatal.
fn unlink_after_start(pid: pid_t, path: &PathBuf)
{
    for _ in 0 .. SCRIPT_UNLINK_ATTEMPTS {
        if os_ext::process_exists(pid) {
            break;
        }
        std::thread::sleep(SCRIPT_UNLINK_INTERVAL);
    }

    if let Err(e) = fs::remove_file(path) {
        log::warn!("failed to unlink script temp file {}: {e}", path.display());
    }
}

#[allow(clippy::too_many_arguments)]
fn run_in_child(
    confinement_dir: &std::path::Path,
    uid: libc::uid_t,
    gid: libc::gid_t,
    target: &ExecTarget,
    stdout: &Redirect,
    stderr: &Redirect,
    env: &[CString],
    nofiles: Option<u64>,
) -> !
{
    let staged: Vec<&std::path::Path> = match target {
        ExecTarget::Script{path, ..}                    => vec![path.as_path()],
        ExecTarget::ShellCommand{binary, shell, ..}     => vec![binary.as_path(), shell.as_path()],
    };

    // `enter_sandbox` already chdirs into `confinement_dir` before
    // chrooting it, so the new root's cwd is already correct; no
    // further chdir is needed here.
    if let Err(e) = SandboxBuilder::enter_sandbox(confinement_dir, uid, gid, &staged, nofiles) {
        eprintln!("warden: failed to enter sandbox: {e}");
        std::process::exit(126);
    }

    if let Err(e) = apply_redirect(libc::STDOUT_FILENO, libc::STDERR_FILENO, stdout) {
        eprintln!("warden: stdout redirection failed: {e}");
        std::process::exit(126);
    }
    if let Err(e) = apply_redirect(libc::STDERR_FILENO, libc::STDOUT_FILENO, stderr) {
        eprintln!("warden: stderr redirection failed: {e}");
        std::process::exit(126);
    }

    let (path, argv) = match target {
        ExecTarget::Script{path, ..} => {
            let Ok(cpath) = CString::new(path.as_os_str().to_string_lossy().into_owned()) else {
                std::process::exit(126);
            };
            (cpath.clone(), vec![cpath])
        },
        ExecTarget::ShellCommand{shell, command, ..} => {
            let Ok(cshell) = CString::new(shell.as_os_str().to_string_lossy().into_owned()) else {
                std::process::exit(126);
            };
            let Ok(ccommand) = CString::new(command.as_str()) else {
                std::process::exit(126);
            };
            let argv = vec![cshell.clone(), CString::new("-c").unwrap(), ccommand];
            (cshell, argv)
        },
    };

    let err = execve(&path, &argv, env);
    eprintln!("warden: execve failed: {err}");
    std::process::exit(127);
}

fn apply_redirect(fd: libc::c_int, other_fd: libc::c_int, redirect: &Redirect) -> std::io::Result<()>
{
    match redirect {
        Redirect::Null => {
            let devnull = fs::OpenOptions::new().write(true).open("/dev/null")?;
            dup2(devnull.as_fd(), fd)
        },
        Redirect::File(path) => {
            let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            dup2(file.as_fd(), fd)
        },
        Redirect::ToOther => {
            // SAFETY: other_fd is one of the standard stdio descriptors.
            let borrowed = unsafe { BorrowedFd::borrow_raw(other_fd) };
            dup2(borrowed, fd)
        },
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn env_defaults_are_appended_once()
    {
        let mut env = vec!["HOME=/custom".to_owned()];
        apply_env_defaults(&mut env);
        assert_eq!(env, vec!["HOME=/custom".to_owned(), format!("LD_LIBRARY_PATH={DEFAULT_LD_LIBRARY_PATH}")]);
    }

    #[test]
    fn env_defaults_fill_both_when_absent()
    {
        let mut env = Vec::new();
        apply_env_defaults(&mut env);
        assert_eq!(env.len(), 2);
    }
}
