//! The `warden` binary: parses configuration, wires up the sandbox
//! builder and launcher, and drives the request/reap loop.

use anyhow::{Context, Result};
use clap::Parser;
use os_ext::set_nonblocking;
use std::{
    fs,
    os::unix::io::{AsFd, FromRawFd},
    path::PathBuf,
};
use warden_core::{Error, FrameCodec, HookKind, SpecDecoder, SupervisorConfig, Supervisor, Term};
use warden_exec::{HookRunner, Launcher, SandboxBuilder};

/// A sandboxed process supervisor: decodes launch requests from a pair
/// of framed file descriptors, stages and confines each command, and
/// reaps its children.
#[derive(Parser)]
#[command(name = "warden", version)]
struct Cli
{
    /// Directory under which every launch's confinement directory is created.
    #[arg(long)]
    confinement_root: Option<PathBuf>,

    /// Octal mode applied to the confinement root and each confinement directory.
    #[arg(long)]
    confinement_mode: Option<String>,

    /// Descriptor requests are read from.
    #[arg(long)]
    request_fd: Option<i32>,

    /// Descriptor responses are written to.
    #[arg(long)]
    response_fd: Option<i32>,

    /// Path to a JSON config file, applied on top of the compiled-in
    /// defaults and overridden by any of the flags above.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()>
{
    let cli = Cli::parse();

    let config = resolve_config(&cli).context("resolving configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    ).init();

    Supervisor::install_signal_handlers().context("installing signal handlers")?;

    let sandbox = SandboxBuilder::new(
        PathBuf::from(config.confinement_root.as_str()),
        config.confinement_mode,
    );
    let launcher = Launcher::new(&sandbox, &config.default_path);

    // SAFETY: the caller is contractually responsible for having these
    // descriptors open and valid before exec'ing this process.
    let request = unsafe { fs::File::from_raw_fd(config.request_fd) };
    // SAFETY: see above.
    let response = unsafe { fs::File::from_raw_fd(config.response_fd) };

    set_nonblocking(request.as_fd(), true).context("making the request descriptor non-blocking")?;

    let mut codec = FrameCodec::new(request, response);
    let mut supervisor = Supervisor::new();
    let mut requests_open = true;

    loop {
        if requests_open {
            match codec.read_request() {
                Ok(Some(term)) => handle_request(&term, &launcher, &mut supervisor, &mut codec),
                Ok(None) => {
                    log::info!("request descriptor closed; draining remaining children");
                    requests_open = false;
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {},
                Err(e) => log::error!("reading a request failed: {e}"),
            }
        }

        if !requests_open && supervisor.children_mut().is_empty() {
            break;
        }

        let keep_going = supervisor.next_loop(|record| {
            if let Some(after) = &record.after_command {
                if let Err(e) = HookRunner::run(after, HookKind::After) {
                    log::warn!(
                        "after hook failed for transaction {}: {e}",
                        record.transaction_id,
                    );
                }
            }
        }).context("running the reap loop")?;

        if !keep_going {
            break;
        }
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<SupervisorConfig>
{
    let mut config = match &cli.config {
        Some(path) => SupervisorConfig::load(path)?,
        None       => SupervisorConfig::default(),
    };

    if let Some(v) = &cli.confinement_root {
        config.confinement_root = v.to_string_lossy().into_owned();
    }
    if let Some(v) = &cli.confinement_mode {
        config.confinement_mode = u32::from_str_radix(v.trim_start_matches('0'), 8)
            .map_err(|e| Error::ConfigError(format!("invalid mode {v:?}: {e}")))?;
    }
    if let Some(v) = cli.request_fd {
        config.request_fd = v;
    }
    if let Some(v) = cli.response_fd {
        config.response_fd = v;
    }
    if let Some(v) = &cli.log_level {
        config.log_level = v.clone();
    }

    Ok(config)
}

/// Decode, launch, and respond to a single request frame. Launch
/// failures are reported to the caller, never propagated: one bad
/// request must never bring down the supervisor.
fn handle_request<R, W>(
    term:       &Term,
    launcher:   &Launcher<'_>,
    supervisor: &mut Supervisor,
    codec:      &mut FrameCodec<R, W>,
)
    where R: std::io::Read, W: std::io::Write
{
    let mut spec = match SpecDecoder::decode(term) {
        Ok(spec) => spec,
        Err(e) => {
            respond_error(codec, &e);
            return;
        },
    };

    let transaction_id = spec.transaction_id;

    match launcher.launch(&mut spec, supervisor.children_mut()) {
        Ok(pid) => {
            let response = Term::Tuple(vec![Term::Atom("ok".to_owned()), Term::Int(pid as i64)]);
            if let Err(e) = codec.write_response(&response) {
                log::error!("writing response for transaction {transaction_id}: {e}");
            }
        },
        Err(e) => {
            log::warn!("launch failed for transaction {transaction_id}: {e}");
            respond_error(codec, &e);
        },
    }
}

fn respond_error<R, W>(codec: &mut FrameCodec<R, W>, error: &Error)
    where R: std::io::Read, W: std::io::Write
{
    let atom = match error {
        Error::BadRequest(_) => "badarg",
        Error::NotFound(_)   => "enoent",
        Error::NotElf(_)     => "not_elf",
        Error::Reserved(_)   => "reserved",
        Error::HookFailed{..} => "hook_failed",
        _                    => "internal_error",
    };

    let response = Term::Tuple(vec![
        Term::Atom("error".to_owned()),
        Term::Tuple(vec![Term::Atom(atom.to_owned()), Term::Str(error.to_string())]),
    ]);

    if let Err(e) = codec.write_response(&response) {
        log::error!("writing error response: {e}");
    }
}
