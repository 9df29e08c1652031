//! Resolving, staging, confining, and launching one command.
//!
//! This crate turns a decoded request into a running, sandboxed child
//! process. [`warden_core`] owns the wire protocol, the request data
//! model, and the child-reaping event loop; this crate owns everything
//! in between: finding the binary, walking its shared-library
//! dependency closure, copying that closure into a per-launch
//! confinement directory, entering it, and `exec`ing.

#![warn(missing_docs)]

pub use crate::{
    elf::{ElfDepWalker, ElfDeps},
    fs_stager::FsStager,
    hook::HookRunner,
    launcher::Launcher,
    path_resolver::PathResolver,
    sandbox::SandboxBuilder,
};

mod elf;
mod fs_stager;
mod hook;
mod launcher;
mod path_resolver;
mod sandbox;
