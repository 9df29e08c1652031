//! Core types shared by the sandbox builder, launcher, and supervisor:
//! the wire protocol, the command specification and its decoder, the
//! error taxonomy, startup configuration, child tracking, the
//! signal-driven reap loop, and privilege transitions.

#![warn(missing_docs)]

pub mod child;
pub mod config;
pub mod error;
pub mod privilege;
pub mod protocol;
pub mod spec;
pub mod supervisor;

pub use crate::{
    child::{ChildRecord, ChildStatus, ChildTable, NewChild},
    config::SupervisorConfig,
    error::{Error, HookKind, Result},
    privilege::PrivilegeGate,
    protocol::{decode_term, encode_term, FrameCodec, Term},
    spec::{CommandSpec, Redirect, SpecDecoder},
    supervisor::Supervisor,
};
