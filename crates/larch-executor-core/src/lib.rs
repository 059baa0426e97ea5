//! Core types for the larch CI executor.
//!
//! This crate holds everything the executor driver needs that does not
//! touch a subprocess or the network: deterministic VM identity
//! derivation, the bounded readiness poller, and the failure taxonomy
//! that maps errors to the exit codes the CI runner interprets.
//!
//! The three lifecycle verbs (`create`, `run`, `cleanup`) execute as
//! separate OS processes with no shared state, so everything here is
//! either a pure function of externally supplied job context or a
//! self-contained combinator. Nothing in this crate caches or persists.

pub mod failure;
pub mod identity;
pub mod poll;

pub use failure::{ExitCodes, FailureKind, USAGE_EXIT_CODE};
pub use identity::{JobContext, VmIdentity};
pub use poll::{poll_until, PollError, PollPolicy};
