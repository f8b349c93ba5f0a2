#![forbid(unsafe_code)]

//! Single-settlement deferred values on one logical thread.
//!
//! [`deferred`] is the core: a settle-once state machine with FIFO
//! continuation queues, chain-flattening, and a unified rejection channel.
//! [`value`] is the opaque settlement payload, [`combinators`] settles over
//! ordered sets of deferreds, and [`event_loop`] is the deterministic
//! virtual-time harness standing in for the timer and I/O collaborators that
//! drive settlement.

pub mod combinators;
pub mod deferred;
pub mod event_loop;
pub mod value;
