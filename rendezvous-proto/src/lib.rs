//! Shared wire protocol definitions for the rendezvous signaling relay.

pub mod signal;
pub mod status;
