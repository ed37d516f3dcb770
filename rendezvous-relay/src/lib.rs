//! Rendezvous signaling relay library.
//!
//! Pairs two peers by (room id, client id) and forwards their opaque
//! session-negotiation messages, holding messages for a peer that has not
//! connected yet. Exposed for the binary, tests, and embedding.

pub mod bye;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod http;
pub mod relay;
pub mod room;
pub mod sink;
pub mod table;
