//! # Ember+ Matrix Connection Engine
//!
//! ## Purpose
//!
//! The constraint-satisfaction core of matrix routing: decides whether a
//! connection request is admissible for a matrix's topology (`oneToN`,
//! `oneToOne`, `nToN`), applies it one target at a time, and reports the
//! provider's verdict as a `Disposition`. Pure state machine over a single
//! matrix; no I/O, no wire format, no subscriptions.
//!
//! ## Integration Points
//!
//! - **Input**: a `MatrixConnection` request decoded from the wire, plus an
//!   optional per-target default-source table for oneToN disconnects
//! - **Output**: an [`Applied`] outcome carrying the disposition, the
//!   resulting source set and typed [`MatrixEvent`]s for fan-out
//! - **Callers**: the provider dispatcher (authoritative application) and the
//!   consumer orchestrator (local pre-validation before sending)

pub mod engine;

pub use engine::{
    apply_connection, can_connect, validate_connection, Applied, MatrixEvent, MatrixEventKind,
};
