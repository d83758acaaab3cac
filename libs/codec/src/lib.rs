//! # Ember+ BER Codec - Tree Grammar Layer
//!
//! ## Purpose
//!
//! The "rules" layer between raw bytes and the typed tree model:
//! - `ber`: TLV primitive reader/writer (integers, strings, booleans,
//!   relative OIDs, binary reals, nested definite-length scopes)
//! - `glow`: the Ember+ application-tag grammar mapping every element
//!   variant to its wire shape and back
//!
//! ## Architecture Role
//!
//! ```text
//! network/ (S101 frames) → [libs/codec] → libs/types (Tree)
//!        ↑                      ↓              ↓
//!    Raw Binary          Grammar Rules     Typed Elements
//!    Payloads            Encode/Decode     Nodes/Parameters/...
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Byte-stream framing or CRC handling (belongs in network/)
//! - Tree mutation or subscription logic (belongs in the services)
//!
//! Decoding is strict: an application tag outside the implemented grammar
//! fails with `EmberError::UnimplementedType`; no forward-compatibility
//! guessing is attempted.

pub mod ber;
pub mod glow;

pub use ber::{BerReader, BerWriter};
pub use glow::{
    decode_root, encode_invocation_result, encode_stream_collection, encode_tree, DecodedRoot,
    StreamEntry,
};
