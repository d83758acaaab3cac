//! # Ember+ Transport Layer
//!
//! ## Purpose
//!
//! Everything between the TCP socket and the BER payload:
//! - `s101`: frame codec (escaping, CRC-16, keep-alive frames)
//! - `tcp`: tokio client/server transport with per-peer outbound queues
//! - `error`: transport error taxonomy
//!
//! ## Architecture Role
//!
//! ```text
//! TCP socket → [network] → libs/codec (EmBER payloads) → libs/types (Tree)
//!      ↑           ↓
//!  Raw Bytes   S101 Frames, keep-alive answered in the read loop
//! ```
//!
//! Keep-alive traffic is handled entirely inside this crate; the services
//! only ever see EmBER payloads.

pub mod error;
pub mod s101;
pub mod tcp;

pub use error::{Result, TransportError};
pub use s101::{FrameDecoder, S101Frame};
pub use tcp::{
    connect, ClientId, EmberConnection, EmberTransport, ServerEvent, TcpClientConfig, TcpServer,
    TcpServerConfig, DEFAULT_PORT,
};
