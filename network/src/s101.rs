//! S101 byte-stream framing
//!
//! Every Ember+ packet travels inside an S101 frame: BOF, the escaped body,
//! EOF. The body is slot + message + command header bytes, the EmBER payload
//! for data frames, and a CRC-16 over the unescaped body. Bytes 0xF8..=0xFF
//! are escaped with CE and XOR 0x20 so the frame markers never appear inside
//! a body.

use bytes::Bytes;

use crate::error::{Result, TransportError};

pub const BOF: u8 = 0xFE;
pub const EOF: u8 = 0xFF;
pub const CE: u8 = 0xFD;

const ESCAPE_XOR: u8 = 0x20;
const ESCAPE_THRESHOLD: u8 = 0xF8;

const SLOT: u8 = 0x00;
const MESSAGE_EMBER: u8 = 0x0E;
const CMD_EMBER: u8 = 0x00;
const CMD_KEEPALIVE_REQUEST: u8 = 0x01;
const CMD_KEEPALIVE_RESPONSE: u8 = 0x02;
const VERSION: u8 = 0x01;
/// First-packet | last-packet flags; every frame we emit is single-packet
const FLAGS_SINGLE_PACKET: u8 = 0xC0;
const DTD_GLOW: u8 = 0x01;
/// Glow DTD version 2.31, minor byte first
const APP_BYTES: [u8; 2] = [0x1F, 0x02];

/// Frames carried inside the stream largest-payload-first by frequency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S101Frame {
    /// An EmBER-encoded tree payload
    Ember(Bytes),
    /// Keep-alive probe, must be answered with a response frame
    KeepaliveRequest,
    /// Answer to a keep-alive probe
    KeepaliveResponse,
}

/// CRC-16/CCITT, reflected, polynomial 0x8408, appended little-endian
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

fn finish_frame(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_le_bytes());

    let mut out = Vec::with_capacity(body.len() + 8);
    out.push(BOF);
    for byte in body {
        if byte >= ESCAPE_THRESHOLD {
            out.push(CE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    out.push(EOF);
    out
}

/// Frame an EmBER payload for the wire
pub fn encode_ember_frame(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 9);
    body.extend_from_slice(&[
        SLOT,
        MESSAGE_EMBER,
        CMD_EMBER,
        VERSION,
        FLAGS_SINGLE_PACKET,
        DTD_GLOW,
        APP_BYTES.len() as u8,
    ]);
    body.extend_from_slice(&APP_BYTES);
    body.extend_from_slice(payload);
    finish_frame(body)
}

pub fn keepalive_request_frame() -> Vec<u8> {
    finish_frame(vec![SLOT, MESSAGE_EMBER, CMD_KEEPALIVE_REQUEST, VERSION])
}

pub fn keepalive_response_frame() -> Vec<u8> {
    finish_frame(vec![SLOT, MESSAGE_EMBER, CMD_KEEPALIVE_RESPONSE, VERSION])
}

/// Incremental frame decoder
///
/// Feed it raw socket bytes in whatever chunks they arrive; it emits complete
/// frames. Bytes outside a BOF..EOF window are discarded, which resynchronizes
/// the stream after a corrupt frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    body: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of stream bytes, returning every frame completed by it
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<S101Frame>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            match byte {
                BOF => {
                    // A BOF inside a frame means the previous one was cut off
                    self.body.clear();
                    self.in_frame = true;
                    self.escaped = false;
                }
                EOF if self.in_frame => {
                    let body = std::mem::take(&mut self.body);
                    self.in_frame = false;
                    if self.escaped {
                        self.escaped = false;
                        return Err(TransportError::frame("escape byte before EOF"));
                    }
                    frames.push(parse_body(&body)?);
                }
                CE if self.in_frame => {
                    self.escaped = true;
                }
                _ if self.in_frame => {
                    let value = if self.escaped {
                        self.escaped = false;
                        byte ^ ESCAPE_XOR
                    } else {
                        byte
                    };
                    self.body.push(value);
                }
                // Inter-frame noise, skip until the next BOF
                _ => {}
            }
        }
        Ok(frames)
    }
}

fn parse_body(body: &[u8]) -> Result<S101Frame> {
    if body.len() < 6 {
        return Err(TransportError::frame(format!(
            "frame body too short: {} bytes",
            body.len()
        )));
    }
    let (content, crc_bytes) = body.split_at(body.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = crc16(content);
    if received != computed {
        return Err(TransportError::frame(format!(
            "CRC mismatch: received 0x{received:04x}, computed 0x{computed:04x}"
        )));
    }

    if content[1] != MESSAGE_EMBER {
        return Err(TransportError::frame(format!(
            "unexpected message type 0x{:02x}",
            content[1]
        )));
    }
    match content[2] {
        CMD_KEEPALIVE_REQUEST => Ok(S101Frame::KeepaliveRequest),
        CMD_KEEPALIVE_RESPONSE => Ok(S101Frame::KeepaliveResponse),
        CMD_EMBER => {
            // slot, message, command, version, flags, dtd, app-bytes count
            if content.len() < 7 {
                return Err(TransportError::frame("truncated EmBER frame header"));
            }
            let app_count = content[6] as usize;
            let payload_start = 7 + app_count;
            if content.len() < payload_start {
                return Err(TransportError::frame("app bytes exceed frame body"));
            }
            Ok(S101Frame::Ember(Bytes::copy_from_slice(
                &content[payload_start..],
            )))
        }
        other => Err(TransportError::frame(format!(
            "unknown S101 command 0x{other:02x}"
        ))),
    }
}
