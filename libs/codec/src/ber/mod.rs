//! BER TLV primitives
//!
//! Definite-length BER as used by EmBER: universal primitive types plus
//! constructed application/context scopes. Indefinite lengths are rejected.

pub mod reader;
pub mod writer;

pub use reader::BerReader;
pub use writer::BerWriter;

/// Universal primitive tags
pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const REAL: u8 = 0x09;
pub const UTF8_STRING: u8 = 0x0C;
pub const RELATIVE_OID: u8 = 0x0D;

/// Universal constructed tags
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

/// Constructed APPLICATION tag (tag numbers below 31 only, which covers the
/// whole Ember+ grammar)
pub const fn application(number: u8) -> u8 {
    0x60 | number
}

/// Constructed context-specific tag
pub const fn context(number: u8) -> u8 {
    0xA0 | number
}

/// Extract the application tag number, if `tag` is one
pub fn application_number(tag: u8) -> Option<u8> {
    if tag & 0xE0 == 0x60 {
        Some(tag & 0x1F)
    } else {
        None
    }
}

/// Extract the context tag number, if `tag` is one
pub fn context_number(tag: u8) -> Option<u8> {
    if tag & 0xE0 == 0xA0 {
        Some(tag & 0x1F)
    } else {
        None
    }
}

/// Minimal two's-complement big-endian representation of an integer
pub(crate) fn int_bytes(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 {
        let redundant = (bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0);
        if redundant {
            bytes.remove(0);
        } else {
            break;
        }
    }
    bytes
}
