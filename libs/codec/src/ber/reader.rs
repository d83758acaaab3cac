//! TLV reader over a borrowed byte slice
//!
//! `get_sequence` hands back a sub-reader scoped to the constructed value's
//! content, which is how the Glow layer walks nested structures without
//! copying. All failures carry the absolute-ish offset within the reader's
//! slice for debugging truncated or corrupt frames.

use emberplus_types::{EmberError, EmberResult, Value};

use super::{BOOLEAN, INTEGER, NULL, OCTET_STRING, REAL, RELATIVE_OID, UTF8_STRING};

/// Streaming BER reader
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remain(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The next tag byte without consuming it
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn error(&self, reason: impl Into<String>) -> EmberError {
        EmberError::Ber {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn take(&mut self, count: usize) -> EmberResult<&'a [u8]> {
        if self.remain() < count {
            return Err(self.error(format!("need {count} bytes, {} remain", self.remain())));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_header(&mut self) -> EmberResult<(u8, usize)> {
        let tag = self.take(1)?[0];
        if tag & 0x1F == 0x1F {
            return Err(self.error("high tag numbers are not used by EmBER"));
        }
        let first = self.take(1)?[0];
        let length = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7F) as usize;
            if count == 0 {
                return Err(self.error("indefinite length is not allowed"));
            }
            if count > 8 {
                return Err(self.error(format!("unreasonable length-of-length {count}")));
            }
            let mut length: usize = 0;
            for byte in self.take(count)? {
                length = (length << 8) | *byte as usize;
            }
            length
        };
        Ok((tag, length))
    }

    /// Enter a constructed value, checking its tag, and return a reader over
    /// its content.
    pub fn get_sequence(&mut self, expected: u8) -> EmberResult<BerReader<'a>> {
        let (tag, length) = self.read_header()?;
        if tag != expected {
            return Err(self.error(format!(
                "expected tag 0x{expected:02x}, found 0x{tag:02x}"
            )));
        }
        let content = self.take(length)?;
        Ok(BerReader::new(content))
    }

    fn primitive(&mut self, expected: u8) -> EmberResult<&'a [u8]> {
        let (tag, length) = self.read_header()?;
        if tag != expected {
            return Err(self.error(format!(
                "expected tag 0x{expected:02x}, found 0x{tag:02x}"
            )));
        }
        self.take(length)
    }

    pub fn read_int(&mut self) -> EmberResult<i64> {
        let content = self.primitive(INTEGER)?;
        if content.is_empty() || content.len() > 8 {
            return Err(self.error(format!("bad integer length {}", content.len())));
        }
        let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
        for byte in content {
            value = (value << 8) | *byte as i64;
        }
        Ok(value)
    }

    pub fn read_boolean(&mut self) -> EmberResult<bool> {
        let content = self.primitive(BOOLEAN)?;
        if content.len() != 1 {
            return Err(self.error("boolean must be one byte"));
        }
        Ok(content[0] != 0)
    }

    pub fn read_string(&mut self) -> EmberResult<String> {
        let content = self.primitive(UTF8_STRING)?;
        String::from_utf8(content.to_vec())
            .map_err(|_| self.error("string content is not valid UTF-8"))
    }

    pub fn read_octets(&mut self) -> EmberResult<Vec<u8>> {
        Ok(self.primitive(OCTET_STRING)?.to_vec())
    }

    pub fn read_relative_oid(&mut self) -> EmberResult<Vec<u32>> {
        let content = self.primitive(RELATIVE_OID)?;
        let mut numbers = Vec::new();
        let mut current: u32 = 0;
        let mut in_progress = false;
        for byte in content {
            current = (current << 7) | (*byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                numbers.push(current);
                current = 0;
                in_progress = false;
            } else {
                in_progress = true;
            }
        }
        if in_progress {
            return Err(self.error("truncated relative OID"));
        }
        Ok(numbers)
    }

    pub fn read_real(&mut self) -> EmberResult<f64> {
        let content = self.primitive(REAL)?;
        decode_real(content).ok_or_else(|| self.error("unsupported REAL encoding"))
    }

    /// Read whatever primitive comes next as a `Value`
    pub fn read_value(&mut self) -> EmberResult<Value> {
        match self.peek() {
            Some(INTEGER) => Ok(Value::Integer(self.read_int()?)),
            Some(REAL) => Ok(Value::Real(self.read_real()?)),
            Some(UTF8_STRING) => Ok(Value::String(self.read_string()?)),
            Some(BOOLEAN) => Ok(Value::Boolean(self.read_boolean()?)),
            Some(OCTET_STRING) => Ok(Value::Octets(self.read_octets()?)),
            Some(NULL) => {
                self.primitive(NULL)?;
                Ok(Value::Null)
            }
            Some(tag) => Err(self.error(format!("tag 0x{tag:02x} is not a value type"))),
            None => Err(self.error("end of data while reading value")),
        }
    }

    /// Skip one complete TLV, whatever it is
    pub fn skip(&mut self) -> EmberResult<()> {
        let (_, length) = self.read_header()?;
        self.take(length)?;
        Ok(())
    }
}

fn decode_real(content: &[u8]) -> Option<f64> {
    match content {
        [] => return Some(0.0),
        [0x40] => return Some(f64::INFINITY),
        [0x41] => return Some(f64::NEG_INFINITY),
        [0x42] => return Some(f64::NAN),
        _ => {}
    }
    let first = content[0];
    if first & 0x80 == 0 {
        // Decimal (ISO 6093) forms are never produced by Ember+ peers
        return None;
    }
    let base = (first >> 4) & 0x03;
    if base != 0 {
        return None;
    }
    let scale = ((first >> 2) & 0x03) as i32;
    let exponent_len = (first & 0x03) as usize + 1;
    if content.len() < 1 + exponent_len {
        return None;
    }

    let exponent_bytes = &content[1..1 + exponent_len];
    let mut exponent: i64 = if exponent_bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in exponent_bytes {
        exponent = (exponent << 8) | *byte as i64;
    }

    let mantissa_bytes = &content[1 + exponent_len..];
    if mantissa_bytes.is_empty() || mantissa_bytes.len() > 8 {
        return None;
    }
    let mut mantissa: u64 = 0;
    for byte in mantissa_bytes {
        mantissa = (mantissa << 8) | *byte as u64;
    }

    let mut value = mantissa as f64 * 2f64.powi(exponent as i32 + scale);
    if first & 0x40 != 0 {
        value = -value;
    }
    Some(value)
}
