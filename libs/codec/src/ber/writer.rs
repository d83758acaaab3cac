//! TLV writer with nested definite-length scopes
//!
//! Scopes buffer their content so the definite length is known when the
//! scope closes; EmBER never uses indefinite lengths.

use emberplus_types::{EmberError, EmberResult, Value};

use super::{int_bytes, BOOLEAN, INTEGER, NULL, OCTET_STRING, REAL, RELATIVE_OID, UTF8_STRING};

/// Streaming BER writer
#[derive(Debug, Default)]
pub struct BerWriter {
    out: Vec<u8>,
    scopes: Vec<(u8, Vec<u8>)>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&mut self) -> &mut Vec<u8> {
        match self.scopes.last_mut() {
            Some((_, buf)) => buf,
            None => &mut self.out,
        }
    }

    fn write_tlv(&mut self, tag: u8, content: &[u8]) {
        let sink = self.sink();
        sink.push(tag);
        write_length(sink, content.len());
        sink.extend_from_slice(content);
    }

    /// Open a constructed scope; every write until `end_sequence` lands
    /// inside it.
    pub fn start_sequence(&mut self, tag: u8) {
        self.scopes.push((tag, Vec::new()));
    }

    /// Close the innermost scope, emitting its TLV into the enclosing scope
    pub fn end_sequence(&mut self) -> EmberResult<()> {
        let (tag, content) = self.scopes.pop().ok_or(EmberError::Ber {
            offset: 0,
            reason: "end_sequence without open scope".into(),
        })?;
        self.write_tlv(tag, &content);
        Ok(())
    }

    /// Finish writing; fails when a scope was left open
    pub fn finish(self) -> EmberResult<Vec<u8>> {
        if !self.scopes.is_empty() {
            return Err(EmberError::Ber {
                offset: 0,
                reason: format!("{} scope(s) left open", self.scopes.len()),
            });
        }
        Ok(self.out)
    }

    pub fn write_int(&mut self, value: i64) {
        let content = int_bytes(value);
        self.write_tlv(INTEGER, &content);
    }

    pub fn write_boolean(&mut self, value: bool) {
        self.write_tlv(BOOLEAN, &[if value { 0xFF } else { 0x00 }]);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_tlv(UTF8_STRING, value.as_bytes());
    }

    pub fn write_octets(&mut self, value: &[u8]) {
        self.write_tlv(OCTET_STRING, value);
    }

    pub fn write_null(&mut self) {
        self.write_tlv(NULL, &[]);
    }

    pub fn write_relative_oid(&mut self, numbers: &[u32]) {
        let mut content = Vec::new();
        for &number in numbers {
            push_base128(&mut content, number);
        }
        self.write_tlv(RELATIVE_OID, &content);
    }

    /// Binary BER real (base 2); zero, infinities and NaN use the special
    /// content forms.
    pub fn write_real(&mut self, value: f64) {
        let content = real_bytes(value);
        self.write_tlv(REAL, &content);
    }

    /// Write a `Value` as its natural primitive type
    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Integer(v) => self.write_int(*v),
            Value::Real(v) => self.write_real(*v),
            Value::String(v) => self.write_string(v),
            Value::Boolean(v) => self.write_boolean(*v),
            Value::Octets(v) => self.write_octets(v),
            Value::Null => self.write_null(),
        }
    }
}

fn write_length(sink: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        sink.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    sink.push(0x80 | significant.len() as u8);
    sink.extend_from_slice(significant);
}

fn push_base128(sink: &mut Vec<u8>, value: u32) {
    let mut chunks = [0u8; 5];
    let mut count = 0;
    let mut rest = value;
    loop {
        chunks[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let mut byte = chunks[i];
        if i != 0 {
            byte |= 0x80;
        }
        sink.push(byte);
    }
}

fn real_bytes(value: f64) -> Vec<u8> {
    if value == 0.0 {
        return Vec::new();
    }
    if value.is_nan() {
        return vec![0x42];
    }
    if value == f64::INFINITY {
        return vec![0x40];
    }
    if value == f64::NEG_INFINITY {
        return vec![0x41];
    }

    let bits = value.to_bits();
    let sign = (bits >> 63) & 1;
    let raw_exponent = ((bits >> 52) & 0x7FF) as i64;
    let mut mantissa = bits & 0x000F_FFFF_FFFF_FFFF;
    let mut exponent = if raw_exponent == 0 {
        // Subnormal: no implicit leading bit
        1 - 1075
    } else {
        mantissa |= 0x0010_0000_0000_0000;
        raw_exponent - 1075
    };
    while mantissa & 1 == 0 {
        mantissa >>= 1;
        exponent += 1;
    }

    let exponent_bytes = int_bytes(exponent);
    let mut out = Vec::with_capacity(2 + exponent_bytes.len() + 7);
    out.push(0x80 | ((sign as u8) << 6) | (exponent_bytes.len() as u8 - 1));
    out.extend_from_slice(&exponent_bytes);

    let mantissa_bytes = mantissa.to_be_bytes();
    let skip = mantissa_bytes.iter().take_while(|b| **b == 0).count();
    out.extend_from_slice(&mantissa_bytes[skip..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_encodings() {
        let mut writer = BerWriter::new();
        writer.write_int(5);
        writer.write_boolean(true);
        writer.write_string("ab");
        let out = writer.finish().unwrap();
        assert_eq!(
            out,
            vec![0x02, 0x01, 0x05, 0x01, 0x01, 0xFF, 0x0C, 0x02, b'a', b'b']
        );
    }

    #[test]
    fn test_nested_scopes_backfill_lengths() {
        let mut writer = BerWriter::new();
        writer.start_sequence(super::super::application(0));
        writer.start_sequence(super::super::context(0));
        writer.write_int(1);
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out, vec![0x60, 0x05, 0xA0, 0x03, 0x02, 0x01, 0x01]);
    }

    #[test]
    fn test_unclosed_scope_is_an_error() {
        let mut writer = BerWriter::new();
        writer.start_sequence(0x60);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_relative_oid_base128() {
        let mut writer = BerWriter::new();
        writer.write_relative_oid(&[1, 130, 5]);
        let out = writer.finish().unwrap();
        assert_eq!(out, vec![0x0D, 0x04, 0x01, 0x81, 0x02, 0x05]);
    }

    #[test]
    fn test_long_form_length() {
        let mut writer = BerWriter::new();
        writer.write_octets(&vec![0xAA; 200]);
        let out = writer.finish().unwrap();
        assert_eq!(&out[..3], &[0x04, 0x81, 200]);
        assert_eq!(out.len(), 3 + 200);
    }

    #[test]
    fn test_real_special_values() {
        for (value, expected) in [
            (0.0, vec![0x09, 0x00]),
            (f64::INFINITY, vec![0x09, 0x01, 0x40]),
            (f64::NEG_INFINITY, vec![0x09, 0x01, 0x41]),
        ] {
            let mut writer = BerWriter::new();
            writer.write_real(value);
            assert_eq!(writer.finish().unwrap(), expected);
        }
    }
}
