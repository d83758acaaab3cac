//! Parameter contents and the enums describing a parameter's behavior

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::value::Value;

/// Access rights of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum Access {
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

/// Effective value type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ParameterType {
    Integer = 1,
    Real = 2,
    String = 3,
    Boolean = 4,
    Trigger = 5,
    Enum = 6,
    Octets = 7,
}

/// Describes how a stream parameter packs its value into stream entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamDescription {
    /// Stream format code as defined by the protocol (byte layout + width)
    pub format: i32,
    /// Byte offset of the value inside the stream entry
    pub offset: i32,
}

/// Contents of a leaf parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterContents {
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub value: Option<Value>,
    pub minimum: Option<Value>,
    pub maximum: Option<Value>,
    pub access: Option<Access>,
    pub format: Option<String>,
    pub enumeration: Option<String>,
    pub enum_map: Option<Vec<(String, i64)>>,
    pub factor: Option<i32>,
    pub is_online: Option<bool>,
    pub formula: Option<String>,
    pub step: Option<i32>,
    pub default: Option<Value>,
    pub parameter_type: Option<ParameterType>,
    pub stream_identifier: Option<i32>,
    pub stream_descriptor: Option<StreamDescription>,
    pub schema_identifiers: Option<String>,
}

impl ParameterContents {
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Default::default()
        }
    }

    pub fn with_value(identifier: impl Into<String>, value: Value) -> Self {
        Self {
            identifier: Some(identifier.into()),
            value: Some(value),
            ..Default::default()
        }
    }

    /// A parameter is a stream element when it carries a stream identifier.
    /// Stream elements are excluded from implicit subscription.
    pub fn is_stream(&self) -> bool {
        self.stream_identifier.is_some()
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.access, Some(Access::Write) | Some(Access::ReadWrite))
    }

    /// Overwrite the fields `other` carries, reporting whether anything changed
    pub fn merge(&mut self, other: &ParameterContents) -> bool {
        merge_option_fields!(
            self,
            other,
            identifier,
            description,
            value,
            minimum,
            maximum,
            access,
            format,
            enumeration,
            enum_map,
            factor,
            is_online,
            formula,
            step,
            default,
            parameter_type,
            stream_identifier,
            stream_descriptor,
            schema_identifiers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_detection() {
        let mut contents = ParameterContents::with_value("level", Value::Integer(0));
        assert!(!contents.is_stream());
        contents.stream_identifier = Some(4);
        assert!(contents.is_stream());
    }

    #[test]
    fn test_value_merge_reports_change() {
        let mut base = ParameterContents::with_value("gain", Value::Integer(-10));
        let update = ParameterContents {
            value: Some(Value::Integer(3)),
            ..Default::default()
        };
        assert!(base.merge(&update));
        assert_eq!(base.value, Some(Value::Integer(3)));
        assert!(!base.merge(&update));
        assert_eq!(base.identifier.as_deref(), Some("gain"));
    }

    #[test]
    fn test_access_codes() {
        assert_eq!(Access::try_from(3), Ok(Access::ReadWrite));
        assert!(Access::try_from(9).is_err());
        assert_eq!(i32::from(ParameterType::Trigger), 5);
    }
}
