//! Commands embedded in request trees

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::function::Invocation;

/// Protocol command numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum CommandNumber {
    Subscribe = 30,
    Unsubscribe = 31,
    GetDirectory = 32,
    Invoke = 33,
}

/// Field filter a GetDirectory may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum FieldFlags {
    Sparse = -2,
    All = -1,
    Default = 0,
    Identifier = 1,
    Description = 2,
    Tree = 3,
    Value = 4,
    Connections = 5,
}

/// A command element; its `number` doubles as its sibling number in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub number: CommandNumber,
    pub field_flags: Option<FieldFlags>,
    pub invocation: Option<Invocation>,
}

impl Command {
    pub fn get_directory() -> Self {
        Self {
            number: CommandNumber::GetDirectory,
            field_flags: Some(FieldFlags::All),
            invocation: None,
        }
    }

    pub fn subscribe() -> Self {
        Self {
            number: CommandNumber::Subscribe,
            field_flags: None,
            invocation: None,
        }
    }

    pub fn unsubscribe() -> Self {
        Self {
            number: CommandNumber::Unsubscribe,
            field_flags: None,
            invocation: None,
        }
    }

    pub fn invoke(invocation: Invocation) -> Self {
        Self {
            number: CommandNumber::Invoke,
            field_flags: None,
            invocation: Some(invocation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_numbers_match_protocol() {
        assert_eq!(i32::from(CommandNumber::Subscribe), 30);
        assert_eq!(i32::from(CommandNumber::Unsubscribe), 31);
        assert_eq!(i32::from(CommandNumber::GetDirectory), 32);
        assert_eq!(i32::from(CommandNumber::Invoke), 33);
        assert!(CommandNumber::try_from(29).is_err());
    }
}
