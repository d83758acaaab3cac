//! Function contents, invocations and invocation results

use super::parameter::ParameterType;
use crate::value::Value;

/// One argument or result slot in a function signature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleItem {
    pub item_type: Option<ParameterType>,
    pub name: Option<String>,
}

impl TupleItem {
    pub fn new(item_type: ParameterType, name: impl Into<String>) -> Self {
        Self {
            item_type: Some(item_type),
            name: Some(name.into()),
        }
    }
}

/// Contents of an invokable function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionContents {
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub arguments: Option<Vec<TupleItem>>,
    pub result: Option<Vec<TupleItem>>,
}

impl FunctionContents {
    pub fn merge(&mut self, other: &FunctionContents) -> bool {
        merge_option_fields!(self, other, identifier, description, arguments, result)
    }
}

/// A single invocation of a function, correlated by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Monotonic, caller-local invocation counter
    pub id: i64,
    pub arguments: Vec<Value>,
}

impl Invocation {
    pub fn new(id: i64, arguments: Vec<Value>) -> Self {
        Self { id, arguments }
    }
}

/// The provider's answer to an invocation
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub invocation_id: i64,
    pub success: bool,
    pub result: Vec<Value>,
}

impl InvocationResult {
    pub fn success(invocation_id: i64, result: Vec<Value>) -> Self {
        Self {
            invocation_id,
            success: true,
            result,
        }
    }

    /// Failure results carry no payload; the failed function must never
    /// disturb the connection it arrived on.
    pub fn failure(invocation_id: i64) -> Self {
        Self {
            invocation_id,
            success: false,
            result: Vec::new(),
        }
    }
}
