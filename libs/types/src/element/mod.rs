//! Tree element variants
//!
//! The protocol's deep element hierarchy is modeled as one closed enum.
//! Every variant carries an [`Addressing`]: either a sibling `Number` (for
//! elements reached by walking the containment chain) or an absolute `Path`
//! (the "qualified" form used to reference an element directly).

pub mod command;
pub mod function;
pub mod matrix;
pub mod node;
pub mod parameter;

use crate::error::{EmberError, EmberResult};
use crate::path::EmberPath;

use command::Command;
use function::FunctionContents;
use matrix::Matrix;
use node::NodeContents;
use parameter::ParameterContents;

/// How an element is identified within the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// Sibling number, unique among siblings but not globally
    Number(u32),
    /// Absolute dotted path; the element is "qualified"
    Path(EmberPath),
}

impl Default for Addressing {
    fn default() -> Self {
        Addressing::Number(0)
    }
}

impl Addressing {
    pub fn number(&self) -> Option<u32> {
        match self {
            Addressing::Number(n) => Some(*n),
            Addressing::Path(path) => path.last(),
        }
    }

    pub fn qualified_path(&self) -> Option<&EmberPath> {
        match self {
            Addressing::Number(_) => None,
            Addressing::Path(path) => Some(path),
        }
    }

    pub fn is_qualified(&self) -> bool {
        matches!(self, Addressing::Path(_))
    }
}

/// A container node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub addressing: Addressing,
    pub contents: Option<NodeContents>,
}

impl Node {
    pub fn numbered(number: u32, contents: NodeContents) -> Self {
        Self {
            addressing: Addressing::Number(number),
            contents: Some(contents),
        }
    }

    pub fn qualified(path: EmberPath) -> Self {
        Self {
            addressing: Addressing::Path(path),
            contents: None,
        }
    }
}

/// A leaf parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameter {
    pub addressing: Addressing,
    pub contents: Option<ParameterContents>,
}

impl Parameter {
    pub fn numbered(number: u32, contents: ParameterContents) -> Self {
        Self {
            addressing: Addressing::Number(number),
            contents: Some(contents),
        }
    }

    pub fn qualified(path: EmberPath) -> Self {
        Self {
            addressing: Addressing::Path(path),
            contents: None,
        }
    }
}

/// An invokable function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub addressing: Addressing,
    pub contents: Option<FunctionContents>,
}

impl Function {
    pub fn numbered(number: u32, contents: FunctionContents) -> Self {
        Self {
            addressing: Addressing::Number(number),
            contents: Some(contents),
        }
    }
}

/// Any element that can appear in a tree or a wire fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// The tree's entry element; no number, no path
    Root,
    Node(Node),
    Parameter(Parameter),
    Matrix(Matrix),
    Function(Function),
    Command(Command),
}

impl Element {
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Root => "root",
            Element::Node(_) => "node",
            Element::Parameter(_) => "parameter",
            Element::Matrix(_) => "matrix",
            Element::Function(_) => "function",
            Element::Command(_) => "command",
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Element::Root)
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Element::Node(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self, Element::Parameter(_))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Element::Matrix(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Element::Function(_))
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Element::Command(_))
    }

    /// Stream elements push values through a side channel and are skipped by
    /// implicit subscription on directory fetches.
    pub fn is_stream(&self) -> bool {
        match self {
            Element::Parameter(p) => p.contents.as_ref().is_some_and(|c| c.is_stream()),
            _ => false,
        }
    }

    pub fn addressing(&self) -> Option<&Addressing> {
        match self {
            Element::Root => None,
            Element::Node(n) => Some(&n.addressing),
            Element::Parameter(p) => Some(&p.addressing),
            Element::Matrix(m) => Some(&m.addressing),
            Element::Function(f) => Some(&f.addressing),
            Element::Command(_) => None,
        }
    }

    /// Sibling number; for commands this is the command code
    pub fn number(&self) -> Option<u32> {
        match self {
            Element::Command(c) => Some(i32::from(c.number) as u32),
            other => other.addressing().and_then(Addressing::number),
        }
    }

    /// Absolute path for qualified elements
    pub fn qualified_path(&self) -> Option<&EmberPath> {
        self.addressing().and_then(Addressing::qualified_path)
    }

    pub fn is_qualified(&self) -> bool {
        self.addressing().is_some_and(Addressing::is_qualified)
    }

    /// Identifier from contents, when present
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Element::Node(n) => n.contents.as_ref().and_then(|c| c.identifier.as_deref()),
            Element::Parameter(p) => p.contents.as_ref().and_then(|c| c.identifier.as_deref()),
            Element::Matrix(m) => m.contents.as_ref().and_then(|c| c.identifier.as_deref()),
            Element::Function(f) => f.contents.as_ref().and_then(|c| c.identifier.as_deref()),
            Element::Root | Element::Command(_) => None,
        }
    }

    /// A contents-free marker of the same kind and addressing, used when
    /// synthesizing minimal ancestor chains for outbound envelopes.
    pub fn minimal(&self) -> Element {
        match self {
            Element::Root => Element::Root,
            Element::Node(n) => Element::Node(Node {
                addressing: n.addressing.clone(),
                contents: None,
            }),
            Element::Parameter(p) => Element::Parameter(Parameter {
                addressing: p.addressing.clone(),
                contents: None,
            }),
            Element::Matrix(m) => Element::Matrix(Matrix::minimal(m.addressing.clone())),
            Element::Function(f) => Element::Function(Function {
                addressing: f.addressing.clone(),
                contents: None,
            }),
            Element::Command(c) => Element::Command(c.clone()),
        }
    }

    /// Shallow-merge `other` into `self`, returning whether observable state
    /// changed. Kinds must match; commands never merge.
    pub fn update(&mut self, other: &Element) -> EmberResult<bool> {
        match (self, other) {
            (Element::Root, Element::Root) => Ok(false),
            (Element::Node(dst), Element::Node(src)) => {
                Ok(merge_contents(&mut dst.contents, &src.contents, NodeContents::merge))
            }
            (Element::Parameter(dst), Element::Parameter(src)) => Ok(merge_contents(
                &mut dst.contents,
                &src.contents,
                ParameterContents::merge,
            )),
            (Element::Function(dst), Element::Function(src)) => Ok(merge_contents(
                &mut dst.contents,
                &src.contents,
                FunctionContents::merge,
            )),
            (Element::Matrix(dst), Element::Matrix(src)) => Ok(dst.merge(src)),
            (dst, src) => Err(EmberError::InvalidEmberNode(format!(
                "cannot update {} element from {} fragment",
                dst.kind(),
                src.kind()
            ))),
        }
    }
}

fn merge_contents<C: Clone>(
    dst: &mut Option<C>,
    src: &Option<C>,
    merge: impl FnOnce(&mut C, &C) -> bool,
) -> bool {
    match (dst.as_mut(), src) {
        (Some(dst), Some(src)) => merge(dst, src),
        (None, Some(src)) => {
            *dst = Some(src.clone());
            true
        }
        (_, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_capability_checks_are_exhaustive_switches() {
        let node = Element::Node(Node::numbered(0, NodeContents::with_identifier("a")));
        assert!(node.is_node());
        assert!(!node.is_parameter());
        assert!(!node.is_qualified());
        assert_eq!(node.number(), Some(0));

        let qualified = Element::Parameter(Parameter::qualified("1.2.3".parse().unwrap()));
        assert!(qualified.is_qualified());
        assert_eq!(qualified.number(), Some(3));
        assert_eq!(qualified.qualified_path().unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn test_update_rejects_kind_mismatch() {
        let mut node = Element::Node(Node::numbered(0, NodeContents::default()));
        let parameter = Element::Parameter(Parameter::numbered(0, ParameterContents::default()));
        assert!(node.update(&parameter).is_err());
    }

    #[test]
    fn test_update_merges_parameter_value() {
        let mut local = Element::Parameter(Parameter::numbered(
            1,
            ParameterContents::with_value("gain", Value::Integer(0)),
        ));
        let fragment = Element::Parameter(Parameter {
            addressing: Addressing::Number(1),
            contents: Some(ParameterContents {
                value: Some(Value::Integer(42)),
                ..Default::default()
            }),
        });
        assert!(local.update(&fragment).unwrap());
        match &local {
            Element::Parameter(p) => {
                assert_eq!(p.contents.as_ref().unwrap().value, Some(Value::Integer(42)));
                assert_eq!(
                    p.contents.as_ref().unwrap().identifier.as_deref(),
                    Some("gain")
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_minimal_strips_contents() {
        let node = Element::Node(Node::numbered(7, NodeContents::with_identifier("x")));
        let minimal = node.minimal();
        assert_eq!(minimal.number(), Some(7));
        assert_eq!(minimal.identifier(), None);
    }
}
