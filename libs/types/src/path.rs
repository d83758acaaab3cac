//! Dotted-number tree addressing
//!
//! An `EmberPath` is the absolute address of a tree element as a sequence of
//! sibling numbers, rendered as `"1.5.0"` on the wire-facing APIs and stored
//! as a relative OID in BER.

use std::fmt;
use std::str::FromStr;

use crate::error::EmberError;

/// Absolute dotted-number path of a tree element
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmberPath(Vec<u32>);

impl EmberPath {
    /// Empty path (the Root)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(numbers: Vec<u32>) -> Self {
        Self(numbers)
    }

    pub fn numbers(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<u32> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Child path obtained by appending one sibling number
    pub fn child(&self, number: u32) -> Self {
        let mut numbers = self.0.clone();
        numbers.push(number);
        Self(numbers)
    }

    /// Parent path, or `None` for the Root and top-level elements
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True when `self` is a (non-strict) prefix of `other`
    pub fn is_prefix_of(&self, other: &EmberPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True when `self` is exactly one level below `parent`
    pub fn is_direct_child_of(&self, parent: &EmberPath) -> bool {
        self.0.len() == parent.0.len() + 1 && parent.is_prefix_of(self)
    }

    /// Remaining numbers after stripping `prefix`, if it matches
    pub fn strip_prefix(&self, prefix: &EmberPath) -> Option<&[u32]> {
        if prefix.is_prefix_of(self) {
            Some(&self.0[prefix.0.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for EmberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for n in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{n}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for EmberPath {
    type Err = EmberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let numbers = s
            .split('.')
            .map(|part| {
                part.parse::<u32>().map_err(|_| {
                    EmberError::InvalidRequestFormat(format!("bad path segment '{part}' in '{s}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(numbers))
    }
}

impl From<Vec<u32>> for EmberPath {
    fn from(numbers: Vec<u32>) -> Self {
        Self(numbers)
    }
}

impl From<&[u32]> for EmberPath {
    fn from(numbers: &[u32]) -> Self {
        Self(numbers.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path: EmberPath = "1.5.0".parse().unwrap();
        assert_eq!(path.numbers(), &[1, 5, 0]);
        assert_eq!(path.to_string(), "1.5.0");
        assert_eq!(EmberPath::root().to_string(), "");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("1.x.0".parse::<EmberPath>().is_err());
        assert!("1..0".parse::<EmberPath>().is_err());
    }

    #[test]
    fn test_prefix_relations() {
        let parent: EmberPath = "0.1".parse().unwrap();
        let child: EmberPath = "0.1.3".parse().unwrap();
        let other: EmberPath = "0.2.3".parse().unwrap();

        assert!(parent.is_prefix_of(&child));
        assert!(child.is_direct_child_of(&parent));
        assert!(!other.is_direct_child_of(&parent));
        assert_eq!(child.strip_prefix(&parent), Some(&[3u32][..]));
        assert_eq!(other.strip_prefix(&parent), None);
    }

    #[test]
    fn test_parent_child() {
        let path: EmberPath = "2.7".parse().unwrap();
        assert_eq!(path.child(4).to_string(), "2.7.4");
        assert_eq!(path.parent().unwrap().numbers(), &[2]);
        let top: EmberPath = "2".parse().unwrap();
        assert!(top.parent().is_none());
    }
}
