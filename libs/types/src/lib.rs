//! # Ember+ Tree Data Model
//!
//! ## Purpose
//!
//! Pure data structures shared by every other crate in the workspace: the
//! addressable element tree (nodes, parameters, matrices, functions, commands
//! and their path-qualified variants), dotted-number addressing, and the
//! field-by-field contents merge rules that drive incremental tree updates.
//!
//! ## What This Crate Does NOT Contain
//! - BER encoding/decoding (belongs in libs/codec)
//! - Matrix connection algorithms (belongs in libs/matrix)
//! - Transport or socket logic (belongs in network/)
//!
//! Keeping this crate dependency-light lets the codec, the matrix engine and
//! both service roles agree on one representation without pulling in any
//! runtime machinery.

#[macro_use]
mod merge;

pub mod element;
pub mod error;
pub mod path;
pub mod tree;
pub mod value;

pub use element::command::{Command, CommandNumber, FieldFlags};
pub use element::function::{FunctionContents, Invocation, InvocationResult, TupleItem};
pub use element::matrix::{
    ConnectOperation, Disposition, Label, Matrix, MatrixConnection, MatrixContents, MatrixMode,
    MatrixType,
};
pub use element::node::NodeContents;
pub use element::parameter::{Access, ParameterContents, ParameterType, StreamDescription};
pub use element::{Addressing, Element, Function, Node, Parameter};
pub use error::{EmberError, EmberResult};
pub use path::EmberPath;
pub use tree::{ElementId, Tree};
pub use value::Value;
