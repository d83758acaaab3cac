//! Tree definition loader
//!
//! Providers describe their tree in a JSON document: a list of element
//! definitions, nested through `children`. The loader turns that document
//! into the authoritative [`Tree`] the dispatcher serves from.

use std::fs;
use std::path::Path;

use emberplus_types::{
    Access, Element, ElementId, Function, FunctionContents, Matrix, MatrixContents, MatrixType,
    Node, NodeContents, Parameter, ParameterContents, ParameterType, Tree, TupleItem, Value,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read tree definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tree definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid tree definition: {0}")]
    Structure(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TupleDef {
    #[serde(rename = "type")]
    item_type: ItemTypeDef,
    name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ItemTypeDef {
    Integer,
    Real,
    String,
    Boolean,
    Trigger,
    Enum,
    Octets,
}

impl From<ItemTypeDef> for ParameterType {
    fn from(def: ItemTypeDef) -> Self {
        match def {
            ItemTypeDef::Integer => ParameterType::Integer,
            ItemTypeDef::Real => ParameterType::Real,
            ItemTypeDef::String => ParameterType::String,
            ItemTypeDef::Boolean => ParameterType::Boolean,
            ItemTypeDef::Trigger => ParameterType::Trigger,
            ItemTypeDef::Enum => ParameterType::Enum,
            ItemTypeDef::Octets => ParameterType::Octets,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum AccessDef {
    None,
    Read,
    Write,
    ReadWrite,
}

impl From<AccessDef> for Access {
    fn from(def: AccessDef) -> Self {
        match def {
            AccessDef::None => Access::None,
            AccessDef::Read => Access::Read,
            AccessDef::Write => Access::Write,
            AccessDef::ReadWrite => Access::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
enum MatrixTypeDef {
    OneToN,
    OneToOne,
    NToN,
}

impl From<MatrixTypeDef> for MatrixType {
    fn from(def: MatrixTypeDef) -> Self {
        match def {
            MatrixTypeDef::OneToN => MatrixType::OneToN,
            MatrixTypeDef::OneToOne => MatrixType::OneToOne,
            MatrixTypeDef::NToN => MatrixType::NToN,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ElementDef {
    #[serde(rename_all = "camelCase")]
    Node {
        number: u32,
        identifier: Option<String>,
        description: Option<String>,
        #[serde(default)]
        children: Vec<ElementDef>,
    },
    #[serde(rename_all = "camelCase")]
    Parameter {
        number: u32,
        identifier: Option<String>,
        description: Option<String>,
        value: Option<serde_json::Value>,
        access: Option<AccessDef>,
        stream_identifier: Option<i32>,
    },
    #[serde(rename_all = "camelCase")]
    Matrix {
        number: u32,
        identifier: Option<String>,
        matrix_type: Option<MatrixTypeDef>,
        target_count: Option<i32>,
        source_count: Option<i32>,
        #[serde(default)]
        children: Vec<ElementDef>,
    },
    #[serde(rename_all = "camelCase")]
    Function {
        number: u32,
        identifier: Option<String>,
        #[serde(default)]
        arguments: Vec<TupleDef>,
        #[serde(default)]
        result: Vec<TupleDef>,
    },
}

/// Read and build the tree from the JSON document at `path`
pub fn load_tree(path: &Path) -> Result<Tree, LoadError> {
    let text = fs::read_to_string(path)?;
    let tree = parse_tree(&text)?;
    info!(path = %path.display(), "loaded tree definition");
    Ok(tree)
}

/// Build the tree from an in-memory JSON document
pub fn parse_tree(text: &str) -> Result<Tree, LoadError> {
    let defs: Vec<ElementDef> = serde_json::from_str(text)?;
    let mut tree = Tree::new();
    let root = tree.root();
    for def in &defs {
        build_element(&mut tree, root, def)?;
    }
    Ok(tree)
}

fn build_element(tree: &mut Tree, parent: ElementId, def: &ElementDef) -> Result<(), LoadError> {
    match def {
        ElementDef::Node {
            number,
            identifier,
            description,
            children,
        } => {
            let id = insert(
                tree,
                parent,
                Element::Node(Node::numbered(
                    *number,
                    NodeContents {
                        identifier: identifier.clone(),
                        description: description.clone(),
                        ..Default::default()
                    },
                )),
            )?;
            for child in children {
                build_element(tree, id, child)?;
            }
        }
        ElementDef::Parameter {
            number,
            identifier,
            description,
            value,
            access,
            stream_identifier,
        } => {
            let value = value.as_ref().map(json_value).transpose()?;
            insert(
                tree,
                parent,
                Element::Parameter(Parameter::numbered(
                    *number,
                    ParameterContents {
                        identifier: identifier.clone(),
                        description: description.clone(),
                        value,
                        access: access.map(Access::from),
                        stream_identifier: *stream_identifier,
                        ..Default::default()
                    },
                )),
            )?;
        }
        ElementDef::Matrix {
            number,
            identifier,
            matrix_type,
            target_count,
            source_count,
            children,
        } => {
            let id = insert(
                tree,
                parent,
                Element::Matrix(Matrix::numbered(
                    *number,
                    MatrixContents {
                        identifier: identifier.clone(),
                        matrix_type: matrix_type.map(MatrixType::from),
                        target_count: *target_count,
                        source_count: *source_count,
                        ..Default::default()
                    },
                )),
            )?;
            for child in children {
                build_element(tree, id, child)?;
            }
        }
        ElementDef::Function {
            number,
            identifier,
            arguments,
            result,
        } => {
            insert(
                tree,
                parent,
                Element::Function(Function::numbered(
                    *number,
                    FunctionContents {
                        identifier: identifier.clone(),
                        arguments: tuple_items(arguments),
                        result: tuple_items(result),
                        ..Default::default()
                    },
                )),
            )?;
        }
    }
    Ok(())
}

fn insert(tree: &mut Tree, parent: ElementId, element: Element) -> Result<ElementId, LoadError> {
    tree.insert(parent, element)
        .map_err(|e| LoadError::Structure(e.to_string()))
}

fn tuple_items(defs: &[TupleDef]) -> Option<Vec<TupleItem>> {
    if defs.is_empty() {
        return None;
    }
    Some(
        defs.iter()
            .map(|def| TupleItem::new(def.item_type.into(), def.name.clone()))
            .collect(),
    )
}

fn json_value(value: &serde_json::Value) -> Result<Value, LoadError> {
    match value {
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Real(f))
            } else {
                Err(LoadError::Structure(format!("unrepresentable number {n}")))
            }
        }
        other => Err(LoadError::Structure(format!(
            "unsupported parameter value {other}"
        ))),
    }
}
