//! Shared fixtures for end-to-end session tests
//!
//! The sample device is a small router: an identity node, a 3x3 oneToN
//! matrix and an integer addition function.

use std::net::SocketAddr;

use emberplus_provider::{Dispatcher, EmberProvider};
use emberplus_network::TcpServerConfig;
use emberplus_types::{
    Element, EmberError, EmberPath, EmberResult, Function, FunctionContents, Matrix,
    MatrixContents, MatrixType, Node, NodeContents, Parameter, ParameterContents, ParameterType,
    Tree, TupleItem, Value,
};

/// Identity node 0 (with writable "product" parameter 0.0), router matrix 1,
/// add function 2
pub fn sample_tree() -> EmberResult<Tree> {
    let mut tree = Tree::new();
    let root = tree.root();

    let identity = tree.insert(
        root,
        Element::Node(Node::numbered(
            0,
            NodeContents {
                identifier: Some("identity".into()),
                description: Some("Device identity".into()),
                ..Default::default()
            },
        )),
    )?;
    tree.insert(
        identity,
        Element::Parameter(Parameter::numbered(
            0,
            ParameterContents {
                identifier: Some("product".into()),
                value: Some(Value::String("router".into())),
                access: Some(emberplus_types::Access::ReadWrite),
                ..Default::default()
            },
        )),
    )?;

    tree.insert(
        root,
        Element::Matrix(Matrix::numbered(
            1,
            MatrixContents {
                identifier: Some("router".into()),
                matrix_type: Some(MatrixType::OneToN),
                target_count: Some(3),
                source_count: Some(3),
                ..Default::default()
            },
        )),
    )?;

    tree.insert(
        root,
        Element::Function(Function::numbered(
            2,
            FunctionContents {
                identifier: Some("add".into()),
                arguments: Some(vec![
                    TupleItem::new(ParameterType::Integer, "lhs"),
                    TupleItem::new(ParameterType::Integer, "rhs"),
                ]),
                result: Some(vec![TupleItem::new(ParameterType::Integer, "sum")]),
                ..Default::default()
            },
        )),
    )?;
    Ok(tree)
}

pub fn sample_dispatcher() -> EmberResult<Dispatcher> {
    let mut dispatcher = Dispatcher::new(sample_tree()?);
    dispatcher.register_function(
        EmberPath::new(vec![2]),
        Box::new(|args| {
            let mut sum = 0i64;
            for arg in args {
                sum += arg.as_integer().ok_or_else(|| {
                    EmberError::InvalidRequestFormat("add expects integers".into())
                })?;
            }
            Ok(vec![Value::Integer(sum)])
        }),
    );
    Ok(dispatcher)
}

/// Bind a sample provider on a loopback port and serve it in the background
pub async fn spawn_provider() -> SocketAddr {
    let config = TcpServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let dispatcher = sample_dispatcher().unwrap();
    let provider = EmberProvider::bind(&config, dispatcher).await.unwrap();
    let address = provider.local_addr();
    tokio::spawn(provider.run());
    address
}
