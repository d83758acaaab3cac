//! Standalone Ember+ provider daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use emberplus_provider::{loader, Dispatcher, EmberProvider, ProviderConfig};
use emberplus_types::{
    Element, EmberError, Function, FunctionContents, Matrix, MatrixContents, MatrixType, Node,
    NodeContents, Parameter, ParameterContents, ParameterType, Tree, TupleItem, Value,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "provider", about = "Ember+ provider daemon")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// JSON tree definition, overrides the config file
    #[arg(long)]
    tree: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = match &args.config {
        Some(path) => ProviderConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ProviderConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(tree) = args.tree {
        config.tree = Some(tree);
    }

    let tree = match &config.tree {
        Some(path) => loader::load_tree(path)
            .with_context(|| format!("loading tree from {}", path.display()))?,
        None => {
            info!("no tree definition given, serving the built-in sample tree");
            sample_tree().context("building sample tree")?
        }
    };

    let mut dispatcher = Dispatcher::new(tree);
    if config.tree.is_none() {
        register_sample_functions(&mut dispatcher);
    }

    let provider = EmberProvider::bind(&config.tcp(), dispatcher)
        .await
        .context("binding provider endpoint")?;
    provider.run().await.context("provider event loop")?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Minimal demonstration tree: an identity node, a 3x3 router and an
/// addition function
fn sample_tree() -> Result<Tree, EmberError> {
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
            ParameterContents::with_value("product", Value::String("sample router".into())),
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

fn register_sample_functions(dispatcher: &mut Dispatcher) {
    dispatcher.register_function(
        emberplus_types::EmberPath::new(vec![2]),
        Box::new(|args| {
            let mut sum = 0i64;
            for arg in args {
                sum += arg
                    .as_integer()
                    .ok_or_else(|| EmberError::InvalidRequestFormat("add expects integers".into()))?;
            }
            Ok(vec![Value::Integer(sum)])
        }),
    );
}
