//! Consumer API surface
//!
//! Requests are serialized through the worker's FIFO queue, so responses
//! from a provider that answers in order are matched unambiguously without
//! request ids. Path arguments use the dotted number grammar ("0.1.2");
//! [`EmberConsumer::get_element_by_path`] additionally takes the
//! slash-separated identifier grammar ("identity/product").

use std::sync::atomic::{AtomicI64, Ordering};

use emberplus_codec::encode_tree;
use emberplus_matrix::validate_connection;
use emberplus_network::connect;
use emberplus_types::{
    Addressing, Command, ConnectOperation, Element, EmberError, EmberPath, Invocation,
    InvocationResult, Matrix, MatrixConnection, Node, Parameter, ParameterContents, Tree, Value,
};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::ConsumerConfig;
use crate::convergence::Scope;
use crate::error::{ConsumerError, ConsumerResult};
use crate::worker::{ConsumerEvent, Waiter, Worker, WorkerCommand};

/// Handle to one provider connection
pub struct EmberConsumer {
    commands: mpsc::Sender<WorkerCommand>,
    invocation_ids: AtomicI64,
}

impl EmberConsumer {
    /// Connect to a provider. The returned receiver carries unsolicited
    /// updates and stream values.
    pub async fn connect(
        config: ConsumerConfig,
    ) -> ConsumerResult<(Self, mpsc::Receiver<ConsumerEvent>)> {
        let (connection, inbound) = connect(&config.tcp).await?;
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let worker = Worker::new(
            connection,
            inbound,
            command_rx,
            event_tx,
            config.request_timeout,
        );
        tokio::spawn(worker.run());
        Ok((
            Self {
                commands: command_tx,
                invocation_ids: AtomicI64::new(1),
            },
            event_rx,
        ))
    }

    /// Fetch the direct children of the element at `path` (the whole
    /// top level for the empty path)
    pub async fn get_directory(&self, path: &EmberPath) -> ConsumerResult<Vec<Element>> {
        let scope = if path.is_empty() {
            Scope::Root
        } else {
            Scope::Element(path.clone())
        };
        let payload = command_payload(path, Command::get_directory())?;
        let snapshot = self.converge(payload, scope).await?;
        let id = snapshot
            .lookup(path)
            .ok_or_else(|| ConsumerError::NotFound(path.to_string()))?;
        Ok(snapshot
            .children(id)
            .iter()
            .filter_map(|child| snapshot.element(*child).cloned())
            .collect())
    }

    /// Depth-first directory fetch of everything below `path`, skipping
    /// parameters. Failing branches are logged and skipped; returns the
    /// number of directories fetched.
    pub async fn expand(&self, path: &EmberPath) -> ConsumerResult<usize> {
        let mut fetched = 0;
        let mut stack = vec![path.clone()];
        while let Some(next) = stack.pop() {
            let children = match self.get_directory(&next).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(path = %next, error = %e, "expand step failed");
                    continue;
                }
            };
            fetched += 1;
            for child in children {
                if child.is_parameter() || child.is_command() {
                    continue;
                }
                let child_path = match child.addressing() {
                    Some(Addressing::Path(p)) => p.clone(),
                    Some(Addressing::Number(n)) => next.child(*n),
                    None => continue,
                };
                stack.push(child_path);
            }
        }
        Ok(fetched)
    }

    /// Resolve an element by path, fetching directories along the way as
    /// needed. Dotted segments are numbers ("0.1.2"), slash-separated
    /// segments are identifiers ("identity/product").
    pub async fn get_element_by_path(&self, path: &str) -> ConsumerResult<Element> {
        let resolved = self.resolve_path(path).await?;
        let snapshot = self.snapshot().await?;
        self.element_at(&snapshot, &resolved)
    }

    /// [`EmberConsumer::set_value`] with path resolution in either grammar
    pub async fn set_value_by_path(&self, path: &str, value: Value) -> ConsumerResult<Element> {
        let resolved = self.resolve_path(path).await?;
        self.set_value(&resolved, value).await
    }

    /// Write a parameter value and wait for the provider's echo
    pub async fn set_value(&self, path: &EmberPath, value: Value) -> ConsumerResult<Element> {
        let mut request = Tree::new();
        let root = request.root();
        request.insert(
            root,
            Element::Parameter(Parameter {
                addressing: Addressing::Path(path.clone()),
                contents: Some(ParameterContents {
                    value: Some(value),
                    ..Default::default()
                }),
            }),
        )?;
        let snapshot = self
            .converge(encode_tree(&request)?, Scope::Element(path.clone()))
            .await?;
        self.element_at(&snapshot, path)
    }

    /// Add `sources` to the source set of `target`
    pub async fn matrix_connect(
        &self,
        path: &EmberPath,
        target: u32,
        sources: &[u32],
    ) -> ConsumerResult<MatrixConnection> {
        self.matrix_request(path, target, sources, ConnectOperation::Connect)
            .await
    }

    /// Remove `sources` from the source set of `target`
    pub async fn matrix_disconnect(
        &self,
        path: &EmberPath,
        target: u32,
        sources: &[u32],
    ) -> ConsumerResult<MatrixConnection> {
        self.matrix_request(path, target, sources, ConnectOperation::Disconnect)
            .await
    }

    /// Replace the source set of `target` outright
    pub async fn set_matrix_connection(
        &self,
        path: &EmberPath,
        target: u32,
        sources: &[u32],
    ) -> ConsumerResult<MatrixConnection> {
        self.matrix_request(path, target, sources, ConnectOperation::Absolute)
            .await
    }

    /// Invoke the function at `path`; invocation ids are allocated from a
    /// consumer-local monotonic counter
    pub async fn invoke_function(
        &self,
        path: &EmberPath,
        arguments: Vec<Value>,
    ) -> ConsumerResult<InvocationResult> {
        let id = self.invocation_ids.fetch_add(1, Ordering::Relaxed);
        let payload = command_payload(path, Command::invoke(Invocation::new(id, arguments)))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Request {
                payload,
                waiter: Waiter::Invocation { id, reply: reply_tx },
            })
            .await
            .map_err(|_| ConsumerError::WorkerGone)?;
        reply_rx.await.map_err(|_| ConsumerError::WorkerGone)?
    }

    /// Subscribe to the stream or update fan-out of `path`
    pub async fn subscribe(&self, path: &EmberPath) -> ConsumerResult<()> {
        self.fire_and_forget(command_payload(path, Command::subscribe())?)
            .await
    }

    pub async fn unsubscribe(&self, path: &EmberPath) -> ConsumerResult<()> {
        self.fire_and_forget(command_payload(path, Command::unsubscribe())?)
            .await
    }

    /// Clone of the locally cached tree
    pub async fn snapshot(&self) -> ConsumerResult<Tree> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| ConsumerError::WorkerGone)?;
        reply_rx.await.map_err(|_| ConsumerError::WorkerGone)
    }

    async fn matrix_request(
        &self,
        path: &EmberPath,
        target: u32,
        sources: &[u32],
        operation: ConnectOperation,
    ) -> ConsumerResult<MatrixConnection> {
        // Validate locally when the matrix is already cached, so an
        // out-of-range request fails without a round trip
        let snapshot = self.snapshot().await?;
        if let Some(id) = snapshot.lookup(path) {
            if let Some(Element::Matrix(matrix)) = snapshot.element(id) {
                let sources_i64: Vec<i64> = sources.iter().map(|s| *s as i64).collect();
                validate_connection(matrix, target as i64, &sources_i64)?;
            }
        }

        let mut request = Tree::new();
        let root = request.root();
        let mut matrix = Matrix::minimal(Addressing::Path(path.clone()));
        matrix.set_sources(target, sources.to_vec());
        matrix.connection_mut(target).operation = Some(operation);
        request.insert(root, Element::Matrix(matrix))?;

        let snapshot = self
            .converge(encode_tree(&request)?, Scope::Matrix(path.clone()))
            .await?;
        let id = snapshot
            .lookup(path)
            .ok_or_else(|| ConsumerError::NotFound(path.to_string()))?;
        match snapshot.element(id) {
            Some(Element::Matrix(matrix)) => Ok(matrix
                .connection(target)
                .cloned()
                .unwrap_or_else(|| MatrixConnection::new(target))),
            _ => Err(ConsumerError::NotFound(path.to_string())),
        }
    }

    async fn resolve_path(&self, path: &str) -> ConsumerResult<EmberPath> {
        if path.contains('/') {
            self.resolve_identifiers(path).await
        } else {
            self.resolve_numbers(path.parse()?).await
        }
    }

    async fn resolve_numbers(&self, path: EmberPath) -> ConsumerResult<EmberPath> {
        let mut last_fetched: Option<EmberPath> = None;
        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.lookup(&path).is_some() {
                return Ok(path);
            }
            // Deepest prefix we already know about
            let mut deepest = EmberPath::root();
            for depth in 1..=path.numbers().len() {
                let prefix = EmberPath::new(path.numbers()[..depth].to_vec());
                if snapshot.lookup(&prefix).is_some() {
                    deepest = prefix;
                } else {
                    break;
                }
            }
            if last_fetched.as_ref() == Some(&deepest) {
                return Err(EmberError::PathDiscoveryFailure {
                    path: path.to_string(),
                }
                .into());
            }
            self.get_directory(&deepest).await?;
            last_fetched = Some(deepest);
        }
    }

    async fn resolve_identifiers(&self, spec: &str) -> ConsumerResult<EmberPath> {
        let mut resolved = EmberPath::root();
        'segments: for segment in spec.split('/').filter(|s| !s.is_empty()) {
            let mut fetched = false;
            loop {
                let snapshot = self.snapshot().await?;
                let parent = snapshot
                    .lookup(&resolved)
                    .ok_or_else(|| ConsumerError::NotFound(resolved.to_string()))?;
                if let Some(child) = snapshot.child_by_identifier(parent, segment) {
                    resolved = snapshot.path_of(child);
                    continue 'segments;
                }
                if fetched {
                    return Err(EmberError::PathDiscoveryFailure {
                        path: spec.to_string(),
                    }
                    .into());
                }
                self.get_directory(&resolved).await?;
                fetched = true;
            }
        }
        Ok(resolved)
    }

    async fn converge(&self, payload: Vec<u8>, scope: Scope) -> ConsumerResult<Tree> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Request {
                payload,
                waiter: Waiter::Converge {
                    scope,
                    reply: reply_tx,
                },
            })
            .await
            .map_err(|_| ConsumerError::WorkerGone)?;
        reply_rx.await.map_err(|_| ConsumerError::WorkerGone)?
    }

    async fn fire_and_forget(&self, payload: Vec<u8>) -> ConsumerResult<()> {
        self.commands
            .send(WorkerCommand::Request {
                payload,
                waiter: Waiter::None,
            })
            .await
            .map_err(|_| ConsumerError::WorkerGone)
    }

    fn element_at(&self, snapshot: &Tree, path: &EmberPath) -> ConsumerResult<Element> {
        snapshot
            .lookup(path)
            .and_then(|id| snapshot.element(id).cloned())
            .ok_or_else(|| ConsumerError::NotFound(path.to_string()))
    }
}

/// Build a request tree holding one command addressed at `path`
fn command_payload(path: &EmberPath, command: Command) -> ConsumerResult<Vec<u8>> {
    let mut tree = Tree::new();
    let mut parent = tree.root();
    if !path.is_empty() {
        parent = tree.insert(parent, Element::Node(Node::qualified(path.clone())))?;
    }
    tree.insert(parent, Element::Command(command))?;
    Ok(encode_tree(&tree)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberplus_codec::{decode_root, DecodedRoot};
    use emberplus_types::CommandNumber;

    #[test]
    fn test_command_payload_wraps_in_qualified_node() {
        let path: EmberPath = "0.1".parse().unwrap();
        let payload = command_payload(&path, Command::get_directory()).unwrap();
        let DecodedRoot::Elements(tree) = decode_root(&payload).unwrap() else {
            panic!("expected elements");
        };
        let node = tree.lookup(&path).unwrap();
        let children = tree.children(node);
        assert_eq!(children.len(), 1);
        match tree.element(children[0]).unwrap() {
            Element::Command(command) => {
                assert_eq!(command.number, CommandNumber::GetDirectory);
            }
            other => panic!("expected command, got {}", other.kind()),
        }
    }

    #[test]
    fn test_root_command_payload_has_no_wrapper() {
        let payload = command_payload(&EmberPath::root(), Command::get_directory()).unwrap();
        let DecodedRoot::Elements(tree) = decode_root(&payload).unwrap() else {
            panic!("expected elements");
        };
        let top = tree.children(tree.root());
        assert_eq!(top.len(), 1);
        assert!(tree.element(top[0]).unwrap().is_command());
    }
}
