//! Request dispatcher: decoded request trees in, response envelopes out
//!
//! The dispatcher owns the authoritative tree. Each inbound payload is
//! decoded, broken into addressed requests (commands, value writes, matrix
//! connections), and answered with minimal response envelopes. Fan-out to
//! subscribers never includes the originating client; the originator always
//! gets a direct response instead.

use std::collections::{BTreeMap, HashMap};

use emberplus_codec::{
    decode_root, encode_invocation_result, encode_stream_collection, encode_tree, DecodedRoot,
    StreamEntry,
};
use emberplus_matrix::{apply_connection, validate_connection, Applied};
use emberplus_network::ClientId;
use emberplus_types::{
    Addressing, Command, CommandNumber, Disposition, Element, ElementId, EmberError, EmberPath,
    EmberResult, InvocationResult, Matrix, MatrixConnection, Node, NodeContents, Parameter,
    ParameterContents, Tree, Value,
};
use tracing::{debug, warn};

use crate::subscriptions::SubscriptionRegistry;

/// Callable backing a Function element
pub type FunctionHandler = Box<dyn Fn(&[Value]) -> EmberResult<Vec<Value>> + Send + Sync>;

/// One envelope destined for one client's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub client: ClientId,
    pub payload: Vec<u8>,
}

enum RequestKind {
    Command(Command),
    ValueWrite(ParameterContents),
    Connections(Vec<MatrixConnection>),
}

struct Request {
    path: EmberPath,
    kind: RequestKind,
}

/// The provider's command router and state owner
pub struct Dispatcher {
    tree: Tree,
    subscriptions: SubscriptionRegistry,
    functions: HashMap<EmberPath, FunctionHandler>,
}

impl Dispatcher {
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            subscriptions: SubscriptionRegistry::new(),
            functions: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Attach the callable behind the Function element at `path`
    pub fn register_function(&mut self, path: EmberPath, handler: FunctionHandler) {
        self.functions.insert(path, handler);
    }

    /// Forget a disconnected client everywhere
    pub fn remove_client(&mut self, client: ClientId) {
        self.subscriptions.unsubscribe_all(client);
    }

    /// Handle one inbound EmBER payload from `client`
    pub fn handle_payload(&mut self, client: ClientId, payload: &[u8]) -> EmberResult<Vec<Outgoing>> {
        let mut out = Vec::new();
        match decode_root(payload)? {
            DecodedRoot::Elements(request) => {
                for request in collect_requests(&request) {
                    // Requests are independent: one failing must not take
                    // back the replies of requests already applied, and the
                    // client gets an error tree instead of silence.
                    let path = request.path.clone();
                    if let Err(e) = self.dispatch(client, request, &mut out) {
                        warn!(%client, path = %path, error = %e, "request failed");
                        out.push(Outgoing {
                            client,
                            payload: encode_tree(&offline_marker(&path)?)?,
                        });
                    }
                }
            }
            DecodedRoot::InvocationResult(_) | DecodedRoot::Streams(_) => {
                return Err(EmberError::InvalidRequestFormat(
                    "providers accept element trees only".into(),
                ));
            }
        }
        Ok(out)
    }

    /// Push current values of stream elements to their subscribers
    pub fn publish_stream(&self, entries: &[StreamEntry]) -> EmberResult<Vec<Outgoing>> {
        let mut clients: Vec<ClientId> = Vec::new();
        for (path, identifier) in stream_elements(&self.tree) {
            if entries.iter().any(|entry| entry.identifier == identifier) {
                for client in self.subscriptions.subscribers_of(&path) {
                    if !clients.contains(&client) {
                        clients.push(client);
                    }
                }
            }
        }
        let payload = encode_stream_collection(entries)?;
        Ok(clients
            .into_iter()
            .map(|client| Outgoing {
                client,
                payload: payload.clone(),
            })
            .collect())
    }

    fn dispatch(
        &mut self,
        client: ClientId,
        request: Request,
        out: &mut Vec<Outgoing>,
    ) -> EmberResult<()> {
        let Some(target) = self.tree.lookup(&request.path) else {
            warn!(%client, path = %request.path, "request for unknown element");
            out.push(Outgoing {
                client,
                payload: encode_tree(&offline_marker(&request.path)?)?,
            });
            return Ok(());
        };
        match request.kind {
            RequestKind::Command(command) => {
                self.dispatch_command(client, target, command, out)
            }
            RequestKind::ValueWrite(contents) => self.write_value(client, target, contents, out),
            RequestKind::Connections(connections) => {
                self.apply_connections(client, target, connections, out)
            }
        }
    }

    fn dispatch_command(
        &mut self,
        client: ClientId,
        target: ElementId,
        command: Command,
        out: &mut Vec<Outgoing>,
    ) -> EmberResult<()> {
        match command.number {
            CommandNumber::GetDirectory => {
                debug!(%client, path = %self.tree.path_of(target), "get directory");
                let response = self.directory_response(target)?;
                out.push(Outgoing {
                    client,
                    payload: encode_tree(&response)?,
                });
                self.subscribe_implicitly(client, target);
                Ok(())
            }
            CommandNumber::Subscribe => {
                self.subscriptions.subscribe(&self.tree.path_of(target), client);
                Ok(())
            }
            CommandNumber::Unsubscribe => {
                self.subscriptions
                    .unsubscribe(&self.tree.path_of(target), client);
                Ok(())
            }
            CommandNumber::Invoke => self.invoke(client, target, command, out),
        }
    }

    fn invoke(
        &mut self,
        client: ClientId,
        target: ElementId,
        command: Command,
        out: &mut Vec<Outgoing>,
    ) -> EmberResult<()> {
        let invocation = command.invocation.ok_or_else(|| {
            EmberError::InvalidRequestFormat("Invoke command without invocation".into())
        })?;
        let path = self.tree.path_of(target);

        // Any failure past this point answers success:false; a broken
        // function must never disturb the connection it arrived on.
        let is_function = self
            .tree
            .element(target)
            .is_some_and(Element::is_function);
        let result = if !is_function {
            warn!(%client, path = %path, "invoke on non-function element");
            InvocationResult::failure(invocation.id)
        } else {
            match self.functions.get(&path) {
                Some(handler) => match handler(&invocation.arguments) {
                    Ok(values) => InvocationResult::success(invocation.id, values),
                    Err(e) => {
                        warn!(%client, path = %path, error = %e, "function invocation failed");
                        InvocationResult::failure(invocation.id)
                    }
                },
                None => {
                    warn!(%client, path = %path, "function has no registered handler");
                    InvocationResult::failure(invocation.id)
                }
            }
        };
        out.push(Outgoing {
            client,
            payload: encode_invocation_result(&result)?,
        });
        Ok(())
    }

    fn write_value(
        &mut self,
        client: ClientId,
        target: ElementId,
        contents: ParameterContents,
        out: &mut Vec<Outgoing>,
    ) -> EmberResult<()> {
        let path = self.tree.path_of(target);
        let writable = match self.tree.element(target) {
            Some(Element::Parameter(p)) => p.contents.as_ref().is_some_and(|c| c.is_writable()),
            _ => {
                return Err(EmberError::AccessError {
                    path: path.to_string(),
                    expected: "parameter",
                })
            }
        };
        let Some(value) = contents.value else {
            return Ok(());
        };

        if writable {
            let fragment = Element::Parameter(Parameter {
                addressing: Addressing::Number(0),
                contents: Some(ParameterContents {
                    value: Some(value),
                    ..Default::default()
                }),
            });
            self.tree.update_element(target, &fragment)?;
        } else {
            warn!(%client, path = %path, "value write to read-only parameter ignored");
        }

        // Respond with the value now in effect, whether or not it changed
        let current = match self.tree.element(target) {
            Some(Element::Parameter(p)) => p.contents.as_ref().and_then(|c| c.value.clone()),
            _ => None,
        };
        let addressing = self
            .tree
            .element(target)
            .and_then(Element::addressing)
            .cloned()
            .unwrap_or_default();
        let update = Element::Parameter(Parameter {
            addressing,
            contents: Some(ParameterContents {
                value: current,
                ..Default::default()
            }),
        });
        let payload = encode_tree(&self.tree.branch_with_payload(target, update)?)?;
        out.push(Outgoing {
            client,
            payload: payload.clone(),
        });
        self.fan_out(client, &path, &payload, out);
        Ok(())
    }

    fn apply_connections(
        &mut self,
        client: ClientId,
        target: ElementId,
        connections: Vec<MatrixConnection>,
        out: &mut Vec<Outgoing>,
    ) -> EmberResult<()> {
        let path = self.tree.path_of(target);
        let defaults = self.default_sources(target);

        let (addressing, applied): (Addressing, Vec<Applied>) = {
            let Some(Element::Matrix(matrix)) = self.tree.element_mut(target) else {
                return Err(EmberError::AccessError {
                    path: path.to_string(),
                    expected: "matrix",
                });
            };
            let mut applied = Vec::with_capacity(connections.len());
            for connection in &connections {
                let sources: Vec<i64> =
                    connection.sources().iter().map(|s| *s as i64).collect();
                validate_connection(matrix, connection.target as i64, &sources)?;
                applied.push(apply_connection(matrix, connection, defaults.as_ref()));
            }
            (matrix.addressing.clone(), applied)
        };

        // Direct response carries the per-request dispositions; subscribers
        // get a plain tally for the requests that changed state.
        let mut response = Matrix::minimal(addressing.clone());
        let mut tally: Option<Matrix> = None;
        for result in &applied {
            response.set_sources(result.target, result.sources.clone());
            response.connection_mut(result.target).disposition = Some(result.disposition);
            if result.should_notify() {
                let notify = tally.get_or_insert_with(|| Matrix::minimal(addressing.clone()));
                notify.set_sources(result.target, result.sources.clone());
                notify.connection_mut(result.target).disposition = Some(Disposition::Tally);
            }
        }

        let payload = encode_tree(
            &self
                .tree
                .branch_with_payload(target, Element::Matrix(response))?,
        )?;
        out.push(Outgoing { client, payload });

        if let Some(tally) = tally {
            let payload = encode_tree(
                &self
                    .tree
                    .branch_with_payload(target, Element::Matrix(tally))?,
            )?;
            self.fan_out(client, &path, &payload, out);
        }
        Ok(())
    }

    /// Directory listing: the element with its contents plus every direct
    /// child with full contents (children of children stay unexpanded).
    fn directory_response(&self, target: ElementId) -> EmberResult<Tree> {
        if target == self.tree.root() {
            let mut listing = Tree::new();
            let root = listing.root();
            for child in self.tree.children(target) {
                if let Some(element) = self.tree.element(*child) {
                    listing.insert(root, element.clone())?;
                }
            }
            return Ok(listing);
        }

        let own = self
            .tree
            .element(target)
            .cloned()
            .ok_or_else(|| EmberError::InvalidEmberNode("stale element handle".into()))?;
        let mut branch = self.tree.branch_with_payload(target, own)?;
        let path = self.tree.path_of(target);
        let branch_target = branch
            .lookup(&path)
            .ok_or_else(|| EmberError::InvalidEmberNode("envelope lost its subject".into()))?;
        for child in self.tree.children(target) {
            if let Some(element) = self.tree.element(*child) {
                branch.insert(branch_target, element.clone())?;
            }
        }
        Ok(branch)
    }

    /// A directory fetch subscribes the fetcher to what it just saw, except
    /// stream elements, which require an explicit Subscribe.
    fn subscribe_implicitly(&mut self, client: ClientId, target: ElementId) {
        let Some(element) = self.tree.element(target) else {
            return;
        };
        match element {
            Element::Parameter(_) if !element.is_stream() => {
                self.subscriptions.subscribe(&self.tree.path_of(target), client);
            }
            Element::Matrix(_) => {
                self.subscriptions.subscribe(&self.tree.path_of(target), client);
            }
            Element::Root | Element::Node(_) => {
                // Only value-bearing children: node and function children
                // wait for their own directory fetch.
                for child in self.tree.children(target) {
                    let Some(child_element) = self.tree.element(*child) else {
                        continue;
                    };
                    let eligible = match child_element {
                        Element::Parameter(_) => !child_element.is_stream(),
                        Element::Matrix(_) => true,
                        _ => false,
                    };
                    if eligible {
                        self.subscriptions
                            .subscribe(&self.tree.path_of(*child), client);
                    }
                }
            }
            _ => {}
        }
    }

    fn fan_out(&self, originator: ClientId, path: &EmberPath, payload: &[u8], out: &mut Vec<Outgoing>) {
        for subscriber in self.subscriptions.subscribers_of(path) {
            if subscriber != originator {
                out.push(Outgoing {
                    client: subscriber,
                    payload: payload.to_vec(),
                });
            }
        }
    }

    /// Per-target default sources for oneToN disconnects, read from the
    /// sibling table next to the matrix's first label group.
    fn default_sources(&self, target: ElementId) -> Option<BTreeMap<u32, u32>> {
        let Some(Element::Matrix(matrix)) = self.tree.element(target) else {
            return None;
        };
        let contents = matrix.contents.as_ref()?;
        let base = &contents.labels.as_ref()?.first()?.base_path;
        let last = base.last()?;
        let table_path = match base.parent() {
            Some(parent) => parent.child(last + 1),
            None => EmberPath::new(vec![last + 1]),
        };
        let table = self.tree.lookup(&table_path)?;

        let mut map = BTreeMap::new();
        for child in self.tree.children(table) {
            let Some(Element::Parameter(parameter)) = self.tree.element(*child) else {
                continue;
            };
            let Some(target_number) = parameter.addressing.number() else {
                continue;
            };
            if let Some(Value::Integer(source)) =
                parameter.contents.as_ref().and_then(|c| c.value.clone())
            {
                if source >= 0 {
                    map.insert(target_number, source as u32);
                }
            }
        }
        (!map.is_empty()).then_some(map)
    }
}

fn offline_marker(path: &EmberPath) -> EmberResult<Tree> {
    let mut tree = Tree::new();
    let root = tree.root();
    tree.insert(
        root,
        Element::Node(Node {
            addressing: Addressing::Path(path.clone()),
            contents: Some(NodeContents {
                is_online: Some(false),
                ..Default::default()
            }),
        }),
    )?;
    Ok(tree)
}

fn collect_requests(request: &Tree) -> Vec<Request> {
    let mut requests = Vec::new();
    collect_from(request, request.root(), EmberPath::root(), &mut requests);
    requests
}

fn collect_from(tree: &Tree, id: ElementId, base: EmberPath, out: &mut Vec<Request>) {
    for child in tree.children(id) {
        let Some(element) = tree.element(*child) else {
            continue;
        };
        let own_path = match element.addressing() {
            Some(Addressing::Path(path)) => path.clone(),
            Some(Addressing::Number(number)) => base.child(*number),
            None => base.clone(),
        };
        match element {
            // A command addresses the element it is nested under
            Element::Command(command) => out.push(Request {
                path: base.clone(),
                kind: RequestKind::Command(command.clone()),
            }),
            Element::Parameter(parameter) => {
                if let Some(contents) = &parameter.contents {
                    if contents.value.is_some() {
                        out.push(Request {
                            path: own_path.clone(),
                            kind: RequestKind::ValueWrite(contents.clone()),
                        });
                    }
                }
                collect_from(tree, *child, own_path, out);
            }
            Element::Matrix(matrix) => {
                if !matrix.connections().is_empty() {
                    out.push(Request {
                        path: own_path.clone(),
                        kind: RequestKind::Connections(
                            matrix.connections().values().cloned().collect(),
                        ),
                    });
                }
                collect_from(tree, *child, own_path, out);
            }
            _ => collect_from(tree, *child, own_path, out),
        }
    }
}

fn stream_elements(tree: &Tree) -> Vec<(EmberPath, i32)> {
    let mut found = Vec::new();
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        if let Some(Element::Parameter(parameter)) = tree.element(id) {
            if let Some(identifier) = parameter
                .contents
                .as_ref()
                .and_then(|c| c.stream_identifier)
            {
                found.push((tree.path_of(id), identifier));
            }
        }
        stack.extend(tree.children(id).iter().copied());
    }
    found
}
