//! Background connection worker
//!
//! Owns the socket, the cached tree and the request queue. One request is
//! in flight at a time; responses are matched by convergence scope or
//! invocation id, and everything else is surfaced as an unsolicited update.
//! A timed-out request fails with a timeout and the queue advances; a late
//! answer is then treated like any other unsolicited fragment.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use emberplus_codec::{decode_root, DecodedRoot, StreamEntry};
use emberplus_network::{EmberConnection, EmberTransport};
use emberplus_types::{Element, EmberError, EmberPath, InvocationResult, Tree};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::convergence::{fragment_paths, Scope};
use crate::error::{ConsumerError, ConsumerResult};

/// How a pending request is resolved
pub(crate) enum Waiter {
    /// Resolved by a fragment converging on the scope; answered with a
    /// snapshot of the cache after the merge
    Converge {
        scope: Scope,
        reply: oneshot::Sender<ConsumerResult<Tree>>,
    },
    /// Resolved by an InvocationResult carrying the matching id
    Invocation {
        id: i64,
        reply: oneshot::Sender<ConsumerResult<InvocationResult>>,
    },
    /// Fire-and-forget; done once the payload is written
    None,
}

pub(crate) enum WorkerCommand {
    Request { payload: Vec<u8>, waiter: Waiter },
    Snapshot { reply: oneshot::Sender<Tree> },
}

/// Update pushed by the provider outside any request/response exchange
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// Provider-initiated tree change; paths of the touched elements
    Update { paths: Vec<EmberPath> },
    /// Batch of stream values
    Stream(Vec<StreamEntry>),
}

struct Active {
    waiter: Waiter,
    deadline: Instant,
}

pub(crate) struct Worker {
    connection: EmberConnection,
    inbound: mpsc::Receiver<Bytes>,
    commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<ConsumerEvent>,
    tree: Tree,
    queue: VecDeque<(Vec<u8>, Waiter)>,
    active: Option<Active>,
    timeout: Duration,
}

impl Worker {
    pub(crate) fn new(
        connection: EmberConnection,
        inbound: mpsc::Receiver<Bytes>,
        commands: mpsc::Receiver<WorkerCommand>,
        events: mpsc::Sender<ConsumerEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            connection,
            inbound,
            commands,
            events,
            tree: Tree::new(),
            queue: VecDeque::new(),
            active: None,
            timeout,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let deadline = self.active.as_ref().map(|a| a.deadline);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Request { payload, waiter }) => {
                        self.queue.push_back((payload, waiter));
                        self.pump().await;
                    }
                    Some(WorkerCommand::Snapshot { reply }) => {
                        let _ = reply.send(self.tree.clone());
                    }
                    None => break,
                },
                payload = self.inbound.recv() => match payload {
                    Some(payload) => self.on_payload(&payload).await,
                    None => {
                        debug!("provider connection closed");
                        self.fail_all();
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout().await;
                }
            }
        }
    }

    /// Send queued requests until one is waiting for an answer
    async fn pump(&mut self) {
        while self.active.is_none() {
            let Some((payload, waiter)) = self.queue.pop_front() else {
                return;
            };
            if let Err(e) = self.connection.send(payload).await {
                warn!(error = %e, "request send failed");
                fail(waiter, ConsumerError::Transport(e));
                continue;
            }
            match waiter {
                Waiter::None => {}
                waiter => {
                    self.active = Some(Active {
                        waiter,
                        deadline: Instant::now() + self.timeout,
                    });
                }
            }
        }
    }

    async fn on_payload(&mut self, payload: &[u8]) {
        let decoded = match decode_root(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "discarding undecodable payload");
                return;
            }
        };
        match decoded {
            DecodedRoot::Elements(fragment) => self.on_fragment(fragment).await,
            DecodedRoot::InvocationResult(result) => self.on_invocation_result(result).await,
            DecodedRoot::Streams(entries) => {
                self.apply_stream_entries(&entries);
                let _ = self.events.try_send(ConsumerEvent::Stream(entries));
            }
        }
    }

    async fn on_fragment(&mut self, fragment: Tree) {
        let paths = fragment_paths(&fragment);
        if let Err(e) = self.tree.merge_fragment(&fragment) {
            warn!(error = %e, "fragment merge failed");
            return;
        }
        let converged = match &self.active {
            Some(Active {
                waiter: Waiter::Converge { scope, .. },
                ..
            }) => scope.converged(&fragment),
            _ => false,
        };
        if converged {
            if let Some(Active {
                waiter: Waiter::Converge { reply, .. },
                ..
            }) = self.active.take()
            {
                let _ = reply.send(Ok(self.tree.clone()));
            }
            self.pump().await;
        } else {
            let _ = self.events.try_send(ConsumerEvent::Update { paths });
        }
    }

    async fn on_invocation_result(&mut self, result: InvocationResult) {
        let matched = matches!(
            &self.active,
            Some(Active {
                waiter: Waiter::Invocation { id, .. },
                ..
            }) if *id == result.invocation_id
        );
        if matched {
            if let Some(Active {
                waiter: Waiter::Invocation { reply, .. },
                ..
            }) = self.active.take()
            {
                let _ = reply.send(Ok(result));
            }
            self.pump().await;
        } else {
            warn!(id = result.invocation_id, "unmatched invocation result");
        }
    }

    async fn on_timeout(&mut self) {
        if let Some(active) = self.active.take() {
            let timeout_ms = self.timeout.as_millis() as u64;
            warn!(timeout_ms, "request timed out");
            fail(active.waiter, EmberError::Timeout { timeout_ms }.into());
        }
        self.pump().await;
    }

    fn fail_all(&mut self) {
        if let Some(active) = self.active.take() {
            fail(active.waiter, ConsumerError::WorkerGone);
        }
        while let Some((_, waiter)) = self.queue.pop_front() {
            fail(waiter, ConsumerError::WorkerGone);
        }
    }

    /// Fold stream values back into the cached parameters they belong to
    fn apply_stream_entries(&mut self, entries: &[StreamEntry]) {
        let mut stack = vec![self.tree.root()];
        let mut touched = Vec::new();
        while let Some(id) = stack.pop() {
            if let Some(Element::Parameter(parameter)) = self.tree.element(id) {
                if let Some(identifier) = parameter
                    .contents
                    .as_ref()
                    .and_then(|c| c.stream_identifier)
                {
                    if let Some(entry) = entries.iter().find(|e| e.identifier == identifier) {
                        touched.push((id, entry.value.clone()));
                    }
                }
            }
            stack.extend(self.tree.children(id).iter().copied());
        }
        for (id, value) in touched {
            if let Some(Element::Parameter(parameter)) = self.tree.element_mut(id) {
                if let Some(contents) = parameter.contents.as_mut() {
                    contents.value = Some(value);
                }
            }
        }
    }
}

fn fail(waiter: Waiter, error: ConsumerError) {
    match waiter {
        Waiter::Converge { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        Waiter::Invocation { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        Waiter::None => {}
    }
}
