//! Provider event loop: TCP events in, dispatcher envelopes out

use std::net::SocketAddr;

use emberplus_network::{Result, ServerEvent, TcpServer, TcpServerConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

/// An Ember+ provider bound to a TCP endpoint
pub struct EmberProvider {
    server: TcpServer,
    events: mpsc::Receiver<ServerEvent>,
    dispatcher: Dispatcher,
}

impl EmberProvider {
    pub async fn bind(config: &TcpServerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let (server, events) = TcpServer::bind(config).await?;
        info!(address = %server.local_addr(), "provider listening");
        Ok(Self {
            server,
            events,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Serve until the listener task goes away
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            match event {
                ServerEvent::Connected { client, peer_addr } => {
                    info!(%client, %peer_addr, "consumer connected");
                }
                ServerEvent::Frame { client, payload } => {
                    match self.dispatcher.handle_payload(client, &payload) {
                        Ok(replies) => {
                            for reply in replies {
                                if let Err(e) = self.server.send_to(reply.client, reply.payload).await {
                                    // Dead queue: drop the client's state now
                                    // rather than waiting for the disconnect
                                    warn!(client = %reply.client, error = %e, "send failed");
                                    self.dispatcher.remove_client(reply.client);
                                }
                            }
                        }
                        Err(e) => {
                            warn!(%client, error = %e, "request rejected");
                        }
                    }
                }
                ServerEvent::Disconnected { client } => {
                    info!(%client, "consumer disconnected");
                    self.dispatcher.remove_client(client);
                }
            }
        }
        Ok(())
    }
}
