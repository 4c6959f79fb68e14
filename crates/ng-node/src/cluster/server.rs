//! Backend side of cluster links
//!
//! Accepts links from gates and runs forwarded calls against the local
//! route table. Each gate session gets its own worker so calls from one
//! session are handled in order while different sessions run concurrently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ng_core::traits::Session;
use ng_core::types::NodeId;
use ng_core::RouteError;
use ng_protocol::{ClusterCodec, ClusterMessage, MessageKind, ProtocolError, RemoteFailure, SessionId};

use super::proxy::RemoteSession;
use crate::state::NodeState;

/// Channel capacity for messages written back to a gate
const LINK_CHANNEL_CAPACITY: usize = 1024;

/// Calls queued per session; further calls are refused with 429
const SESSION_QUEUE_CAPACITY: usize = 64;

/// Listener for gate links
pub struct ClusterServer {
    state: Arc<NodeState>,
    cancel: CancellationToken,
}

impl ClusterServer {
    /// Create a new cluster server
    pub fn new(state: Arc<NodeState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Accept gate links until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Cluster server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Cluster server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept link: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: tokio::net::TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New link from {}", peer_addr);

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            match serve_link(state, socket, cancel).await {
                Ok(()) => tracing::info!("Link from {} closed", peer_addr),
                Err(e) => tracing::warn!("Link from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}

/// A forwarded call waiting for its session worker
struct Call {
    kind: MessageKind,
    id: Option<u64>,
    route: String,
    body: Bytes,
}

struct Worker {
    proxy: Arc<RemoteSession>,
    queue: mpsc::Sender<Call>,
}

/// Serve one gate link until it closes or `cancel` fires
pub async fn serve_link<S>(
    state: Arc<NodeState>,
    stream: S,
    cancel: CancellationToken,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut frames) = Framed::new(stream, ClusterCodec::new()).split();

    let gate = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        first = frames.next() => match first {
            Some(Ok(ClusterMessage::Hello { node })) => NodeId::new(node),
            Some(Ok(_)) => return Err(ProtocolError::MalformedMessage("link must open with hello")),
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        },
    };

    sink.send(ClusterMessage::Hello {
        node: state.node_id.to_string(),
    })
    .await?;
    tracing::info!("Gate {} linked", gate);

    let (tx, mut rx) = mpsc::channel::<ClusterMessage>(LINK_CHANNEL_CAPACITY);
    let link_closed = cancel.child_token();

    let writer_closed = link_closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = writer_closed.cancelled() => break,
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else { break };
            if let Err(e) = sink.send(msg).await {
                tracing::warn!("Write to gate failed: {}", e);
                break;
            }
        }
        writer_closed.cancel();
    });

    let mut workers: HashMap<SessionId, Worker> = HashMap::new();

    let result = loop {
        let frame = tokio::select! {
            _ = link_closed.cancelled() => break Ok(()),
            frame = frames.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        };
        tracing::trace!("<- {} {}", gate, msg.name());

        match msg {
            ClusterMessage::Forward {
                gate: origin,
                session_id,
                kind,
                id,
                route,
                body,
            } => {
                if origin != gate.as_str() {
                    tracing::warn!("Gate {} relayed a call for {}", gate, origin);
                }

                let worker = workers.entry(session_id).or_insert_with(|| {
                    spawn_worker(Arc::clone(&state), session_id, gate.clone(), tx.clone())
                });
                let call = Call {
                    kind,
                    id,
                    route,
                    body,
                };
                // The reader is shared by every session on the link, so a
                // backed up session never gets to stall it.
                match worker.queue.try_send(call) {
                    Ok(()) => {}
                    Err(TrySendError::Full(call)) => {
                        tracing::warn!(
                            "{} on {} has {} calls queued, refusing {}",
                            session_id,
                            gate,
                            SESSION_QUEUE_CAPACITY,
                            call.route
                        );
                        if let (MessageKind::Request, Some(id)) = (call.kind, call.id) {
                            let err = RouteError::Overloaded(format!(
                                "{} calls already queued for {}",
                                SESSION_QUEUE_CAPACITY, session_id
                            ));
                            let reply = ClusterMessage::Reply {
                                session_id,
                                id,
                                outcome: Err(RemoteFailure::new(err.code(), err.detail())),
                            };
                            if tx.send(reply).await.is_err() {
                                break Ok(());
                            }
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!("Worker for {} already stopped", session_id);
                    }
                }
            }

            ClusterMessage::SessionClosed { session_id } => {
                if let Some(worker) = workers.remove(&session_id) {
                    tracing::debug!("{} on {} closed", session_id, gate);
                    worker.proxy.mark_closed();
                }
            }

            ClusterMessage::Hello { .. } => {
                tracing::debug!("Ignoring repeated hello from {}", gate);
            }

            other => {
                tracing::warn!("Unexpected {} message from {}", other.name(), gate);
            }
        }
    };

    for (_, worker) in workers.drain() {
        worker.proxy.mark_closed();
    }
    link_closed.cancel();
    let _ = writer.await;

    result
}

fn spawn_worker(
    state: Arc<NodeState>,
    session_id: SessionId,
    gate: NodeId,
    link: mpsc::Sender<ClusterMessage>,
) -> Worker {
    let proxy = Arc::new(RemoteSession::new(session_id, gate, link.clone()));
    let (queue, mut calls) = mpsc::channel::<Call>(SESSION_QUEUE_CAPACITY);

    let worker_proxy = Arc::clone(&proxy);
    tokio::spawn(async move {
        while let Some(call) = calls.recv().await {
            if worker_proxy.is_closed() {
                tracing::debug!("Dropping {} for closed {}", call.route, session_id);
                continue;
            }

            let caller: Arc<dyn Session> = Arc::clone(&worker_proxy) as Arc<dyn Session>;
            let result = state
                .router
                .invoke_local(caller, &call.route, call.body)
                .await;

            match (call.kind, call.id) {
                (MessageKind::Request, Some(id)) => {
                    let outcome = result.map_err(|e| RemoteFailure::new(e.code(), e.detail()));
                    let reply = ClusterMessage::Reply {
                        session_id,
                        id,
                        outcome,
                    };
                    if link.send(reply).await.is_err() {
                        break;
                    }
                }
                _ => {
                    if let Err(e) = result {
                        tracing::warn!("{} notify {} failed: {}", session_id, call.route, e);
                    }
                }
            }
        }
    });

    Worker { proxy, queue }
}
