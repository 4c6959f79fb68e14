//! Message dispatch
//!
//! Requests and notifies are resolved by service name against the route
//! table. Local handlers run on the session's own task so that messages
//! from one connection are handled in arrival order. Remote services are
//! forwarded over a cluster link; the forwarded request is parked in the
//! session's pending table and answered from a separate waiter task, so a
//! slow backend never stalls the connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use ng_core::traits::{Handler, Session};
use ng_core::types::{NodeId, Route};
use ng_core::{RouteError, SessionError};
use ng_protocol::{Message, MessageKind};

use super::error_body;
use super::table::{Binding, RouteTable};
use crate::cluster::{RemoteLink, RemotePool};
use crate::session::{ClientSession, PendingOutcome};

/// Resolves routes and delivers replies
pub struct Router {
    node_id: NodeId,
    table: Arc<RouteTable>,
    remotes: Arc<RemotePool>,
    forward_timeout: Duration,
}

impl Router {
    /// Create a router over `table`, forwarding through `remotes`
    pub fn new(
        node_id: NodeId,
        table: Arc<RouteTable>,
        remotes: Arc<RemotePool>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            table,
            remotes,
            forward_timeout,
        }
    }

    /// Route table
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Handle one message received from `session`.
    ///
    /// Routing failures are answered or logged here. The only error
    /// returned is a broken outbound stream, which ends the session.
    pub async fn dispatch(
        &self,
        session: &Arc<ClientSession>,
        message: Message,
    ) -> Result<(), SessionError> {
        match message.kind {
            MessageKind::Request | MessageKind::Notify => self.route(session, message).await,

            // The pending table holds this session's own forwarded requests,
            // which only the backend's Reply may complete. Nothing here sends
            // Requests to clients, so a client Response never matches.
            MessageKind::Response => {
                let Some(id) = message.id else {
                    tracing::warn!("{} sent a response without an id", session.id());
                    return Ok(());
                };
                tracing::warn!("{}: {}", session.id(), RouteError::UnmatchedResponse(id));
                Ok(())
            }

            MessageKind::Push => session.send_message(&message).await,
        }
    }

    /// Run a locally bound handler for a message arriving from another node
    pub async fn invoke_local(
        &self,
        session: Arc<dyn Session>,
        route: &str,
        body: Bytes,
    ) -> Result<Bytes, RouteError> {
        let route = Route::parse(route)?;

        match self.table.resolve(route.service) {
            Some(Binding::Local(handler)) => handler.call(session, route.method, body).await,
            Some(Binding::Remote(node)) => {
                tracing::warn!(
                    "{} is served by {}, refusing to forward it a second time",
                    route,
                    node
                );
                Err(RouteError::UnknownRoute(route.to_string()))
            }
            None => Err(RouteError::UnknownRoute(route.to_string())),
        }
    }

    async fn route(
        &self,
        session: &Arc<ClientSession>,
        message: Message,
    ) -> Result<(), SessionError> {
        let Message {
            kind,
            id,
            route,
            body,
        } = message;
        let route_str = route.unwrap_or_default();

        let route = match Route::parse(&route_str) {
            Ok(route) => route,
            Err(e) => return reply(session, kind, id, Err(e)).await,
        };

        let outcome = match self.table.resolve(route.service) {
            Some(Binding::Local(handler)) => {
                call_local(handler, session, route.method, body).await
            }
            Some(Binding::Remote(node)) => {
                return self.forward(session, node, kind, id, &route_str, body).await;
            }
            None => Err(RouteError::UnknownRoute(route_str.clone())),
        };

        reply(session, kind, id, outcome).await
    }

    async fn forward(
        &self,
        session: &Arc<ClientSession>,
        node: NodeId,
        kind: MessageKind,
        id: Option<u64>,
        route: &str,
        body: Bytes,
    ) -> Result<(), SessionError> {
        let Some(link) = self.remotes.get(&node) else {
            let err = RouteError::ForwardingFailed(format!("node {} is not connected", node));
            return reply(session, kind, id, Err(err)).await;
        };

        let sid = session.id();

        let Some(id) = id.filter(|_| kind == MessageKind::Request) else {
            // Notify: nothing to wait for
            match link
                .forward(&self.node_id, sid, kind, None, route, body)
                .await
            {
                Ok(()) => session.note_remote(&node),
                Err(e) => tracing::warn!("{} notify {} dropped: {}", sid, route, e),
            }
            return Ok(());
        };

        let rx = match session.pending().register(id) {
            Ok(rx) => rx,
            Err(e) => return reply(session, kind, Some(id), Err(e)).await,
        };

        link.track(sid, id);
        if let Err(e) = link
            .forward(&self.node_id, sid, kind, Some(id), route, body)
            .await
        {
            link.untrack(sid, id);
            session.pending().cancel(id);
            return reply(session, kind, Some(id), Err(e)).await;
        }
        session.note_remote(&node);

        tracing::debug!("{} request {} ({}) forwarded to {}", sid, id, route, node);
        tokio::spawn(await_forwarded(
            Arc::clone(session),
            link,
            id,
            rx,
            self.forward_timeout,
        ));
        Ok(())
    }
}

async fn call_local(
    handler: Arc<dyn Handler>,
    session: &Arc<ClientSession>,
    method: &str,
    body: Bytes,
) -> Result<Bytes, RouteError> {
    let caller: Arc<dyn Session> = Arc::clone(session) as Arc<dyn Session>;
    handler.call(caller, method, body).await
}

/// Wait for a forwarded request's outcome and relay it to the client
async fn await_forwarded(
    session: Arc<ClientSession>,
    link: Arc<RemoteLink>,
    id: u64,
    mut rx: oneshot::Receiver<PendingOutcome>,
    timeout: Duration,
) {
    let outcome = match tokio::time::timeout(timeout, &mut rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(RouteError::SessionClosed),
        Err(_) => {
            session.pending().cancel(id);
            // The reply may have landed between the deadline and the cancel
            rx.try_recv().unwrap_or_else(|_| {
                Err(RouteError::ForwardingFailed(format!(
                    "no reply from {} within {:?}",
                    link.node(),
                    timeout
                )))
            })
        }
    };
    link.untrack(session.id(), id);

    if matches!(outcome, Err(RouteError::SessionClosed)) && session.is_closed() {
        tracing::debug!("{} closed before request {} completed", session.id(), id);
        return;
    }

    if let Err(e) = reply(&session, MessageKind::Request, Some(id), outcome).await {
        tracing::debug!("Could not relay reply {} to {}: {}", id, session.id(), e);
    }
}

/// Send the outcome of a Request back to the client; log Notify failures
async fn reply(
    session: &ClientSession,
    kind: MessageKind,
    id: Option<u64>,
    outcome: Result<Bytes, RouteError>,
) -> Result<(), SessionError> {
    match (kind, id) {
        (MessageKind::Request, Some(id)) => {
            let body = match outcome {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("{} request {} failed: {}", session.id(), id, e);
                    error_body(&e)
                }
            };
            session.send_message(&Message::response(id, body)).await
        }
        _ => {
            if let Err(e) = outcome {
                tracing::warn!("{} notify failed: {}", session.id(), e);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ng_protocol::{Packet, PacketType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Upper {
        async fn call(
            &self,
            _session: Arc<dyn Session>,
            method: &str,
            body: Bytes,
        ) -> Result<Bytes, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                "Upper" => Ok(Bytes::from(
                    String::from_utf8_lossy(&body).to_uppercase(),
                )),
                other => Err(RouteError::UnknownRoute(format!("Text.{}", other))),
            }
        }
    }

    fn setup() -> (Router, Arc<Upper>, Arc<ClientSession>, mpsc::Receiver<Packet>) {
        let table = Arc::new(RouteTable::new());
        let handler = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        table.bind_local("Text", Arc::clone(&handler) as Arc<dyn Handler>);

        let router = Router::new(
            NodeId::new("gate-1"),
            table,
            Arc::new(RemotePool::new()),
            Duration::from_secs(1),
        );

        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(ClientSession::new(ng_protocol::SessionId::new(1), tx, 8));
        (router, handler, session, rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<Packet>) -> Message {
        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.kind, PacketType::Data);
        Message::decode(&packet.body).unwrap()
    }

    fn error_code(message: &Message) -> u64 {
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        body["code"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_local_request_gets_response() {
        let (router, _, session, mut rx) = setup();

        router
            .dispatch(&session, Message::request(3, "Text.Upper", "abc"))
            .await
            .unwrap();

        let response = next_message(&mut rx).await;
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.id, Some(3));
        assert_eq!(response.body.as_ref(), b"ABC");
    }

    #[tokio::test]
    async fn test_notify_produces_no_reply() {
        let (router, handler, session, mut rx) = setup();

        router
            .dispatch(&session, Message::notify("Text.Upper", "abc"))
            .await
            .unwrap();
        router
            .dispatch(&session, Message::notify("Nope.Upper", "abc"))
            .await
            .unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_and_unroutable_requests_get_error_responses() {
        let (router, _, session, mut rx) = setup();

        router
            .dispatch(&session, Message::request(1, "Unknown.Method", ""))
            .await
            .unwrap();
        let response = next_message(&mut rx).await;
        assert_eq!(response.id, Some(1));
        assert_eq!(error_code(&response), 404);

        router
            .dispatch(&session, Message::request(2, "", ""))
            .await
            .unwrap();
        let response = next_message(&mut rx).await;
        assert_eq!(response.id, Some(2));
        assert_eq!(error_code(&response), 400);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let (router, _, session, mut rx) = setup();

        router
            .dispatch(&session, Message::request(4, "Text.Lower", "abc"))
            .await
            .unwrap();

        let response = next_message(&mut rx).await;
        assert_eq!(response.id, Some(4));
        assert_eq!(error_code(&response), 404);
    }

    #[tokio::test]
    async fn test_remote_without_link_fails_forwarding() {
        let (router, _, session, mut rx) = setup();
        router.table().bind_remote("Room", NodeId::new("game-9"));

        router
            .dispatch(&session, Message::request(5, "Room.Join", "{}"))
            .await
            .unwrap();

        let response = next_message(&mut rx).await;
        assert_eq!(response.id, Some(5));
        assert_eq!(error_code(&response), 502);
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_push_is_written_through() {
        let (router, _, session, mut rx) = setup();

        router
            .dispatch(&session, Message::push("Room.OnChat", "hi"))
            .await
            .unwrap();

        let push = next_message(&mut rx).await;
        assert_eq!(push.kind, MessageKind::Push);
        assert_eq!(push.route.as_deref(), Some("Room.OnChat"));
    }

    #[tokio::test]
    async fn test_client_response_cannot_answer_forwarded_request() {
        let (router, _, session, mut rx) = setup();
        let mut waiter = session.pending().register(11).unwrap();

        router
            .dispatch(&session, Message::response(11, "forged"))
            .await
            .unwrap();

        assert!(session.pending().contains(11));
        assert!(matches!(
            waiter.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert!(rx.try_recv().is_err());

        session.pending().complete(11, Ok(Bytes::from_static(b"real"))).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().as_ref(), b"real");
    }

    #[tokio::test]
    async fn test_invoke_local_refuses_remote_bindings() {
        let (router, _, session, _rx) = setup();
        router.table().bind_remote("Room", NodeId::new("game-2"));

        let caller: Arc<dyn Session> = session;
        let ok = router
            .invoke_local(Arc::clone(&caller), "Text.Upper", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(ok.as_ref(), b"X");

        let err = router
            .invoke_local(caller, "Room.Join", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::UnknownRoute(_)));
    }
}
