//! Connected clients, rooms and event dispatch.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::protocol::{parse_client_event, ClientEvent, ServerEvent};
use crate::observability::metrics;

/// What the socket writer task should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send a serialized [`ServerEvent`] as a text frame.
    Text(String),
    /// Send a Close frame and stop writing.
    Close,
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<Outbound>,
    rooms: HashSet<String>,
}

/// Realtime gateway shared by every socket task.
pub struct ChatGateway {
    clients: DashMap<Uuid, ClientHandle>,
    rooms: DashMap<String, HashSet<Uuid>>,
    closing: AtomicBool,
    departed: Notify,
}

impl Default for ChatGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatGateway {
    /// Create a gateway with no clients or rooms.
    pub fn new() -> Self {
        tracing::info!("WebSocket gateway initialized");
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            closing: AtomicBool::new(false),
            departed: Notify::new(),
        }
    }

    /// Admit a new client. Returns `None` once the gateway is closing.
    pub fn register(&self) -> Option<(Uuid, mpsc::UnboundedReceiver<Outbound>)> {
        if self.is_closing() {
            return None;
        }
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.insert(
            id,
            ClientHandle {
                sender,
                rooms: HashSet::new(),
            },
        );
        // A shutdown sweep that started before the insert may have missed us.
        if self.is_closing() {
            self.clients.remove(&id);
            self.departed.notify_waiters();
            return None;
        }
        metrics::set_websocket_connections(self.clients.len());
        tracing::info!(client_id = %id, "Client connected");
        Some((id, receiver))
    }

    /// Forget a client and leave all its rooms.
    pub fn unregister(&self, id: Uuid) {
        let Some((_, handle)) = self.clients.remove(&id) else {
            return;
        };
        for room in handle.rooms {
            self.remove_member(&room, id);
            self.broadcast_to_room(&room, "user-left-room", json!({ "room": room, "clientId": id }));
        }
        metrics::set_websocket_connections(self.clients.len());
        tracing::info!(client_id = %id, "Client disconnected");
        self.departed.notify_waiters();
    }

    /// Number of registered clients.
    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// True once `graceful_shutdown` has started.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Members of `room`, in no particular order.
    pub fn room_members(&self, room: &str) -> Vec<Uuid> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Dispatch one text frame received from `id`.
    pub fn handle_text(&self, id: Uuid, text: &str) {
        match parse_client_event(text) {
            Ok(event) => self.handle_event(id, event),
            Err(e) => {
                tracing::debug!(client_id = %id, error = %e, "Unrecognized client frame");
                self.send_event(id, &ServerEvent::error("Unrecognized event"));
            }
        }
    }

    fn handle_event(&self, id: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(req) => {
                if req.room.is_empty() {
                    self.send_event(id, &ServerEvent::error("Room name is required"));
                    return;
                }
                self.join(id, &req.room);
                tracing::info!(client_id = %id, room = %req.room, "Client joined room");
                self.broadcast_to_room(&req.room, "user-joined-room", json!({ "room": req.room, "clientId": id }));
                self.send_to_client(
                    id,
                    "joined-room",
                    json!({ "room": req.room, "message": format!("Joined room: {}", req.room) }),
                );
            }
            ClientEvent::LeaveRoom(req) => {
                if req.room.is_empty() {
                    self.send_event(id, &ServerEvent::error("Room name is required"));
                    return;
                }
                self.leave(id, &req.room);
                tracing::info!(client_id = %id, room = %req.room, "Client left room");
                self.broadcast_to_room(&req.room, "user-left-room", json!({ "room": req.room, "clientId": id }));
                self.send_to_client(
                    id,
                    "left-room",
                    json!({ "room": req.room, "message": format!("Left room: {}", req.room) }),
                );
            }
            ClientEvent::SendMessage(req) => {
                if req.message.is_empty() {
                    self.send_event(id, &ServerEvent::error("Message is required"));
                    return;
                }
                let mut payload = json!({
                    "clientId": id,
                    "message": req.message,
                    "timestamp": Utc::now().to_rfc3339(),
                });
                match req.room {
                    Some(room) if !room.is_empty() => {
                        payload["room"] = Value::String(room.clone());
                        self.broadcast_to_room(&room, "message", payload);
                        tracing::debug!(client_id = %id, room = %room, "Message sent to room");
                    }
                    _ => {
                        self.broadcast("message", payload);
                        tracing::debug!(client_id = %id, "Broadcast message");
                    }
                }
                self.send_to_client(id, "message-sent", json!({ "message": "Message sent successfully" }));
            }
            ClientEvent::Typing(req) => {
                let mut payload = json!({ "clientId": id, "isTyping": req.is_typing });
                let targets: Vec<Uuid> = match &req.room {
                    Some(room) if !room.is_empty() => {
                        payload["room"] = Value::String(room.clone());
                        self.room_members(room)
                    }
                    _ => self.clients.iter().map(|c| *c.key()).collect(),
                };
                let text = ServerEvent::new("user-typing", payload).to_text();
                for target in targets.into_iter().filter(|t| *t != id) {
                    self.push(target, Outbound::Text(text.clone()));
                }
            }
        }
    }

    fn join(&self, id: Uuid, room: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.rooms.insert(room.to_string());
        } else {
            return;
        }
        self.rooms.entry(room.to_string()).or_default().insert(id);
    }

    fn leave(&self, id: Uuid, room: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.rooms.remove(room);
        }
        self.remove_member(room, id);
    }

    fn remove_member(&self, room: &str, id: Uuid) {
        self.rooms.remove_if_mut(room, |_, members| {
            members.remove(&id);
            members.is_empty()
        });
    }

    fn push(&self, id: Uuid, frame: Outbound) -> bool {
        match self.clients.get(&id) {
            Some(client) => client.sender.send(frame).is_ok(),
            None => false,
        }
    }

    fn send_event(&self, id: Uuid, event: &ServerEvent) -> bool {
        self.push(id, Outbound::Text(event.to_text()))
    }

    /// Send an event to every member of `room`.
    pub fn broadcast_to_room(&self, room: &str, event: &str, data: Value) {
        let text = ServerEvent::new(event, data).to_text();
        for member in self.room_members(room) {
            self.push(member, Outbound::Text(text.clone()));
        }
    }

    /// Send an event to every connected client.
    pub fn broadcast(&self, event: &str, data: Value) {
        let text = ServerEvent::new(event, data).to_text();
        for client in self.clients.iter() {
            let _ = client.sender.send(Outbound::Text(text.clone()));
        }
    }

    /// Send an event to one client. Returns false if it is not connected.
    pub fn send_to_client(&self, id: Uuid, event: &str, data: Value) -> bool {
        self.send_event(id, &ServerEvent::new(event, data))
    }

    /// Stop admitting clients, tell every client the server is going away,
    /// close their sockets and wait up to `timeout` for them to disconnect.
    pub async fn graceful_shutdown(&self, timeout: Duration) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let connected = self.connected_count();
        tracing::info!(clients = connected, timeout_ms = timeout.as_millis() as u64, "Closing WebSocket connections");

        let notice = ServerEvent::new(
            "server-shutdown",
            json!({ "message": "Server is shutting down", "timestamp": Utc::now().to_rfc3339() }),
        )
        .to_text();
        for client in self.clients.iter() {
            let _ = client.sender.send(Outbound::Text(notice.clone()));
            let _ = client.sender.send(Outbound::Close);
        }

        let drained = tokio::time::timeout(timeout, async {
            loop {
                let departed = self.departed.notified();
                tokio::pin!(departed);
                departed.as_mut().enable();
                if self.clients.is_empty() {
                    break;
                }
                departed.await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("WebSocket connections closed"),
            Err(_) => {
                let remaining = self.connected_count();
                tracing::warn!(remaining, "WebSocket clients did not disconnect in time, dropping them");
                let ids: Vec<Uuid> = self.clients.iter().map(|c| *c.key()).collect();
                for id in ids {
                    self.unregister(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> ServerEvent {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Close => panic!("expected a text frame, got close"),
        }
    }

    fn join(gateway: &ChatGateway, id: Uuid, room: &str) {
        gateway.handle_text(id, &format!(r#"{{"event":"join-room","data":{{"room":"{room}"}}}}"#));
    }

    #[test]
    fn test_join_room_notifies_members() {
        let gateway = ChatGateway::new();
        let (alice, mut alice_rx) = gateway.register().unwrap();
        let (bob, mut bob_rx) = gateway.register().unwrap();

        join(&gateway, alice, "general");
        assert_eq!(next_event(&mut alice_rx).event, "user-joined-room");
        assert_eq!(next_event(&mut alice_rx).event, "joined-room");

        join(&gateway, bob, "general");
        let seen_by_alice = next_event(&mut alice_rx);
        assert_eq!(seen_by_alice.event, "user-joined-room");
        assert_eq!(seen_by_alice.data["clientId"], bob.to_string());
        assert_eq!(next_event(&mut bob_rx).event, "user-joined-room");
        assert_eq!(next_event(&mut bob_rx).event, "joined-room");

        assert_eq!(gateway.room_members("general").len(), 2);
    }

    #[test]
    fn test_missing_room_and_message_are_errors() {
        let gateway = ChatGateway::new();
        let (id, mut rx) = gateway.register().unwrap();

        gateway.handle_text(id, r#"{"event":"join-room","data":{}}"#);
        let err = next_event(&mut rx);
        assert_eq!(err.event, "error");
        assert_eq!(err.data["message"], "Room name is required");

        gateway.handle_text(id, r#"{"event":"send-message","data":{"room":"general"}}"#);
        assert_eq!(next_event(&mut rx).data["message"], "Message is required");

        gateway.handle_text(id, "garbage");
        assert_eq!(next_event(&mut rx).event, "error");
    }

    #[test]
    fn test_room_message_reaches_only_members() {
        let gateway = ChatGateway::new();
        let (alice, mut alice_rx) = gateway.register().unwrap();
        let (_bob, mut bob_rx) = gateway.register().unwrap();
        join(&gateway, alice, "general");
        while alice_rx.try_recv().is_ok() {}

        gateway.handle_text(alice, r#"{"event":"send-message","data":{"room":"general","message":"hi"}}"#);
        let msg = next_event(&mut alice_rx);
        assert_eq!(msg.event, "message");
        assert_eq!(msg.data["room"], "general");
        assert_eq!(next_event(&mut alice_rx).event, "message-sent");
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_typing_excludes_sender() {
        let gateway = ChatGateway::new();
        let (alice, mut alice_rx) = gateway.register().unwrap();
        let (_bob, mut bob_rx) = gateway.register().unwrap();

        gateway.handle_text(alice, r#"{"event":"typing","data":{"isTyping":true}}"#);
        assert!(alice_rx.try_recv().is_err());
        let typing = next_event(&mut bob_rx);
        assert_eq!(typing.event, "user-typing");
        assert_eq!(typing.data["isTyping"], true);
    }

    #[test]
    fn test_unregister_leaves_rooms() {
        let gateway = ChatGateway::new();
        let (alice, _alice_rx) = gateway.register().unwrap();
        let (bob, mut bob_rx) = gateway.register().unwrap();
        join(&gateway, alice, "general");
        join(&gateway, bob, "general");
        while bob_rx.try_recv().is_ok() {}

        gateway.unregister(alice);
        assert_eq!(gateway.connected_count(), 1);
        assert_eq!(next_event(&mut bob_rx).event, "user-left-room");

        gateway.unregister(bob);
        assert_eq!(gateway.room_count(), 0);
        assert!(!gateway.send_to_client(bob, "message", json!({})));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_notifies_then_closes() {
        let gateway = Arc::new(ChatGateway::new());
        let (id, mut rx) = gateway.register().unwrap();

        // Stand-in for a socket task: read until Close, then disconnect.
        let client = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let mut frames = Vec::new();
                while let Some(frame) = rx.recv().await {
                    let done = frame == Outbound::Close;
                    frames.push(frame);
                    if done {
                        break;
                    }
                }
                gateway.unregister(id);
                frames
            })
        };

        gateway.graceful_shutdown(Duration::from_secs(5)).await;
        let frames = client.await.unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Outbound::Text(t) if t.contains("server-shutdown")));
        assert_eq!(frames[1], Outbound::Close);

        assert_eq!(gateway.connected_count(), 0);
        assert!(gateway.is_closing());
        assert!(gateway.register().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_gives_up_after_timeout() {
        let gateway = ChatGateway::new();
        let (_id, _rx) = gateway.register().unwrap();

        let started = tokio::time::Instant::now();
        gateway.graceful_shutdown(Duration::from_millis(200)).await;
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(gateway.connected_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registrations_racing_shutdown_are_all_closed() {
        let gateway = Arc::new(ChatGateway::new());

        // Each task keeps connecting until the gateway refuses. Every admitted
        // client disconnects once it sees Close.
        let connectors: Vec<_> = (0..4)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    let mut admitted = 0usize;
                    while let Some((id, mut rx)) = gateway.register() {
                        admitted += 1;
                        let gateway = gateway.clone();
                        tokio::spawn(async move {
                            while let Some(frame) = rx.recv().await {
                                if frame == Outbound::Close {
                                    break;
                                }
                            }
                            gateway.unregister(id);
                        });
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    admitted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = std::time::Instant::now();
        gateway.graceful_shutdown(Duration::from_secs(10)).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        for connector in connectors {
            connector.await.unwrap();
        }
        assert_eq!(gateway.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_without_clients_is_immediate() {
        let gateway = ChatGateway::new();
        tokio::time::timeout(Duration::from_millis(50), gateway.graceful_shutdown(Duration::from_secs(5)))
            .await
            .unwrap();
    }
}
