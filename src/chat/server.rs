use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::message::{ChatMessage, Priority};
use crate::chat::priority::PrioritySender;
use crate::transport::{ReliableConnection, ReliableTransport};

/// The attached peers, by name, each behind its priority-scheduled sender.
struct Roster {
    peers: StdMutex<FxHashMap<String, Arc<PrioritySender>>>,
}

impl Roster {
    fn new() -> Roster {
        Roster {
            peers: StdMutex::new(FxHashMap::default()),
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .lock()
            .expect("roster poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Registers a peer, sends it the roster snapshot and announces the
    /// join to everyone else.
    fn attach(&self, name: &str, sink: Arc<PrioritySender>) {
        let (names, others) = {
            let mut peers = self.peers.lock().expect("roster poisoned");
            if peers.insert(name.to_string(), sink.clone()).is_some() {
                warn!("{} attached again, replacing the previous connection", name);
            }

            let mut names: Vec<String> = peers.keys().cloned().collect();
            names.sort();
            let others: Vec<Arc<PrioritySender>> = peers
                .iter()
                .filter(|(peer, _)| peer.as_str() != name)
                .map(|(_, s)| s.clone())
                .collect();
            (names, others)
        };

        sink.enqueue(ChatMessage::roster(names).encode(), Priority::System);

        let join = ChatMessage::system(format!("{} joined the chat", name)).encode();
        for other in others {
            other.enqueue(join.clone(), Priority::System);
        }
    }

    fn detach(&self, name: &str, announce: bool) {
        let removed = self
            .peers
            .lock()
            .expect("roster poisoned")
            .remove(name)
            .is_some();
        if removed && announce {
            self.broadcast_system(&format!("{} left the chat", name));
        }
    }

    /// Forwards a text or file message to its recipient unmodified, or
    /// reports back to the sender when the recipient is not attached.
    fn relay(&self, message: &ChatMessage, raw: &[u8]) {
        let Some(recipient) = message.recipient() else {
            debug!("ignoring message without a recipient");
            return;
        };

        let (target, back) = {
            let peers = self.peers.lock().expect("roster poisoned");
            let target = peers.get(recipient).cloned();
            let back = message.sender().and_then(|s| peers.get(s)).cloned();
            (target, back)
        };

        match target {
            Some(sink) => sink.enqueue(raw.to_vec(), message.priority()),
            None => {
                warn!("dropping message for {}: not connected", recipient);
                if let Some(back) = back {
                    back.enqueue(
                        ChatMessage::system(format!("{} is not connected", recipient)).encode(),
                        Priority::System,
                    );
                }
            }
        }
    }

    fn broadcast_system(&self, content: &str) {
        let encoded = ChatMessage::system(content).encode();
        let sinks: Vec<Arc<PrioritySender>> = self
            .peers
            .lock()
            .expect("roster poisoned")
            .values()
            .cloned()
            .collect();
        for sink in sinks {
            sink.enqueue(encoded.clone(), Priority::System);
        }
    }

    fn shutdown_all(&self) -> usize {
        let sinks: Vec<Arc<PrioritySender>> = self
            .peers
            .lock()
            .expect("roster poisoned")
            .values()
            .cloned()
            .collect();
        for sink in &sinks {
            sink.enqueue(ChatMessage::shutdown().encode(), Priority::System);
        }
        sinks.len()
    }
}

/// The chat server: accepts connections, learns peer names from their join
/// announcements, relays messages between peers and shuts down gracefully
/// on interrupt.
pub struct ChatServer {
    transport: Arc<ReliableTransport>,
    roster: Roster,
    readers: StdMutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl ChatServer {
    pub fn new(transport: Arc<ReliableTransport>) -> Arc<ChatServer> {
        Arc::new(ChatServer {
            transport,
            roster: Roster::new(),
            readers: StdMutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Accepts connections until shutdown, spawning one reader task per
    /// peer.
    pub async fn run(self: &Arc<ChatServer>) -> anyhow::Result<()> {
        loop {
            match self.transport.accept().await {
                Ok(connection) => {
                    info!("peer connected from {}", connection.remote_address());
                    let server = self.clone();
                    let reader = tokio::spawn(async move { server.handle_peer(connection).await });
                    self.readers.lock().expect("reader list poisoned").push(reader);
                }
                Err(e) => {
                    return if self.shutting_down.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(e)
                    };
                }
            }
        }
    }

    async fn handle_peer(&self, connection: Arc<ReliableConnection>) {
        let sink = PrioritySender::start(connection.clone());
        let mut peer_name: Option<String> = None;

        loop {
            match connection.receive().await {
                Ok(Some(bytes)) => self.on_message(&sink, &mut peer_name, &bytes),
                Ok(None) => break,
                Err(e) => {
                    warn!("connection to {} failed: {}", connection.remote_address(), e);
                    break;
                }
            }
        }

        if let Some(name) = peer_name {
            info!("{} detached", name);
            self.roster
                .detach(&name, !self.shutting_down.load(Ordering::SeqCst));
        }
        connection.close().await;
    }

    fn on_message(&self, sink: &Arc<PrioritySender>, peer_name: &mut Option<String>, bytes: &[u8]) {
        let message = match ChatMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                // malformed payloads do not tear down the connection
                warn!("dropping malformed application payload: {}", e);
                return;
            }
        };

        if let Some(name) = message.join_name() {
            info!("{} joined", name);
            *peer_name = Some(name.to_string());
            self.roster.attach(name, sink.clone());
            return;
        }

        match message {
            ChatMessage::Text { .. } | ChatMessage::File { .. } => {
                self.roster.relay(&message, bytes);
            }
            ChatMessage::System { ref content, .. } => {
                debug!("ignoring system message from a peer: {:?}", content);
            }
        }
    }

    /// Graceful shutdown: notifies every attached peer, then waits for each
    /// peer's FIN before shutting down the transport. In-flight sends are
    /// drained, not aborted.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let notified = self.roster.shutdown_all();
        info!("shutting down, waiting for {} peer(s) to close", notified);

        let readers: Vec<JoinHandle<()>> = self
            .readers
            .lock()
            .expect("reader list poisoned")
            .drain(..)
            .collect();
        for reader in readers {
            let _ = reader.await;
        }

        self.transport.shutdown().await;
        info!("server shut down");
    }
}
