use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::addr::VirtualAddress;
use crate::chat::message::ChatMessage;
use crate::chat::priority::PrioritySender;
use crate::chat::ui::{select_ui, spawn_stdin_reader, ChatUi, ConnectionStatus, UiAction};
use crate::chat::CHAT_PORT;
use crate::config::{NoiseConfig, StackConfig};
use crate::topology::Topology;
use crate::transport::{host_transport, ReliableConnection, ReliableTransport};

enum Inbound {
    Message(Vec<u8>),
    Eof,
    Failed(anyhow::Error),
}

/// Entry point shared by the client binaries: wires the UI, the stdin
/// reader and the interrupt handler around [`run_client`] against the
/// standard topology.
pub async fn client_main(name: &str, force_gui: bool) -> anyhow::Result<()> {
    let topology = Topology::standard();
    let config = Arc::new(StackConfig::from_env());
    let noise = NoiseConfig::from_env();
    let ui = select_ui(force_gui);

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let stdin_reader = spawn_stdin_reader(actions_tx.clone());

    let client = run_client(name, "Server", topology, config, noise, ui, actions_rx);
    tokio::pin!(client);

    let result = select! {
        result = &mut client => result,
        _ = tokio::signal::ctrl_c() => {
            info!("{}: interrupted, closing the connection", name);
            let _ = actions_tx.send(UiAction::Quit);
            client.await
        }
    };

    stdin_reader.abort();
    result
}

/// Runs one chat client until the user quits, the server shuts down, or the
/// transport fails.
///
/// The UI is expected to be up already; user actions arriving while the
/// connection is still being established are buffered in the action channel
/// and drained once the join announcement has been acknowledged.
pub async fn run_client(
    name: &str,
    server_node: &str,
    topology: Arc<Topology>,
    config: Arc<StackConfig>,
    noise: NoiseConfig,
    ui: Arc<dyn ChatUi>,
    actions: mpsc::UnboundedReceiver<UiAction>,
) -> anyhow::Result<()> {
    ui.set_status(ConnectionStatus::Connecting);

    let transport = host_transport(name, topology.clone(), config, noise).await?;
    let server = topology
        .node(server_node)
        .ok_or_else(|| anyhow::anyhow!("unknown server node {:?}", server_node))?;
    let server_va = VirtualAddress::new(server.vip.clone(), CHAT_PORT);

    let result = client_loop(name, server_va, &transport, ui, actions).await;
    transport.shutdown().await;
    result
}

async fn client_loop(
    name: &str,
    server_va: VirtualAddress,
    transport: &Arc<ReliableTransport>,
    ui: Arc<dyn ChatUi>,
    mut actions: mpsc::UnboundedReceiver<UiAction>,
) -> anyhow::Result<()> {
    let connection = transport.connect(server_va);

    // the first acknowledged send doubles as the connectivity signal
    connection
        .send(&ChatMessage::join_announcement(name).encode())
        .await?;
    ui.set_status(ConnectionStatus::Connected);
    info!("{}: connected to {}", name, connection.remote_address());

    let sender = PrioritySender::start(connection.clone());
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(reader_loop(connection.clone(), inbound_tx));

    let result = loop {
        select! {
            action = actions.recv() => match action {
                None | Some(UiAction::Quit) => {
                    info!("{}: quitting", name);
                    connection.close().await;
                    ui.set_status(ConnectionStatus::Disconnected);
                    break Ok(());
                }
                Some(UiAction::SendText { recipient, content }) => {
                    let message = ChatMessage::text(name, &recipient, &content);
                    sender.enqueue(message.encode(), message.priority());
                }
                Some(UiAction::SendFile { recipient, path }) => {
                    send_file(name, &recipient, &path, &sender, &ui).await;
                }
            },
            inbound = inbound_rx.recv() => match inbound {
                None | Some(Inbound::Eof) => {
                    ui.deliver(&ChatMessage::system("server closed the connection"));
                    ui.set_status(ConnectionStatus::Disconnected);
                    break Ok(());
                }
                Some(Inbound::Failed(e)) => {
                    ui.set_status(ConnectionStatus::Disconnected);
                    break Err(e);
                }
                Some(Inbound::Message(bytes)) => {
                    if on_inbound(name, &bytes, &connection, &ui).await {
                        break Ok(());
                    }
                }
            },
        }
    };

    reader.abort();
    result
}

async fn reader_loop(connection: Arc<ReliableConnection>, tx: mpsc::UnboundedSender<Inbound>) {
    loop {
        match connection.receive().await {
            Ok(Some(bytes)) => {
                if tx.send(Inbound::Message(bytes)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.send(Inbound::Eof);
                return;
            }
            Err(e) => {
                let _ = tx.send(Inbound::Failed(e));
                return;
            }
        }
    }
}

/// Handles one decoded inbound message. Returns true when the client should
/// terminate.
async fn on_inbound(
    name: &str,
    bytes: &[u8],
    connection: &Arc<ReliableConnection>,
    ui: &Arc<dyn ChatUi>,
) -> bool {
    let message = match ChatMessage::decode(bytes) {
        Ok(message) => message,
        Err(e) => {
            // malformed payloads do not tear down the connection
            warn!("{}: dropping malformed message: {}", name, e);
            return false;
        }
    };

    if message.is_shutdown() {
        info!("{}: server is shutting down", name);
        ui.deliver(&message);
        // close our side; the server drains and waits for this FIN
        connection.close().await;
        ui.set_status(ConnectionStatus::Disconnected);
        return true;
    }

    match &message {
        ChatMessage::System { roster: Some(names), .. } => {
            ui.set_roster(names);
        }
        ChatMessage::File { name: file_name, .. } => {
            ui.deliver(&message);
            match message.file_bytes() {
                Ok(bytes) => {
                    match save_received_file(Path::new("downloads"), name, file_name, &bytes).await
                    {
                        Ok(path) => ui.deliver(&ChatMessage::system(format!(
                            "saved {} to {}",
                            file_name,
                            path.display()
                        ))),
                        Err(e) => ui.deliver(&ChatMessage::system(format!(
                            "could not save {}: {}",
                            file_name, e
                        ))),
                    }
                }
                Err(e) => warn!("{}: dropping file with undecodable data: {}", name, e),
            }
        }
        _ => ui.deliver(&message),
    }
    false
}

async fn send_file(
    name: &str,
    recipient: &str,
    path: &Path,
    sender: &Arc<PrioritySender>,
    ui: &Arc<dyn ChatUi>,
) {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            debug!("{}: sending {} ({} bytes) to {}", name, file_name, bytes.len(), recipient);
            let message = ChatMessage::file(name, recipient, &file_name, &bytes);
            sender.enqueue(message.encode(), message.priority());
        }
        Err(e) => {
            ui.deliver(&ChatMessage::system(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )));
        }
    }
}

/// Writes received file bytes under `<base>/<recipient>/<file name>`.
/// Directory creation is idempotent; the file name is reduced to its last
/// path component so a payload cannot escape the download folder.
pub async fn save_received_file(
    base: &Path,
    recipient: &str,
    file_name: &str,
    bytes: &[u8],
) -> anyhow::Result<PathBuf> {
    let safe_name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let dir = base.join(recipient);
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join(safe_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
