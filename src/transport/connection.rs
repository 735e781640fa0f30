use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::addr::VirtualAddress;
use crate::config::StackConfig;
use crate::network::SegmentNetwork;
use crate::substrate::{Segment, SegmentPayload};

/// Ingress events for the sending side of a connection.
enum AckEvent {
    Ack(u8),
    Abort,
}

/// Ingress events for the receiving side of a connection.
enum DataEvent {
    Segment(Segment),
    Eof,
}

/// Invoked when the connection leaves the transport's table.
pub(crate) type OnClose = Box<dyn FnOnce() + Send>;

struct SendState {
    /// next sequence number to emit, alternating in {0, 1}
    seq: u8,
    ack_rx: mpsc::UnboundedReceiver<AckEvent>,
}

struct RecvState {
    /// next sequence number expected on ingress, alternating in {0, 1}
    seq: u8,
    data_rx: mpsc::UnboundedReceiver<DataEvent>,
}

/// One logical bi-directional Stop-and-Wait connection.
///
/// Messages are fragmented into MSS-sized chunks; each chunk is retransmitted
/// until acknowledged, so at most one unacknowledged segment is in flight at
/// any time. The demultiplexer feeds inbound segments through
/// [`ReliableConnection::dispatch`]; `send` and `receive` callers own the
/// sequence numbers, the demultiplexer only enqueues.
pub struct ReliableConnection {
    network: Arc<dyn SegmentNetwork>,
    config: Arc<StackConfig>,
    local: VirtualAddress,
    remote: VirtualAddress,
    send_state: Mutex<SendState>,
    recv_state: Mutex<RecvState>,
    ack_tx: mpsc::UnboundedSender<AckEvent>,
    data_tx: mpsc::UnboundedSender<DataEvent>,
    fin_received: AtomicBool,
    closed: AtomicBool,
    on_close: std::sync::Mutex<Option<OnClose>>,
}

impl ReliableConnection {
    pub(crate) fn new(
        network: Arc<dyn SegmentNetwork>,
        config: Arc<StackConfig>,
        local: VirtualAddress,
        remote: VirtualAddress,
        on_close: Option<OnClose>,
    ) -> Arc<ReliableConnection> {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        Arc::new(ReliableConnection {
            network,
            config,
            local,
            remote,
            send_state: Mutex::new(SendState { seq: 0, ack_rx }),
            recv_state: Mutex::new(RecvState { seq: 0, data_rx }),
            ack_tx,
            data_tx,
            fin_received: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_close: std::sync::Mutex::new(on_close),
        })
    }

    pub fn local_address(&self) -> &VirtualAddress {
        &self.local
    }

    pub fn remote_address(&self) -> &VirtualAddress {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received.load(Ordering::SeqCst)
    }

    /// Sends a whole message reliably: fragments it into MSS-sized chunks
    /// and acknowledges each chunk before the next one goes out. Returns
    /// only after the last chunk is acknowledged.
    ///
    /// Fails when the retry ceiling is exhausted; the connection is dead
    /// afterwards.
    pub async fn send(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.is_closed() {
            bail!("connection {} -> {} is closed", self.local, self.remote);
        }
        debug!("{} -> {}: sending {} byte(s)", self.local, self.remote, data.len());

        let mut st = self.send_state.lock().await;

        // an empty message still travels as one (empty) chunk
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(self.config.mss).collect()
        };

        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.send_chunk(&mut st, chunk, i < last).await?;
        }
        Ok(())
    }

    async fn send_chunk(&self, st: &mut SendState, chunk: &[u8], more: bool) -> anyhow::Result<()> {
        let segment = Segment {
            seq_num: st.seq,
            is_ack: false,
            payload: self.payload(BASE64.encode(chunk), more, false),
        };

        for attempt in 0..=self.config.retry_ceiling {
            if attempt > 0 {
                warn!(
                    "{} -> {}: timeout, retransmitting (seq={}, attempt={}/{})",
                    self.local, self.remote, st.seq, attempt, self.config.retry_ceiling
                );
            }
            self.network.send(segment.clone(), &self.remote.vip).await?;

            if self.await_ack(st, self.config.ack_timeout).await? {
                debug!("{} -> {}: chunk acknowledged (seq={})", self.local, self.remote, st.seq);
                st.seq ^= 1;
                return Ok(());
            }
        }

        self.abort();
        Err(anyhow!(
            "{} -> {}: no ACK after {} retransmissions, giving up (seq={})",
            self.local,
            self.remote,
            self.config.retry_ceiling,
            st.seq
        ))
    }

    /// Waits until the timeout for an ACK matching the current sequence
    /// number. `Ok(false)` means the timeout expired and the segment should
    /// be retransmitted; stale ACKs are discarded without resetting the
    /// timeout.
    async fn await_ack(
        &self,
        st: &mut SendState,
        timeout: std::time::Duration,
    ) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match timeout_at(deadline, st.ack_rx.recv()).await {
                Err(_) => return Ok(false),
                Ok(None) | Ok(Some(AckEvent::Abort)) => {
                    bail!("connection {} -> {} aborted", self.local, self.remote)
                }
                Ok(Some(AckEvent::Ack(seq))) if seq == st.seq => return Ok(true),
                Ok(Some(AckEvent::Ack(seq))) => {
                    debug!(
                        "{}: discarding stale ACK (got={}, expected={})",
                        self.local, seq, st.seq
                    );
                }
            }
        }
    }

    /// Receives one whole message, reassembling its chunk chain. Returns
    /// `Ok(None)` on end-of-stream (peer FIN or local teardown).
    pub async fn receive(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut st = self.recv_state.lock().await;
        let mut buffer = Vec::new();

        loop {
            let event = st
                .data_rx
                .recv()
                .await
                .ok_or_else(|| anyhow!("connection {} torn down", self.local))?;

            let segment = match event {
                DataEvent::Eof => return Ok(None),
                DataEvent::Segment(segment) => segment,
            };

            if segment.seq_num != st.seq {
                // duplicate after a lost ACK: re-acknowledge, do not append
                debug!(
                    "{}: acknowledging duplicate chunk (seq={}, expected={})",
                    self.local, segment.seq_num, st.seq
                );
                self.send_ack(segment.seq_num).await?;
                continue;
            }

            self.send_ack(segment.seq_num).await?;
            st.seq ^= 1;

            let chunk = BASE64
                .decode(segment.payload.data.as_bytes())
                .map_err(|e| anyhow!("{}: chunk is not valid Base64: {}", self.local, e))?;
            buffer.extend_from_slice(&chunk);

            if !segment.payload.more {
                debug!("{}: {} byte(s) received", self.local, buffer.len());
                return Ok(Some(buffer));
            }
        }
    }

    /// Initiates teardown: sends a FIN carrying the current sequence number
    /// and waits for its ACK, retransmitting up to the FIN ceiling. Giving
    /// up is not an error here - the peer may already be gone. Pending local
    /// receivers are woken with end-of-stream.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut st = self.send_state.lock().await;
            let fin = Segment {
                seq_num: st.seq,
                is_ack: false,
                payload: self.payload(String::new(), false, true),
            };

            let mut acked = false;
            for attempt in 0..=self.config.fin_retry_ceiling {
                if attempt > 0 {
                    warn!(
                        "{} -> {}: timeout, retransmitting FIN (attempt={}/{})",
                        self.local, self.remote, attempt, self.config.fin_retry_ceiling
                    );
                }
                if let Err(e) = self.network.send(fin.clone(), &self.remote.vip).await {
                    warn!("{} -> {}: sending FIN failed: {}", self.local, self.remote, e);
                    break;
                }
                match self.await_ack(&mut st, self.config.ack_timeout).await {
                    Ok(true) => {
                        debug!("{} -> {}: FIN acknowledged", self.local, self.remote);
                        acked = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
            if !acked {
                warn!(
                    "{} -> {}: proceeding with teardown without a FIN ACK",
                    self.local, self.remote
                );
            }
        }

        let _ = self.data_tx.send(DataEvent::Eof);
        self.notify_close();
        debug!("{} -> {}: connection closed", self.local, self.remote);
    }

    /// Tears the connection down immediately, without a FIN handshake, and
    /// wakes every blocked `send` and `receive` caller. Used on retry
    /// exhaustion and transport shutdown.
    pub(crate) fn abort(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.ack_tx.send(AckEvent::Abort);
        let _ = self.data_tx.send(DataEvent::Eof);
        self.notify_close();
        debug!("{} -> {}: connection aborted", self.local, self.remote);
    }

    /// Routes one inbound segment to the queue its class belongs to. Called
    /// on the demultiplexer's task; only enqueues, never waits on the
    /// application.
    ///
    /// FINs are acknowledged right here so teardown completes even when no
    /// `receive` is pending; data ACKs are emitted by the `receive` arm.
    pub(crate) async fn dispatch(&self, segment: Segment) {
        if segment.payload.fin {
            debug!("{}: FIN received", self.local);
            if let Err(e) = self.send_ack(segment.seq_num).await {
                warn!("{}: failed to acknowledge FIN: {}", self.local, e);
            }
            self.fin_received.store(true, Ordering::SeqCst);
            let _ = self.data_tx.send(DataEvent::Eof);
            return;
        }

        if segment.is_ack {
            let _ = self.ack_tx.send(AckEvent::Ack(segment.seq_num));
        } else {
            let _ = self.data_tx.send(DataEvent::Segment(segment));
        }
    }

    async fn send_ack(&self, seq: u8) -> anyhow::Result<()> {
        let ack = Segment {
            seq_num: seq,
            is_ack: true,
            payload: self.payload(String::new(), false, false),
        };
        self.network.send(ack, &self.remote.vip).await
    }

    fn payload(&self, data: String, more: bool, fin: bool) -> SegmentPayload {
        SegmentPayload {
            src_vip: self.local.vip.clone(),
            src_port: self.local.port,
            dst_port: self.remote.port,
            data,
            more,
            fin,
        }
    }

    fn notify_close(&self) {
        let callback = self.on_close.lock().expect("on_close lock poisoned").take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
