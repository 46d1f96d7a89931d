use futures_util::{SinkExt, StreamExt};
use mumble_core::protocol::{encode_request, OutboundRequest, DEFAULT_MAX_FRAME_BYTES};
use mumble_state::RequestSink;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle and data notifications from the socket task, delivered in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Error(String),
    Message(String),
}

/// Cloneable send side of the transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
}

impl TransportHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hands a payload to the live connection. Returns false, and drops the
    /// payload, when there is none.
    pub fn send(&self, payload: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound.send(payload).is_ok()
    }
}

impl RequestSink for TransportHandle {
    fn send_request(&mut self, request: &OutboundRequest) {
        match encode_request(request, DEFAULT_MAX_FRAME_BYTES) {
            Ok(payload) => {
                if !self.send(payload) {
                    debug!(event = "request_dropped", kind = request.kind());
                }
            }
            Err(err) => warn!("mumble_encode_error: {err}"),
        }
    }
}

/// Owns at most one websocket connection to the event source.
pub struct Transport {
    url: Url,
    handle: TransportHandle,
    outbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    events: mpsc::Sender<TransportEvent>,
    /// Winds down the running attempt. The task finishes its own cleanup,
    /// so `connected` is cleared and `Closed` is delivered even when the
    /// attempt opened after `connect` last looked.
    shutdown: Option<oneshot::Sender<()>>,
}

impl Transport {
    pub fn new(url: Url, events: mpsc::Sender<TransportEvent>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url,
            handle: TransportHandle {
                connected: Arc::new(AtomicBool::new(false)),
                outbound,
            },
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            events,
            shutdown: None,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Start a fresh connection attempt unless one is already open. Any
    /// pending attempt is cancelled first. Safe to call on every tick.
    pub fn connect(&mut self) -> bool {
        if self.is_connected() {
            return false;
        }
        self.disconnect();
        debug!(event = "transport_connect", url = %self.url);
        let (shutdown, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_connection(
            self.url.clone(),
            self.handle.connected.clone(),
            self.outbound_rx.clone(),
            self.events.clone(),
            shutdown_rx,
        ));
        self.shutdown = Some(shutdown);
        true
    }

    pub fn disconnect(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// One connection attempt. Attempts run one at a time: each holds the
/// outbound queue lock from start to finish, so a successor cannot open
/// until its predecessor has cleared `connected` and reported `Closed`.
async fn run_connection(
    url: Url,
    connected: Arc<AtomicBool>,
    outbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut outbound = tokio::select! {
        guard = outbound_rx.lock() => guard,
        _ = &mut shutdown => return,
    };
    while outbound.try_recv().is_ok() {}

    let connecting = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut shutdown => {
            debug!(event = "transport_attempt_cancelled", url = %url);
            return;
        }
    };
    let (ws, _) = match connecting {
        Ok(value) => value,
        Err(err) => {
            debug!("mumble_connect_error: {err}");
            let _ = events.send(TransportEvent::Error(err.to_string())).await;
            return;
        }
    };
    connected.store(true, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Opened).await;

    let (mut writer, mut reader) = ws.split();
    loop {
        tokio::select! {
            incoming = reader.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("mumble_read_error: {err}");
                        let _ = events.send(TransportEvent::Error(err.to_string())).await;
                        break;
                    }
                }
            }
            Some(payload) = outbound.recv() => {
                if let Err(err) = writer.send(Message::Text(payload)).await {
                    warn!("mumble_write_error: {err}");
                    break;
                }
            }
            _ = &mut shutdown => {
                debug!(event = "transport_shutdown", url = %url);
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed).await;
    let _ = timeout(CLOSE_TIMEOUT, writer.close()).await;
}
