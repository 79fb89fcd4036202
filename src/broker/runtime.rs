//! Tokio runtime for the broker.
//!
//! Child-process I/O, timers, UI lines and shutdown signals all feed one
//! event channel. A single loop owns the [`Broker`] and applies events in
//! arrival order, so broker state is never shared between tasks.

use crate::broker::engine::{
    Broker, BrokerSettings, Delivery, HostConnector, HostLink, LinkId, SystemClock, TimerId,
    TimerKind, Timers,
};
use crate::broker::router::UiRouter;
use crate::codec::{self, MAX_HOST_FRAME, MAX_INBOUND_FRAME};
use crate::error::{BrokerError, CodecError};
use crate::models::{HostMessage, HostRequest, ReplyTarget, UiEnvelope, UiMessage, UiOutbound, UiRequest};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Everything the broker loop reacts to.
#[derive(Debug)]
pub enum BrokerEvent {
    HostMessage { link: LinkId, message: HostMessage },
    HostClosed { link: LinkId },
    Timer { id: TimerId, kind: TimerKind },
    Ui(UiEnvelope),
    /// The UI input stream ended; exit once the broker is idle.
    UiClosed,
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;

/// How to launch the host process.
#[derive(Debug, Clone)]
pub struct HostCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Spawns the host as a child process speaking native-messaging frames.
pub struct ProcessConnector {
    command: HostCommand,
    events: EventSender,
}

impl ProcessConnector {
    pub fn new(command: HostCommand, events: EventSender) -> Self {
        Self { command, events }
    }
}

impl HostConnector for ProcessConnector {
    fn connect(&mut self, link: LinkId) -> Result<Box<dyn HostLink>, BrokerError> {
        let program = &self.command.program;
        let mut child = Command::new(program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BrokerError::Connection(format!("failed to start {}: {}", program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Connection("host process has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Connection("host process has no stdout".to_string()))?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        tokio::spawn(host_writer_task(link, stdin, frames_rx, self.events.clone()));
        tokio::spawn(host_reader_task(link, stdout, self.events.clone()));

        info!("Started host process {} (pid {:?})", program.display(), child.id());
        Ok(Box::new(ProcessLink {
            frames: Some(frames_tx),
            child,
        }))
    }
}

/// Write side of a host child process.
struct ProcessLink {
    frames: Option<mpsc::UnboundedSender<Vec<u8>>>,
    child: Child,
}

impl HostLink for ProcessLink {
    fn post(&mut self, message: &HostRequest) -> Result<(), BrokerError> {
        let bytes =
            serde_json::to_vec(message).map_err(|e| BrokerError::Transmission(e.to_string()))?;
        if bytes.len() > MAX_INBOUND_FRAME {
            return Err(BrokerError::Transmission(format!(
                "message of {} bytes is too large",
                bytes.len()
            )));
        }

        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| BrokerError::Transmission("host link closed".to_string()))?;
        frames
            .send(bytes)
            .map_err(|_| BrokerError::Transmission("host link closed".to_string()))
    }

    fn close(&mut self) {
        self.frames = None;
        if let Err(e) = self.child.start_kill() {
            debug!("Host process already gone: {}", e);
        }
    }
}

/// Forward frames from the host to the event loop until the stream ends.
async fn host_reader_task<R>(link: LinkId, mut stdout: R, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    loop {
        match codec::read_message::<_, HostMessage>(&mut stdout, MAX_HOST_FRAME).await {
            Ok(Some(message)) => {
                if events.send(BrokerEvent::HostMessage { link, message }).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("Host stdout closed (link {})", link);
                break;
            }
            Err(CodecError::Json(e)) => {
                warn!("Ignoring malformed host frame: {}", e);
            }
            Err(e) => {
                warn!("Failed to read from host: {}", e);
                break;
            }
        }
    }
    let _ = events.send(BrokerEvent::HostClosed { link });
}

/// Write queued frames to the host until the link is dropped or writing fails.
async fn host_writer_task<W>(
    link: LinkId,
    mut stdin: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSender,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = frames.recv().await {
        if let Err(e) = codec::write_frame(&mut stdin, &bytes, MAX_INBOUND_FRAME).await {
            warn!("Failed to write to host: {}", e);
            let _ = events.send(BrokerEvent::HostClosed { link });
            return;
        }
    }
    debug!("Host writer finished (link {})", link);
}

/// Timers backed by `tokio::time::sleep` tasks.
pub struct TokioTimers {
    events: EventSender,
    next_id: TimerId,
    armed: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioTimers {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 0,
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn armed(&self) -> std::sync::MutexGuard<'_, HashMap<TimerId, AbortHandle>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Timers for TokioTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;

        let events = self.events.clone();
        let armed = Arc::clone(&self.armed);
        // Hold the lock until the handle is stored so the task cannot
        // remove its entry first.
        let mut guard = self.armed();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            armed.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            let _ = events.send(BrokerEvent::Timer { id, kind });
        });
        guard.insert(id, task.abort_handle());
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.armed().remove(&id) {
            handle.abort();
        }
    }
}

/// Sends broker deliveries to the UI writer.
pub struct ChannelDelivery(pub mpsc::UnboundedSender<UiOutbound>);

impl Delivery for ChannelDelivery {
    fn deliver(&mut self, target: ReplyTarget, message: UiMessage) {
        if self.0.send(UiOutbound::Deliver { target, message }).is_err() {
            warn!("UI channel closed; dropping delivery for {}", target);
        }
    }
}

/// Broker process configuration.
#[derive(Debug, Clone)]
pub struct BrokerRuntime {
    pub settings: BrokerSettings,
    pub host: HostCommand,
    pub history_capacity: usize,
}

impl BrokerRuntime {
    /// Serve UI traffic from `ui_in` / `ui_out` until shutdown.
    pub async fn run<R, W>(self, ui_in: R, ui_out: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(ui_reader_task(ui_in, events_tx.clone()));
        let writer = tokio::spawn(ui_writer_task(ui_out, out_rx));

        let signals = events_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = signals.send(BrokerEvent::Shutdown);
            }
        });

        let broker = Broker::new(
            self.settings,
            Box::new(ProcessConnector::new(self.host, events_tx.clone())),
            Box::new(TokioTimers::new(events_tx)),
            Box::new(SystemClock),
            Box::new(ChannelDelivery(out_tx.clone())),
        );
        let router = UiRouter::new(self.history_capacity);

        drive(broker, router, events_rx, out_tx).await;

        writer.await.context("UI writer task failed")?
    }
}

/// Apply events to the broker until shutdown. Consumes the broker so its
/// delivery channel is released when the loop ends.
async fn drive(
    mut broker: Broker,
    mut router: UiRouter,
    mut events: mpsc::UnboundedReceiver<BrokerEvent>,
    out: mpsc::UnboundedSender<UiOutbound>,
) {
    let mut ui_closed = false;

    while let Some(event) = events.recv().await {
        match event {
            BrokerEvent::HostMessage { link, message } => broker.on_host_message(link, message),
            BrokerEvent::HostClosed { link } => broker.on_disconnect(link),
            BrokerEvent::Timer { id, kind } => broker.on_timer(id, kind),
            BrokerEvent::Ui(envelope) => {
                let request = UiRequest::from_value(envelope.message);
                let response = router.handle(&mut broker, envelope.sender, request);
                let ack = UiOutbound::Response {
                    target: envelope.sender,
                    seq: envelope.seq,
                    response,
                };
                if out.send(ack).is_err() {
                    warn!("UI channel closed");
                }
            }
            BrokerEvent::UiClosed => {
                info!(
                    "UI input closed; finishing outstanding requests (host {:?})",
                    broker.connection_state()
                );
                ui_closed = true;
            }
            BrokerEvent::Shutdown => {
                info!("Shutdown requested");
                break;
            }
        }

        if ui_closed && !broker.is_busy() && broker.queue_len() == 0 {
            break;
        }
    }

    broker.suspend();
}

async fn ui_reader_task<R>(ui_in: R, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(ui_in).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<UiEnvelope>(line) {
                    Ok(envelope) => {
                        if events.send(BrokerEvent::Ui(envelope)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed UI line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read UI input: {}", e);
                break;
            }
        }
    }
    let _ = events.send(BrokerEvent::UiClosed);
}

async fn ui_writer_task<W>(mut ui_out: W, mut outbound: mpsc::UnboundedReceiver<UiOutbound>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = serde_json::to_string(&message).context("Failed to encode UI message")?;
        line.push('\n');
        ui_out
            .write_all(line.as_bytes())
            .await
            .context("Failed to write UI message")?;
        ui_out.flush().await.context("Failed to flush UI output")?;
    }
    Ok(())
}
