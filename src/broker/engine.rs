//! Single-flight request broker.
//!
//! The broker owns a FIFO queue of analysis requests and a single in-flight
//! slot. It talks to the host through a [`HostLink`] created by a
//! [`HostConnector`], arms timers through [`Timers`], and hands replies to a
//! [`Delivery`]. It never blocks: every method reacts to one event and
//! returns, so the same code runs under the tokio runtime and under the fake
//! timers used in tests.

use crate::error::BrokerError;
use crate::models::{
    AnalyzeRequest, HostEvent, HostMessage, HostRequest, ReplyTarget, RequestId, UiMessage,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identifies one connection instance to the host.
pub type LinkId = u64;

/// Identifies one armed timer.
pub type TimerId = u64;

/// What an armed timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RequestTimeout,
    Heartbeat,
    Reconnect,
}

/// An established connection to the host.
pub trait HostLink {
    /// Queue a message for the host. Must not block.
    fn post(&mut self, message: &HostRequest) -> Result<(), BrokerError>;

    /// Tear the connection down.
    fn close(&mut self);
}

/// Creates host connections.
pub trait HostConnector {
    fn connect(&mut self, link: LinkId) -> Result<Box<dyn HostLink>, BrokerError>;
}

/// One-shot timers. Expiry is reported back through [`Broker::on_timer`].
pub trait Timers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerId;
    fn cancel(&mut self, id: TimerId);
}

/// Wall clock used for request timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Routes messages to UI contexts.
pub trait Delivery {
    fn deliver(&mut self, target: ReplyTarget, message: UiMessage);
}

/// System clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Broker timing knobs.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// How long one request may stay in flight.
    pub request_timeout: Duration,
    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// Delay before reconnecting after a failure or disconnect.
    pub reconnect_backoff: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(8),
            heartbeat_interval: Duration::from_secs(20),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A queued request.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: RequestId,
    pub payload: AnalyzeRequest,
    pub reply_target: ReplyTarget,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct InFlight {
    id: RequestId,
    reply_target: ReplyTarget,
    timeout: Option<TimerId>,
    /// Link the request was written to.
    link: LinkId,
    enqueued_at: DateTime<Utc>,
}

struct ActiveLink {
    id: LinkId,
    handle: Box<dyn HostLink>,
    heartbeat: Option<TimerId>,
}

/// The request broker.
pub struct Broker {
    settings: BrokerSettings,
    connector: Box<dyn HostConnector>,
    timers: Box<dyn Timers>,
    clock: Box<dyn Clock>,
    delivery: Box<dyn Delivery>,

    state: ConnectionState,
    link: Option<ActiveLink>,
    reconnect: Option<TimerId>,

    queue: VecDeque<PendingRequest>,
    in_flight: Option<InFlight>,
    /// Replies still owed by the host for requests that timed out on the
    /// current link. Id-less terminal replies are discarded while non-zero.
    orphaned: usize,

    next_request_id: RequestId,
    next_link_id: LinkId,
}

impl Broker {
    pub fn new(
        settings: BrokerSettings,
        connector: Box<dyn HostConnector>,
        timers: Box<dyn Timers>,
        clock: Box<dyn Clock>,
        delivery: Box<dyn Delivery>,
    ) -> Self {
        Self {
            settings,
            connector,
            timers,
            clock,
            delivery,
            state: ConnectionState::Disconnected,
            link: None,
            reconnect: None,
            queue: VecDeque::new(),
            in_flight: None,
            orphaned: 0,
            next_request_id: 1,
            next_link_id: 1,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn in_flight_id(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|f| f.id)
    }

    /// Current timestamp in epoch milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Queue a request for `reply_target` and try to send it.
    pub fn enqueue(&mut self, mut payload: AnalyzeRequest, reply_target: ReplyTarget) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        payload.id = Some(id);

        self.queue.push_back(PendingRequest {
            id,
            payload,
            reply_target,
            enqueued_at: self.clock.now(),
        });
        debug!("Queued request {} for {} (depth {})", id, reply_target, self.queue.len());

        self.pump();
        id
    }

    /// Start the next queued request if the slot is free.
    pub fn pump(&mut self) {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return;
        }

        if self.link.is_none() {
            self.connect();
        }
        let Some(link) = self.link.as_mut() else {
            debug!("Host not connected; {} request(s) waiting", self.queue.len());
            return;
        };
        let link_id = link.id;

        let Some(request) = self.queue.pop_front() else {
            return;
        };
        let timeout = self
            .timers
            .schedule(TimerKind::RequestTimeout, self.settings.request_timeout);
        self.in_flight = Some(InFlight {
            id: request.id,
            reply_target: request.reply_target,
            timeout: Some(timeout),
            link: link_id,
            enqueued_at: request.enqueued_at,
        });

        let message = HostRequest::Analyze(request.payload);
        match self.post(&message) {
            Ok(()) => debug!("Posted request {} to host", request.id),
            Err(e) => {
                warn!("Request {} could not be sent: {}", request.id, e);
                self.settle(UiMessage::error(e.to_string()));
                // The link is unusable; queued requests wait for a fresh one.
                if let Some(link) = self.link.as_mut() {
                    link.handle.close();
                }
                self.drop_link();
                self.schedule_reconnect();
            }
        }
    }

    /// Handle a message read from link `link`.
    pub fn on_host_message(&mut self, link: LinkId, message: HostMessage) {
        if !self.is_current_link(link) {
            debug!("Dropping message from stale link {}", link);
            return;
        }

        match message.classify() {
            HostEvent::Diag {
                path,
                note,
                in_len,
                out_len,
            } => {
                debug!("[host diag] {} {} (in {}, out {})", path, note, in_len, out_len);
            }
            HostEvent::Pong => {
                debug!("Heartbeat reply from host");
            }
            HostEvent::Analysis {
                id,
                tone,
                suggestions,
            } => {
                if self.accept_terminal(id) {
                    info!("Analysis complete: tone {}, {} suggestion(s)", tone, suggestions.len());
                    self.settle(UiMessage::analysis(tone, suggestions));
                    self.pump();
                }
            }
            HostEvent::Failure { id, error } => {
                if self.accept_terminal(id) {
                    warn!("Host reported an error: {}", error);
                    let err = BrokerError::HostReported(error);
                    self.settle(UiMessage::error(err.to_string()));
                    self.pump();
                }
            }
            HostEvent::Unrecognized => {
                warn!("Ignoring unrecognized host message");
            }
        }
    }

    /// Handle the end of link `link`.
    pub fn on_disconnect(&mut self, link: LinkId) {
        if !self.is_current_link(link) {
            return;
        }

        info!("Host disconnected (link {})", link);
        self.drop_link();
        self.schedule_reconnect();
    }

    /// Handle an expired timer.
    pub fn on_timer(&mut self, id: TimerId, kind: TimerKind) {
        match kind {
            TimerKind::RequestTimeout => self.on_request_timeout(id),
            TimerKind::Heartbeat => self.on_heartbeat(id),
            TimerKind::Reconnect => {
                if self.reconnect != Some(id) {
                    return;
                }
                self.reconnect = None;
                debug!("Reconnect backoff elapsed");
                if self.link.is_none() {
                    self.connect();
                }
                if self.link.is_some() {
                    self.pump();
                }
            }
        }
    }

    /// Tear everything down, e.g. on process shutdown. Queued requests stay
    /// queued; a later [`Broker::pump`] reconnects.
    pub fn suspend(&mut self) {
        info!("Suspending broker");
        if let Some(id) = self.reconnect.take() {
            self.timers.cancel(id);
        }
        if let Some(mut link) = self.link.take() {
            if let Some(hb) = link.heartbeat.take() {
                self.timers.cancel(hb);
            }
            link.handle.close();
        }
        self.state = ConnectionState::Disconnected;
        self.orphaned = 0;
    }

    fn is_current_link(&self, link: LinkId) -> bool {
        self.link.as_ref().is_some_and(|l| l.id == link)
    }

    fn connect(&mut self) {
        if self.link.is_some() {
            return;
        }

        let link_id = self.next_link_id;
        self.next_link_id += 1;
        self.state = ConnectionState::Connecting;
        debug!("Connecting to host (link {})", link_id);

        match self.connector.connect(link_id) {
            Ok(handle) => {
                let heartbeat = self
                    .timers
                    .schedule(TimerKind::Heartbeat, self.settings.heartbeat_interval);
                self.link = Some(ActiveLink {
                    id: link_id,
                    handle,
                    heartbeat: Some(heartbeat),
                });
                self.state = ConnectionState::Connected;
                self.orphaned = 0;
                info!("Connected to host (link {})", link_id);
            }
            Err(e) => {
                error!("{}", e);
                self.state = ConnectionState::Disconnected;
                self.schedule_reconnect();
            }
        }
    }

    fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Some(hb) = link.heartbeat.take() {
                self.timers.cancel(hb);
            }
        }
        self.state = ConnectionState::Disconnected;
        self.orphaned = 0;
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }
        let id = self
            .timers
            .schedule(TimerKind::Reconnect, self.settings.reconnect_backoff);
        self.reconnect = Some(id);
        debug!("Reconnect scheduled in {:?}", self.settings.reconnect_backoff);
    }

    fn post(&mut self, message: &HostRequest) -> Result<(), BrokerError> {
        match self.link.as_mut() {
            Some(link) => link.handle.post(message),
            None => Err(BrokerError::Transmission("host not connected".to_string())),
        }
    }

    /// Decide whether a terminal reply belongs to the in-flight request.
    fn accept_terminal(&mut self, id: Option<RequestId>) -> bool {
        let current = self.in_flight.as_ref().map(|f| f.id);

        match (id, current) {
            (Some(reply), Some(current)) if reply == current => true,
            (Some(reply), _) => {
                debug!("Discarding late reply for request {}", reply);
                self.orphaned = self.orphaned.saturating_sub(1);
                false
            }
            (None, _) if self.orphaned > 0 => {
                self.orphaned -= 1;
                debug!("Discarding late reply ({} more expected)", self.orphaned);
                false
            }
            (None, Some(_)) => true,
            (None, None) => {
                warn!("Host reply with no request in flight");
                false
            }
        }
    }

    /// Deliver `message` to the in-flight request and free the slot.
    fn settle(&mut self, message: UiMessage) {
        let Some(mut flight) = self.in_flight.take() else {
            return;
        };
        if let Some(timeout) = flight.timeout.take() {
            self.timers.cancel(timeout);
        }

        let waited = self.clock.now() - flight.enqueued_at;
        debug!(
            "Request {} settled after {}ms",
            flight.id,
            waited.num_milliseconds()
        );

        if flight.reply_target.tab_id.is_none() {
            debug!("Request {} has no tab to deliver to", flight.id);
            return;
        }
        self.delivery.deliver(flight.reply_target, message);
    }

    fn on_request_timeout(&mut self, id: TimerId) {
        let matches = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.timeout == Some(id));
        if !matches {
            return;
        }

        if let Some(flight) = self.in_flight.as_mut() {
            flight.timeout = None;
            warn!("Host timed out on request {}", flight.id);
            if self.link.as_ref().is_some_and(|l| l.id == flight.link) {
                self.orphaned += 1;
            }
        }

        let err = BrokerError::HostTimeout(self.settings.request_timeout);
        self.settle(UiMessage::error(err.to_string()));
        self.pump();
    }

    fn on_heartbeat(&mut self, id: TimerId) {
        let interval = self.settings.heartbeat_interval;
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.heartbeat != Some(id) {
            return;
        }

        match link.handle.post(&HostRequest::Ping) {
            Ok(()) => debug!("Heartbeat sent"),
            Err(e) => debug!("Heartbeat failed: {}", e),
        }
        link.heartbeat = Some(self.timers.schedule(TimerKind::Heartbeat, interval));
    }
}
