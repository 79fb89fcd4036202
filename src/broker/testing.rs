//! Fake host, timers and delivery for driving the broker deterministically.

use crate::broker::engine::{
    Broker, BrokerSettings, Clock, Delivery, HostConnector, HostLink, LinkId, TimerId, TimerKind,
    Timers,
};
use crate::error::BrokerError;
use crate::models::{AnalyzeRequest, HostMessage, HostRequest, ReplyTarget, RequestId, UiMessage};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct HostState {
    pub(crate) connect_failures: usize,
    pub(crate) post_fails: bool,
    pub(crate) connects: Vec<LinkId>,
    pub(crate) sent: Vec<(LinkId, HostRequest)>,
    pub(crate) closed: Vec<LinkId>,
}

pub(crate) struct FakeConnector(pub(crate) Rc<RefCell<HostState>>);

pub(crate) struct FakeLink {
    pub(crate) id: LinkId,
    pub(crate) state: Rc<RefCell<HostState>>,
}

impl HostConnector for FakeConnector {
    fn connect(&mut self, link: LinkId) -> Result<Box<dyn HostLink>, BrokerError> {
        let mut state = self.0.borrow_mut();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(BrokerError::Connection("host not installed".to_string()));
        }
        state.connects.push(link);
        Ok(Box::new(FakeLink {
            id: link,
            state: Rc::clone(&self.0),
        }))
    }
}

impl HostLink for FakeLink {
    fn post(&mut self, message: &HostRequest) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if state.post_fails {
            return Err(BrokerError::Transmission("port closed".to_string()));
        }
        state.sent.push((self.id, message.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed.push(self.id);
    }
}

#[derive(Default)]
pub(crate) struct TimerState {
    pub(crate) now: Duration,
    pub(crate) next_id: TimerId,
    pub(crate) armed: Vec<(TimerId, TimerKind, Duration)>,
}

pub(crate) struct FakeTimers(pub(crate) Rc<RefCell<TimerState>>);

impl Timers for FakeTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerId {
        let mut state = self.0.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let deadline = state.now + after;
        state.armed.push((id, kind, deadline));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.0.borrow_mut().armed.retain(|(t, _, _)| *t != id);
    }
}

pub(crate) struct FakeClock(pub(crate) Rc<RefCell<TimerState>>);

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        base + chrono::Duration::from_std(self.0.borrow().now).unwrap()
    }
}

pub(crate) type Inbox = Rc<RefCell<Vec<(ReplyTarget, UiMessage)>>>;

pub(crate) struct RecordingDelivery(pub(crate) Inbox);

impl Delivery for RecordingDelivery {
    fn deliver(&mut self, target: ReplyTarget, message: UiMessage) {
        self.0.borrow_mut().push((target, message));
    }
}

fn fake_broker(
    host: Rc<RefCell<HostState>>,
    timers: Rc<RefCell<TimerState>>,
    delivery: Box<dyn Delivery>,
) -> Broker {
    Broker::new(
        BrokerSettings::default(),
        Box::new(FakeConnector(host)),
        Box::new(FakeTimers(Rc::clone(&timers))),
        Box::new(FakeClock(timers)),
        delivery,
    )
}

/// Broker on a fake host and fake timers with a caller-supplied delivery.
pub(crate) fn broker_with_delivery(
    host: HostState,
    delivery: Box<dyn Delivery>,
) -> (Broker, Rc<RefCell<HostState>>) {
    let host = Rc::new(RefCell::new(host));
    let timers = Rc::new(RefCell::new(TimerState::default()));
    (fake_broker(Rc::clone(&host), timers, delivery), host)
}

pub(crate) struct Harness {
    pub(crate) broker: Broker,
    pub(crate) host: Rc<RefCell<HostState>>,
    pub(crate) timers: Rc<RefCell<TimerState>>,
    pub(crate) inbox: Inbox,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_host(HostState::default())
    }

    pub(crate) fn with_host(host: HostState) -> Self {
        let host = Rc::new(RefCell::new(host));
        let timers = Rc::new(RefCell::new(TimerState::default()));
        let inbox: Inbox = Rc::new(RefCell::new(Vec::new()));
        let broker = fake_broker(
            Rc::clone(&host),
            Rc::clone(&timers),
            Box::new(RecordingDelivery(Rc::clone(&inbox))),
        );
        Self {
            broker,
            host,
            timers,
            inbox,
        }
    }

    /// Move the fake clock forward, firing due timers in deadline order.
    pub(crate) fn advance(&mut self, by: Duration) {
        let target = self.timers.borrow().now + by;
        loop {
            let due = {
                let state = self.timers.borrow();
                state
                    .armed
                    .iter()
                    .filter(|(_, _, at)| *at <= target)
                    .min_by_key(|(id, _, at)| (*at, *id))
                    .copied()
            };
            let Some((id, kind, at)) = due else {
                break;
            };
            {
                let mut state = self.timers.borrow_mut();
                state.now = at;
                state.armed.retain(|(t, _, _)| *t != id);
            }
            self.broker.on_timer(id, kind);
        }
        self.timers.borrow_mut().now = target;
    }

    pub(crate) fn enqueue(&mut self, body: &str, tab: i64) -> RequestId {
        self.broker.enqueue(
            AnalyzeRequest {
                focus: body.to_string(),
                body: body.to_string(),
                ..Default::default()
            },
            ReplyTarget::new(tab, 0),
        )
    }

    pub(crate) fn reply(&mut self, link: LinkId, value: serde_json::Value) {
        let message: HostMessage = serde_json::from_value(value).unwrap();
        self.broker.on_host_message(link, message);
    }

    pub(crate) fn analyze_sent(&self) -> Vec<(LinkId, RequestId)> {
        self.host
            .borrow()
            .sent
            .iter()
            .filter_map(|(link, m)| match m {
                HostRequest::Analyze(a) => Some((*link, a.id.unwrap())),
                HostRequest::Ping => None,
            })
            .collect()
    }

    pub(crate) fn pings_sent(&self) -> usize {
        self.host
            .borrow()
            .sent
            .iter()
            .filter(|(_, m)| matches!(m, HostRequest::Ping))
            .count()
    }

    pub(crate) fn delivered(&self) -> Vec<(ReplyTarget, UiMessage)> {
        self.inbox.borrow().clone()
    }
}
