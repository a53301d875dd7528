//! Realtime connection manager.
//!
//! A single driver task owns the transport, the timer registry, the pending
//! queue and the attempt counter. [`ConnectionManager`] handles are cheap
//! clones that talk to it over a command channel, so every state transition
//! happens on one task in the order events arrive.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::{
    error::{ManagerError, Result, TransportError},
    options::ConnectionOptions,
    protocol::{self, MessageKind, RealtimeData},
    queue::PendingQueue,
    state::{ConnectionMetrics, ConnectionState, Snapshot},
    subscribers::{Interest, SubscriberRegistry, Topic},
    timers::{TimerKind, TimerRegistry},
    transport::{Connector, Transport, TransportEvent, CLOSE_ABNORMAL},
    utils::{millis, now_millis},
};

/// What happened to a message handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
    /// The pending queue was full; the message was discarded.
    Dropped,
}

enum Command {
    Connect {
        task_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        frame: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    Announce(String),
    Retract(String),
    ResetMetrics,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    subscribers: SubscriberRegistry,
}

impl ConnectionManager {
    /// Validates `options` and starts the driver task. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(options: ConnectionOptions, connector: impl Connector) -> Result<Self> {
        options.validate()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Snapshot::default());
        let subscribers = SubscriberRegistry::new();

        let driver = Driver::new(
            options,
            Arc::new(connector),
            command_rx,
            snapshot_tx,
            subscribers.clone(),
        );
        tokio::spawn(driver.run());

        Ok(Self {
            commands,
            snapshot,
            subscribers,
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ManagerError::Closed)?;
        rx.await.map_err(|_| ManagerError::Closed)
    }

    /// Opens the connection and resolves once it is established, or once the
    /// attempt (including automatic retries) fails for good.
    pub async fn connect(&self, task_id: Option<&str>) -> Result<()> {
        let task_id = task_id.map(str::to_string);
        self.request(|reply| Command::Connect { task_id, reply })
            .await?
    }

    /// Closes the connection and cancels every timer. Idempotent.
    pub async fn disconnect(&self) {
        let _ = self.request(|reply| Command::Disconnect { reply }).await;
    }

    /// Forced disconnect followed by a fresh connect.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<SendOutcome> {
        let frame = serde_json::to_string(message)?;
        self.send_text(frame).await
    }

    pub async fn send_text(&self, frame: impl Into<String>) -> Result<SendOutcome> {
        let frame = frame.into();
        self.request(|reply| Command::Send { frame, reply }).await
    }

    /// Registers `callback` for messages of `task_id`. Dropping the returned
    /// handle keeps the subscription alive; call
    /// [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe<F>(&self, task_id: &str, callback: F) -> Subscription
    where
        F: Fn(&RealtimeData) + Send + Sync + 'static,
    {
        self.register(Topic::Task(task_id.to_string()), Arc::new(callback))
    }

    /// Registers `callback` for every inbound data message.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RealtimeData) + Send + Sync + 'static,
    {
        self.register(Topic::All, Arc::new(callback))
    }

    fn register(&self, topic: Topic, callback: crate::subscribers::Callback) -> Subscription {
        let (id, interest) = self.subscribers.add(topic.clone(), callback);
        if let Interest::Gained(task_id) = interest {
            let _ = self.commands.send(Command::Announce(task_id));
        }
        Subscription {
            id,
            topic,
            subscribers: self.subscribers.clone(),
            commands: self.commands.downgrade(),
        }
    }

    /// Removes every subscriber of `task_id`.
    pub fn unsubscribe(&self, task_id: &str) -> usize {
        let removed = self.subscribers.remove_task(task_id);
        if removed > 0 {
            let _ = self.commands.send(Command::Retract(task_id.to_string()));
        }
        removed
    }

    pub fn reset_metrics(&self) {
        let _ = self.commands.send(Command::ResetMetrics);
    }

    /// Disconnects, drops every subscriber and pending message and stops the
    /// driver. Later calls on any handle fail with [`ManagerError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.snapshot.borrow().metrics.clone()
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.snapshot.borrow().current_task_id.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Waits until the published snapshot satisfies `pred`.
    pub async fn wait_until(&self, pred: impl FnMut(&Snapshot) -> bool) -> Result<Snapshot> {
        let mut rx = self.snapshot.clone();
        let snap = rx.wait_for(pred).await.map_err(|_| ManagerError::Closed)?;
        Ok(snap.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Handle for one registered callback.
pub struct Subscription {
    id: u64,
    topic: Topic,
    subscribers: SubscriberRegistry,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Interest::Lost(task_id) = self.subscribers.remove(&self.topic, self.id) {
            if let Some(commands) = self.commands.upgrade() {
                let _ = commands.send(Command::Retract(task_id));
            }
        }
    }
}

/// Why a live connection ended.
#[derive(Debug, Clone)]
enum Failure {
    Closed { code: u16, reason: String },
    Errored(String),
    TimedOut,
}

impl Failure {
    /// State to settle in when no retry is scheduled.
    fn resting_state(&self) -> ConnectionState {
        match self {
            Self::Closed { .. } => ConnectionState::Disconnected,
            Self::Errored(_) => ConnectionState::Error,
            Self::TimedOut => ConnectionState::Timeout,
        }
    }

    fn to_error(&self) -> ManagerError {
        match self {
            Self::Closed { code, reason } => {
                ManagerError::ConnectionFailed(format!("closed code={code} reason={reason}"))
            }
            Self::Errored(e) => ManagerError::ConnectionFailed(e.clone()),
            Self::TimedOut => ManagerError::Timeout,
        }
    }
}

enum Wake {
    Command(Command),
    Detached,
    Transport(TransportEvent),
    Timer(TimerKind),
}

struct Driver {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
    subscribers: SubscriberRegistry,

    state: ConnectionState,
    metrics: ConnectionMetrics,
    current_task_id: Option<String>,
    connection_id: Option<String>,

    transport: Option<Box<dyn Transport>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    // task ids subscribed on the current transport
    announced: HashSet<String>,
    timers: TimerRegistry,
    queue: PendingQueue,
    attempts: u32,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Driver {
    fn new(
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshot_tx: watch::Sender<Snapshot>,
        subscribers: SubscriberRegistry,
    ) -> Self {
        let queue = PendingQueue::new(options.message_queue_size);
        Self {
            options,
            connector,
            commands,
            snapshot_tx,
            subscribers,
            state: ConnectionState::Disconnected,
            metrics: ConnectionMetrics::default(),
            current_task_id: None,
            connection_id: None,
            transport: None,
            events: None,
            announced: HashSet::new(),
            timers: TimerRegistry::new(),
            queue,
            attempts: 0,
            waiters: Vec::new(),
        }
    }

    async fn run(mut self) {
        log::debug!("realtime.driver.start url={}", self.options.url);
        loop {
            let next_timer = self.timers.next_due();
            let wake = tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Wake::Command(cmd),
                    None => Wake::Detached,
                },
                ev = next_event(&mut self.events) => Wake::Transport(ev),
                kind = timer_fired(next_timer) => Wake::Timer(kind),
            };

            match wake {
                Wake::Command(cmd) => {
                    if !self.on_command(cmd) {
                        break;
                    }
                }
                Wake::Detached => {
                    self.shutdown();
                    break;
                }
                Wake::Transport(ev) => self.on_transport(ev),
                Wake::Timer(kind) => {
                    if self.timers.take_if_due(kind, Instant::now()) {
                        self.on_timer(kind);
                    }
                }
            }
            self.publish();
        }
        log::debug!("realtime.driver.stop url={}", self.options.url);
    }

    fn trace(&self, args: std::fmt::Arguments<'_>) {
        if self.options.debug {
            log::info!("{args}");
        } else {
            log::debug!("{args}");
        }
    }

    fn publish(&self) {
        let next = Snapshot {
            state: self.state,
            metrics: self.metrics.clone(),
            current_task_id: self.current_task_id.clone(),
            connection_id: self.connection_id.clone(),
            queued: self.queue.len(),
            active_timers: self.timers.active(),
        };
        self.snapshot_tx.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        });
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        log::info!(
            "realtime.state from={} to={} url={}",
            self.state,
            next,
            self.options.url
        );
        self.state = next;
        self.publish();
    }

    // ---- commands ----------------------------------------------------

    /// Returns `false` once the driver should stop.
    fn on_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect { task_id, reply } => {
                if task_id.is_some() {
                    self.current_task_id = task_id;
                }
                match self.state {
                    ConnectionState::Connected => {
                        self.publish();
                        let _ = reply.send(Ok(()));
                    }
                    ConnectionState::Connecting => self.waiters.push(reply),
                    _ => {
                        self.waiters.push(reply);
                        self.attempts = 0;
                        self.open_transport();
                    }
                }
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                self.publish();
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                let attempts = self.attempts;
                self.disconnect();
                self.attempts = if self.options.reset_attempts_on_reconnect {
                    0
                } else {
                    attempts
                };
                self.waiters.push(reply);
                self.open_transport();
            }
            Command::Send { frame, reply } => {
                let outcome = self.send_or_queue(frame);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Announce(task_id) => {
                self.announce(task_id);
            }
            Command::Retract(task_id) => {
                if self.state == ConnectionState::Connected && self.announced.remove(&task_id) {
                    self.send_control(&protocol::unsubscribe_frame(&task_id));
                }
            }
            Command::ResetMetrics => {
                self.metrics = ConnectionMetrics::default();
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn disconnect(&mut self) {
        self.timers.clear_all();
        self.teardown_transport();
        self.attempts = 0;
        self.fail_waiters(|| ManagerError::Disconnected);
        if self.state != ConnectionState::Disconnected {
            log::info!("realtime.disconnect url={}", self.options.url);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn shutdown(&mut self) {
        self.disconnect();
        self.subscribers.clear();
        self.queue.clear();
        self.publish();
    }

    // ---- connect sequence ---------------------------------------------

    fn open_transport(&mut self) {
        self.timers.clear(TimerKind::Reconnect);
        self.teardown_transport();

        match self.connector.open(&self.options.url) {
            Ok(conn) => {
                let connection_id = uuid::Uuid::new_v4().to_string();
                log::info!(
                    "realtime.connect url={} connection_id={} attempt={}",
                    self.options.url,
                    connection_id,
                    self.attempts
                );
                self.transport = Some(conn.transport);
                self.events = Some(conn.events);
                self.connection_id = Some(connection_id);
                self.timers
                    .arm(TimerKind::ConnectTimeout, self.options.connection_timeout);
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => {
                log::error!("realtime.connect.error url={} err={}", self.options.url, e);
                self.metrics.error_count += 1;
                self.timers.clear_all();
                self.set_state(ConnectionState::Error);
                self.fail_waiters(|| ManagerError::Transport(e.clone()));
            }
        }
    }

    /// Drops event listeners first, then closes the socket.
    fn teardown_transport(&mut self) {
        self.events = None;
        self.announced.clear();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.connection_id = None;
    }

    fn schedule_reconnect(&mut self, failure: Failure) {
        self.timers.clear_all();

        if !self.options.auto_reconnect {
            self.set_state(failure.resting_state());
            self.fail_waiters(|| failure.to_error());
            return;
        }
        if self.attempts >= self.options.max_reconnect_attempts {
            log::warn!(
                "realtime.reconnect.exhausted url={} attempts={}",
                self.options.url,
                self.attempts
            );
            self.set_state(ConnectionState::Disconnected);
            self.fail_waiters(|| failure.to_error());
            return;
        }

        self.attempts += 1;
        self.metrics.reconnect_count += 1;
        self.timers
            .arm(TimerKind::Reconnect, self.options.reconnect_interval);
        log::info!(
            "realtime.reconnect.scheduled url={} attempt={}/{} in_ms={}",
            self.options.url,
            self.attempts,
            self.options.max_reconnect_attempts,
            millis(self.options.reconnect_interval)
        );
        self.set_state(ConnectionState::Reconnecting);
    }

    fn fail_waiters(&mut self, make: impl Fn() -> ManagerError) {
        self.publish();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(make()));
        }
    }

    // ---- transport events ----------------------------------------------

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_frame(&text),
            TransportEvent::Close { code, reason } => {
                log::warn!(
                    "realtime.close url={} code={} reason={} state={}",
                    self.options.url,
                    code,
                    reason,
                    self.state
                );
                self.teardown_transport();
                self.timers.clear_all();
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(Failure::Closed { code, reason });
            }
            TransportEvent::Error(e) => {
                log::error!("realtime.error url={} err={}", self.options.url, e);
                self.metrics.error_count += 1;
                self.teardown_transport();
                self.timers.clear_all();
                self.set_state(ConnectionState::Error);
                self.schedule_reconnect(Failure::Errored(e));
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            log::debug!("realtime.open.ignored state={}", self.state);
            return;
        }
        self.timers.clear(TimerKind::ConnectTimeout);
        self.attempts = 0;
        self.metrics.connect_time = Some(now_millis());
        self.set_state(ConnectionState::Connected);
        log::info!(
            "realtime.open url={} connection_id={} queued={}",
            self.options.url,
            self.connection_id.as_deref().unwrap_or("-"),
            self.queue.len()
        );

        for task_id in self.subscribers.task_ids() {
            if !self.announce(task_id) {
                return;
            }
        }
        self.flush_queue();

        if self.state == ConnectionState::Connected {
            self.timers
                .arm(TimerKind::Heartbeat, self.options.heartbeat_interval);
            self.publish();
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Sends `subscribe` for `task_id` at most once per transport. Returns
    /// `false` if the write failed and the transport was torn down.
    fn announce(&mut self, task_id: String) -> bool {
        if self.state != ConnectionState::Connected
            || !self.subscribers.has_task(&task_id)
            || self.announced.contains(&task_id)
        {
            return true;
        }
        if !self.send_control(&protocol::subscribe_frame(&task_id)) {
            return false;
        }
        self.announced.insert(task_id);
        true
    }

    fn on_frame(&mut self, text: &str) {
        let msg = match protocol::parse_inbound(text) {
            Ok(msg) => msg,
            Err(e) => {
                self.metrics.error_count += 1;
                log::warn!(
                    "realtime.frame.malformed url={} len={} err={}",
                    self.options.url,
                    text.len(),
                    e
                );
                return;
            }
        };

        if msg.kind.is_heartbeat() {
            self.on_heartbeat_frame(msg.kind);
            return;
        }

        let now = now_millis();
        self.metrics.message_count += 1;
        self.metrics.last_message_time = Some(now);
        self.rearm_heartbeat();

        let task_id = msg.task_id.clone().or_else(|| self.current_task_id.clone());
        let data = RealtimeData::from_inbound(msg, task_id.as_deref(), now);
        self.trace(format_args!(
            "realtime.message kind={} task_id={}",
            data.kind.as_str(),
            data.task_id().unwrap_or("-")
        ));
        self.subscribers.dispatch(&data);
    }

    fn on_heartbeat_frame(&mut self, kind: MessageKind) {
        if kind == MessageKind::Pong {
            self.trace(format_args!("realtime.pong url={}", self.options.url));
            self.timers.clear(TimerKind::HeartbeatTimeout);
            self.timers
                .arm(TimerKind::Heartbeat, self.options.heartbeat_interval);
        } else {
            self.trace(format_args!("realtime.ping.recv url={}", self.options.url));
            if self.send_control(&protocol::pong_frame()) {
                self.rearm_heartbeat();
            }
        }
    }

    /// Inbound traffic resets the inactivity window unless a ping is in flight.
    fn rearm_heartbeat(&mut self) {
        if self.state == ConnectionState::Connected
            && !self.timers.is_armed(TimerKind::HeartbeatTimeout)
        {
            self.timers
                .arm(TimerKind::Heartbeat, self.options.heartbeat_interval);
        }
    }

    // ---- timers --------------------------------------------------------

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::ConnectTimeout => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                log::warn!(
                    "realtime.connect.timeout url={} after_ms={}",
                    self.options.url,
                    millis(self.options.connection_timeout)
                );
                self.teardown_transport();
                self.set_state(ConnectionState::Timeout);
                self.schedule_reconnect(Failure::TimedOut);
            }
            TimerKind::Heartbeat => {
                if self.state != ConnectionState::Connected {
                    return;
                }
                self.trace(format_args!("realtime.ping.send url={}", self.options.url));
                if self.send_control(&protocol::ping_frame()) {
                    self.timers
                        .arm(TimerKind::HeartbeatTimeout, self.options.heartbeat_timeout);
                }
            }
            TimerKind::HeartbeatTimeout => {
                if self.state != ConnectionState::Connected {
                    return;
                }
                log::warn!(
                    "realtime.heartbeat.stalled url={} connection_id={}",
                    self.options.url,
                    self.connection_id.as_deref().unwrap_or("-")
                );
                self.teardown_transport();
                self.set_state(ConnectionState::Timeout);
                self.schedule_reconnect(Failure::TimedOut);
            }
            TimerKind::Reconnect => {
                if self.state == ConnectionState::Reconnecting {
                    self.open_transport();
                }
            }
        }
    }

    // ---- outbound ------------------------------------------------------

    fn transmit(&mut self, frame: &str) -> std::result::Result<(), TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        transport.send(frame)?;
        Ok(())
    }

    /// Sends a protocol frame that is never queued or counted. A failed write
    /// is treated like a transport error.
    fn send_control(&mut self, frame: &str) -> bool {
        match self.transmit(frame) {
            Ok(()) => true,
            Err(e) => {
                self.on_transport(TransportEvent::Error(e.to_string()));
                false
            }
        }
    }

    /// A failed write keeps the frame for the next connection and then takes
    /// the same path as a transport error.
    fn send_or_queue(&mut self, frame: String) -> SendOutcome {
        let mut write_error = None;
        if self.state == ConnectionState::Connected {
            match self.transmit(&frame) {
                Ok(()) => {
                    self.metrics.message_count += 1;
                    self.trace(format_args!("realtime.send len={}", frame.len()));
                    return SendOutcome::Sent;
                }
                Err(e) => write_error = Some(e),
            }
        }

        let outcome = self.enqueue(frame);
        if let Some(e) = write_error {
            self.on_transport(TransportEvent::Error(e.to_string()));
        }
        outcome
    }

    fn enqueue(&mut self, frame: String) -> SendOutcome {
        if self.queue.push(frame) {
            SendOutcome::Queued
        } else {
            self.metrics.dropped_count += 1;
            log::debug!(
                "realtime.send.dropped url={} queued={}",
                self.options.url,
                self.queue.len()
            );
            SendOutcome::Dropped
        }
    }

    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let mut flushed = 0usize;
        while self.state == ConnectionState::Connected {
            let Some(frame) = self.queue.pop() else {
                break;
            };
            if let Err(e) = self.transmit(&frame) {
                self.queue.requeue(frame);
                self.on_transport(TransportEvent::Error(e.to_string()));
                break;
            }
            self.metrics.message_count += 1;
            flushed += 1;
        }
        log::info!(
            "realtime.queue.flushed url={} sent={} remaining={}",
            self.options.url,
            flushed,
            self.queue.len()
        );
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Close {
            code: CLOSE_ABNORMAL,
            reason: "transport dropped".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn timer_fired(next: Option<(TimerKind, Instant)>) -> TimerKind {
    match next {
        Some((kind, at)) => {
            tokio::time::sleep_until(at).await;
            kind
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryPeer};

    fn driver() -> (Driver, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (connector, peers) = MemoryConnector::new();
        let (_commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let driver = Driver::new(
            ConnectionOptions::new("ws://driver.test"),
            Arc::new(connector),
            command_rx,
            snapshot_tx,
            SubscriberRegistry::new(),
        );
        (driver, peers)
    }

    fn open(driver: &mut Driver, peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
        let (reply, _) = oneshot::channel();
        driver.on_command(Command::Connect { task_id: None, reply });
        let peer = peers.try_recv().unwrap();
        driver.on_transport(TransportEvent::Open);
        assert_eq!(driver.state, ConnectionState::Connected);
        peer
    }

    #[tokio::test]
    async fn late_announce_after_replay_is_not_resent() {
        let (mut driver, mut peers) = driver();
        driver
            .subscribers
            .add(Topic::Task("t".into()), Arc::new(|_: &RealtimeData| {}));

        // the registry insert landed before the open, its Announce after
        let mut peer = open(&mut driver, &mut peers);
        driver.on_command(Command::Announce("t".into()));
        assert_eq!(peer.drain_sent(), vec![protocol::subscribe_frame("t")]);

        // a new transport announces again exactly once
        driver.on_transport(TransportEvent::Close {
            code: 1001,
            reason: String::new(),
        });
        driver.on_timer(TimerKind::Reconnect);
        let mut second = peers.try_recv().unwrap();
        driver.on_transport(TransportEvent::Open);
        driver.on_command(Command::Announce("t".into()));
        assert_eq!(second.drain_sent(), vec![protocol::subscribe_frame("t")]);
        assert!(peer.drain_sent().is_empty());
    }

    #[tokio::test]
    async fn announce_and_retract_track_the_wire_state() {
        let (mut driver, mut peers) = driver();
        let mut peer = open(&mut driver, &mut peers);

        // subscriber gone before its Announce was handled
        driver.on_command(Command::Announce("gone".into()));
        driver.on_command(Command::Retract("gone".into()));
        assert!(peer.drain_sent().is_empty());

        driver
            .subscribers
            .add(Topic::Task("t".into()), Arc::new(|_: &RealtimeData| {}));
        driver.on_command(Command::Announce("t".into()));
        driver.subscribers.remove_task("t");
        driver.on_command(Command::Retract("t".into()));
        driver.on_command(Command::Retract("t".into()));
        assert_eq!(
            peer.drain_sent(),
            vec![
                protocol::subscribe_frame("t"),
                protocol::unsubscribe_frame("t")
            ]
        );
    }
}
