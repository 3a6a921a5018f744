//! Notification client: drives the [`Machine`] against a real transport.
//!
//! One background task per client owns the live transport handle, the pending
//! reconnect timer and the health watchdog. Commands, transport signals and
//! timer firings all go through that task, so transitions never overlap.

use std::{collections::VecDeque, pin::Pin};

use futures_util::future;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, Sleep},
};

use crate::{
    config::ClientConfig,
    handler::Handlers,
    machine::{ConnectionState, Effect, Machine, Signal},
    policy::ReconnectPolicy,
    transport::{CreateClientError, SseTransport, Transport, TransportHandle, TransportSignal},
};

/// Snapshot of the client connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// connection state
    pub state: ConnectionState,
    /// failed attempts since last successful open
    pub attempts: u32,
}

impl Status {
    /// true iff the stream is open
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
    RetryNow,
}

impl From<Command> for Signal {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Start => Signal::Start,
            Command::Stop => Signal::Stop,
            Command::RetryNow => Signal::RetryNow,
        }
    }
}

/// Live notification client.
///
/// Created idle; call [`start`](Self::start) to connect. Dropping the client
/// stops it.
#[derive(Debug)]
pub struct NotificationClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    policy: ReconnectPolicy,
}

impl NotificationClient {
    /// Create a client on given transport.
    ///
    /// # Panics
    ///
    /// Must be called within a tokio runtime.
    pub fn new<T>(config: ClientConfig, transport: T, handlers: Handlers) -> Self
    where
        T: Transport + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status::default());

        let policy = config.reconnect_policy();
        let driver = Driver {
            machine: Machine::new(policy, config.decorated()),
            config,
            transport: Box::new(transport),
            handlers,
            link: None,
            reconnect: None,
            status: status_tx,
        };

        tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            status,
            policy,
        }
    }

    /// Create a client on the http server-sent events transport
    pub fn with_sse(config: ClientConfig, handlers: Handlers) -> Result<Self, CreateClientError> {
        Ok(Self::new(config, SseTransport::new()?, handlers))
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            log::warn!("Notification driver gone, {:?} dropped", cmd);
        }
    }

    /// Connect, unless already connecting or open
    pub fn start(&self) {
        self.send(Command::Start)
    }

    /// Close the stream and cancel any pending reconnect
    pub fn stop(&self) {
        self.send(Command::Stop)
    }

    /// Reconnect immediately, skipping the backoff delay
    pub fn retry_now(&self) {
        self.send(Command::RetryNow)
    }

    /// current status
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// true iff the stream is open
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// failed attempts since last successful open
    pub fn attempt_count(&self) -> u32 {
        self.status().attempts
    }

    /// reconnect policy in use
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Watch status changes, e.g. for a status badge
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }
}

struct Driver {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    handlers: Handlers,
    machine: Machine,
    link: Option<Box<dyn TransportHandle>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    status: watch::Sender<Status>,
}

async fn next_signal(link: &mut Option<Box<dyn TransportHandle>>) -> Option<TransportSignal> {
    match link {
        Some(handle) => handle.next_signal().await,
        None => future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("Notification driver start: {}", self.config.stream_url());

        let period = self.config.health_check();
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let signal = tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        log::trace!("Received command {:?}", cmd);
                        Signal::from(cmd)
                    }
                    None => {
                        log::debug!("Client dropped, stop driver");
                        self.dispatch(Signal::Stop);
                        break;
                    }
                },

                _ = reconnect_due(&mut self.reconnect) => {
                    log::trace!("Reconnect timer fired");
                    self.reconnect = None;
                    Signal::ReconnectDue
                }

                signal = next_signal(&mut self.link) => match signal {
                    Some(TransportSignal::Open) => Signal::Opened,
                    Some(TransportSignal::Message(payload)) => Signal::Message(payload),
                    Some(TransportSignal::Error) => Signal::Failed,
                    None => {
                        log::debug!("Transport signals ended without error");
                        Signal::Failed
                    }
                },

                _ = health.tick(), if self.machine.is_active() => {
                    Signal::HealthCheck(self.link.as_ref().map(|handle| handle.ready_state()))
                }
            };

            self.dispatch(signal);
        }
    }

    fn dispatch(&mut self, signal: Signal) {
        let mut queue = VecDeque::from([signal]);

        while let Some(signal) = queue.pop_front() {
            for effect in self.machine.apply(signal) {
                if let Some(follow) = self.perform(effect) {
                    queue.push_back(follow);
                }
            }
        }

        let now = Status {
            state: self.machine.state(),
            attempts: self.machine.attempts(),
        };
        self.status.send_if_modified(|status| {
            if *status == now {
                false
            } else {
                log::trace!("Status {:?} -> {:?}", status, now);
                *status = now;
                true
            }
        });
    }

    fn perform(&mut self, effect: Effect) -> Option<Signal> {
        match effect {
            Effect::Connect => match self.transport.open(self.config.stream_url()) {
                Ok(handle) => {
                    self.link = Some(handle);
                }
                Err(err) => {
                    log::warn!("Open notification stream failed: {}", err);
                    return Some(Signal::Failed);
                }
            },
            Effect::Disconnect => {
                if let Some(mut handle) = self.link.take() {
                    handle.close();
                }
            }
            Effect::ScheduleReconnect(delay) => {
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => {
                self.reconnect = None;
            }
            Effect::Toast(toast) => {
                self.handlers
                    .toast
                    .on_toast(toast.severity, &toast.message);
            }
            Effect::Entity(update) => {
                self.handlers.entity_event(&update);
            }
            Effect::Invalidate(key) => {
                self.handlers.invalidator.invalidate(&key);
            }
        }

        None
    }
}
