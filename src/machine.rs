//! Connection state machine.
//!
//! [`Machine`] does no IO. Every lifecycle signal (commands from the caller,
//! transport callbacks, timer firings) is fed through [`Machine::apply`], which
//! updates the state and returns the [`Effect`]s the driver must perform, in order.

use std::time::Duration;

use crate::{
    notification::{EntityUpdate, Notification, QueryKey, Toast},
    policy::ReconnectPolicy,
    transport::ReadyState,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// never started
    #[default]
    Idle,
    /// transport opened, waiting for it to be established
    Connecting,
    /// stream is live
    Open,
    /// not usable, either stopped, failed, or waiting for a reconnect
    Closed,
}

/// Input of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// caller asks to connect
    Start,
    /// caller asks to tear everything down
    Stop,
    /// caller asks to reconnect right now
    RetryNow,
    /// transport established
    Opened,
    /// transport delivered a text payload
    Message(String),
    /// transport failed, or could not be constructed
    Failed,
    /// the pending reconnect delay elapsed
    ReconnectDue,
    /// periodic watchdog observation of the live transport
    HealthCheck(Option<ReadyState>),
}

/// Output of the state machine, to be performed by the driver in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// open a new transport to the stream url
    Connect,
    /// close and discard the live transport
    Disconnect,
    /// arm the reconnect timer
    ScheduleReconnect(Duration),
    /// disarm the reconnect timer
    CancelReconnect,
    /// show feedback to user
    Toast(Toast),
    /// forward entity update to listener
    Entity(EntityUpdate),
    /// mark cached query stale
    Invalidate(QueryKey),
}

/// The notification client state machine.
#[derive(Debug, Clone)]
pub struct Machine {
    policy: ReconnectPolicy,
    decorate_toasts: bool,
    state: ConnectionState,
    attempts: u32,
    active: bool,
    has_transport: bool,
    reconnect_pending: bool,
}

impl Machine {
    /// Create a machine in [`ConnectionState::Idle`]
    pub fn new(policy: ReconnectPolicy, decorate_toasts: bool) -> Self {
        Self {
            policy,
            decorate_toasts,
            state: ConnectionState::Idle,
            attempts: 0,
            active: false,
            has_transport: false,
            reconnect_pending: false,
        }
    }

    /// current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// current attempt counter
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// true between start and stop
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// true if a reconnect timer is armed
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// true if a transport handle is live
    pub fn has_transport(&self) -> bool {
        self.has_transport
    }

    /// true if retries ran out and only a manual retry resumes
    pub fn exhausted(&self) -> bool {
        self.state == ConnectionState::Closed && self.policy.exhausted(self.attempts)
    }

    /// Feed one signal, returning effects to perform
    pub fn apply(&mut self, signal: Signal) -> Vec<Effect> {
        log::trace!("Apply {:?} in state {:?}", signal, self.state);

        let mut effects = Vec::new();

        match signal {
            Signal::Start => self.on_start(&mut effects),
            Signal::Stop => self.on_stop(&mut effects),
            Signal::RetryNow => {
                log::info!("Manual reconnect requested");
                self.connect(&mut effects);
            }
            Signal::Opened => self.on_opened(),
            Signal::Message(payload) => self.on_message(&payload, &mut effects),
            Signal::Failed => self.on_failed(&mut effects),
            Signal::ReconnectDue => self.on_reconnect_due(&mut effects),
            Signal::HealthCheck(ready) => self.on_health_check(ready, &mut effects),
        }

        effects
    }

    /// Shared by start, manual retry and timer. Always drops the pending timer
    /// and the old transport before opening the new one.
    fn connect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.has_transport {
            effects.push(Effect::Disconnect);
        }

        log::debug!(
            "Connect attempt {}/{}",
            self.attempts + 1,
            self.policy.max_attempts()
        );

        self.active = true;
        self.has_transport = true;
        self.state = ConnectionState::Connecting;
        effects.push(Effect::Connect);
    }

    fn on_start(&mut self, effects: &mut Vec<Effect>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            log::debug!("Already {:?}, start ignored", self.state);
            return;
        }
        self.connect(effects);
    }

    fn on_stop(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.has_transport {
            self.has_transport = false;
            effects.push(Effect::Disconnect);
        }
        if self.active {
            log::info!("Notification client stopped");
        }
        self.active = false;
        self.state = ConnectionState::Closed;
    }

    fn mark_open(&mut self) {
        if self.state != ConnectionState::Open {
            log::info!("Notification stream open");
        }
        self.state = ConnectionState::Open;
        self.attempts = 0;
    }

    fn on_opened(&mut self) {
        if !self.has_transport {
            log::debug!("Open signal without live transport, ignored");
            return;
        }
        self.mark_open();
    }

    fn on_message(&mut self, payload: &str, effects: &mut Vec<Effect>) {
        if !self.has_transport {
            log::debug!("Message without live transport, ignored");
            return;
        }

        log::trace!("Received payload: {}", payload);

        let notification = match Notification::decode(payload) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("Drop malformed notification: {}", err);
                return;
            }
        };

        match notification {
            Notification::ConnectionAck(message) => {
                log::debug!("Connection acknowledged: {:?}", message);
                self.mark_open();
            }
            Notification::EntityUpdate(update) => {
                if self.state != ConnectionState::Open {
                    log::debug!("Entity update received in {:?}, now open", self.state);
                    self.state = ConnectionState::Open;
                }

                log::debug!(
                    "Entity {} is now {} ({})",
                    update.entity_id,
                    update.status,
                    update.title
                );

                let toast = update.toast(self.decorate_toasts);
                let keys = update.stale_keys();

                effects.push(Effect::Entity(update));
                effects.push(Effect::Toast(toast));
                effects.extend(keys.into_iter().map(Effect::Invalidate));
            }
            Notification::Ignored => {
                log::debug!("Notification of unknown shape ignored");
            }
        }
    }

    fn on_failed(&mut self, effects: &mut Vec<Effect>) {
        if !self.active || !self.has_transport {
            log::debug!("Failure without live transport, ignored");
            return;
        }

        self.state = ConnectionState::Closed;
        self.has_transport = false;
        effects.push(Effect::Disconnect);

        self.attempts = self.attempts.saturating_add(1);

        if self.policy.exhausted(self.attempts) {
            log::warn!(
                "Max reconnect attempts ({}) reached",
                self.policy.max_attempts()
            );
            effects.push(Effect::Toast(Toast::retries_exhausted()));
            return;
        }

        let delay = self.policy.delay(self.attempts);
        log::warn!(
            "Connection failed, reconnecting in {:?} (attempt {}/{})",
            delay,
            self.attempts,
            self.policy.max_attempts()
        );

        self.reconnect_pending = true;
        effects.push(Effect::ScheduleReconnect(delay));

        if self.attempts == 1 {
            effects.push(Effect::Toast(Toast::connection_lost()));
        }
    }

    fn on_reconnect_due(&mut self, effects: &mut Vec<Effect>) {
        if !self.active || !self.reconnect_pending {
            log::debug!("Stale reconnect timer, ignored");
            return;
        }
        self.reconnect_pending = false;
        self.connect(effects);
    }

    fn on_health_check(&mut self, ready: Option<ReadyState>, effects: &mut Vec<Effect>) {
        if !self.active || self.reconnect_pending {
            return;
        }

        log::trace!("Health check, ready state {:?}", ready);

        match ready {
            Some(ReadyState::Open) => {
                if self.state != ConnectionState::Open {
                    log::debug!("Transport reports open, state was {:?}", self.state);
                    self.state = ConnectionState::Open;
                }
            }
            Some(ReadyState::Closed) => {
                log::warn!("Transport silently closed, treat as failure");
                self.on_failed(effects);
            }
            Some(ReadyState::Connecting) | None => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::notification::Severity;

    fn machine() -> Machine {
        Machine::new(ReconnectPolicy::default(), false)
    }

    fn toasts(effects: &[Effect]) -> Vec<&Toast> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Toast(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn scheduled(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect(d) => Some(*d),
            _ => None,
        })
    }

    #[test]
    fn test_initial_state_idle() {
        let m = machine();
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.attempts(), 0);
        assert!(!m.is_active());
    }

    #[test]
    fn test_start_connects_once() {
        let mut m = machine();

        assert_eq!(m.apply(Signal::Start), vec![Effect::Connect]);
        assert_eq!(m.state(), ConnectionState::Connecting);

        assert!(m.apply(Signal::Start).is_empty());

        m.apply(Signal::Opened);
        assert!(m.apply(Signal::Start).is_empty());
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_open_success() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Opened);

        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn test_backoff_growth() {
        let mut m = machine();
        m.apply(Signal::Start);

        let expect = [2000, 4000, 8000, 10000];
        for (i, ms) in expect.iter().enumerate() {
            let effects = m.apply(Signal::Failed);
            assert_eq!(m.attempts(), i as u32 + 1);
            assert_eq!(scheduled(&effects), Some(Duration::from_millis(*ms)));
            assert_eq!(m.apply(Signal::ReconnectDue), vec![Effect::Connect]);
        }

        let effects = m.apply(Signal::Failed);
        assert_eq!(m.attempts(), 5);
        assert_eq!(scheduled(&effects), None);
        assert!(m.exhausted());
    }

    #[test]
    fn test_reset_on_open_and_ack() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Failed);
        m.apply(Signal::ReconnectDue);
        m.apply(Signal::Failed);
        m.apply(Signal::ReconnectDue);
        assert_eq!(m.attempts(), 2);

        m.apply(Signal::Opened);
        assert_eq!(m.attempts(), 0);

        m.apply(Signal::Failed);
        m.apply(Signal::ReconnectDue);
        assert_eq!(m.attempts(), 1);

        m.apply(Signal::Message(
            r#"{"type":"connection","message":"hi"}"#.to_string(),
        ));
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_stop_idempotent() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Failed);
        assert!(m.reconnect_pending());

        let effects = m.apply(Signal::Stop);
        assert_eq!(effects, vec![Effect::CancelReconnect]);
        assert_eq!(m.state(), ConnectionState::Closed);

        assert!(m.apply(Signal::Stop).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);

        // a timer that slipped through after stop does nothing
        assert!(m.apply(Signal::ReconnectDue).is_empty());
    }

    #[test]
    fn test_stop_from_idle() {
        let mut m = machine();
        assert!(m.apply(Signal::Stop).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_stop_open_disconnects() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Opened);

        assert_eq!(m.apply(Signal::Stop), vec![Effect::Disconnect]);
        assert!(!m.has_transport());
    }

    #[test]
    fn test_message_implies_open() {
        let mut m = machine();
        m.apply(Signal::Start);
        assert_eq!(m.state(), ConnectionState::Connecting);

        let effects = m.apply(Signal::Message(
            r#"{"imageId":"img1","status":"READY","title":"Sunset"}"#.to_string(),
        ));

        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(
            effects,
            vec![
                Effect::Entity(EntityUpdate {
                    entity_id: "img1".to_string(),
                    status: crate::notification::EntityStatus::Ready,
                    title: "Sunset".to_string(),
                }),
                Effect::Toast(Toast::new(Severity::Success, "Sunset is ready")),
                Effect::Invalidate(QueryKey::Collection),
                Effect::Invalidate(QueryKey::Entity("img1".to_string())),
            ]
        );
    }

    #[test]
    fn test_malformed_payload_contained() {
        let mut m = machine();
        m.apply(Signal::Start);

        for payload in ["not json", "{}", r#"{"imageId":"img1"}"#, r#"{"status":"READY"}"#] {
            let effects = m.apply(Signal::Message(payload.to_string()));
            assert!(effects.is_empty(), "{} produced effects", payload);
            assert_eq!(m.state(), ConnectionState::Connecting);
        }
    }

    #[test]
    fn test_first_failure_toast_once() {
        let mut m = machine();
        m.apply(Signal::Start);

        let effects = m.apply(Signal::Failed);
        assert_eq!(toasts(&effects), vec![&Toast::connection_lost()]);

        m.apply(Signal::ReconnectDue);
        m.apply(Signal::Opened);
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_exhausted_toast_once_and_no_sixth_attempt() {
        let mut m = machine();
        m.apply(Signal::Start);

        let mut all = Vec::new();
        for _ in 0..5 {
            all.extend(m.apply(Signal::Failed));
            all.extend(m.apply(Signal::ReconnectDue));
        }

        let exhausted = toasts(&all)
            .into_iter()
            .filter(|t| **t == Toast::retries_exhausted())
            .count();
        assert_eq!(exhausted, 1);

        let connects = all.iter().filter(|e| **e == Effect::Connect).count();
        assert_eq!(connects, 4);
        assert!(!m.reconnect_pending());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_retry_now_cancels_pending_timer() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Failed);
        assert!(m.reconnect_pending());

        let effects = m.apply(Signal::RetryNow);
        assert_eq!(effects, vec![Effect::CancelReconnect, Effect::Connect]);
        assert!(!m.reconnect_pending());
        assert_eq!(m.attempts(), 1);

        assert!(m.apply(Signal::ReconnectDue).is_empty());
    }

    #[test]
    fn test_retry_now_replaces_live_transport() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Opened);

        assert_eq!(
            m.apply(Signal::RetryNow),
            vec![Effect::Disconnect, Effect::Connect]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_retry_now_resumes_after_exhaustion() {
        let mut m = machine();
        m.apply(Signal::Start);
        for _ in 0..5 {
            m.apply(Signal::Failed);
            m.apply(Signal::ReconnectDue);
        }
        assert!(m.exhausted());

        assert_eq!(m.apply(Signal::RetryNow), vec![Effect::Connect]);
        m.apply(Signal::Opened);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn test_health_check_closed_transport_fails() {
        let mut m = machine();
        m.apply(Signal::Start);
        m.apply(Signal::Opened);

        let effects = m.apply(Signal::HealthCheck(Some(ReadyState::Closed)));
        assert_eq!(m.attempts(), 1);
        assert_eq!(scheduled(&effects), Some(Duration::from_millis(2000)));

        // pending reconnect, no double increment
        assert!(m
            .apply(Signal::HealthCheck(Some(ReadyState::Closed)))
            .is_empty());
        assert_eq!(m.attempts(), 1);
    }

    #[test]
    fn test_health_check_open_heals_state() {
        let mut m = machine();
        m.apply(Signal::Start);

        assert!(m
            .apply(Signal::HealthCheck(Some(ReadyState::Open)))
            .is_empty());
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_health_check_ignored_when_stopped_or_exhausted() {
        let mut m = machine();
        assert!(m
            .apply(Signal::HealthCheck(Some(ReadyState::Closed)))
            .is_empty());

        m.apply(Signal::Start);
        for _ in 0..5 {
            m.apply(Signal::Failed);
            m.apply(Signal::ReconnectDue);
        }
        assert!(m.apply(Signal::HealthCheck(None)).is_empty());
        assert_eq!(m.attempts(), 5);
    }

    #[test]
    fn test_decorated_toasts() {
        let mut m = Machine::new(ReconnectPolicy::default(), true);
        m.apply(Signal::Start);

        let effects = m.apply(Signal::Message(
            r#"{"imageId":"img1","status":"FAILED","title":"Sunset"}"#.to_string(),
        ));
        assert_eq!(
            toasts(&effects),
            vec![&Toast::new(Severity::Error, "❌ Sunset processing failed")]
        );
    }
}
