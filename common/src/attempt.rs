use std::sync::{Condvar, Mutex};

use log::{debug, info, warn};

use crate::error::SetupError;

/// Driver disconnect reason: no access point with the requested SSID.
pub const FAIL_REASON_NO_AP_FOUND: u8 = 201;
/// Driver disconnect reason: authentication with the given PSK failed.
pub const FAIL_REASON_AUTH_FAIL: u8 = 202;

/// Lifecycle of one station connection attempt. `Failed` and
/// `DhcpSuccess` are terminal; `Initial` must never be observed again
/// once the attempt has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAttemptState {
    Initial,
    StartedConnection,
    Failed,
    ConnectSuccess,
    DhcpSuccess,
}

/// A driver notification, as delivered by the WiFi/IP event callbacks.
/// The callbacks construct one of these and hand it to
/// [`ConnAttempt::apply`]; all interpretation happens on the waiter side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    Connected,
    Disconnected { reason: u8 },
    GotIp,
}

struct Synced {
    state: ConnAttemptState,
    fail_reason: u8,
}

/// State shared between the driver's event-dispatch context and the
/// control flow for the duration of one connection attempt. Never reused:
/// each retry gets a fresh instance.
pub struct ConnAttempt {
    synced: Mutex<Synced>,
    state_changed: Condvar,
}

impl ConnAttempt {
    pub fn new() -> Self {
        Self {
            synced: Mutex::new(Synced {
                state: ConnAttemptState::Initial,
                fail_reason: 0,
            }),
            state_changed: Condvar::new(),
        }
    }

    /// Marks the attempt as started. Must be called exactly once, before
    /// the driver callbacks are wired up and the connect request is
    /// issued.
    pub fn start(&self) {
        let mut synced = self.synced.lock().unwrap();
        if synced.state != ConnAttemptState::Initial {
            panic!(
                "connection attempt started twice (state {:?})",
                synced.state
            );
        }
        synced.state = ConnAttemptState::StartedConnection;
        drop(synced);
        self.state_changed.notify_all();
    }

    /// Applies one driver event: mutate under the mutex, then signal.
    /// Events that have no transition from the current state are ignored,
    /// except in `Initial` — callbacks are only registered after
    /// [`start`](Self::start), so an event there is a logic error.
    pub fn apply(&self, event: StationEvent) {
        let mut synced = self.synced.lock().unwrap();
        let next = match (synced.state, event) {
            (ConnAttemptState::Initial, event) => {
                panic!("station event {event:?} delivered before attempt start");
            }
            (ConnAttemptState::StartedConnection, StationEvent::Connected) => {
                Some(ConnAttemptState::ConnectSuccess)
            }
            (ConnAttemptState::StartedConnection, StationEvent::Disconnected { reason })
            | (ConnAttemptState::ConnectSuccess, StationEvent::Disconnected { reason }) => {
                synced.fail_reason = reason;
                Some(ConnAttemptState::Failed)
            }
            (ConnAttemptState::ConnectSuccess, StationEvent::GotIp) => {
                Some(ConnAttemptState::DhcpSuccess)
            }
            (state, event) => {
                debug!("ignoring station event {event:?} in state {state:?}");
                None
            }
        };
        if let Some(next) = next {
            synced.state = next;
        }
        drop(synced);
        self.state_changed.notify_all();
    }

    pub fn state(&self) -> ConnAttemptState {
        self.synced.lock().unwrap().state
    }

    pub fn fail_reason(&self) -> u8 {
        self.synced.lock().unwrap().fail_reason
    }

    /// Blocks until the state differs from `seen`, the caller's last
    /// observation, and returns the new state. Returns immediately when
    /// the state has already moved on, so an event landing between the
    /// caller's inspection and this call is never lost. Spurious wakeups
    /// re-check the condition and keep waiting.
    pub fn wait_for_change(&self, seen: ConnAttemptState) -> ConnAttemptState {
        let mut synced = self.synced.lock().unwrap();
        while synced.state == seen {
            synced = self.state_changed.wait(synced).unwrap();
        }
        synced.state
    }

    #[cfg(test)]
    fn force_state(&self, state: ConnAttemptState) {
        self.synced.lock().unwrap().state = state;
    }
}

impl Default for ConnAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// How one attempt ended, from the control flow's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    InvalidSsid,
    InvalidPassword,
    TechnicalFailure,
}

impl ConnectOutcome {
    pub fn from_fail_reason(reason: u8) -> Self {
        match reason {
            FAIL_REASON_NO_AP_FOUND => Self::InvalidSsid,
            FAIL_REASON_AUTH_FAIL => Self::InvalidPassword,
            _ => Self::TechnicalFailure,
        }
    }

    pub fn into_setup_error(self) -> SetupError {
        match self {
            Self::Connected => SetupError::None,
            Self::InvalidSsid => SetupError::SsidIncorrect,
            Self::InvalidPassword => SetupError::PasswordIncorrect,
            Self::TechnicalFailure => SetupError::ConnectFailed,
        }
    }
}

/// Drives a started attempt to a terminal state: wait for the driver to
/// advance the FSM, log progress, and classify the result. Observing
/// `Initial` here is a fatal invariant violation.
pub fn run_to_outcome(attempt: &ConnAttempt) -> ConnectOutcome {
    let mut observed = attempt.state();
    loop {
        match observed {
            ConnAttemptState::Initial => {
                panic!("connection attempt observed in initial state while driving it");
            }
            ConnAttemptState::StartedConnection => {
                info!("started connecting to network...");
                observed = attempt.wait_for_change(observed);
            }
            ConnAttemptState::ConnectSuccess => {
                info!("connected to the access point, waiting for a lease");
                observed = attempt.wait_for_change(observed);
            }
            ConnAttemptState::Failed => {
                let reason = attempt.fail_reason();
                warn!(
                    "connection to access point failed: {}",
                    describe_fail_reason(reason)
                );
                return ConnectOutcome::from_fail_reason(reason);
            }
            ConnAttemptState::DhcpSuccess => {
                info!("got IP from network");
                return ConnectOutcome::Connected;
            }
        }
    }
}

/// Maps a driver disconnect reason code to its symbolic name for logging.
pub fn describe_fail_reason(reason: u8) -> &'static str {
    match reason {
        1 => "UNSPECIFIED",
        2 => "AUTH_EXPIRE",
        3 => "AUTH_LEAVE",
        4 => "ASSOC_EXPIRE",
        5 => "ASSOC_TOOMANY",
        6 => "NOT_AUTHED",
        7 => "NOT_ASSOCED",
        8 => "ASSOC_LEAVE",
        9 => "ASSOC_NOT_AUTHED",
        10 => "DISASSOC_PWRCAP_BAD",
        11 => "DISASSOC_SUPCHAN_BAD",
        13 => "IE_INVALID",
        14 => "MIC_FAILURE",
        15 => "4WAY_HANDSHAKE_TIMEOUT",
        16 => "GROUP_KEY_UPDATE_TIMEOUT",
        17 => "IE_IN_4WAY_DIFFERS",
        18 => "GROUP_CIPHER_INVALID",
        19 => "PAIRWISE_CIPHER_INVALID",
        20 => "AKMP_INVALID",
        21 => "UNSUPP_RSN_IE_VERSION",
        22 => "INVALID_RSN_IE_CAP",
        23 => "802_1X_AUTH_FAILED",
        24 => "CIPHER_SUITE_REJECTED",
        200 => "BEACON_TIMEOUT",
        201 => "NO_AP_FOUND",
        202 => "AUTH_FAIL",
        203 => "ASSOC_FAIL",
        204 => "HANDSHAKE_TIMEOUT",
        _ => "unknown reason code",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn successful_attempt_reaches_dhcp_success() {
        let attempt = Arc::new(ConnAttempt::new());
        attempt.start();

        let driver = attempt.clone();
        let events = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            driver.apply(StationEvent::Connected);
            thread::sleep(Duration::from_millis(20));
            driver.apply(StationEvent::GotIp);
        });

        let outcome = run_to_outcome(&attempt);
        events.join().unwrap();

        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(attempt.state(), ConnAttemptState::DhcpSuccess);
    }

    #[test]
    fn disconnect_with_no_ap_found_maps_to_invalid_ssid() {
        let attempt = Arc::new(ConnAttempt::new());
        attempt.start();

        let driver = attempt.clone();
        let events = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            driver.apply(StationEvent::Disconnected {
                reason: FAIL_REASON_NO_AP_FOUND,
            });
        });

        let outcome = run_to_outcome(&attempt);
        events.join().unwrap();

        assert_eq!(outcome, ConnectOutcome::InvalidSsid);
        assert_eq!(attempt.fail_reason(), FAIL_REASON_NO_AP_FOUND);
    }

    #[test]
    fn disconnect_after_association_maps_by_reason() {
        let attempt = ConnAttempt::new();
        attempt.start();
        attempt.apply(StationEvent::Connected);
        attempt.apply(StationEvent::Disconnected {
            reason: FAIL_REASON_AUTH_FAIL,
        });

        assert_eq!(run_to_outcome(&attempt), ConnectOutcome::InvalidPassword);
    }

    #[test]
    fn wait_for_change_returns_immediately_when_state_already_moved() {
        let attempt = ConnAttempt::new();
        attempt.start();
        attempt.apply(StationEvent::Connected);

        // Caller last saw StartedConnection; the change must not be lost.
        let state = attempt.wait_for_change(ConnAttemptState::StartedConnection);
        assert_eq!(state, ConnAttemptState::ConnectSuccess);
    }

    #[test]
    fn ignored_event_does_not_release_a_waiter() {
        let attempt = Arc::new(ConnAttempt::new());
        attempt.start();

        let released = Arc::new(AtomicBool::new(false));
        let waiter_attempt = attempt.clone();
        let waiter_released = released.clone();
        let waiter = thread::spawn(move || {
            let state = waiter_attempt.wait_for_change(ConnAttemptState::StartedConnection);
            waiter_released.store(true, Ordering::SeqCst);
            state
        });

        // GotIp has no transition out of StartedConnection; the signal it
        // produces must look like a spurious wakeup to the waiter.
        thread::sleep(Duration::from_millis(20));
        attempt.apply(StationEvent::GotIp);
        thread::sleep(Duration::from_millis(50));
        assert!(!released.load(Ordering::SeqCst));

        attempt.apply(StationEvent::Connected);
        assert_eq!(waiter.join().unwrap(), ConnAttemptState::ConnectSuccess);
    }

    #[test]
    fn events_in_terminal_states_are_ignored() {
        let attempt = ConnAttempt::new();
        attempt.start();
        attempt.apply(StationEvent::Disconnected { reason: 1 });
        attempt.apply(StationEvent::Connected);
        attempt.apply(StationEvent::GotIp);

        assert_eq!(attempt.state(), ConnAttemptState::Failed);
        assert_eq!(attempt.fail_reason(), 1);
    }

    #[test]
    #[should_panic(expected = "initial state")]
    fn observing_initial_while_driving_is_fatal() {
        let attempt = ConnAttempt::new();
        attempt.start();
        attempt.force_state(ConnAttemptState::Initial);

        run_to_outcome(&attempt);
    }

    #[test]
    #[should_panic(expected = "before attempt start")]
    fn event_before_start_is_fatal() {
        let attempt = ConnAttempt::new();
        attempt.apply(StationEvent::Connected);
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn double_start_is_fatal() {
        let attempt = ConnAttempt::new();
        attempt.start();
        attempt.start();
    }

    #[test]
    fn unknown_fail_reason_is_a_technical_failure() {
        assert_eq!(
            ConnectOutcome::from_fail_reason(200),
            ConnectOutcome::TechnicalFailure
        );
        assert_eq!(
            ConnectOutcome::TechnicalFailure.into_setup_error(),
            SetupError::ConnectFailed
        );
    }
}
