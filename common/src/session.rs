use std::sync::{Condvar, Mutex};

use log::{debug, info};

use crate::error::SetupError;
use crate::netinfo::{parse_network_info, NetworkInfo};
use crate::render;
use crate::scan::NetworkRecord;

/// Coarse provisioning state, the single authoritative copy. The HTTP GET
/// handler branches on it to pick a page; the control flow blocks on it to
/// learn about submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    WaitingForInfo,
    WaitingForConnection,
    Failure,
    Success,
}

struct Synced {
    state: SetupState,
    error: SetupError,
    info: Option<NetworkInfo>,
}

/// State shared between the HTTP request-handling context and the control
/// flow for the lifetime of one provisioning run.
///
/// The scan result is attached once at creation and read-only afterwards;
/// everything else lives under the mutex. The condition variable wakes the
/// control flow when a submission has passed validation.
pub struct SetupSession {
    scan: Vec<NetworkRecord>,
    synced: Mutex<Synced>,
    release_to_connect: Condvar,
}

impl SetupSession {
    pub fn new(scan: Vec<NetworkRecord>) -> Self {
        Self {
            scan,
            synced: Mutex::new(Synced {
                state: SetupState::WaitingForInfo,
                error: SetupError::None,
                info: None,
            }),
            release_to_connect: Condvar::new(),
        }
    }

    pub fn scan(&self) -> &[NetworkRecord] {
        &self.scan
    }

    pub fn state(&self) -> SetupState {
        self.synced.lock().unwrap().state
    }

    pub fn error(&self) -> SetupError {
        self.synced.lock().unwrap().error
    }

    /// Parses and validates a raw POST body. On success the submission is
    /// stored and the state moves to `WaitingForConnection`; on any parse
    /// or validation error the state moves to `Failure` with the specific
    /// error recorded. Either way the release-to-connect condition is
    /// signaled exactly once, after the state mutation.
    pub fn fill_network_info(&self, raw_body: &str) {
        debug!("entering fill_network_info");
        let mut synced = self.synced.lock().unwrap();
        match parse_network_info(raw_body) {
            Ok(info) => {
                info!(
                    "parsed network info: ssid `{}`, target `{}`, device name `{}`",
                    info.ssid, info.target, info.devname
                );
                synced.info = Some(info);
                synced.error = SetupError::None;
                synced.state = SetupState::WaitingForConnection;
            }
            Err(error) => {
                info!("network info invalid: {error}");
                synced.error = error;
                synced.state = SetupState::Failure;
            }
        }
        drop(synced);

        debug!("signaling the release-to-connect condition");
        self.release_to_connect.notify_one();
    }

    /// Blocks the calling thread until a submission has passed validation,
    /// then returns it. Tolerates spurious wakeups by re-checking the
    /// state in a loop.
    pub fn wait_for_submission(&self) -> NetworkInfo {
        let mut synced = self.synced.lock().unwrap();
        while synced.state != SetupState::WaitingForConnection {
            synced = self.release_to_connect.wait(synced).unwrap();
        }
        synced
            .info
            .clone()
            .expect("released to connect without network info")
    }

    /// Records how the connection attempt ended. This is the only
    /// transition out of `WaitingForConnection`.
    pub fn record_connect_outcome(&self, error: SetupError) {
        let mut synced = self.synced.lock().unwrap();
        synced.error = error;
        synced.state = if error == SetupError::None {
            SetupState::Success
        } else {
            SetupState::Failure
        };
    }

    /// Renders the error page for the current error under the mutex.
    pub fn format_error_page(&self) -> String {
        let synced = self.synced.lock().unwrap();
        render::render_error_page(synced.error)
    }

    /// Forces the state back to `WaitingForInfo`, clearing the error, so
    /// the next GET re-shows the form instead of repeating the error page.
    pub fn reset(&self) {
        let mut synced = self.synced.lock().unwrap();
        synced.state = SetupState::WaitingForInfo;
        synced.error = SetupError::None;
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

    use pretty_assertions::assert_eq;

    use super::*;

    const GOOD_BODY: &str = "ssid=Home&pass=secret12&target=tank1&dev_name=sensor1";

    #[test]
    fn valid_submission_moves_to_waiting_for_connection() {
        let session = SetupSession::new(Vec::new());
        assert_eq!(session.state(), SetupState::WaitingForInfo);

        session.fill_network_info(GOOD_BODY);

        assert_eq!(session.state(), SetupState::WaitingForConnection);
        let info = session.wait_for_submission();
        assert_eq!(info.ssid, "Home");
        assert_eq!(info.password, "secret12");
        assert_eq!(info.target, "tank1");
        assert_eq!(info.devname, "sensor1");
    }

    #[test]
    fn invalid_submission_moves_to_failure_with_error() {
        let session = SetupSession::new(Vec::new());

        session.fill_network_info("ssid=Home&pass=secret12");

        assert_eq!(session.state(), SetupState::Failure);
        assert_eq!(session.error(), SetupError::TargetMissing);
    }

    #[test]
    fn wait_for_submission_blocks_until_a_valid_post() {
        let session = Arc::new(SetupSession::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));

        let control_session = session.clone();
        let control_released = released.clone();
        let control = thread::spawn(move || {
            let info = control_session.wait_for_submission();
            control_released.store(true, Ordering::SeqCst);
            info
        });

        // An invalid POST signals but must not release the control flow.
        thread::sleep(Duration::from_millis(20));
        session.fill_network_info("ssid=Home");
        thread::sleep(Duration::from_millis(50));
        assert!(!released.load(Ordering::SeqCst));

        session.fill_network_info(GOOD_BODY);
        let info = control.join().unwrap();
        assert_eq!(info.ssid, "Home");
    }

    #[test]
    fn connect_outcome_decides_success_or_failure() {
        let session = SetupSession::new(Vec::new());
        session.fill_network_info(GOOD_BODY);

        session.record_connect_outcome(SetupError::None);
        assert_eq!(session.state(), SetupState::Success);

        session.fill_network_info(GOOD_BODY);
        session.record_connect_outcome(SetupError::SsidIncorrect);
        assert_eq!(session.state(), SetupState::Failure);
        assert_eq!(session.error(), SetupError::SsidIncorrect);
    }

    #[test]
    fn failure_is_served_once_then_resets_to_the_form() {
        let session = SetupSession::new(Vec::new());
        session.fill_network_info("ssid=Home&pass=secret12");
        assert_eq!(session.state(), SetupState::Failure);

        // What the GET handler does when it observes Failure.
        let page = session.format_error_page();
        session.reset();

        assert!(page.contains("Target missing"));
        assert_eq!(session.state(), SetupState::WaitingForInfo);
        assert_eq!(session.error(), SetupError::None);
    }

    #[test]
    fn new_submission_overwrites_the_previous_one() {
        let session = SetupSession::new(Vec::new());
        session.fill_network_info(GOOD_BODY);
        let _ = session.wait_for_submission();

        session.fill_network_info("ssid=Other&pass=abcdefgh&target=tank2&dev_name=sensor2");
        let info = session.wait_for_submission();
        assert_eq!(info.ssid, "Other");
        assert_eq!(info.target, "tank2");
    }
}
