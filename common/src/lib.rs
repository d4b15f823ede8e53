pub mod attempt;
pub mod error;
pub mod netinfo;
pub mod registry;
pub mod render;
pub mod scan;
pub mod session;

pub use attempt::{
    describe_fail_reason, run_to_outcome, ConnAttempt, ConnAttemptState, ConnectOutcome,
    StationEvent, FAIL_REASON_AUTH_FAIL, FAIL_REASON_NO_AP_FOUND,
};
pub use error::SetupError;
pub use netinfo::{parse_network_info, NetworkInfo, MAX_PASSPHRASE_LEN, MAX_SSID_LEN};
pub use registry::SingleSlot;
pub use render::{render_error_page, render_form_page, LOADING_PAGE, SUCCESS_PAGE};
pub use scan::{filter_scan_results, signal_label, AuthKind, NetworkRecord, MAX_SCAN_RESULTS};
pub use session::{SetupSession, SetupState};
