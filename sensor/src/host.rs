use std::{sync::Arc, thread, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use log::{info, warn};
use tokio::{net::TcpListener, sync::oneshot};

use level_logger_common::{
    filter_scan_results, render_form_page, run_to_outcome, AuthKind, ConnAttempt, ConnectOutcome,
    NetworkInfo, NetworkRecord, SetupError, SetupSession, SetupState, StationEvent,
    FAIL_REASON_AUTH_FAIL, FAIL_REASON_NO_AP_FOUND, LOADING_PAGE, SUCCESS_PAGE,
};

const POST_BUFFER_SIZE: usize = 256;
const SUCCESS_PAGE_LINGER: Duration = Duration::from_secs(5);

/// Host-side stand-in for the device portal: serves the same pages against
/// the same session state, with a scripted station backend instead of the
/// WiFi driver. Submit the form with the password from `WIFI_PASS`
/// (default `secret12`) to walk the whole handshake off-device.
pub async fn run() -> anyhow::Result<()> {
    env_logger::init();

    let mut scan = fixture_scan();
    filter_scan_results(&mut scan);

    let session = Arc::new(SetupSession::new(scan));
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let control_session = session.clone();
    let control = thread::spawn(move || {
        control_loop(&control_session);
        let _ = done_tx.send(());
    });

    let app = Router::new()
        .route("/", get(handle_get_portal).post(handle_post_portal))
        .route("/api/networks", get(handle_get_networks))
        .with_state(session);

    let addr = std::env::var("PORTAL_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind portal listener")?;
    info!("provisioning portal listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = done_rx.await;
        })
        .await?;

    control.join().expect("control thread panicked");
    info!("provisioning finished; shutting down");
    Ok(())
}

/// The same sequencing as the device control flow: block on submissions,
/// attempt to connect, record the outcome, loop until success.
fn control_loop(session: &Arc<SetupSession>) {
    loop {
        let info = session.wait_for_submission();
        info!(
            "submission received: ssid `{}`, target `{}`, device name `{}`",
            info.ssid, info.target, info.devname
        );

        let outcome = simulate_connect(session, &info);
        let error = outcome.into_setup_error();
        session.record_connect_outcome(error);

        if error == SetupError::None {
            break;
        }
    }

    // Give the user a moment to see the success page.
    thread::sleep(SUCCESS_PAGE_LINGER);
}

/// Runs one attempt through the real FSM, with a thread standing in for
/// the driver's event-dispatch context.
fn simulate_connect(session: &SetupSession, info: &NetworkInfo) -> ConnectOutcome {
    let attempt = Arc::new(ConnAttempt::new());
    attempt.start();

    let known_network = session
        .scan()
        .iter()
        .any(|record| record.ssid == info.ssid);
    let password_ok = info.password == expected_password();

    let driver = attempt.clone();
    let script = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        if !known_network {
            driver.apply(StationEvent::Disconnected {
                reason: FAIL_REASON_NO_AP_FOUND,
            });
            return;
        }
        if !password_ok {
            driver.apply(StationEvent::Disconnected {
                reason: FAIL_REASON_AUTH_FAIL,
            });
            return;
        }
        driver.apply(StationEvent::Connected);
        thread::sleep(Duration::from_millis(200));
        driver.apply(StationEvent::GotIp);
    });

    let outcome = run_to_outcome(&attempt);
    script.join().expect("fake driver thread panicked");
    outcome
}

fn expected_password() -> String {
    std::env::var("WIFI_PASS").unwrap_or_else(|_| "secret12".to_string())
}

/// What a crowded scan looks like: duplicates and a hidden network, so the
/// filter has something to do.
fn fixture_scan() -> Vec<NetworkRecord> {
    vec![
        NetworkRecord {
            ssid: "Home".to_string(),
            rssi: -42,
            auth: AuthKind::Protected,
        },
        NetworkRecord {
            ssid: String::new(),
            rssi: -50,
            auth: AuthKind::Unknown,
        },
        NetworkRecord {
            ssid: "Home".to_string(),
            rssi: -68,
            auth: AuthKind::Protected,
        },
        NetworkRecord {
            ssid: "Cafe".to_string(),
            rssi: -77,
            auth: AuthKind::Open,
        },
        NetworkRecord {
            ssid: "Garage".to_string(),
            rssi: -83,
            auth: AuthKind::Protected,
        },
    ]
}

async fn handle_get_portal(State(session): State<Arc<SetupSession>>) -> Html<String> {
    let page = match session.state() {
        SetupState::WaitingForInfo => render_form_page(session.scan()),
        SetupState::WaitingForConnection => LOADING_PAGE.to_string(),
        SetupState::Failure => {
            let page = session.format_error_page();
            // Served once; the next GET shows the form again.
            session.reset();
            page
        }
        SetupState::Success => SUCCESS_PAGE.to_string(),
    };
    Html(page)
}

async fn handle_post_portal(
    State(session): State<Arc<SetupSession>>,
    body: String,
) -> impl IntoResponse {
    let raw_body = if body.len() > POST_BUFFER_SIZE {
        warn!("POST content is bigger than the receive buffer; truncating");
        let mut cut = POST_BUFFER_SIZE;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        &body[..cut]
    } else {
        body.as_str()
    };

    session.fill_network_info(raw_body);

    // The next GET surfaces success or error.
    (StatusCode::FOUND, [(header::LOCATION, "/")])
}

async fn handle_get_networks(
    State(session): State<Arc<SetupSession>>,
) -> Json<Vec<NetworkRecord>> {
    Json(session.scan().to_vec())
}
