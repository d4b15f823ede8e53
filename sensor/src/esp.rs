use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    netif::{EspNetif, IpEvent, NetifConfiguration, NetifStack},
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi, WifiDriver, WifiEvent},
};
use log::{debug, info, warn};

use level_logger_common::{
    filter_scan_results, render_form_page, run_to_outcome, AuthKind, ConnAttempt, ConnectOutcome,
    NetworkInfo, NetworkRecord, SetupError, SetupSession, SetupState, SingleSlot, StationEvent,
    LOADING_PAGE, MAX_SCAN_RESULTS, SUCCESS_PAGE,
};

const SETUP_AP_SSID: &str = "Level Sensor Setup";
const SETUP_AP_CHANNEL: u8 = 1;
const SETUP_AP_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

const MINIMUM_NETWORK_RSSI: i8 = -80;
const SCAN_TIME_MS: u32 = 500;
const SCAN_LOWEST_CHANNEL: u8 = 1;
const SCAN_CHANNEL_COUNT: u8 = 11;

const POST_BUFFER_SIZE: usize = 256;
const SUCCESS_PAGE_LINGER: Duration = Duration::from_secs(5);

/// Handlers reach the live session through this slot; the dispatch gives
/// them no per-request context. Attach/detach enforce the one-instance
/// rule.
static SETUP_SESSION: SingleSlot<SetupSession> = SingleSlot::new();

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let mut wifi = start_apsta_wifi(modem, sys_loop.clone(), nvs_partition)
        .context("wifi startup failed")?;

    let provisioned = do_setup(&sys_loop, &mut wifi)?;
    info!(
        "provisioned: network `{}`, target `{}`, device name `{}`",
        provisioned.ssid, provisioned.target, provisioned.devname
    );

    // Keep the station alive; the level-reporting application takes over
    // from here.
    let _wifi = wifi;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

/// Sequences one provisioning run: scan, serve the portal, loop on
/// submissions until a connect attempt succeeds, then tear down.
///
/// There is no timeout anywhere in this flow: a submission that never
/// arrives blocks forever. Acceptable for a single-operator setup tool.
fn do_setup(
    sys_loop: &EspSystemEventLoop,
    wifi: &mut EspWifi<'static>,
) -> anyhow::Result<NetworkInfo> {
    let scan = scan_networks(sys_loop).context("network scan failed")?;
    info!("scanned networks (ssid, rssi)");
    for record in &scan {
        info!("{} {}", record.ssid, record.rssi);
    }

    let session = Arc::new(SetupSession::new(scan));
    SETUP_SESSION.attach(session.clone());
    let server = create_setup_http_server().context("setup http server failed to start")?;

    let provisioned = loop {
        // Blocks until the user has submitted network and target
        // information through the setup website.
        let info = session.wait_for_submission();
        debug!("network info submission unblocked; continuing on the main thread");

        let outcome = try_connect_to_network(sys_loop, wifi, &info)?;
        let error = outcome.into_setup_error();
        session.record_connect_outcome(error);

        if error == SetupError::None {
            break info;
        }
        // Failure: the session resets itself on the next GET and the user
        // can resubmit the form.
    };

    // Give the user a moment to see the success page.
    thread::sleep(SUCCESS_PAGE_LINGER);

    drop(server);
    SETUP_SESSION.detach(&session);

    Ok(provisioned)
}

fn start_apsta_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<EspWifi<'static>> {
    let driver = WifiDriver::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    let sta_netif = EspNetif::new(NetifStack::Sta)?;

    // The setup AP hands out leases from a fixed, well-known subnet.
    let mut ap_conf = NetifConfiguration::wifi_default_router();
    ap_conf.ip_configuration = Some(IpConfiguration::Router(RouterConfiguration {
        subnet: Subnet {
            gateway: SETUP_AP_GATEWAY,
            mask: Mask(24),
        },
        dhcp_enabled: true,
        dns: None,
        secondary_dns: None,
    }));
    let ap_netif = EspNetif::new_with_conf(&ap_conf)?;

    let mut wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif)?;

    wifi.set_configuration(&Configuration::Mixed(
        ClientConfiguration::default(),
        setup_ap_configuration()?,
    ))?;

    {
        let mut blocking = BlockingWifi::wrap(&mut wifi, sys_loop)?;
        blocking.start()?;
    }
    info!("wifi started in AP+STA mode; setup AP `{SETUP_AP_SSID}` is open");

    Ok(wifi)
}

fn setup_ap_configuration() -> anyhow::Result<AccessPointConfiguration> {
    Ok(AccessPointConfiguration {
        ssid: SETUP_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("setup AP SSID too long"))?,
        channel: SETUP_AP_CHANNEL,
        auth_method: AuthMethod::None,
        // One operator at a time; the portal has no concurrent sessions.
        max_connections: 1,
        ..Default::default()
    })
}

/// One-shot blocking scan. The scan-done callback's only job is to capture
/// the raw records; filtering and interpretation happen on the caller
/// side. Any driver error here is fatal to the provisioning run.
fn scan_networks(sys_loop: &EspSystemEventLoop) -> anyhow::Result<Vec<NetworkRecord>> {
    configure_scan_country()?;

    let captured: Arc<Mutex<Option<Vec<NetworkRecord>>>> = Arc::new(Mutex::new(None));
    let capture = captured.clone();
    let scan_done = sys_loop.subscribe::<WifiEvent, _>(move |event| {
        if let WifiEvent::ScanDone(_) = event {
            *capture.lock().unwrap() = Some(collect_scan_records());
        }
    })?;

    let mut scan_config = esp_idf_svc::sys::wifi_scan_config_t::default();
    scan_config.show_hidden = true;
    scan_config.scan_type = esp_idf_svc::sys::wifi_scan_type_t_WIFI_SCAN_TYPE_ACTIVE;
    scan_config.scan_time.active.max = SCAN_TIME_MS;

    let rc = unsafe { esp_idf_svc::sys::esp_wifi_scan_start(&scan_config, true) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_wifi_scan_start failed with code {rc}"));
    }
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_scan_stop() };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_wifi_scan_stop failed with code {rc}"));
    }

    drop(scan_done);

    let mut records = captured
        .lock()
        .unwrap()
        .take()
        .ok_or_else(|| anyhow!("scan finished without a scan-done event"))?;
    filter_scan_results(&mut records);
    Ok(records)
}

fn configure_scan_country() -> anyhow::Result<()> {
    // United States regulatory set, outdoor environment.
    let mut country = esp_idf_svc::sys::wifi_country_t::default();
    country.cc = b"USO".map(|byte| byte as _);
    country.schan = SCAN_LOWEST_CHANNEL;
    country.nchan = SCAN_CHANNEL_COUNT;
    country.policy = esp_idf_svc::sys::wifi_country_policy_t_WIFI_COUNTRY_POLICY_AUTO;

    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_country(&country) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_wifi_set_country failed with code {rc}"));
    }
    Ok(())
}

fn collect_scan_records() -> Vec<NetworkRecord> {
    let mut raw = [esp_idf_svc::sys::wifi_ap_record_t::default(); MAX_SCAN_RESULTS];
    let mut count = MAX_SCAN_RESULTS as u16;

    let rc =
        unsafe { esp_idf_svc::sys::esp_wifi_scan_get_ap_records(&mut count, raw.as_mut_ptr()) };
    if rc != esp_idf_svc::sys::ESP_OK {
        panic!("esp_wifi_scan_get_ap_records failed with code {rc}");
    }

    raw[..count as usize].iter().map(record_from_raw).collect()
}

fn record_from_raw(record: &esp_idf_svc::sys::wifi_ap_record_t) -> NetworkRecord {
    let len = record
        .ssid
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(record.ssid.len());
    let ssid = String::from_utf8_lossy(&record.ssid[..len]).into_owned();

    let auth = match record.authmode {
        esp_idf_svc::sys::wifi_auth_mode_t_WIFI_AUTH_OPEN => AuthKind::Open,
        esp_idf_svc::sys::wifi_auth_mode_t_WIFI_AUTH_OWE
        | esp_idf_svc::sys::wifi_auth_mode_t_WIFI_AUTH_MAX => AuthKind::Unknown,
        _ => AuthKind::Protected,
    };

    NetworkRecord {
        ssid,
        rssi: record.rssi,
        auth,
    }
}

/// The two event-loop subscriptions backing one connection attempt.
/// Dropping this unregisters the driver callbacks, so a callback can never
/// outlive the attempt it points at.
struct StationSubscriptions {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

fn subscribe_station_events(
    sys_loop: &EspSystemEventLoop,
    attempt: Arc<ConnAttempt>,
) -> anyhow::Result<StationSubscriptions> {
    let wifi_attempt = attempt.clone();
    let wifi_sub = sys_loop.subscribe::<WifiEvent, _>(move |event| match event {
        WifiEvent::StaConnected(_) => wifi_attempt.apply(StationEvent::Connected),
        WifiEvent::StaDisconnected(disconnected) => {
            wifi_attempt.apply(StationEvent::Disconnected {
                reason: disconnected.reason() as u8,
            })
        }
        _ => (),
    })?;

    let ip_attempt = attempt;
    let ip_sub = sys_loop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(_) = event {
            ip_attempt.apply(StationEvent::GotIp);
        }
    })?;

    Ok(StationSubscriptions {
        _wifi: wifi_sub,
        _ip: ip_sub,
    })
}

fn apply_station_params(wifi: &mut EspWifi<'static>, info: &NetworkInfo) -> anyhow::Result<()> {
    let auth_method = if info.password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    // Lengths were validated before the credentials were copied in, so
    // these conversions never truncate.
    wifi.set_configuration(&Configuration::Mixed(
        ClientConfiguration {
            ssid: info
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("station ssid too long"))?,
            password: info
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("station password too long"))?,
            auth_method,
            ..Default::default()
        },
        setup_ap_configuration()?,
    ))?;

    apply_station_signal_threshold()
}

/// Candidate-selection knobs the safe configuration type does not expose:
/// pick the strongest access point over all channels, and ignore anything
/// weaker than the minimum usable signal.
fn apply_station_signal_threshold() -> anyhow::Result<()> {
    let mut config = esp_idf_svc::sys::wifi_config_t::default();
    let rc = unsafe {
        esp_idf_svc::sys::esp_wifi_get_config(
            esp_idf_svc::sys::wifi_interface_t_WIFI_IF_STA,
            &mut config,
        )
    };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_wifi_get_config failed with code {rc}"));
    }

    unsafe {
        config.sta.scan_method = esp_idf_svc::sys::wifi_scan_method_t_WIFI_ALL_CHANNEL_SCAN;
        config.sta.sort_method = esp_idf_svc::sys::wifi_sort_method_t_WIFI_CONNECT_AP_BY_SIGNAL;
        config.sta.threshold.rssi = MINIMUM_NETWORK_RSSI;
    }

    let rc = unsafe {
        esp_idf_svc::sys::esp_wifi_set_config(
            esp_idf_svc::sys::wifi_interface_t_WIFI_IF_STA,
            &mut config,
        )
    };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_wifi_set_config failed with code {rc}"));
    }
    Ok(())
}

/// Drives one station connection attempt end to end: apply the submitted
/// credentials, wire the driver callbacks to a fresh attempt, issue the
/// non-blocking connect request, and wait for a terminal state.
fn try_connect_to_network(
    sys_loop: &EspSystemEventLoop,
    wifi: &mut EspWifi<'static>,
    info: &NetworkInfo,
) -> anyhow::Result<ConnectOutcome> {
    apply_station_params(wifi, info)?;

    let attempt = Arc::new(ConnAttempt::new());
    attempt.start();
    let subscriptions = subscribe_station_events(sys_loop, attempt.clone())?;

    wifi.connect()?;

    let outcome = run_to_outcome(&attempt);

    // Unregister the driver callbacks before the attempt goes away.
    drop(subscriptions);

    Ok(outcome)
}

fn create_setup_http_server() -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        let session = SETUP_SESSION.active();
        info!("received GET request from user");

        let page = match session.state() {
            SetupState::WaitingForInfo => {
                info!("waiting for network information; responding with the form page");
                render_form_page(session.scan())
            }
            SetupState::WaitingForConnection => {
                info!("currently trying to connect; responding with the loading page");
                LOADING_PAGE.to_string()
            }
            SetupState::Failure => {
                info!("failed to connect and/or confirm target; responding with the error page");
                let page = session.format_error_page();
                // Served once; the next GET shows the form again.
                session.reset();
                page
            }
            SetupState::Success => {
                info!("connected and confirmed target; responding with the success page");
                SUCCESS_PAGE.to_string()
            }
        };

        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(page.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Post, |mut req| {
        let session = SETUP_SESSION.active();
        info!("received POST request from form page");

        let mut body = [0_u8; POST_BUFFER_SIZE];
        let declared = req.content_len().unwrap_or(0) as usize;
        let copy_len = if declared > POST_BUFFER_SIZE {
            warn!("POST content is bigger than the receive buffer; check the form HTML");
            POST_BUFFER_SIZE
        } else {
            declared
        };
        req.read_exact(&mut body[..copy_len])?;

        let raw_body = String::from_utf8_lossy(&body[..copy_len]);
        debug!("post content: {raw_body}");
        session.fill_network_info(&raw_body);

        // The next GET surfaces success or error.
        req.into_response(302, Some("Found"), &[("Location", "/")])?;
        Ok(())
    })?;

    Ok(server)
}
