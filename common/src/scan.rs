use std::collections::HashSet;

use serde::Serialize;

/// Upper bound on how many access-point records one scan keeps.
pub const MAX_SCAN_RESULTS: usize = 8;

/// Coarse security classification of a scanned network, as shown to the
/// user on the form page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthKind {
    Open,
    Protected,
    Unknown,
}

impl AuthKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Protected => "Protected",
            Self::Unknown => "Unknown",
        }
    }
}

/// One scanned access point. Produced by the device scanner (or the host
/// simulator's fixture) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub rssi: i8,
    pub auth: AuthKind,
}

/// Signal-quality wording for the form page network list.
pub fn signal_label(rssi: i8) -> &'static str {
    if rssi >= -50 {
        "Excellent"
    } else if rssi >= -55 {
        "High"
    } else if rssi >= -75 {
        "Medium"
    } else if rssi >= -80 {
        "Low"
    } else {
        "Unreliable"
    }
}

/// Drops records with an empty SSID and all but the first record per SSID,
/// preserving order. The driver reports results strongest-first, so the
/// survivor of a duplicate group is the strongest one.
pub fn filter_scan_results(records: &mut Vec<NetworkRecord>) {
    let mut seen: HashSet<String> = HashSet::new();
    records.retain(|record| !record.ssid.is_empty() && seen.insert(record.ssid.clone()));
}
