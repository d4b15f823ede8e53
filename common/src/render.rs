use std::fmt::Write as _;

use log::warn;

use crate::error::SetupError;
use crate::scan::{signal_label, NetworkRecord};

// Rendered pages are bounded, sized for the device's fixed scratch
// buffers. Overflow degrades to a truncated page with a warning, never a
// failure.
const FORM_PAGE_CAPACITY: usize = 2048;
const ERROR_PAGE_CAPACITY: usize = 256;

/// Served while a connection attempt is in flight; refreshes itself until
/// the state settles.
pub const LOADING_PAGE: &str = "<!DOCTYPE html><html><head><meta http-equiv=\"refresh\" \
     content=\"2\"/><style>.loader{display: inline-block; border: 5px solid #f3f3f3; \
     border-radius: 50%; border-top: 5px solid #000000; width: 20px; height: 20px; \
     animation: spin 1s linear infinite;}@keyframes spin{0%{transform: \
     rotate(0deg);}100%{transform: rotate(360deg);}}</style></head><body><div \
     class=\"loader\"></div><h1 style=\"display: inline; margin-left: \
     10px;\">Connecting and verifying</h1></body></html>";

pub const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body><h1 style=\"color: \
     #00cf0e;\">Success!</h1></body></html>";

/// Renders the credentials form, headed by the list of scanned networks
/// with signal and security labels.
pub fn render_form_page(scan: &[NetworkRecord]) -> String {
    let mut page = String::with_capacity(FORM_PAGE_CAPACITY);
    page.push_str("<!DOCTYPE html><html><body><h1>Level Sensor Setup</h1>");

    if !scan.is_empty() {
        page.push_str(
            "<table><tr><th>SSID</th><th>Signal</th><th>Security</th></tr>",
        );
        for record in scan {
            let _ = write!(
                page,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                record.ssid,
                signal_label(record.rssi),
                record.auth.label()
            );
        }
        page.push_str("</table>");
    }

    page.push_str(
        "<form action=/ method=POST>SSID:<br><input name=ssid><br>\
         Password:<br><input name=pass><br>Target:<br><input name=target><br>\
         Device Name:<br><input name=dev_name><br>\
         <input type=submit value=Connect></form></body></html>",
    );

    clamp_page(page, FORM_PAGE_CAPACITY, "form")
}

/// Renders the error page for `error`, explanation included.
pub fn render_error_page(error: SetupError) -> String {
    let page = format!(
        "<!DOCTYPE html><html><body><h1 style=\"color: red;\">Error!</h1>\
         <h2>{error}</h2></body></html>"
    );
    clamp_page(page, ERROR_PAGE_CAPACITY, "error")
}

fn clamp_page(mut page: String, capacity: usize, which: &str) -> String {
    if page.len() > capacity {
        warn!("{which} page does not fit in its {capacity} byte buffer; truncating");
        let mut cut = capacity;
        while !page.is_char_boundary(cut) {
            cut -= 1;
        }
        page.truncate(cut);
    }
    page
}

#[cfg(test)]
mod tests {
    use crate::scan::AuthKind;

    use super::*;

    #[test]
    fn form_page_lists_every_network_with_labels() {
        let scan = vec![
            NetworkRecord {
                ssid: "Home".to_string(),
                rssi: -40,
                auth: AuthKind::Protected,
            },
            NetworkRecord {
                ssid: "Cafe".to_string(),
                rssi: -82,
                auth: AuthKind::Open,
            },
        ];

        let page = render_form_page(&scan);

        assert!(page.contains("Home"));
        assert!(page.contains("Excellent"));
        assert!(page.contains("Cafe"));
        assert!(page.contains("Unreliable"));
        assert!(page.contains("Open"));
        assert!(page.contains("name=ssid"));
        assert!(page.contains("name=pass"));
        assert!(page.contains("name=target"));
        assert!(page.contains("name=dev_name"));
    }

    #[test]
    fn form_page_without_networks_skips_the_table() {
        let page = render_form_page(&[]);
        assert!(!page.contains("<table>"));
        assert!(page.contains("name=ssid"));
    }

    #[test]
    fn error_page_embeds_the_explanation() {
        let page = render_error_page(SetupError::PasswordIncorrect);
        assert!(page.contains("Error!"));
        assert!(page.contains("Authentication with given password (PSK) failed!"));
        assert!(page.len() <= ERROR_PAGE_CAPACITY);
    }

    #[test]
    fn oversize_pages_are_truncated_at_a_char_boundary() {
        let page = "é".repeat(300);
        let clamped = clamp_page(page, ERROR_PAGE_CAPACITY, "error");
        assert!(clamped.len() <= ERROR_PAGE_CAPACITY);
        assert!(clamped.chars().all(|c| c == 'é'));
    }
}
