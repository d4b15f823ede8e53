use crate::error::SetupError;

/// Driver limit for a station SSID, including the terminator slot.
pub const MAX_SSID_LEN: usize = 32;
/// Driver limit for a WPA passphrase, including the terminator slot.
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// The four fields a user submits through the setup form, validated and
/// owned. Credentials are only copied in here after length validation, so
/// nothing downstream ever sees a truncated SSID or passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ssid: String,
    pub password: String,
    pub target: String,
    pub devname: String,
}

/// Parses a raw form-encoded POST body (`key=value` pairs joined by `&`,
/// any order) into a validated [`NetworkInfo`].
///
/// A pair without `=` is a hard parse error, as is any unknown field name.
/// All four fields must be present and non-empty; an empty value counts as
/// missing. Missing fields are reported in a fixed order (ssid, password,
/// target, device name), then lengths are checked in the same order.
pub fn parse_network_info(body: &str) -> Result<NetworkInfo, SetupError> {
    let mut ssid = None;
    let mut password = None;
    let mut target = None;
    let mut devname = None;

    for pair in body.split('&').filter(|pair| !pair.is_empty()) {
        let (field, value) = pair.split_once('=').ok_or(SetupError::MalformedPair)?;
        match field {
            "ssid" => ssid = Some(value),
            "pass" => password = Some(value),
            "target" => target = Some(value),
            "dev_name" => devname = Some(value),
            _ => return Err(SetupError::UnknownField),
        }
    }

    let ssid = ssid.filter(|value| !value.is_empty()).ok_or(SetupError::SsidMissing)?;
    let password = password
        .filter(|value| !value.is_empty())
        .ok_or(SetupError::PasswordMissing)?;
    let target = target
        .filter(|value| !value.is_empty())
        .ok_or(SetupError::TargetMissing)?;
    let devname = devname
        .filter(|value| !value.is_empty())
        .ok_or(SetupError::DevnameMissing)?;

    if ssid.len() >= MAX_SSID_LEN {
        return Err(SetupError::SsidTooLong);
    }
    if password.len() >= MAX_PASSPHRASE_LEN {
        return Err(SetupError::PasswordTooLong);
    }

    Ok(NetworkInfo {
        ssid: ssid.to_string(),
        password: password.to_string(),
        target: target.to_string(),
        devname: devname.to_string(),
    })
}
