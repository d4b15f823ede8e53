use thiserror::Error;

/// Everything that can go wrong between a form submission and a joined
/// network. `Display` is the text rendered into the error page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("No error")]
    None,
    #[error("Couldn't establish connection to network")]
    ConnectFailed,
    #[error("Form POST request content contains an incomplete field=value pair")]
    MalformedPair,
    #[error("Unknown field in form POST request content")]
    UnknownField,
    #[error("Network SSID too long")]
    SsidTooLong,
    #[error("Network SSID missing")]
    SsidMissing,
    #[error("No network with given SSID found!")]
    SsidIncorrect,
    #[error("Network password (PSK) too long")]
    PasswordTooLong,
    #[error("Network password (PSK) missing")]
    PasswordMissing,
    #[error("Authentication with given password (PSK) failed!")]
    PasswordIncorrect,
    #[error("Target missing")]
    TargetMissing,
    #[error("Device name missing")]
    DevnameMissing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explanations_are_user_readable() {
        assert_eq!(SetupError::None.to_string(), "No error");
        assert_eq!(
            SetupError::SsidIncorrect.to_string(),
            "No network with given SSID found!"
        );
        assert_eq!(
            SetupError::PasswordIncorrect.to_string(),
            "Authentication with given password (PSK) failed!"
        );
    }
}
