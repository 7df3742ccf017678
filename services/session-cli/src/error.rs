//! Command-line errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}\n\nRun `sessionctl --help` for usage.")]
    Usage(String),

    #[error("no password given: pass --password or set SESSIONCTL_PASSWORD")]
    MissingPassword,

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("--body is not valid JSON: {0}")]
    InvalidBody(String),
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_error_points_at_help() {
        let msg = Error::Usage("unknown command: frobnicate".into()).to_string();
        assert!(msg.contains("unknown command: frobnicate"));
        assert!(msg.contains("--help"));
    }

    #[test]
    fn missing_password_names_env_var() {
        assert!(Error::MissingPassword.to_string().contains("SESSIONCTL_PASSWORD"));
    }
}
