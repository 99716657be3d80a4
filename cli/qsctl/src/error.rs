//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an API error from response details.
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id,
        }
    }

    /// Stable error code reported by the service, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

fn hint(err: &CliError) -> Option<&'static str> {
    match err {
        CliError::Api { code, .. } if code == "pool_not_found" => {
            Some("Hint: Run `qsctl pools list` to see existing pools.")
        }
        CliError::Api { code, .. } if code == "invalid_config" => {
            Some("Hint: Charge rates and max charge seconds must be non-negative.")
        }
        CliError::Network(_) => {
            Some("Hint: Check that the scheduler is running and --url (or QS_URL) points at it.")
        }
        _ => None,
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        if let Some(code) = cli_err.code() {
            eprintln!("{} {}", "Code:".dimmed(), code);
        }
        if let Some(hint) = hint(cli_err) {
            eprintln!("\n{}", hint.yellow());
        }
        if let CliError::Api {
            request_id: Some(request_id),
            ..
        } = cli_err
        {
            eprintln!("\nRequest ID: {}", request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_uses_message() {
        let err = CliError::api(404, "pool_not_found", "pool p1 does not exist", None);
        assert_eq!(err.to_string(), "API error: pool p1 does not exist");
        assert_eq!(err.code(), Some("pool_not_found"));
    }

    #[test]
    fn test_hint_for_missing_pool() {
        let err = CliError::api(404, "pool_not_found", "gone", None);
        assert!(hint(&err).is_some_and(|h| h.contains("pools list")));

        let err = CliError::api(409, "pool_exists", "dup", None);
        assert!(hint(&err).is_none());
    }
}
