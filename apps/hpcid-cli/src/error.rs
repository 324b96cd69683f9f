//! CLI error types and exit codes

use thiserror::Error;

use hpcid_connector::error::ConnectorError;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: The pass finished with failed items
/// - 2: Configuration error
/// - 3: Fatal connectivity or schema error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{job} finished with {count} failed item(s)")]
    PassFailed { job: String, count: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::PassFailed { .. } => 1,
            CliError::Config(_) | CliError::Logging(_) => 2,
            CliError::Connector(e) => match e {
                ConnectorError::InvalidConfiguration { .. } | ConnectorError::Rejected { .. } => 2,
                e if e.is_fatal() => 3,
                _ => 1,
            },
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    /// Get a suggested action for this error
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Connector(ConnectorError::InvalidConfiguration { .. }) => {
                Some("Check the YAML files in the --configdir directory.")
            }
            CliError::Connector(ConnectorError::FieldNotFound { .. }) => {
                Some("The allocation sheet columns have changed; update the sheet or allocations.yml.")
            }
            CliError::Connector(e) if e.is_transient() => {
                Some("The backend is unreachable; the next scheduled run will retry.")
            }
            CliError::PassFailed { .. } => Some("See the log or the notification for details."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_pass_failed() {
        let err = CliError::PassFailed {
            job: "hpcid-slurm".to_string(),
            count: 2,
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "hpcid-slurm finished with 2 failed item(s)");
    }

    #[test]
    fn test_exit_code_invalid_configuration() {
        let err = CliError::from(ConnectorError::invalid_config("ldap.yml: missing base_dn"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_connectivity() {
        let err = CliError::from(ConnectorError::connection_failed("ldap://ldap01 unreachable"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_schema_drift() {
        let err = CliError::from(ConnectorError::FieldNotFound {
            field: "Project Code".to_string(),
            available: "Status".to_string(),
        });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_wrong_host() {
        let err = CliError::from(ConnectorError::Rejected {
            backend: "homedirs".to_string(),
            target: "login01".to_string(),
            message: "host is not allowed to create home directories".to_string(),
        });
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_backend_command() {
        let err = CliError::from(ConnectorError::BackendCommand {
            command: "sacctmgr show assoc".to_string(),
            status: 1,
            stderr: "error".to_string(),
        });
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_error_display() {
        let err = CliError::Config("--username and --groupid are exclusive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: --username and --groupid are exclusive"
        );
    }
}
