//! Error types for host and store operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for host and store operations.
pub type FipResult<T> = Result<T, FipError>;

/// Errors that can occur while talking to the host or the store.
#[derive(Debug, Error)]
pub enum FipError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The network interface could not be resolved or inspected.
    #[error("Interface '{iface}' unavailable: {message}")]
    Interface {
        /// The interface name.
        iface: String,
        /// Error message.
        message: String,
    },

    /// An address or prefix failed to parse.
    #[error("Invalid address '{value}': {message}")]
    InvalidAddress {
        /// The offending value.
        value: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl FipError {
    /// Creates an interface error.
    pub fn interface(iface: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interface {
            iface: iface.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    pub fn invalid_address(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FipError::Interface { .. } | FipError::ShellCommandFailed { .. }
        )
    }
}

impl From<floatip_types::ParseError> for FipError {
    fn from(err: floatip_types::ParseError) -> Self {
        let value = match &err {
            floatip_types::ParseError::InvalidIpAddress(v)
            | floatip_types::ParseError::InvalidIpPrefix(v) => v.clone(),
        };
        FipError::invalid_address(value, err.to_string())
    }
}
