//! Error types for the tiered analysis pipeline.
//!
//! [`PipelineError`] covers every failure mode from prompt validation through
//! LLM dispatch, response validation, and persistence. Each variant can be
//! categorized via [`category()`](PipelineError::category), assessed for
//! severity via [`severity()`](PipelineError::severity), checked for
//! retryability via [`is_retryable()`](PipelineError::is_retryable), and
//! converted to a short user-facing message via
//! [`user_message()`](PipelineError::user_message).
//!
//! # Creating errors
//!
//! Use the constructor methods, which log automatically:
//!
//! ```rust
//! use tiered_analysis_pipeline::PipelineError;
//!
//! let err = PipelineError::security_violation("token_mismatch", "tier1 batch 7");
//! assert!(!err.is_retryable());
//! ```

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The LLM provider or network had an issue.
    External,
    /// Something went wrong in the pipeline itself.
    Internal,
    /// The caller or operator made a mistake that they can fix.
    Client,
    /// Temporary failures that should be retried.
    Transient,
    /// A detected attempt to subvert the prompt/response contract.
    Security,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Requires immediate attention.
    Critical,
    /// Should be logged and investigated but not urgent.
    Error,
    /// Unexpected but recoverable situation.
    Warning,
    /// Expected, normal-operation failure.
    Info,
}

/// Convenient result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur anywhere in the tiered analysis pipeline.
///
/// | Variant | Category | Retryable |
/// |---|---|---|
/// | `ConfigurationError` | Client | No |
/// | `RequestFailed` | External | Yes |
/// | `ResponseParsingError` | External | No |
/// | `RateLimitExceeded` | Transient | Yes |
/// | `Timeout` | Transient | Yes |
/// | `AuthenticationFailed` | Client | No |
/// | `TokenLimitExceeded` | Client | No |
/// | `SecurityViolation` | Security | No |
/// | `SchemaValidationFailed` | Client | No |
/// | `PersistenceFailed` | External | Yes |
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline configuration is invalid or incomplete (missing API key, bad time window, ...).
    #[error("configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// The HTTP request to the LLM provider failed.
    #[error("LLM request failed: {message}")]
    RequestFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The LLM returned a response that could not be parsed or did not match the expected shape.
    #[error("response parsing failed: {message}")]
    ResponseParsingError {
        /// Details about the parsing failure.
        message: String,
    },

    /// LLM provider rate limit exceeded (HTTP 429).
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded {
        /// Recommended wait time before retrying.
        retry_after_seconds: u64,
    },

    /// Request timed out.
    #[error("request timed out after {timeout_seconds}s")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout_seconds: u64,
    },

    /// Authentication with the LLM provider failed (HTTP 401/403).
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Details about the authentication failure.
        message: String,
    },

    /// The planned request exceeds the model's token limit.
    #[error("token limit exceeded: {current} > {max}")]
    TokenLimitExceeded {
        /// The actual token count requested.
        current: usize,
        /// The maximum allowed tokens for the model.
        max: usize,
    },

    /// A security control rejected the request or response: token mismatch, injection marker,
    /// or unauthorized prompt tampering.
    #[error("security violation ({incident_type}): {detail}")]
    SecurityViolation {
        /// Machine-readable incident kind (e.g. `token_mismatch`, `injection_marker`).
        incident_type: String,
        /// Human-readable detail for logs (never surfaced verbatim to end users).
        detail: String,
    },

    /// Response doesn't match the tier's required JSON structure.
    #[error("schema validation failed: {message}")]
    SchemaValidationFailed {
        /// Details about the validation failure.
        message: String,
    },

    /// A persistence operation (tier completion, artifact write) failed.
    #[error("persistence failed: {message}")]
    PersistenceFailed {
        /// Description of the failure.
        message: String,
    },
}

impl PipelineError {
    /// Get the error category for routing and handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigurationError { .. } => ErrorCategory::Client,
            Self::RequestFailed { .. } => ErrorCategory::External,
            Self::ResponseParsingError { .. } => ErrorCategory::External,
            Self::RateLimitExceeded { .. } => ErrorCategory::Transient,
            Self::Timeout { .. } => ErrorCategory::Transient,
            Self::AuthenticationFailed { .. } => ErrorCategory::Client,
            Self::TokenLimitExceeded { .. } => ErrorCategory::Client,
            Self::SecurityViolation { .. } => ErrorCategory::Security,
            Self::SchemaValidationFailed { .. } => ErrorCategory::Client,
            Self::PersistenceFailed { .. } => ErrorCategory::External,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConfigurationError { .. } => ErrorSeverity::Error,
            Self::RequestFailed { .. } => ErrorSeverity::Error,
            Self::ResponseParsingError { .. } => ErrorSeverity::Warning,
            Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } => ErrorSeverity::Error,
            Self::TokenLimitExceeded { .. } => ErrorSeverity::Info,
            Self::SecurityViolation { .. } => ErrorSeverity::Critical,
            Self::SchemaValidationFailed { .. } => ErrorSeverity::Warning,
            Self::PersistenceFailed { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether this error is transient and the caller should retry.
    ///
    /// Security violations and schema failures are never retried at this layer — retrying
    /// the same prompt against the same response would reproduce the same rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::Timeout { .. } | Self::RequestFailed { .. }
        )
    }

    /// Convert to a short message suitable for the control API's error body.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConfigurationError { .. } => "pipeline configuration issue".to_string(),
            Self::RequestFailed { .. } => "unable to reach the LLM provider".to_string(),
            Self::ResponseParsingError { .. } => "LLM returned an unparseable response".to_string(),
            Self::RateLimitExceeded {
                retry_after_seconds,
            } => format!("provider is rate-limited, retry after {retry_after_seconds}s"),
            Self::Timeout { .. } => "LLM request timed out".to_string(),
            Self::AuthenticationFailed { .. } => "LLM provider authentication failed".to_string(),
            Self::TokenLimitExceeded { .. } => "request exceeds the model token limit".to_string(),
            Self::SecurityViolation { .. } => "response failed security validation".to_string(),
            Self::SchemaValidationFailed { .. } => "response failed structural validation".to_string(),
            Self::PersistenceFailed { .. } => "failed to persist analysis results".to_string(),
        }
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================

    /// Create a configuration error (logs at ERROR level).
    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "configuration_error",
            message = %message,
            "pipeline configuration validation failed"
        );
        Self::ConfigurationError { message }
    }

    /// Create a request-failed error (logs at ERROR level).
    pub fn request_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(
            error_type = "request_failed",
            message = %message,
            has_source = source.is_some(),
            "LLM request execution failed"
        );
        Self::RequestFailed { message, source }
    }

    /// Create a response-parsing error (logs at WARN level).
    pub fn response_parsing_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "response_parsing_error",
            message = %message,
            "LLM response format invalid"
        );
        Self::ResponseParsingError { message }
    }

    /// Create a rate-limit error (logs at WARN level).
    pub fn rate_limit_exceeded(retry_after_seconds: u64) -> Self {
        log_warn!(
            error_type = "rate_limit_exceeded",
            retry_after_seconds = retry_after_seconds,
            "LLM provider rate limit exceeded"
        );
        Self::RateLimitExceeded {
            retry_after_seconds,
        }
    }

    /// Create a timeout error (logs at WARN level).
    pub fn timeout(timeout_seconds: u64) -> Self {
        log_warn!(
            error_type = "timeout",
            timeout_seconds = timeout_seconds,
            "LLM request timed out"
        );
        Self::Timeout { timeout_seconds }
    }

    /// Create an authentication-failed error (logs at ERROR level).
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "authentication_failed",
            message = %message,
            "LLM provider authentication failed"
        );
        Self::AuthenticationFailed { message }
    }

    /// Create a token-limit-exceeded error (logs at WARN level).
    pub fn token_limit_exceeded(current: usize, max: usize) -> Self {
        log_warn!(
            error_type = "token_limit_exceeded",
            current_tokens = current,
            max_tokens = max,
            "planned request exceeds model token limit"
        );
        Self::TokenLimitExceeded { current, max }
    }

    /// Create a security-violation error (logs at ERROR level; callers should also
    /// write a [`crate::security_log`] incident record).
    pub fn security_violation(incident_type: impl Into<String>, detail: impl Into<String>) -> Self {
        let incident_type = incident_type.into();
        let detail = detail.into();
        log_error!(
            error_type = "security_violation",
            incident_type = %incident_type,
            detail = %detail,
            "security control rejected request or response"
        );
        Self::SecurityViolation {
            incident_type,
            detail,
        }
    }

    /// Create a schema-validation error (logs at WARN level).
    pub fn schema_validation_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "schema_validation_failed",
            message = %message,
            "LLM response schema validation failed"
        );
        Self::SchemaValidationFailed { message }
    }

    /// Create a persistence-failure error (logs at ERROR level).
    pub fn persistence_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "persistence_failed",
            message = %message,
            "failed to persist tier completion or artifact"
        );
        Self::PersistenceFailed { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_variants_match_spec_taxonomy() {
        assert!(PipelineError::rate_limit_exceeded(30).is_retryable());
        assert!(PipelineError::timeout(30).is_retryable());
        assert!(PipelineError::request_failed("boom", None).is_retryable());
        assert!(!PipelineError::configuration_error("bad").is_retryable());
        assert!(!PipelineError::security_violation("token_mismatch", "x").is_retryable());
        assert!(!PipelineError::schema_validation_failed("missing field").is_retryable());
    }

    #[test]
    fn security_violations_are_critical() {
        let err = PipelineError::security_violation("token_mismatch", "tier1");
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::Security);
    }

    #[test]
    fn user_message_never_echoes_internal_detail() {
        let err = PipelineError::security_violation("token_mismatch", "super secret internal detail");
        assert!(!err.user_message().contains("secret"));
    }
}
