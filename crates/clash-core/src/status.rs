//! Validation job status codes reported by the results service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a validation job or result
///
/// The service reports statuses as small integers. Codes outside the known
/// set map to [`ValidationStatus::Unrecognized`] instead of failing, since
/// the service may add statuses before this crate learns about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i32")]
pub enum ValidationStatus {
    Queued,
    Started,
    Completed,
    Failed,
    DownloadingModel,
    StoringResults,
    ValidationInProgress,
    ValidationLimited,
    Cancelled,
    FailedSuppressionRules,
    CompletedWithElementLoadErrors,
    Created,
    Canceling,
    /// A code this crate does not know about
    Unrecognized(i32),
}

impl ValidationStatus {
    /// Every known status, in code order
    pub const KNOWN: [ValidationStatus; 13] = [
        Self::Queued,
        Self::Started,
        Self::Completed,
        Self::Failed,
        Self::DownloadingModel,
        Self::StoringResults,
        Self::ValidationInProgress,
        Self::ValidationLimited,
        Self::Cancelled,
        Self::FailedSuppressionRules,
        Self::CompletedWithElementLoadErrors,
        Self::Created,
        Self::Canceling,
    ];

    /// Map a wire code to a status
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Queued,
            0 => Self::Started,
            1 => Self::Completed,
            2 => Self::Failed,
            3 => Self::DownloadingModel,
            4 => Self::StoringResults,
            5 => Self::ValidationInProgress,
            6 => Self::ValidationLimited,
            7 => Self::Cancelled,
            8 => Self::FailedSuppressionRules,
            9 => Self::CompletedWithElementLoadErrors,
            10 => Self::Created,
            11 => Self::Canceling,
            other => Self::Unrecognized(other),
        }
    }

    /// Map a code read from a wider integer
    ///
    /// Codes outside the `i32` range are unrecognized and clamp to its bounds.
    pub fn from_wire(code: i64) -> Self {
        match i32::try_from(code) {
            Ok(code) => Self::from_code(code),
            Err(_) if code < 0 => Self::Unrecognized(i32::MIN),
            Err(_) => Self::Unrecognized(i32::MAX),
        }
    }

    /// The wire code for this status
    pub fn code(self) -> i32 {
        match self {
            Self::Queued => -1,
            Self::Started => 0,
            Self::Completed => 1,
            Self::Failed => 2,
            Self::DownloadingModel => 3,
            Self::StoringResults => 4,
            Self::ValidationInProgress => 5,
            Self::ValidationLimited => 6,
            Self::Cancelled => 7,
            Self::FailedSuppressionRules => 8,
            Self::CompletedWithElementLoadErrors => 9,
            Self::Created => 10,
            Self::Canceling => 11,
            Self::Unrecognized(code) => code,
        }
    }

    /// Symbolic name used in logs and in the aggregated rows
    pub fn name(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Started => "Started",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::DownloadingModel => "DownloadingiModel",
            Self::StoringResults => "StoringResults",
            Self::ValidationInProgress => "ValidationInProgress",
            Self::ValidationLimited => "ValidationLimited",
            Self::Cancelled => "Cancelled",
            Self::FailedSuppressionRules => "FailedSuppressionRules",
            Self::CompletedWithElementLoadErrors => "CompletedWithElementLoadErrors",
            Self::Created => "Created",
            Self::Canceling => "Canceling",
            Self::Unrecognized(_) => "Unrecognized",
        }
    }

    /// Look a status up by its symbolic name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::KNOWN.into_iter().find(|status| status.name() == name)
    }

    /// Whether a poll loop waiting on a run should stop
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the job will not change status again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::FailedSuppressionRules
                | Self::CompletedWithElementLoadErrors
                | Self::ValidationLimited
        )
    }

    pub fn is_recognized(self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<i64> for ValidationStatus {
    fn from(code: i64) -> Self {
        Self::from_wire(code)
    }
}

impl From<ValidationStatus> for i32 {
    fn from(status: ValidationStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecognized(code) => write!(f, "Unrecognized({})", code),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for status in ValidationStatus::KNOWN {
            assert_eq!(ValidationStatus::from_code(status.code()), status);
            assert_eq!(ValidationStatus::from_name(status.name()), Some(status));
        }
    }

    #[test]
    fn test_unknown_codes_are_unrecognized() {
        for code in [i32::MIN, -2, 12, 42, 1000, i32::MAX] {
            let status = ValidationStatus::from_code(code);
            assert_eq!(status, ValidationStatus::Unrecognized(code));
            assert!(!status.is_recognized());
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_serde_uses_integer_codes() {
        let status: ValidationStatus = serde_json::from_str("7").unwrap();
        assert_eq!(status, ValidationStatus::Cancelled);
        assert_eq!(serde_json::to_string(&status).unwrap(), "7");

        let unknown: ValidationStatus = serde_json::from_str("99").unwrap();
        assert_eq!(unknown, ValidationStatus::Unrecognized(99));
        assert_eq!(unknown.to_string(), "Unrecognized(99)");

        let huge: ValidationStatus = serde_json::from_str("4294967296").unwrap();
        assert_eq!(huge, ValidationStatus::Unrecognized(i32::MAX));
    }

    #[test]
    fn test_wide_codes_clamp_to_unrecognized() {
        assert_eq!(ValidationStatus::from_wire(1), ValidationStatus::Completed);
        assert_eq!(ValidationStatus::from_wire(-1), ValidationStatus::Queued);
        assert_eq!(
            ValidationStatus::from_wire(i64::from(i32::MAX) + 1),
            ValidationStatus::Unrecognized(i32::MAX)
        );
        assert_eq!(
            ValidationStatus::from_wire(i64::MIN),
            ValidationStatus::Unrecognized(i32::MIN)
        );
        assert!(!ValidationStatus::from_wire(i64::MAX).is_recognized());
    }

    #[test]
    fn test_finished_statuses() {
        assert!(ValidationStatus::Completed.is_finished());
        assert!(ValidationStatus::Failed.is_finished());
        assert!(!ValidationStatus::Cancelled.is_finished());
        assert!(ValidationStatus::Cancelled.is_terminal());
        assert!(!ValidationStatus::Queued.is_terminal());
    }
}
