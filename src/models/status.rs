use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by every transaction kind. PENDING is the only
/// non-terminal state; records never leave a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl TransactionStatus {
    pub fn from_result_code(code: i32) -> Self {
        if code == 0 {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_result_code_is_success() {
        assert_eq!(
            TransactionStatus::from_result_code(0),
            TransactionStatus::Success
        );
        assert_eq!(
            TransactionStatus::from_result_code(1032),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Timeout.is_terminal());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        let back: TransactionStatus = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(back, TransactionStatus::Timeout);
    }
}
