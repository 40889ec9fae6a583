//! Delivery seam for push messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PushMessage;

/// Provider error codes meaning the token will never work again.
pub fn is_dead_token_code(code: &str) -> bool {
    matches!(code.to_ascii_uppercase().as_str(), "UNREGISTERED" | "INVALID_ARGUMENT")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendError {
    pub token: String,
    pub code: String,
    pub message: String,
}

/// Outcome of a multicast send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub success: u32,
    pub failure: u32,
    pub errors: Vec<SendError>,
    /// Number of tokens flagged for removal.
    pub removed: u32,
}

impl SendReport {
    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self, error: SendError) {
        self.failure += 1;
        if is_dead_token_code(&error.code) {
            self.removed += 1;
        }
        self.errors.push(error);
    }

    /// Tokens the registry should forget.
    pub fn dead_tokens(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|e| is_dead_token_code(&e.code))
            .map(|e| e.token.clone())
            .collect()
    }
}

/// Sends a message to a set of device tokens.
///
/// Implementations report per-token failures in the returned report instead
/// of failing the whole call.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> SendReport;
}

/// Sender that only logs; real delivery is provided by a deployment-specific
/// implementation.
#[derive(Debug, Clone, Default)]
pub struct LoggingPushSender;

#[async_trait]
impl PushSender for LoggingPushSender {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> SendReport {
        let mut report = SendReport::default();
        for token in tokens.iter().filter(|t| !t.is_empty()) {
            tracing::info!(
                token_prefix = %token.chars().take(16).collect::<String>(),
                title = %message.title,
                body = %message.body,
                "push message"
            );
            report.record_success();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_message;

    #[test]
    fn dead_codes_are_counted_for_removal() {
        let mut report = SendReport::default();
        report.record_success();
        report.record_failure(SendError {
            token: "a".into(),
            code: "unregistered".into(),
            message: "gone".into(),
        });
        report.record_failure(SendError {
            token: "b".into(),
            code: "UNAVAILABLE".into(),
            message: "retry later".into(),
        });

        assert_eq!(report.success, 1);
        assert_eq!(report.failure, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.dead_tokens(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn logging_sender_skips_blank_tokens() {
        let report = LoggingPushSender
            .send(&["t1".to_string(), String::new()], &test_message())
            .await;
        assert_eq!(report.success, 1);
        assert_eq!(report.failure, 0);
    }
}
