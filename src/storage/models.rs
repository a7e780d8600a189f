//! Persisted data model shared by both storage backends.
//!
//! JSON field names are camelCase so the on-disk documents and API payloads
//! keep the layout other tools already read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Success,
    Error,
}

/// Per-recipient result of a batch send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    /// Number as submitted, before formatting
    pub phone_number: String,
    pub status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SendResult {
    pub fn success(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            status: SendStatus::Success,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(phone_number: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            status: SendStatus::Error,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SendStatus::Success
    }
}

/// `(succeeded, failed)` for a result list.
pub fn tally(results: &[SendResult]) -> (u32, u32) {
    results.iter().fold((0, 0), |(ok, failed), r| match r.status {
        SendStatus::Success => (ok + 1, failed),
        SendStatus::Error => (ok, failed + 1),
    })
}

/// A message as handed to the store, before it has an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub body: String,
    pub phone_numbers: Vec<String>,
    pub results: Vec<SendResult>,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(body: impl Into<String>, phone_numbers: Vec<String>, results: Vec<SendResult>) -> Self {
        Self {
            body: body.into(),
            phone_numbers,
            results,
            timestamp: Utc::now(),
        }
    }
}

/// A stored message with its recipient results.
///
/// `total_sent + total_failed == results.len()` always holds; the counts are
/// derived by the store, never taken from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    #[serde(rename = "message")]
    pub body: String,
    pub phone_numbers: Vec<String>,
    pub results: Vec<SendResult>,
    pub total_sent: u32,
    pub total_failed: u32,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn from_new(id: i64, session_id: &str, message: NewMessage) -> Self {
        let (total_sent, total_failed) = tally(&message.results);
        Self {
            id,
            session_id: session_id.to_string(),
            body: message.body,
            phone_numbers: message.phone_numbers,
            results: message.results,
            total_sent,
            total_failed,
            timestamp: message.timestamp,
        }
    }
}

/// The logical messaging context: recipients, history and pairing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            phone_numbers: Vec::new(),
            messages: Vec::new(),
            is_connected: false,
            qr_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns false when the number was already present.
    pub fn add_phone_number(&mut self, number: &str) -> bool {
        if self.phone_numbers.iter().any(|n| n == number) {
            return false;
        }
        self.phone_numbers.push(number.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Returns false when the number was not present.
    pub fn remove_phone_number(&mut self, number: &str) -> bool {
        let before = self.phone_numbers.len();
        self.phone_numbers.retain(|n| n != number);
        let removed = self.phone_numbers.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Merge a partial update and refresh `updated_at`.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(numbers) = update.phone_numbers {
            self.phone_numbers = numbers;
        }
        if let Some(messages) = update.messages {
            self.messages = messages;
        }
        if let Some(connected) = update.is_connected {
            self.is_connected = connected;
        }
        if let Some(qr) = update.qr_code {
            self.qr_code = qr;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial session update. `None` leaves the field untouched; `qr_code`
/// uses `Some(None)` to clear the artifact.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub phone_numbers: Option<Vec<String>>,
    pub messages: Option<Vec<MessageRecord>>,
    pub is_connected: Option<bool>,
    pub qr_code: Option<Option<String>>,
}

impl SessionUpdate {
    pub fn phone_numbers(numbers: Vec<String>) -> Self {
        Self {
            phone_numbers: Some(numbers),
            ..Default::default()
        }
    }

    pub fn messages(messages: Vec<MessageRecord>) -> Self {
        Self {
            messages: Some(messages),
            ..Default::default()
        }
    }
}

/// Aggregate delivery numbers over a session's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: usize,
    pub total_sent: u64,
    pub total_failed: u64,
    /// Percentage, two decimals; 0 when nothing was attempted
    pub success_rate: f64,
}

impl MessageStats {
    pub fn from_messages(messages: &[MessageRecord]) -> Self {
        let total_sent: u64 = messages.iter().map(|m| u64::from(m.total_sent)).sum();
        let total_failed: u64 = messages.iter().map(|m| u64::from(m.total_failed)).sum();
        let attempted = total_sent + total_failed;
        let success_rate = if attempted == 0 {
            0.0
        } else {
            (total_sent as f64 / attempted as f64 * 10_000.0).round() / 100.0
        };
        Self {
            total_messages: messages.len(),
            total_sent,
            total_failed,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_each_status() {
        let results = vec![
            SendResult::success("1"),
            SendResult::failure("2", "no such user"),
            SendResult::success("3"),
        ];
        assert_eq!(tally(&results), (2, 1));
    }

    #[test]
    fn test_record_counts_match_results() {
        let msg = NewMessage::new(
            "hi",
            vec!["1".into(), "2".into()],
            vec![SendResult::success("1"), SendResult::failure("2", "boom")],
        );
        let record = MessageRecord::from_new(7, "default", msg);
        assert_eq!(record.total_sent + record.total_failed, record.results.len() as u32);
        assert!(record.results.len() <= record.phone_numbers.len());
    }

    #[test]
    fn test_session_phone_number_dedup() {
        let mut session = Session::new("s1", "Test");
        assert!(session.add_phone_number("1111111111"));
        assert!(!session.add_phone_number("1111111111"));
        assert!(session.remove_phone_number("1111111111"));
        assert!(!session.remove_phone_number("1111111111"));
        assert!(session.phone_numbers.is_empty());
    }

    #[test]
    fn test_apply_clears_qr_code() {
        let mut session = Session::new("s1", "Test");
        session.qr_code = Some("data:image/svg+xml;base64,AAAA".into());
        let before = session.updated_at;
        session.apply(SessionUpdate {
            qr_code: Some(None),
            is_connected: Some(true),
            ..Default::default()
        });
        assert!(session.qr_code.is_none());
        assert!(session.is_connected);
        assert_eq!(session.name, "Test");
        assert!(session.updated_at >= before);
    }

    #[test]
    fn test_send_result_json_shape() {
        let ok = serde_json::to_value(SendResult::success("9876543210")).unwrap();
        assert_eq!(ok["phoneNumber"], "9876543210");
        assert_eq!(ok["status"], "success");
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(SendResult::failure("1", "invalid wid")).unwrap();
        assert_eq!(err["status"], "error");
        assert_eq!(err["error"], "invalid wid");
    }

    #[test]
    fn test_stats_success_rate() {
        let record = |sent, failed| MessageRecord {
            id: 0,
            session_id: "default".into(),
            body: String::new(),
            phone_numbers: vec![],
            results: vec![],
            total_sent: sent,
            total_failed: failed,
            timestamp: Utc::now(),
        };
        let stats = MessageStats::from_messages(&[record(2, 1), record(0, 0)]);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.success_rate, 66.67);

        assert_eq!(MessageStats::from_messages(&[]).success_rate, 0.0);
    }
}
