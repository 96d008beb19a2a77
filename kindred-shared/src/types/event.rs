use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `kindred.{domain}.{entity}.{action}`
/// Example: `kindred.discovery.request.sent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    pub const DISCOVERY_REQUEST_SENT: &str = "kindred.discovery.request.sent";
    pub const DISCOVERY_REQUEST_ACCEPTED: &str = "kindred.discovery.request.accepted";
    pub const DISCOVERY_REQUEST_DENIED: &str = "kindred.discovery.request.denied";
    pub const DISCOVERY_MATCH_UNMATCHED: &str = "kindred.discovery.match.unmatched";
    pub const DISCOVERY_USER_REPORTED: &str = "kindred.discovery.user.reported";
}

/// Event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RequestSent {
        pub request_id: Uuid,
        pub sender_id: Uuid,
        pub receiver_id: Uuid,
        pub context: String,
        pub sender_name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RequestAccepted {
        pub request_id: Uuid,
        pub match_id: String,
        pub sender_id: Uuid,
        pub receiver_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RequestDenied {
        pub request_id: Uuid,
        pub sender_id: Uuid,
        pub denier_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchUnmatched {
        pub match_id: String,
        pub user_id: Uuid,
        pub other_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserReported {
        pub reporter_id: Uuid,
        pub reported_id: Uuid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_user_and_correlation() {
        let user = Uuid::new_v4();
        let corr = Uuid::new_v4();
        let event = Event::new(
            "kindred-discovery",
            routing_keys::DISCOVERY_USER_REPORTED,
            payloads::UserReported {
                reporter_id: user,
                reported_id: Uuid::new_v4(),
            },
        )
        .with_user(user)
        .with_correlation(corr);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "kindred.discovery.user.reported");
        assert_eq!(json["user_id"], user.to_string());
        assert_eq!(json["correlation_id"], corr.to_string());
    }
}
