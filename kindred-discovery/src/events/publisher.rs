use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use kindred_shared::clients::rabbitmq::RabbitMQClient;
use kindred_shared::types::event::{payloads, routing_keys, Event};

use crate::models::Context;

const SOURCE: &str = "kindred-discovery";

/// Outbound side of the relationship events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, event: &Event<Value>) -> anyhow::Result<()>;

    fn is_connected(&self) -> bool {
        true
    }
}

#[async_trait]
impl EventPublisher for RabbitMQClient {
    async fn publish(&self, routing_key: &str, event: &Event<Value>) -> anyhow::Result<()> {
        RabbitMQClient::publish(self, routing_key, event).await
    }

    fn is_connected(&self) -> bool {
        RabbitMQClient::is_connected(self)
    }
}

async fn emit<T: Serialize>(events: &dyn EventPublisher, routing_key: &str, user_id: Uuid, payload: T) {
    let data = match serde_json::to_value(payload) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(error = %e, routing_key, "failed to encode event payload");
            return;
        }
    };
    let event = Event::new(SOURCE, routing_key, data).with_user(user_id);

    if let Err(e) = events.publish(routing_key, &event).await {
        tracing::error!(error = %e, routing_key, "failed to publish event");
    }
}

pub async fn publish_request_sent(
    events: &dyn EventPublisher,
    request_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    context: Context,
    sender_name: &str,
) {
    emit(
        events,
        routing_keys::DISCOVERY_REQUEST_SENT,
        sender_id,
        payloads::RequestSent {
            request_id,
            sender_id,
            receiver_id,
            context: context.to_string(),
            sender_name: sender_name.to_string(),
        },
    )
    .await;
}

pub async fn publish_request_accepted(
    events: &dyn EventPublisher,
    request_id: Uuid,
    match_id: &str,
    sender_id: Uuid,
    receiver_id: Uuid,
) {
    emit(
        events,
        routing_keys::DISCOVERY_REQUEST_ACCEPTED,
        receiver_id,
        payloads::RequestAccepted {
            request_id,
            match_id: match_id.to_string(),
            sender_id,
            receiver_id,
        },
    )
    .await;
}

pub async fn publish_request_denied(
    events: &dyn EventPublisher,
    request_id: Uuid,
    sender_id: Uuid,
    denier_id: Uuid,
) {
    emit(
        events,
        routing_keys::DISCOVERY_REQUEST_DENIED,
        denier_id,
        payloads::RequestDenied {
            request_id,
            sender_id,
            denier_id,
        },
    )
    .await;
}

pub async fn publish_match_unmatched(
    events: &dyn EventPublisher,
    match_id: &str,
    user_id: Uuid,
    other_id: Uuid,
) {
    emit(
        events,
        routing_keys::DISCOVERY_MATCH_UNMATCHED,
        user_id,
        payloads::MatchUnmatched {
            match_id: match_id.to_string(),
            user_id,
            other_id,
        },
    )
    .await;
}

pub async fn publish_user_reported(events: &dyn EventPublisher, reporter_id: Uuid, reported_id: Uuid) {
    emit(
        events,
        routing_keys::DISCOVERY_USER_REPORTED,
        reporter_id,
        payloads::UserReported {
            reporter_id,
            reported_id,
        },
    )
    .await;
}


#[cfg(test)]
mod tests {
    use super::recording::RecordingPublisher;
    use super::*;

    #[tokio::test]
    async fn request_sent_is_enveloped_with_sender() {
        let events = RecordingPublisher::default();
        let (request, sender, receiver) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        publish_request_sent(&events, request, sender, receiver, Context::Friend, "Kit").await;

        let sent = events.events(routing_keys::DISCOVERY_REQUEST_SENT);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source, "kindred-discovery");
        assert_eq!(sent[0].user_id, Some(sender));
        assert_eq!(sent[0].data["context"], "friend");
        assert_eq!(sent[0].data["sender_name"], "Kit");
    }
}
