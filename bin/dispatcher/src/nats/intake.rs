//! Inbound events.

use super::{QUEUE_GROUP, Subjects};
use async_nats::{Client, Message, Subject};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tripwire_core::{AppId, ArtifactStreamId, ExecutionId, PipelineId, TriggerExecutionId};
use tripwire_engine::{ContentCheckResult, FireOutcome, TriggerService};
use tripwire_resolver::Artifact;
use tripwire_webhook::WebhookHeaders;

const ARTIFACT_COLLECTED: &str = "artifact_collected";
const PIPELINE_COMPLETED: &str = "pipeline_completed";
const WEBHOOK_RECEIVED: &str = "webhook_received";
const CONTENT_CHECK_RESULT: &str = "content_check_result";

/// Artifacts newly collected on a stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactCollectedEvent {
    pub artifact_stream_id: ArtifactStreamId,
    pub artifacts: Vec<Artifact>,
}

/// A pipeline execution finished successfully.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineCompletedEvent {
    pub app_id: AppId,
    pub pipeline_id: PipelineId,
}

/// A webhook request received by the HTTP edge.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookReceivedEvent {
    pub app_id: AppId,
    pub token: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub payload: Value,
}

/// Verdict of a content-change check requested earlier.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentCheckResultEvent {
    pub app_id: AppId,
    pub trigger_execution_id: TriggerExecutionId,
    #[serde(flatten)]
    pub result: ContentCheckResult,
}

/// Reply sent back to the HTTP edge for a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookReply {
    Submitted {
        trigger_execution_id: TriggerExecutionId,
        execution_id: ExecutionId,
    },
    AwaitingContentCheck {
        trigger_execution_id: TriggerExecutionId,
    },
    ContentUnchanged {
        trigger_execution_id: TriggerExecutionId,
    },
    Skipped {
        reason: String,
    },
    Failed {
        message: String,
    },
}

impl From<FireOutcome> for WebhookReply {
    fn from(outcome: FireOutcome) -> Self {
        match outcome {
            FireOutcome::Submitted {
                trigger_execution_id,
                execution_id,
            } => Self::Submitted {
                trigger_execution_id,
                execution_id,
            },
            FireOutcome::AwaitingContentCheck {
                trigger_execution_id,
            } => Self::AwaitingContentCheck {
                trigger_execution_id,
            },
            FireOutcome::ContentUnchanged {
                trigger_execution_id,
            } => Self::ContentUnchanged {
                trigger_execution_id,
            },
            FireOutcome::Skipped { reason } => Self::Skipped { reason },
            FireOutcome::Failed(e) => Self::Failed {
                message: e.to_string(),
            },
        }
    }
}

impl WebhookReceivedEvent {
    fn webhook_headers(&self) -> WebhookHeaders {
        let mut headers = WebhookHeaders::new();
        for (name, value) in &self.headers {
            headers.insert(name, value.clone());
        }
        headers
    }
}

fn decode<T: DeserializeOwned>(message: &Message) -> Option<T> {
    match serde_json::from_slice(&message.payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(subject = %message.subject, error = %e, "dropping undecodable event");
            None
        }
    }
}

/// Feeds NATS events into a [`TriggerService`].
pub struct EventIntake {
    client: Client,
    subjects: Subjects,
    service: TriggerService,
    webhooks: JoinSet<()>,
}

impl EventIntake {
    #[must_use]
    pub fn new(client: Client, subjects: Subjects, service: TriggerService) -> Self {
        Self {
            client,
            subjects,
            service,
            webhooks: JoinSet::new(),
        }
    }

    async fn subscribe(
        &self,
        name: &'static str,
    ) -> Result<BoxStream<'static, (&'static str, Message)>, async_nats::SubscribeError> {
        let subject = self.subjects.event(name);
        let subscriber = self
            .client
            .queue_subscribe(subject.clone(), QUEUE_GROUP.to_string())
            .await?;
        debug!(%subject, "subscribed");
        Ok(subscriber.map(move |message| (name, message)).boxed())
    }

    /// Handles events until `shutdown` completes or the connection closes.
    ///
    /// Artifact, pipeline and content-check events are queued on the
    /// service's worker pool. Webhooks are answered on the message's reply
    /// subject; in-flight webhooks finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if a subscription cannot be created.
    pub async fn run(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), async_nats::SubscribeError> {
        let mut messages = stream::select_all([
            self.subscribe(ARTIFACT_COLLECTED).await?,
            self.subscribe(PIPELINE_COMPLETED).await?,
            self.subscribe(WEBHOOK_RECEIVED).await?,
            self.subscribe(CONTENT_CHECK_RESULT).await?,
        ]);
        tokio::pin!(shutdown);

        info!("event intake started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                next = messages.next() => match next {
                    Some((name, message)) => self.handle(name, message),
                    None => {
                        warn!("event subscriptions closed");
                        break;
                    }
                },
                Some(joined) = self.webhooks.join_next(), if !self.webhooks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "webhook task panicked");
                    }
                }
            }
        }

        debug!(in_flight = self.webhooks.len(), "waiting for webhook replies");
        while self.webhooks.join_next().await.is_some() {}
        info!("event intake stopped");
        Ok(())
    }

    fn handle(&mut self, name: &str, message: Message) {
        let queued = match name {
            ARTIFACT_COLLECTED => decode::<ArtifactCollectedEvent>(&message).map(|event| {
                self.service
                    .on_artifact_collected(event.artifact_stream_id, event.artifacts)
            }),
            PIPELINE_COMPLETED => decode::<PipelineCompletedEvent>(&message).map(|event| {
                self.service
                    .on_pipeline_completed(event.app_id, event.pipeline_id)
            }),
            CONTENT_CHECK_RESULT => decode::<ContentCheckResultEvent>(&message).map(|event| {
                self.service.on_content_check_result(
                    event.app_id,
                    event.trigger_execution_id,
                    event.result,
                )
            }),
            WEBHOOK_RECEIVED => {
                self.spawn_webhook(message);
                None
            }
            other => {
                warn!(event = other, "no handler for event");
                None
            }
        };
        if let Some(Err(e)) = queued {
            warn!(event = name, error = %e, "event was not queued");
        }
    }

    fn spawn_webhook(&mut self, message: Message) {
        let service = self.service.clone();
        let client = self.client.clone();
        self.webhooks.spawn(async move {
            let reply = match decode::<WebhookReceivedEvent>(&message) {
                Some(event) => webhook_reply(&service, &event).await,
                None => WebhookReply::Failed {
                    message: "undecodable webhook event".to_string(),
                },
            };
            if let Some(reply_to) = message.reply {
                respond(&client, reply_to, &reply).await;
            }
        });
    }
}

async fn webhook_reply(service: &TriggerService, event: &WebhookReceivedEvent) -> WebhookReply {
    let headers = event.webhook_headers();
    match service
        .on_webhook_received(event.app_id, &event.token, &headers, &event.payload)
        .await
    {
        Ok(report) => {
            debug!(trigger_id = %report.trigger_id, "webhook handled");
            report.outcome.into()
        }
        Err(e) => {
            info!(app_id = %event.app_id, error = %e, "webhook refused");
            WebhookReply::Failed {
                message: e.current_context().to_string(),
            }
        }
    }
}

async fn respond(client: &Client, reply_to: Subject, reply: &WebhookReply) {
    let body = match serde_json::to_vec(reply) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "webhook reply does not serialize");
            return;
        }
    };
    if let Err(e) = client.publish(reply_to, body.into()).await {
        warn!(error = %e, "failed to send webhook reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tripwire_engine::{StoreError, TriggerServiceError};

    #[test]
    fn content_check_result_is_flattened() {
        let app_id = AppId::new();
        let execution = TriggerExecutionId::new();
        let event: ContentCheckResultEvent = serde_json::from_value(json!({
            "app_id": app_id,
            "trigger_execution_id": execution,
            "result": "failed",
            "message": "repository unreachable",
        }))
        .unwrap();
        assert_eq!(event.trigger_execution_id, execution);
        assert_eq!(
            event.result,
            ContentCheckResult::Failed {
                message: "repository unreachable".to_string()
            }
        );
    }

    #[test]
    fn webhook_headers_are_case_insensitive() {
        let event: WebhookReceivedEvent = serde_json::from_value(json!({
            "app_id": AppId::new(),
            "token": "abc",
            "headers": {"X-GitHub-Event": "push"},
            "payload": {"ref": "refs/heads/main"},
        }))
        .unwrap();
        assert_eq!(event.webhook_headers().get("x-github-event"), Some("push"));
    }

    #[test]
    fn headers_are_optional() {
        let event: WebhookReceivedEvent = serde_json::from_value(json!({
            "app_id": AppId::new(),
            "token": "abc",
            "payload": {},
        }))
        .unwrap();
        assert!(event.headers.is_empty());
    }

    #[test]
    fn reply_carries_the_outcome() {
        let trigger_execution_id = TriggerExecutionId::new();
        let execution_id = ExecutionId::new();
        let reply = WebhookReply::from(FireOutcome::Submitted {
            trigger_execution_id,
            execution_id,
        });
        let body = serde_json::to_value(&reply).unwrap();
        assert_eq!(body["status"], "submitted");
        assert_eq!(body["execution_id"], json!(execution_id));

        let reply = WebhookReply::from(FireOutcome::Failed(TriggerServiceError::from(
            StoreError::Unavailable {
                message: "connection reset".to_string(),
            },
        )));
        assert_eq!(
            reply,
            WebhookReply::Failed {
                message: "store unavailable: connection reset".to_string()
            }
        );
    }
}
