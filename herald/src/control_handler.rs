//! Control handler implementation for herald
//!
//! This module implements the `CommandHandler` trait to process control
//! requests against the running notification queue.

use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use herald_common::tracing::{debug, info};
use herald_control::{
    ControlError, QueueCommand, Request, RequestCommand, Response, ResponseData, SystemCommand,
    protocol::{QueueMessage, QueueMessageDetails, QueueStats, SystemStatus},
    server::CommandHandler,
};
use herald_delivery::{
    DeliveryStatus, Message, MessageId, Notification, NotificationService, Payload, Recipient,
};

/// Characters of payload shown by `queue view`
const PREVIEW_LIMIT: usize = 1024;

/// Handler for control commands
pub struct HeraldControlHandler {
    service: Arc<dyn NotificationService>,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl HeraldControlHandler {
    #[must_use]
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self {
            service,
            start_time: Instant::now(),
        }
    }

    fn handle_system_command(&self, command: &SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),
            SystemCommand::Status => Response::data(ResponseData::SystemStatus(SystemStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                queue: stats(self.service.as_ref()),
            })),
        }
    }

    fn handle_queue_command(&self, command: QueueCommand) -> herald_control::Result<Response> {
        let response = match command {
            QueueCommand::List { status } => {
                let statuses = match status {
                    Some(status) => vec![
                        status
                            .parse::<DeliveryStatus>()
                            .map_err(|e| ControlError::ServerError(e.to_string()))?,
                    ],
                    None => vec![
                        DeliveryStatus::Pending,
                        DeliveryStatus::InFlight,
                        DeliveryStatus::Sent,
                        DeliveryStatus::Failed,
                    ],
                };

                let mut messages: Vec<Message> = statuses
                    .into_iter()
                    .flat_map(|status| self.service.list_by_status(status))
                    .collect();
                messages.sort_by_key(|m| m.sequence);

                Response::data(ResponseData::QueueList(
                    messages.iter().map(summarise).collect(),
                ))
            }
            QueueCommand::View { message_id } => {
                let id = parse_id(&message_id)?;
                match self.service.get(&id) {
                    Some(message) => Response::data(ResponseData::QueueMessageDetails(details(
                        &message,
                    ))),
                    None => Response::error(format!("Message {id} not found")),
                }
            }
            QueueCommand::Retry { message_id } => {
                let id = parse_id(&message_id)?;
                if self.service.retry_one(&id) {
                    info!(message_id = %id, "Operator requested redelivery");
                    Response::data(ResponseData::Message(format!(
                        "Message {id} queued for redelivery"
                    )))
                } else {
                    Response::error(format!("Message {id} is not failed"))
                }
            }
            QueueCommand::RetryAllFailed => {
                let reset = self.service.retry_all_failed();
                info!(count = reset, "Operator requested redelivery of all failed messages");
                Response::data(ResponseData::Affected(reset))
            }
            QueueCommand::ClearFailed => {
                let removed = self.service.clear_failed();
                info!(count = removed, "Operator cleared failed messages");
                Response::data(ResponseData::Affected(removed))
            }
            QueueCommand::Stats => {
                Response::data(ResponseData::QueueStats(stats(self.service.as_ref())))
            }
            QueueCommand::SendTest { recipient } => {
                match self
                    .service
                    .send(Notification::test_message(Recipient::from(recipient)))
                {
                    Ok(id) => Response::data(ResponseData::Message(format!(
                        "Test message {id} queued"
                    ))),
                    Err(e) => Response::error(e.to_string()),
                }
            }
        };

        Ok(response)
    }
}

#[async_trait]
impl CommandHandler for HeraldControlHandler {
    async fn handle_request(&self, request: Request) -> herald_control::Result<Response> {
        debug!("Control request: {:?}", request.command);

        match request.command {
            RequestCommand::System(command) => Ok(self.handle_system_command(&command)),
            RequestCommand::Queue(command) => self.handle_queue_command(command),
        }
    }
}

fn parse_id(raw: &str) -> herald_control::Result<MessageId> {
    raw.parse::<MessageId>()
        .map_err(|_| ControlError::ServerError(format!("Invalid message id: {raw}")))
}

fn stats(service: &dyn NotificationService) -> QueueStats {
    let stats = service.stats();
    QueueStats {
        total: stats.total,
        pending: stats.pending,
        processing: stats.processing,
        sent: stats.sent,
        failed: stats.failed,
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn summarise(message: &Message) -> QueueMessage {
    QueueMessage {
        id: message.id.to_string(),
        recipients: message.recipients.iter().map(ToString::to_string).collect(),
        subject: message.subject.to_string(),
        template: message.template.as_deref().map(str::to_string),
        status: message.status.to_string(),
        attempts: message.attempt_count,
        created_at: unix_secs(message.created_at),
        processed_at: message.processed_at.map(unix_secs),
    }
}

fn details(message: &Message) -> QueueMessageDetails {
    QueueMessageDetails {
        summary: summarise(message),
        last_error: message.last_error.clone(),
        not_before: message.not_before.map(unix_secs),
        payload_preview: preview(&message.payload),
    }
}

fn preview(payload: &Payload) -> String {
    let rendered = match payload {
        Payload::Raw(body) => body.clone(),
        Payload::Fields(fields) => fields
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    if rendered.chars().count() > PREVIEW_LIMIT {
        let mut truncated: String = rendered.chars().take(PREVIEW_LIMIT).collect();
        truncated.push_str("\n... (truncated)");
        truncated
    } else {
        rendered
    }
}
