//! Send emails to user for important updates.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Serialize;

use crate::config::Mail;

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const EVENT_TYPE: &str = "io.idgate.email";
const EVENT_SOURCE: &str = "io.idgate.auth";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("mail event could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the account verification link to `to`.
    async fn send_validate_account_mail(
        &self,
        to: &str,
        full_name: &str,
        link: &str,
    ) -> Result<(), MailError>;
}

/// Mail templates list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Ask user to prove their email address.
    ValidateAccount,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    template: Template,
    full_name: Cow<'a, str>,
    link: Cow<'a, str>,
}

/// RabbitMQ mail publisher.
///
/// Without a connection, links are logged instead of sent.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self, MailError> {
        let conn_config = ConnectionProperties::default()
            .with_connection_name("idgate_mail_client".into());
        let conn = Connection::connect(&config.address, conn_config).await?;

        tracing::info!(queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(conn: &Connection, queue: &str) -> Result<Channel, MailError> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: EVENT_TYPE,
            source: EVENT_SOURCE,
            id: uuid::Uuid::new_v4().to_string(),
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

#[async_trait]
impl Mailer for MailManager {
    async fn send_validate_account_mail(
        &self,
        to: &str,
        full_name: &str,
        link: &str,
    ) -> Result<(), MailError> {
        let Some(conn) = &self.conn else {
            tracing::info!(%to, %link, "mail disabled, verification link not sent");
            return Ok(());
        };
        let channel = Self::create_channel(conn, &self.queue).await?;

        let payload = Self::create_event(Content {
            to: Cow::from(to),
            template: Template::ValidateAccount,
            full_name: Cow::from(full_name),
            link: Cow::from(link),
        });
        let payload = serde_json::to_vec(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::debug!(template = ?Template::ValidateAccount, "event sent");

        Ok(())
    }
}
