//! Notification Bus: fan-out of CI success and failure events.

use async_trait::async_trait;
use reqwest::Method;

use super::{ClientResult, JsonClient};
use crate::events::NotificationEvent;

#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn write_notification_event(&self, event: &NotificationEvent) -> ClientResult<()>;
}

pub struct HttpNotificationBus {
    client: JsonClient,
}

impl HttpNotificationBus {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: JsonClient::new("notifier", base_url),
        }
    }
}

#[async_trait]
impl NotificationBus for HttpNotificationBus {
    async fn write_notification_event(&self, event: &NotificationEvent) -> ClientResult<()> {
        self.client.fire(Method::POST, "notify", event).await
    }
}
