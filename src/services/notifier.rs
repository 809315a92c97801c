// src/services/notifier.rs

//! Push notification delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};
use crate::models::{Config, NotifyTarget};
use crate::services::{Delivered, Notifier};
use crate::utils::http::create_async_client;

/// Body of a Pushbullet "note" push.
#[derive(Debug, Serialize)]
struct NotePush<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'a str,
    body: &'a str,
}

/// The fields of the push echo we care about.
#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    iden: Option<String>,
}

/// Sends notes through the Pushbullet API; the notify target is the user's
/// access token.
pub struct PushbulletNotifier {
    client: Client,
    endpoint: String,
    title: String,
}

impl PushbulletNotifier {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: create_async_client(&config.http)?,
            endpoint: format!("{}/v2/pushes", config.notify.api_base.trim_end_matches('/')),
            title: config.notify.title.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn interpret(response: PushResponse) -> std::result::Result<Delivered, DeliveryError> {
        if response.active {
            Ok(Delivered {
                push_id: response.iden,
            })
        } else {
            Err(DeliveryError::Inactive)
        }
    }
}

#[async_trait]
impl Notifier for PushbulletNotifier {
    async fn notify(
        &self,
        target: &NotifyTarget,
        subject_id: &str,
        message: &str,
    ) -> std::result::Result<Delivered, DeliveryError> {
        let push = NotePush {
            kind: "note",
            title: &self.title,
            body: message,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Access-Token", target.expose())
            .json(&push)
            .send()
            .await?
            .error_for_status()?;

        let delivered = Self::interpret(response.json::<PushResponse>().await?)?;
        log::debug!(
            "Pushed notice for {} to {} (push {:?})",
            subject_id,
            target,
            delivered.push_id
        );
        Ok(delivered)
    }
}

/// Logs notifications instead of sending them (dry runs).
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        target: &NotifyTarget,
        subject_id: &str,
        message: &str,
    ) -> std::result::Result<Delivered, DeliveryError> {
        log::info!("[dry-run] notify {} about {}: {}", target, subject_id, message);
        Ok(Delivered::default())
    }
}
