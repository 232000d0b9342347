//! Channel transports: the network call that actually places a message.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use herald_common::config::ChannelCredentials;

const TWILIO_API_BASE: &str = "https://api.twilio.com";
const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Failures placing a message with the provider.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the message ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("transport misconfigured: {0}")]
    Config(String),
}

/// What the provider returned for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider message identifier.
    pub message_id: Option<String>,
    /// Provider-reported status (e.g. `queued`).
    pub status: Option<String>,
}

impl DeliveryReceipt {
    pub fn acknowledged(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            status: None,
        }
    }

    /// A receipt counts only when it carries a non-empty message id.
    pub fn is_acknowledged(&self) -> bool {
        self.message_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Sends one message and reports the provider's receipt.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Channel name used in logs.
    fn channel(&self) -> &'static str;

    async fn send(
        &self,
        body: &str,
        from: &str,
        to: &str,
    ) -> Result<DeliveryReceipt, TransportError>;
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    code: Option<i64>,
}

/// WhatsApp messages through the Twilio Messages API.
#[derive(Debug, Clone)]
pub struct TwilioWhatsAppTransport {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioWhatsAppTransport {
    pub fn new(credentials: &ChannelCredentials) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: TWILIO_API_BASE.to_string(),
            account_sid: credentials.account_id.clone(),
            auth_token: credentials.auth_token.clone(),
        }
    }

    /// Point the transport at another API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

/// Channel-qualified address, e.g. `whatsapp:+15550001`.
fn whatsapp_address(address: &str) -> String {
    if address.starts_with(WHATSAPP_PREFIX) {
        address.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{address}")
    }
}

#[async_trait]
impl ChannelTransport for TwilioWhatsAppTransport {
    fn channel(&self) -> &'static str {
        "whatsapp"
    }

    async fn send(
        &self,
        body: &str,
        from: &str,
        to: &str,
    ) -> Result<DeliveryReceipt, TransportError> {
        if self.account_sid.is_empty() {
            return Err(TransportError::Config("account SID is not set".to_string()));
        }

        let from = whatsapp_address(from);
        let to = whatsapp_address(to);
        let params = [("Body", body), ("From", from.as_str()), ("To", to.as_str())];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(ErrorResponse {
                    message: Some(message),
                    code,
                }) => match code {
                    Some(code) => format!("{message} (code {code})"),
                    None => message,
                },
                _ => text,
            };
            return Err(TransportError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessageResponse = response.json().await?;
        tracing::debug!(
            to = %to,
            sid = ?parsed.sid,
            status = ?parsed.status,
            "WhatsApp message accepted"
        );

        Ok(DeliveryReceipt {
            message_id: parsed.sid,
            status: parsed.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_acknowledgment() {
        assert!(DeliveryReceipt::acknowledged("SM123").is_acknowledged());
        assert!(!DeliveryReceipt::acknowledged("").is_acknowledged());
        assert!(!DeliveryReceipt::default().is_acknowledged());
    }

    #[test]
    fn test_whatsapp_address_prefix() {
        assert_eq!(whatsapp_address("+15550001"), "whatsapp:+15550001");
        assert_eq!(whatsapp_address("whatsapp:+15550001"), "whatsapp:+15550001");
    }

    #[test]
    fn test_messages_url() {
        let transport = TwilioWhatsAppTransport::new(&ChannelCredentials {
            account_id: "AC1".to_string(),
            auth_token: "t".to_string(),
            sender_address: "+1".to_string(),
        })
        .with_base_url("http://127.0.0.1:9/");
        assert_eq!(
            transport.messages_url(),
            "http://127.0.0.1:9/2010-04-01/Accounts/AC1/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_missing_account_is_config_error() {
        let transport = TwilioWhatsAppTransport::new(&ChannelCredentials::default());
        let result = transport.send("hi", "+1", "+2").await;
        assert!(matches!(result, Err(TransportError::Config(_))));
    }
}
