use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::types::TransportStatus;

/// Outbound seam to the messaging transport. Delivery is at-most-once:
/// a failed send is reported as `false` and never retried here.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> bool;
    fn status(&self) -> TransportStatus;
}

/// WhatsApp Cloud API transport. Inbound messages arrive via the signed
/// webhook in `app.rs`; this side only pushes outbound sends.
pub struct WhatsAppTransport {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppTransport {
    pub fn new(http: reqwest::Client, access_token: String, phone_number_id: String) -> Self {
        Self {
            http,
            access_token,
            phone_number_id,
        }
    }

    fn configured(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.phone_number_id.trim().is_empty()
    }
}

#[async_trait]
impl ChatTransport for WhatsAppTransport {
    async fn send_text(&self, to: &str, text: &str) -> bool {
        if !self.configured() {
            eprintln!("[whatsapp] send skipped: access token or phone number id missing");
            return false;
        }
        let to_phone = chat_id_phone(to);
        let response = self
            .http
            .post(format!(
                "https://graph.facebook.com/v21.0/{}/messages",
                self.phone_number_id
            ))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to_phone,
                "type": "text",
                "text": {
                    "preview_url": false,
                    "body": text
                }
            }))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                eprintln!("[whatsapp] outbound delivery failed: {status}: {body}");
                false
            }
            Err(err) => {
                eprintln!("[whatsapp] outbound request failed: {err}");
                false
            }
        }
    }

    fn status(&self) -> TransportStatus {
        let configured = self.configured();
        TransportStatus {
            is_ready: configured,
            is_authenticated: configured,
        }
    }
}

/// Chat ids carry a `@c.us` suffix; the Graph API wants bare digits.
pub fn chat_id_phone(chat_id: &str) -> String {
    chat_id
        .split('@')
        .next()
        .unwrap_or(chat_id)
        .trim()
        .to_string()
}

pub fn phone_chat_id(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@c.us")
}

/// X-Hub-Signature-256 check over the raw webhook body. An empty secret
/// disables verification (local development).
pub fn verify_webhook_signature(
    app_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}
