use async_trait::async_trait;
use tracing::info;

/// Outbound messaging provider. Returns the provider's message id on
/// success; any error is reported back to the caller as a failed send.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    fn provider_tag(&self) -> &'static str;

    async fn send(&self, phone_number: &str, message: &str) -> anyhow::Result<String>;
}

/// Stand-in provider that accepts every message without any network call.
#[derive(Debug, Default)]
pub struct SimulatedGateway;

#[async_trait]
impl MessagingGateway for SimulatedGateway {
    fn provider_tag(&self) -> &'static str {
        "simulated"
    }

    async fn send(&self, phone_number: &str, message: &str) -> anyhow::Result<String> {
        let message_id = format!(
            "wa_{}_{:08x}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );
        info!(
            "Simulated WhatsApp to {} ({} chars) as {}",
            phone_number,
            message.chars().count(),
            message_id
        );
        Ok(message_id)
    }
}

/// Normalize an Indonesian phone number to the `62…` form gateways expect.
/// Non-digits are dropped; a leading `0` or bare `8` gains the country code.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if let Some(rest) = digits.strip_prefix('0') {
        format!("62{}", rest)
    } else if digits.starts_with('8') {
        format!("62{}", digits)
    } else {
        digits
    }
}
