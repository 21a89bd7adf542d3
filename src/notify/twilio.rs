use crate::notify::SmsSender;
use async_trait::async_trait;
use tracing::{error, info};

pub struct TwilioSmsSender {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

/// Prefixes `+` when missing; Twilio only takes E.164.
pub fn to_e164(number: &str) -> String {
    let trimmed = number.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+{}", trimmed)
    }
}

/// Last four digits only, for logs.
fn masked(number: &str) -> String {
    let visible: String = number
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", visible)
}

impl TwilioSmsSender {
    pub fn new(
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        base_url: &str,
        client: reqwest::Client,
    ) -> Self {
        Self {
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.base_url, self.account_sid)
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send(&self, to_number: &str, message: &str) -> bool {
        if !self.is_configured() {
            error!("Twilio client not initialized");
            return false;
        }
        if self.from_number.is_empty() {
            error!("Twilio phone number not configured");
            return false;
        }

        let to = to_e164(to_number);
        let form = [
            ("To", to.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", message),
        ];

        let result = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => {
                info!("SMS sent to {}", masked(&to));
                true
            }
            Err(e) => {
                error!("Failed to send SMS to {}: {}", masked(&to), e);
                false
            }
        }
    }
}
