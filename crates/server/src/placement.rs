//! Outbound call placement
//!
//! Thin REST client that asks the telephony vendor to dial a number and
//! point the resulting media stream at our answer webhook. Only consumed
//! to obtain a call id before the relay ever sees a `start` event.

use std::time::Duration;

use serde_json::Value;

use voicebridge_config::PlacementConfig;
use voicebridge_core::CallId;

use crate::ServerError;

pub struct PlacementClient {
    config: PlacementConfig,
    client: reqwest::Client,
}

impl PlacementClient {
    pub fn new(config: PlacementConfig) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.account_sid.is_empty()
            && !self.config.from_number.is_empty()
            && !self.config.answer_url.is_empty()
    }

    /// Dial `to` and return the vendor-assigned call id.
    pub async fn place(&self, to: &str) -> Result<CallId, ServerError> {
        if !self.is_configured() {
            return Err(ServerError::Placement(
                "placement credentials not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/Accounts/{}/Calls.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        );

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Url", self.config.answer_url.as_str()),
            ("Method", "POST"),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ServerError::Placement(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServerError::Placement(format!(
                "vendor returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServerError::Placement(e.to_string()))?;

        body.get("sid")
            .and_then(Value::as_str)
            .map(CallId::from)
            .ok_or_else(|| ServerError::Placement("response missing call sid".to_string()))
    }
}
