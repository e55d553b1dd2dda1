use std::time::Duration;

use serde::Serialize;

use crate::{
    config::AppConfig,
    dto::payments::TransferInstructions,
    error::{AppError, AppResult},
};

/// Client for the external bank-transfer provider.
///
/// Without an API key it degrades to deterministic mock instructions so local
/// environments work end to end; a production deployment must configure real
/// credentials instead of relying on the fallback.
#[derive(Clone)]
pub struct PaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    callback_url: String,
}

#[derive(Serialize)]
struct CreateTransferBody<'a> {
    order_code: &'a str,
    amount: i64,
    description: &'a str,
    callback_url: &'a str,
}

impl PaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        callback_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            callback_url: callback_url.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::new(
            config.gateway_base_url.clone(),
            config.gateway_api_key.clone(),
            config.webhook_callback_url.clone(),
            Duration::from_secs(config.gateway_timeout_secs),
        )
    }

    /// Request transfer instructions for an order amount.
    ///
    /// Timeouts, connection errors and non-2xx responses all surface as
    /// `AppError::Gateway`; the caller's order is already committed and must
    /// not be affected by a failure here.
    pub async fn create_transfer(
        &self,
        order_code: &str,
        amount: i64,
        description: &str,
    ) -> AppResult<TransferInstructions> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(order_code, "no gateway credentials, returning mock instructions");
            return Ok(self.mock_instructions(order_code, amount));
        };

        let url = format!("{}/v1/transfers", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&CreateTransferBody {
                order_code,
                amount,
                description,
                callback_url: &self.callback_url,
            })
            .send()
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "provider returned {}",
                response.status()
            )));
        }

        response
            .json::<TransferInstructions>()
            .await
            .map_err(|err| AppError::Gateway(format!("invalid provider response: {err}")))
    }

    fn mock_instructions(&self, order_code: &str, amount: i64) -> TransferInstructions {
        TransferInstructions {
            provider_reference: format!("MOCK-{order_code}"),
            bank_name: "Mock Bank".to_string(),
            account_number: "0000000000".to_string(),
            account_holder: "Storefront Escrow".to_string(),
            instructions: format!("Transfer {amount} referencing {order_code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(api_key: Option<String>) -> PaymentGateway {
        PaymentGateway::new(
            "https://api.transfer-gateway.test",
            api_key,
            "http://localhost:3000/api/payments/webhook",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn mock_fallback_is_deterministic() {
        let gw = gateway(None);
        let a = gw.create_transfer("ORD-1", 550_000, "order ORD-1").await.unwrap();
        let b = gw.create_transfer("ORD-1", 550_000, "order ORD-1").await.unwrap();
        assert_eq!(a.provider_reference, "MOCK-ORD-1");
        assert_eq!(a.provider_reference, b.provider_reference);
        assert_eq!(a.account_number, b.account_number);
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_gateway_error() {
        // Credentials configured, but nothing listens on this address.
        let gw = PaymentGateway::new(
            "http://127.0.0.1:1",
            Some("key".into()),
            "http://localhost:3000/api/payments/webhook",
            Duration::from_millis(200),
        )
        .unwrap();
        let err = gw.create_transfer("ORD-2", 1000, "order ORD-2").await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
    }
}
