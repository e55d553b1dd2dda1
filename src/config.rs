use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Base URL of the bank-transfer provider API.
    pub gateway_base_url: String,
    /// Provider API key; when absent the gateway falls back to mock instructions.
    pub gateway_api_key: Option<String>,
    /// Shared secret used to verify webhook signatures.
    pub webhook_secret: String,
    /// URL the provider calls back with payment status updates.
    pub webhook_callback_url: String,
    pub gateway_timeout_secs: u64,
    /// Orders at or above this subtotal ship free.
    pub free_shipping_threshold: i64,
    pub flat_shipping_fee: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let gateway_base_url = env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.transfer-gateway.test".to_string());
        let gateway_api_key = env::var("GATEWAY_API_KEY").ok().filter(|k| !k.is_empty());
        let webhook_secret = env::var("WEBHOOK_SECRET")?;
        let webhook_callback_url = env::var("WEBHOOK_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:3000/api/payments/webhook".to_string());
        let gateway_timeout_secs = env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let free_shipping_threshold = env::var("FREE_SHIPPING_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(500_000);
        let flat_shipping_fee = env::var("FLAT_SHIPPING_FEE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(30_000);
        Ok(Self {
            database_url,
            host,
            port,
            gateway_base_url,
            gateway_api_key,
            webhook_secret,
            webhook_callback_url,
            gateway_timeout_secs,
            free_shipping_threshold,
            flat_shipping_fee,
        })
    }
}
