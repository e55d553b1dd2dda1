use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub order_id: Uuid,
}

/// Bank-transfer instructions returned by the provider and shown to the customer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferInstructions {
    pub provider_reference: String,
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
    pub instructions: String,
}

/// Payment-status notification as delivered by the provider webhook.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookPayload {
    #[serde(alias = "reference")]
    pub provider_reference: Option<String>,
    pub status: Option<String>,
}
