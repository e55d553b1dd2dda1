use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};

use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::OrmConn,
    dto::payments::{TransferInstructions, TransferRequest, WebhookPayload},
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    signature,
    state::AppState,
};

/// Obtain bank-transfer instructions for a committed order and persist the
/// provider reference on its payment row.
///
/// Also the reopen path of the payment state machine: requesting instructions
/// for a `failed` payment resets it to `pending` under a fresh reference.
pub async fn request_transfer(
    state: &AppState,
    user: &AuthUser,
    payload: TransferRequest,
) -> AppResult<ApiResponse<TransferInstructions>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::CustomerId.eq(user.customer_id))
                .add(OrderCol::Id.eq(payload.order_id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if payment.status == "completed" {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    // The order is committed regardless of what the provider does next; a
    // gateway failure surfaces as 502 and leaves the payment untouched.
    let description = format!("Payment for order {}", order.code);
    let instructions = state
        .gateway
        .create_transfer(&order.code, payment.amount, &description)
        .await?;

    persist_transfer_instructions(&state.orm, payment.id, &instructions).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.customer_id),
        "transfer_requested",
        Some("payments"),
        Some(serde_json::json!({
            "order_id": order.id,
            "provider_reference": instructions.provider_reference,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Transfer instructions created",
        instructions,
        Some(Meta::empty()),
    ))
}

/// Attach provider instructions to a payment behind a row lock.
///
/// The gateway call above runs unlocked, so a webhook may settle the payment
/// while it is in flight; the locked re-read refuses to overwrite a payment
/// that became `completed` in the meantime. A `failed` payment reopens to
/// `pending`, which is the only transition back.
pub async fn persist_transfer_instructions(
    orm: &OrmConn,
    payment_id: Uuid,
    instructions: &TransferInstructions,
) -> AppResult<PaymentModel> {
    let txn = orm.begin().await?;

    let payment = Payments::find_by_id(payment_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if payment.status == "completed" {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    let reopened = payment.status == "failed";
    let mut active: PaymentActive = payment.into();
    active.provider_reference = Set(Some(instructions.provider_reference.clone()));
    active.provider_metadata = Set(Some(serde_json::to_value(instructions).map_err(
        |err| AppError::Internal(anyhow::anyhow!("serializing instructions: {err}")),
    )?));
    if reopened {
        active.status = Set("pending".into());
    }
    active.updated_at = Set(Utc::now().into());
    let payment = active.update(&txn).await?;

    txn.commit().await?;
    Ok(payment)
}

/// Reconcile a provider payment notification.
///
/// Verifies the HMAC over the exact raw bytes, then applies the status
/// transition idempotently: replays of the current status are no-ops, and
/// transitions the state machine does not allow are ignored with a warning
/// (the provider still gets its 200 so it stops retrying).
pub async fn handle_webhook(
    state: &AppState,
    raw_signature: Option<&str>,
    body: &[u8],
) -> AppResult<()> {
    let sig = raw_signature.ok_or(AppError::InvalidSignature)?;
    if !signature::verify(&state.config.webhook_secret, body, sig) {
        return Err(AppError::InvalidSignature);
    }

    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|_| AppError::BadRequest("Invalid webhook payload".into()))?;

    let reference = payload
        .provider_reference
        .filter(|r| !r.is_empty())
        .ok_or(AppError::MissingReference)?;
    let status = payload
        .status
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Webhook payload is missing status".into()))?;

    let txn = state.orm.begin().await?;

    let payment = Payments::find()
        .filter(PaymentCol::ProviderReference.eq(reference.clone()))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::PaymentNotFound(reference.clone()))?;

    let order = Orders::find_by_id(payment.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("payment without order")))?;

    let current = payment.status.clone();
    let order_id = order.id;
    match status.to_ascii_lowercase().as_str() {
        "completed" | "success" => match current.as_str() {
            "completed" => {
                tracing::info!(%reference, "replayed completed notification, no-op");
            }
            "failed" => {
                tracing::warn!(%reference, "completed notification for failed payment ignored");
            }
            _ => {
                let now = Utc::now();
                let mut payment: PaymentActive = payment.into();
                payment.status = Set("completed".into());
                payment.paid_at = Set(Some(now.into()));
                payment.updated_at = Set(now.into());
                payment.update(&txn).await?;

                let mut order: OrderActive = order.into();
                order.status = Set("confirmed".into());
                order.updated_at = Set(now.into());
                order.update(&txn).await?;
            }
        },
        "failed" | "cancelled" => match current.as_str() {
            "failed" => {
                tracing::info!(%reference, "replayed failed notification, no-op");
            }
            "completed" => {
                tracing::warn!(%reference, "failure notification for completed payment ignored");
            }
            _ => {
                let now = Utc::now();
                let mut payment: PaymentActive = payment.into();
                payment.status = Set("failed".into());
                payment.updated_at = Set(now.into());
                payment.update(&txn).await?;

                // Back to pending so the customer can retry the transfer.
                let mut order: OrderActive = order.into();
                order.status = Set("pending".into());
                order.updated_at = Set(now.into());
                order.update(&txn).await?;
            }
        },
        // Intermediate provider statuses are stored verbatim on the payment;
        // the order is untouched.
        _ => {
            if current == "completed" {
                tracing::warn!(%reference, %status, "intermediate status after completion ignored");
            } else if current != status {
                let mut payment: PaymentActive = payment.into();
                payment.status = Set(status.clone());
                payment.updated_at = Set(Utc::now().into());
                payment.update(&txn).await?;
            }
        }
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "payment_webhook",
        Some("payments"),
        Some(serde_json::json!({
            "order_id": order_id,
            "provider_reference": reference,
            "status": status,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}
