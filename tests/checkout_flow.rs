use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    Statement,
};
use uuid::Uuid;

use axum_storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        orders::CheckoutRequest,
        payments::{TransferInstructions, TransferRequest},
    },
    entity::{
        cart_items::ActiveModel as CartItemActive,
        customers::ActiveModel as CustomerActive,
        orders::Entity as Orders,
        payments::{Column as PaymentCol, Entity as Payments},
        products::{ActiveModel as ProductActive, Entity as Products},
        vouchers::ActiveModel as VoucherActive,
    },
    error::AppError,
    gateway::PaymentGateway,
    middleware::auth::AuthUser,
    services::{order_service, payment_service},
    signature,
    state::AppState,
};

const WEBHOOK_SECRET: &str = "test-webhook-secret";

// Full pipeline: cart -> checkout -> transfer instructions -> webhook
// reconciliation, plus the failure scenarios around each step. Sequential in
// one test body because every scenario shares the database.
#[tokio::test]
async fn checkout_to_settlement_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;
    let customer_id = create_customer(&state, "buyer@example.com").await?;
    let user = AuthUser {
        customer_id,
        role: "customer".into(),
    };

    // --- Empty cart is rejected outright, nothing is written. ---
    let err = order_service::checkout(&state, &user, checkout_request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert_eq!(Orders::find().count(&state.orm).await?, 0);

    // --- One out-of-stock line aborts the whole checkout. ---
    let product_a = create_product(&state, "Product A", 100, 5).await?;
    let product_b = create_product(&state, "Product B", 200, 0).await?;
    add_cart_line(&state, customer_id, &product_a, 2).await?;
    add_cart_line(&state, customer_id, &product_b, 1).await?;

    let err = order_service::checkout(&state, &user, checkout_request(None))
        .await
        .unwrap_err();
    match err {
        AppError::InsufficientStock(id) => assert_eq!(id, product_b.id),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    assert_eq!(Payments::find().count(&state.orm).await?, 0);
    let a = Products::find_by_id(product_a.id).one(&state.orm).await?.unwrap();
    assert_eq!(a.stock, 5, "failed checkout must not touch stock");

    clear_cart(&state, customer_id).await?;

    // --- Happy path with a capped percent voucher and free shipping. ---
    // Subtotal 600_000; 10% capped at 50_000; threshold 500_000 => free.
    let beans = create_product(&state, "Beans", 150_000, 10).await?;
    add_cart_line(&state, customer_id, &beans, 4).await?;
    let voucher_id = create_voucher(&state, "TENOFF", 10, Some(50_000), 3).await?;

    let resp = order_service::checkout(&state, &user, checkout_request(Some(voucher_id))).await?;
    let created = resp.data.unwrap();
    assert_eq!(created.grand_total, 550_000);

    let order = Orders::find_by_id(created.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(order.subtotal, 600_000);
    assert_eq!(order.discount, 50_000);
    assert_eq!(order.shipping_fee, 0);
    assert_eq!(
        order.grand_total,
        order.subtotal - order.discount + order.shipping_fee
    );
    assert_eq!(order.status, "pending");

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(payment.amount, order.grand_total);
    assert_eq!(payment.status, "pending");

    let beans_after = Products::find_by_id(beans.id).one(&state.orm).await?.unwrap();
    assert_eq!(beans_after.stock, 6);
    assert!(cart_is_empty(&state, customer_id).await?);

    // --- An exhausted voucher never discounts, checkout still succeeds. ---
    let mug = create_product(&state, "Mug", 90_000, 20).await?;
    add_cart_line(&state, customer_id, &mug, 1).await?;
    let spent_voucher = create_voucher(&state, "SPENT", 10, None, 0).await?;
    let resp =
        order_service::checkout(&state, &user, checkout_request(Some(spent_voucher))).await?;
    let cheap = resp.data.unwrap();
    // 90_000 subtotal, no discount, below threshold => flat fee applies.
    assert_eq!(cheap.grand_total, 90_000 + 30_000);

    // --- Transfer instructions via the mock gateway. ---
    let resp = payment_service::request_transfer(
        &state,
        &user,
        TransferRequest {
            order_id: created.order_id,
        },
    )
    .await?;
    let instructions = resp.data.unwrap();
    assert_eq!(
        instructions.provider_reference,
        format!("MOCK-{}", order.code)
    );

    let payment = Payments::find_by_id(payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(
        payment.provider_reference.as_deref(),
        Some(instructions.provider_reference.as_str())
    );
    assert!(payment.provider_metadata.is_some());

    // Unknown/unowned order yields 404 semantics.
    let err = payment_service::request_transfer(
        &state,
        &user,
        TransferRequest {
            order_id: Uuid::new_v4(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // --- Webhook: tampered signature changes nothing. ---
    let completed_body = webhook_body(&instructions.provider_reference, "completed");
    let err = payment_service::handle_webhook(
        &state,
        Some(&signature::sign("wrong-secret", &completed_body)),
        &completed_body,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidSignature));
    let untouched = Payments::find_by_id(payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(untouched.status, "pending");

    // Missing signature header is rejected the same way.
    let err = payment_service::handle_webhook(&state, None, &completed_body)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSignature));

    // --- Webhook: unknown reference is 404, no state change. ---
    let stray_body = webhook_body("TRX-UNKNOWN", "completed");
    let err = payment_service::handle_webhook(
        &state,
        Some(&signature::sign(WEBHOOK_SECRET, &stray_body)),
        &stray_body,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::PaymentNotFound(_)));

    // --- Webhook: completed settles payment and confirms the order. ---
    send_webhook(&state, &completed_body).await?;
    let settled = Payments::find_by_id(payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(settled.status, "completed");
    assert!(settled.paid_at.is_some());
    let confirmed = Orders::find_by_id(order.id).one(&state.orm).await?.unwrap();
    assert_eq!(confirmed.status, "confirmed");

    // Replaying the same payload is a no-op, not an error.
    send_webhook(&state, &completed_body).await?;
    let replayed = Payments::find_by_id(payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(replayed.status, "completed");
    assert_eq!(replayed.paid_at, settled.paid_at);

    // A late failure notification cannot undo a completed payment.
    let failed_body = webhook_body(&instructions.provider_reference, "failed");
    send_webhook(&state, &failed_body).await?;
    let still_settled = Payments::find_by_id(payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(still_settled.status, "completed");

    // Paid orders cannot request new instructions.
    let err = payment_service::request_transfer(
        &state,
        &user,
        TransferRequest {
            order_id: created.order_id,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Instructions fetched before the payment settled must not overwrite it:
    // the locked persist re-checks the status after the gateway round trip.
    let stale = TransferInstructions {
        provider_reference: "TRX-STALE".into(),
        bank_name: "Mock Bank".into(),
        account_number: "0000000000".into(),
        account_holder: "Storefront Escrow".into(),
        instructions: "late retry".into(),
    };
    let err =
        payment_service::persist_transfer_instructions(&state.orm, settled.id, &stale)
            .await
            .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    let kept = Payments::find_by_id(settled.id).one(&state.orm).await?.unwrap();
    assert_eq!(kept.status, "completed");
    assert_eq!(
        kept.provider_reference.as_deref(),
        Some(instructions.provider_reference.as_str()),
        "a settled payment keeps its original reference"
    );

    // --- Failure/reopen path on the second (cheap) order. ---
    let resp = payment_service::request_transfer(
        &state,
        &user,
        TransferRequest {
            order_id: cheap.order_id,
        },
    )
    .await?;
    let cheap_instructions = resp.data.unwrap();

    // Intermediate provider status is stored verbatim, order untouched.
    let processing_body = webhook_body(&cheap_instructions.provider_reference, "processing");
    send_webhook(&state, &processing_body).await?;
    let cheap_payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(cheap.order_id))
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(cheap_payment.status, "processing");
    let cheap_order = Orders::find_by_id(cheap.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(cheap_order.status, "pending");

    let cheap_failed = webhook_body(&cheap_instructions.provider_reference, "failed");
    send_webhook(&state, &cheap_failed).await?;
    let cheap_payment = Payments::find_by_id(cheap_payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(cheap_payment.status, "failed");
    let cheap_order = Orders::find_by_id(cheap.order_id).one(&state.orm).await?.unwrap();
    assert_eq!(cheap_order.status, "pending", "failed payment reopens the order");

    // Requesting instructions again reopens the failed payment.
    payment_service::request_transfer(
        &state,
        &user,
        TransferRequest {
            order_id: cheap.order_id,
        },
    )
    .await?;
    let reopened = Payments::find_by_id(cheap_payment.id).one(&state.orm).await?.unwrap();
    assert_eq!(reopened.status, "pending");

    // --- An inactive product aborts the whole checkout. ---
    let retired = create_product(&state, "Retired", 50_000, 10).await?;
    let mut deactivate: ProductActive = retired.clone().into();
    deactivate.active = Set(false);
    let retired = deactivate.update(&state.orm).await?;
    add_cart_line(&state, customer_id, &retired, 1).await?;

    let orders_before = Orders::find().count(&state.orm).await?;
    let err = order_service::checkout(&state, &user, checkout_request(None))
        .await
        .unwrap_err();
    match err {
        AppError::ProductUnavailable(id) => assert_eq!(id, retired.id),
        other => panic!("expected ProductUnavailable, got {other:?}"),
    }
    assert_eq!(Orders::find().count(&state.orm).await?, orders_before);
    let untouched = Products::find_by_id(retired.id).one(&state.orm).await?.unwrap();
    assert_eq!(untouched.stock, 10);
    clear_cart(&state, customer_id).await?;

    // --- Two checkouts racing for the last unit: one wins, stock ends at 0. ---
    let last_unit = create_product(&state, "Last Unit", 120_000, 1).await?;
    let racer_a = create_customer(&state, "racer-a@example.com").await?;
    let racer_b = create_customer(&state, "racer-b@example.com").await?;
    add_cart_line(&state, racer_a, &last_unit, 1).await?;
    add_cart_line(&state, racer_b, &last_unit, 1).await?;

    let (state_a, state_b) = (state.clone(), state.clone());
    let task_a = tokio::spawn(async move {
        let racer = AuthUser {
            customer_id: racer_a,
            role: "customer".into(),
        };
        order_service::checkout(&state_a, &racer, checkout_request(None)).await
    });
    let task_b = tokio::spawn(async move {
        let racer = AuthUser {
            customer_id: racer_b,
            role: "customer".into(),
        };
        order_service::checkout(&state_b, &racer, checkout_request(None)).await
    });

    let results = [task_a.await?, task_b.await?];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one checkout may take the last unit");
    for result in results {
        if let Err(err) = result {
            assert!(matches!(err, AppError::InsufficientStock(id) if id == last_unit.id));
        }
    }
    let drained = Products::find_by_id(last_unit.id).one(&state.orm).await?.unwrap();
    assert_eq!(drained.stock, 0, "the last unit is sold exactly once");

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, payments, orders, cart_items, audit_logs, vouchers, products, customers RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        gateway_base_url: "https://api.transfer-gateway.test".into(),
        gateway_api_key: None,
        webhook_secret: WEBHOOK_SECRET.into(),
        webhook_callback_url: "http://localhost:3000/api/payments/webhook".into(),
        gateway_timeout_secs: 1,
        free_shipping_threshold: 500_000,
        flat_shipping_fee: 30_000,
    };
    let gateway = PaymentGateway::from_config(&config)?;

    Ok(AppState {
        pool,
        orm,
        config: Arc::new(config),
        gateway,
    })
}

fn checkout_request(voucher_id: Option<Uuid>) -> CheckoutRequest {
    CheckoutRequest {
        address_id: None,
        voucher_id,
        payment_method: "bank_transfer".into(),
        note: None,
    }
}

fn webhook_body(reference: &str, status: &str) -> Vec<u8> {
    serde_json::json!({ "provider_reference": reference, "status": status })
        .to_string()
        .into_bytes()
}

async fn send_webhook(state: &AppState, body: &[u8]) -> anyhow::Result<()> {
    let sig = signature::sign(WEBHOOK_SECRET, body);
    payment_service::handle_webhook(state, Some(&sig), body).await?;
    Ok(())
}

async fn create_customer(state: &AppState, email: &str) -> anyhow::Result<Uuid> {
    let customer = CustomerActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set("customer".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(customer.id)
}

async fn create_product(
    state: &AppState,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<axum_storefront_api::entity::products::Model> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(None),
        price: Set(price),
        stock: Set(stock),
        active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn add_cart_line(
    state: &AppState,
    customer_id: Uuid,
    product: &axum_storefront_api::entity::products::Model,
    quantity: i32,
) -> anyhow::Result<()> {
    CartItemActive {
        id: Set(Uuid::new_v4()),
        customer_id: Set(customer_id),
        product_id: Set(product.id),
        quantity: Set(quantity),
        unit_price: Set(product.price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(())
}

async fn clear_cart(state: &AppState, customer_id: Uuid) -> anyhow::Result<()> {
    use axum_storefront_api::entity::cart_items::{Column as CartCol, Entity as CartItems};
    CartItems::delete_many()
        .filter(CartCol::CustomerId.eq(customer_id))
        .exec(&state.orm)
        .await?;
    Ok(())
}

async fn cart_is_empty(state: &AppState, customer_id: Uuid) -> anyhow::Result<bool> {
    use axum_storefront_api::entity::cart_items::{Column as CartCol, Entity as CartItems};
    let count = CartItems::find()
        .filter(CartCol::CustomerId.eq(customer_id))
        .count(&state.orm)
        .await?;
    Ok(count == 0)
}

async fn create_voucher(
    state: &AppState,
    code: &str,
    percent: i64,
    max_discount: Option<i64>,
    remaining_uses: i32,
) -> anyhow::Result<Uuid> {
    let now = Utc::now();
    let voucher = VoucherActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.into()),
        discount_type: Set("percent".into()),
        discount_value: Set(percent),
        max_discount: Set(max_discount),
        min_order_value: Set(0),
        valid_from: Set((now - Duration::days(1)).into()),
        valid_to: Set((now + Duration::days(30)).into()),
        remaining_uses: Set(remaining_uses),
        active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(voucher.id)
}
