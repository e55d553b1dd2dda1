use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, FromQueryResult, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, CheckoutResponse, OrderList, OrderWithItems},
    entity::{
        cart_items::{self, Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::ActiveModel as PaymentActive,
        products::{Column as ProdCol, Entity as Products},
        vouchers::{Column as VoucherCol, Entity as Vouchers},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::voucher,
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::CustomerId.eq(user.customer_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Convert the caller's cart into an order, atomically.
///
/// Everything from validation to the cart wipe runs inside one transaction;
/// any error before commit rolls the whole checkout back, so no stock,
/// voucher, order or payment mutation leaks out of a failed attempt.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let txn = state.orm.begin().await?;

    #[derive(Debug, FromQueryResult)]
    struct CartProductRow {
        product_id: Uuid,
        quantity: i32,
        unit_price: i64,
        stock: i32,
        active: bool,
    }

    // Row-lock the cart lines and their products up front so concurrent
    // checkouts serialize on the same stock.
    let rows = CartItems::find()
        .select_only()
        .column_as(CartCol::ProductId, "product_id")
        .column_as(CartCol::Quantity, "quantity")
        .column_as(CartCol::UnitPrice, "unit_price")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .column_as(ProdCol::Stock, "stock")
        .column_as(ProdCol::Active, "active")
        .filter(CartCol::CustomerId.eq(user.customer_id))
        .lock(LockType::Update)
        .into_model::<CartProductRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut subtotal: i64 = 0;
    for row in &rows {
        if row.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        if !row.active {
            return Err(AppError::ProductUnavailable(row.product_id));
        }
        if row.stock < row.quantity {
            return Err(AppError::InsufficientStock(row.product_id));
        }
        // Billed at the price captured when the line was added, not the live
        // catalog price.
        subtotal += row.unit_price * (row.quantity as i64);
    }

    let mut discount: i64 = 0;
    let mut applied_voucher: Option<Uuid> = None;
    if let Some(voucher_id) = payload.voucher_id {
        // An unknown or inapplicable voucher is a no-op for totals, not a
        // checkout failure (see DESIGN.md).
        if let Some(row) = Vouchers::find_by_id(voucher_id).one(&txn).await? {
            let candidate = voucher::evaluate(&row, subtotal, Utc::now());
            if candidate > 0 {
                let consumed = Vouchers::update_many()
                    .col_expr(
                        VoucherCol::RemainingUses,
                        Expr::col(VoucherCol::RemainingUses).sub(1),
                    )
                    .filter(VoucherCol::Id.eq(voucher_id))
                    .filter(VoucherCol::RemainingUses.gt(0))
                    .exec(&txn)
                    .await?;
                if consumed.rows_affected == 1 {
                    discount = candidate;
                    applied_voucher = Some(voucher_id);
                } else {
                    tracing::warn!(%voucher_id, "voucher uses raced to zero, proceeding without discount");
                }
            }
        }
    }

    let shipping_fee = if subtotal >= state.config.free_shipping_threshold {
        0
    } else {
        state.config.flat_shipping_fee
    };
    let discount = discount.min(subtotal);
    let grand_total = subtotal - discount + shipping_fee;

    let order_id = Uuid::new_v4();
    let code = build_order_code(order_id);

    let order = OrderActive {
        id: Set(order_id),
        customer_id: Set(user.customer_id),
        code: Set(code),
        subtotal: Set(subtotal),
        discount: Set(discount),
        shipping_fee: Set(shipping_fee),
        grand_total: Set(grand_total),
        status: Set("pending".into()),
        payment_method: Set(payload.payment_method.clone()),
        address_id: Set(payload.address_id),
        voucher_id: Set(applied_voucher),
        note: Set(payload.note.clone()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for row in &rows {
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(row.product_id),
            quantity: Set(row.quantity),
            unit_price: Set(row.unit_price),
            line_total: Set(row.unit_price * (row.quantity as i64)),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;

        // Conditional decrement: the guard re-checks stock at write time so
        // two racing checkouts cannot both drain the same units.
        let updated = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(row.quantity))
            .filter(ProdCol::Id.eq(row.product_id))
            .filter(ProdCol::Stock.gte(row.quantity))
            .exec(&txn)
            .await?;
        if updated.rows_affected != 1 {
            return Err(AppError::InsufficientStock(row.product_id));
        }
    }

    PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        amount: Set(grand_total),
        method: Set(payload.payment_method.clone()),
        status: Set("pending".into()),
        provider_reference: Set(None),
        provider_metadata: Set(None),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    CartItems::delete_many()
        .filter(CartCol::CustomerId.eq(user.customer_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.customer_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "grand_total": grand_total })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout success",
        CheckoutResponse {
            order_id: order.id,
            order_code: order.code,
            grand_total,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::CustomerId.eq(user.customer_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        customer_id: model.customer_id,
        code: model.code,
        subtotal: model.subtotal,
        discount: model.discount,
        shipping_fee: model.shipping_fee,
        grand_total: model.grand_total,
        status: model.status,
        payment_method: model.payment_method,
        address_id: model.address_id,
        voucher_id: model.voucher_id,
        note: model.note,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.line_total,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

/// Order codes hang off the order's UUID rather than a timestamp+customer
/// pair, so uniqueness survives clock skew and rapid retries.
fn build_order_code(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.to_string();
    let short = &suffix[..8];
    format!("ORD-{}-{}", date, short)
}
