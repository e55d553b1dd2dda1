use chrono::{Duration, Utc};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use axum_storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        customers::{ActiveModel as CustomerActive, Column as CustomerCol, Entity as Customers},
        products::{ActiveModel as ProductActive, Column as ProductCol, Entity as Products},
        vouchers::{ActiveModel as VoucherActive, Column as VoucherCol, Entity as Vouchers},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let customer_id = ensure_customer(&orm, "customer@example.com").await?;
    ensure_products(&orm).await?;
    ensure_voucher(&orm, "WELCOME10").await?;

    println!("Seed completed. Customer ID: {customer_id}");
    Ok(())
}

async fn ensure_customer(
    orm: &sea_orm::DatabaseConnection,
    email: &str,
) -> anyhow::Result<Uuid> {
    if let Some(existing) = Customers::find()
        .filter(CustomerCol::Email.eq(email))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }

    // Credentials are issued by the auth service; the seed only needs a row.
    let customer = CustomerActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("external".into()),
        role: Set("customer".into()),
        created_at: NotSet,
    }
    .insert(orm)
    .await?;

    Ok(customer.id)
}

async fn ensure_products(orm: &sea_orm::DatabaseConnection) -> anyhow::Result<()> {
    let samples: [(&str, i64, i32); 3] = [
        ("Espresso Beans 1kg", 250_000, 40),
        ("Pour-over Kettle", 480_000, 15),
        ("Ceramic Mug", 90_000, 120),
    ];
    for (name, price, stock) in samples {
        let exists = Products::find()
            .filter(ProductCol::Name.eq(name))
            .one(orm)
            .await?;
        if exists.is_none() {
            ProductActive {
                id: Set(Uuid::new_v4()),
                name: Set(name.into()),
                description: Set(None),
                price: Set(price),
                stock: Set(stock),
                active: Set(true),
                created_at: NotSet,
            }
            .insert(orm)
            .await?;
        }
    }
    Ok(())
}

async fn ensure_voucher(orm: &sea_orm::DatabaseConnection, code: &str) -> anyhow::Result<()> {
    let exists = Vouchers::find()
        .filter(VoucherCol::Code.eq(code))
        .one(orm)
        .await?;
    if exists.is_none() {
        let now = Utc::now();
        VoucherActive {
            id: Set(Uuid::new_v4()),
            code: Set(code.into()),
            discount_type: Set("percent".into()),
            discount_value: Set(10),
            max_discount: Set(Some(50_000)),
            min_order_value: Set(100_000),
            valid_from: Set(now.into()),
            valid_to: Set((now + Duration::days(90)).into()),
            remaining_uses: Set(100),
            active: Set(true),
            created_at: NotSet,
        }
        .insert(orm)
        .await?;
    }
    Ok(())
}
