use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        orders::{CheckoutRequest, CheckoutResponse, OrderList, OrderWithItems},
        payments::{TransferInstructions, TransferRequest, WebhookPayload},
    },
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::{health, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        orders::checkout,
        orders::list_orders,
        orders::get_order,
        payments::request_transfer,
        payments::webhook,
    ),
    components(
        schemas(
            Order,
            OrderItem,
            CheckoutRequest,
            CheckoutResponse,
            OrderList,
            OrderWithItems,
            TransferRequest,
            TransferInstructions,
            WebhookPayload,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<CheckoutResponse>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<TransferInstructions>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Orders", description = "Checkout and order endpoints"),
        (name = "Payments", description = "Transfer instructions and provider webhook"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
