use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI document for the storefront API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-api",
        description = "Apparel storefront backend: catalog, carts, wishlists, checkout and payment reconciliation"
    ),
    paths(
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::checkout::create_order,
        crate::handlers::checkout::initiate_payment,
        crate::handlers::payments::razorpay_callback,
        crate::handlers::payments::paytm_callback,
        crate::handlers::orders::payment_status,
    ),
    components(schemas(crate::errors::ErrorResponse)),
    tags(
        (name = "Products", description = "Catalog browsing and admin CRUD"),
        (name = "Checkout", description = "Order creation and payment initiation"),
        (name = "Payments", description = "Gateway callback endpoints"),
        (name = "Orders", description = "Order management")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
