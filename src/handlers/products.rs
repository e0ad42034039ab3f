use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
    PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    services::catalog::{CreateProductInput, UpdateProductInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for product endpoints. Reads are public; mutations
/// require the admin role.
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub search: Option<String>,
    pub category: Option<String>,
}

/// List active products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(PaginationParams),
    responses((status = 200, description = "Paginated product list")),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<ListProductsQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let (products, total) = state
        .services
        .catalog
        .list_products(page, per_page, query.search, query.category)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        products, page, per_page, total,
    )))
}

/// Get a single product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    responses(
        (status = 200, description = "Product"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_active_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

/// Create a product (admin)
async fn create_product(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(product))
}

/// Update a product (admin)
async fn update_product(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let product = state
        .services
        .catalog
        .update_product(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

/// Soft-delete a product (admin)
async fn delete_product(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    state
        .services
        .catalog
        .delete_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
