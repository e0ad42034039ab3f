use crate::{
    entities::{product, Product, ProductModel, ProductStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Product catalog service: the storefront's admin CRUD surface and the
/// authoritative price source checkout consults.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a catalog product.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate()?;
        if input.actual_price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price must be positive".to_string(),
            ));
        }
        if let Some(discount) = input.discount_price {
            if discount <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Discount price must be positive".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let product = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name.clone()),
            slug: Set(slugify(&input.name)),
            description: Set(input.description),
            actual_price: Set(input.actual_price),
            discount_price: Set(input.discount_price),
            image_url: Set(input.image_url),
            category: Set(input.category),
            status: Set(ProductStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let product = product.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::ProductCreated(product_id))
            .await;

        info!(%product_id, "Product created");
        Ok(product)
    }

    /// Updates a product's mutable fields.
    #[instrument(skip(self, input), fields(product_id = %product_id))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate()?;

        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();

        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(actual_price) = input.actual_price {
            if actual_price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Price must be positive".to_string(),
                ));
            }
            active.actual_price = Set(actual_price);
        }
        if let Some(discount_price) = input.discount_price {
            active.discount_price = Set(discount_price);
        }
        if let Some(image_url) = input.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(category) = input.category {
            active.category = Set(Some(category));
        }
        if let Some(status) = input.status {
            active.status = Set(status);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::ProductUpdated(product_id))
            .await;

        Ok(updated)
    }

    /// Fetches a product regardless of status (admin and internal callers).
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Fetches a product customers may see and buy.
    pub async fn get_active_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        let product = self.get_product(product_id).await?;
        if !product.is_purchasable() {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }
        Ok(product)
    }

    /// Storefront listing: active products, newest first, optional name
    /// search and category filter.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
        search: Option<String>,
        category: Option<String>,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let mut query = Product::find().filter(product::Column::Status.eq(ProductStatus::Active));

        if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
            query = query.filter(product::Column::Name.contains(search.trim()));
        }
        if let Some(category) = category {
            query = query.filter(product::Column::Category.eq(category));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((products, total))
    }

    /// Soft-deletes a product; existing orders keep their frozen line items,
    /// but carts and new checkouts treat the reference as stale.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();
        active.status = Set(ProductStatus::Deleted);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductDeleted(product_id))
            .await;

        info!(%product_id, "Product soft-deleted");
        Ok(())
    }
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Input for creating a product
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub actual_price: Decimal,
    pub discount_price: Option<Decimal>,
    pub image_url: Option<String>,
    pub category: Option<String>,
}

/// Input for updating a product; `None` leaves a field untouched.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub actual_price: Option<Decimal>,
    /// `Some(None)` clears the discount
    pub discount_price: Option<Option<Decimal>>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub status: Option<ProductStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_flattens_punctuation_and_case() {
        assert_eq!(slugify("Crew Neck Tee"), "crew-neck-tee");
        assert_eq!(slugify("  Denim — Slim Fit  "), "denim-slim-fit");
        assert_eq!(slugify("V2.0 Hoodie"), "v2-0-hoodie");
    }

    #[test]
    fn create_input_requires_name() {
        let input = CreateProductInput {
            name: "".into(),
            description: "desc".into(),
            actual_price: Decimal::from(100),
            discount_price: None,
            image_url: None,
            category: None,
        };
        assert!(input.validate().is_err());
    }
}
