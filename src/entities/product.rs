use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Catalog product entity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub actual_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub discount_price: Option<Decimal>,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    #[sea_orm(nullable)]
    pub category: Option<String>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// The authoritative price checkout charges right now: the discount
    /// price when one is set and actually lower than the list price.
    pub fn current_price(&self) -> Decimal {
        match self.discount_price {
            Some(discounted) if discounted < self.actual_price => discounted,
            _ => self.actual_price,
        }
    }

    /// Deleted and archived products cannot be purchased.
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::wishlist_item::Entity")]
    WishlistItems,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::wishlist_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WishlistItems.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Product status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum ProductStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "archived")]
    Archived,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

/// Apparel size variant; part of an item's identity everywhere it appears.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum Size {
    #[sea_orm(string_value = "M")]
    #[serde(rename = "M")]
    #[strum(serialize = "M")]
    M,
    #[sea_orm(string_value = "L")]
    #[serde(rename = "L")]
    #[strum(serialize = "L")]
    L,
    #[sea_orm(string_value = "XL")]
    #[serde(rename = "XL")]
    #[strum(serialize = "XL")]
    Xl,
    #[sea_orm(string_value = "XXL")]
    #[serde(rename = "XXL")]
    #[strum(serialize = "XXL")]
    Xxl,
    #[sea_orm(string_value = "XXXL")]
    #[serde(rename = "XXXL")]
    #[strum(serialize = "XXXL")]
    Xxxl,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(actual: Decimal, discount: Option<Decimal>) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Crew Neck Tee".into(),
            slug: "crew-neck-tee".into(),
            description: "Plain cotton tee".into(),
            actual_price: actual,
            discount_price: discount,
            image_url: None,
            category: Some("tees".into()),
            status: ProductStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn discount_price_wins_when_lower() {
        let p = product(dec!(500), Some(dec!(399)));
        assert_eq!(p.current_price(), dec!(399));
    }

    #[test]
    fn list_price_wins_when_discount_is_not_a_discount() {
        let p = product(dec!(500), Some(dec!(650)));
        assert_eq!(p.current_price(), dec!(500));
    }

    #[test]
    fn list_price_used_without_discount() {
        let p = product(dec!(500), None);
        assert_eq!(p.current_price(), dec!(500));
    }

    #[test]
    fn size_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Size::Xxl).unwrap(), "\"XXL\"");
        assert_eq!(Size::Xxxl.to_string(), "XXXL");
    }
}
