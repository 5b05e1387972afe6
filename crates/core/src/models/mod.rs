//! Shared domain models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed classification of waste material used for catalog grouping
/// and category verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Plastic packaging, bottles, containers.
    Plastic,
    /// Scrap metal of any kind.
    Metal,
    /// Glass bottles and sheet glass.
    Glass,
    /// Paper and cardboard.
    Paper,
    /// Electronic waste.
    Electronics,
    /// Compostable organic matter.
    Organic,
    /// Anything that does not fit the categories above.
    Other,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Category; 7] = [
        Category::Plastic,
        Category::Metal,
        Category::Glass,
        Category::Paper,
        Category::Electronics,
        Category::Organic,
        Category::Other,
    ];

    /// User-facing label, identical to the wire representation.
    pub fn label(self) -> &'static str {
        match self {
            Category::Plastic => "Plastic",
            Category::Metal => "Metal",
            Category::Glass => "Glass",
            Category::Paper => "Paper",
            Category::Electronics => "Electronics",
            Category::Organic => "Organic",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An authenticated marketplace user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Numeric identity assigned at signup.
    pub id: i64,
    /// Display name.
    pub username: String,
    /// Login email.
    pub email: String,
    /// Membership level.
    pub level: String,
    /// Token balance as last reported by the server. Never computed
    /// locally; see [`crate::session::SessionStore::refresh_user`].
    pub tokens: i64,
}

/// A listed waste item. Read-only on the client once uploaded.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasteItem {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub description: String,
    pub image_url: String,
    pub category: Category,
    /// Weight in kilograms, strictly positive.
    pub amount_kg: f64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub predicted_category: Option<Category>,
}

/// A recorded trade. Immutable server-side; the client only reads history.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub category: Category,
    pub tokens: i64,
    pub amount_kg: f64,
    pub timestamp: DateTime<Utc>,
}

impl WasteItem {
    /// Seller name suitable for display.
    pub fn display_seller(&self) -> &str {
        self.username.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serializes_as_label() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.label()));
            let back: Category = serde_json::from_str(&json).unwrap();
            assert_eq!(back, category);
        }
    }

    #[test]
    fn waste_item_tolerates_missing_optional_fields() {
        let item: WasteItem = serde_json::from_str(
            r#"{
                "id": 3,
                "user_id": 1,
                "description": "bag of bottle caps",
                "image_url": "https://img.example/caps.jpg",
                "category": "Metal",
                "amount_kg": 2.5
            }"#,
        )
        .unwrap();
        assert_eq!(item.category, Category::Metal);
        assert!(!item.verified);
        assert!(item.username.is_none());
        assert!(item.predicted_category.is_none());
        assert_eq!(item.display_seller(), "unknown");
    }
}
