//! Marketplace catalog grouped by waste category.
//!
//! The catalog is always re-derived from a full fetch; after any
//! purchase the previous grouping is considered unknown because
//! concurrent buyers change aggregate availability at any time.

use std::collections::HashMap;

use crate::{
    api::{ApiClient, ApiError},
    models::{Category, WasteItem},
};

/// All sellable stock of one category.
#[derive(Debug, Clone)]
pub struct CatalogGroup {
    /// The grouped category.
    pub category: Category,
    /// Aggregate available weight in kilograms.
    pub available_kg: f64,
    /// The listings backing the aggregate.
    pub items: Vec<WasteItem>,
}

/// Sellable marketplace stock grouped by category.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Non-empty groups in [`Category::ALL`] order.
    pub groups: Vec<CatalogGroup>,
}

impl Catalog {
    /// Group raw listings by category, summing available weight.
    /// Categories with no stock are omitted.
    pub fn from_items(items: Vec<WasteItem>) -> Self {
        let mut by_category: HashMap<Category, Vec<WasteItem>> = HashMap::new();
        for item in items {
            by_category.entry(item.category).or_default().push(item);
        }

        let groups = Category::ALL
            .into_iter()
            .filter_map(|category| {
                let items = by_category.remove(&category)?;
                let available_kg = items.iter().map(|item| item.amount_kg).sum();
                Some(CatalogGroup {
                    category,
                    available_kg,
                    items,
                })
            })
            .collect();
        Self { groups }
    }

    /// Fetch the current listings and derive the grouping.
    pub async fn load(api: &ApiClient) -> Result<Self, ApiError> {
        Ok(Self::from_items(api.marketplace_listings().await?))
    }

    /// Group for a category, if it has stock.
    pub fn group(&self, category: Category) -> Option<&CatalogGroup> {
        self.groups.iter().find(|group| group.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, category: Category, amount_kg: f64) -> WasteItem {
        WasteItem {
            id,
            user_id: 1,
            username: Some("seller".to_string()),
            description: format!("item {id}"),
            image_url: "https://img.example/x.jpg".to_string(),
            category,
            amount_kg,
            verified: true,
            predicted_category: None,
        }
    }

    #[test]
    fn groups_sum_weight_per_category() {
        let catalog = Catalog::from_items(vec![
            item(1, Category::Plastic, 2.0),
            item(2, Category::Metal, 5.0),
            item(3, Category::Plastic, 3.5),
        ]);

        let plastic = catalog.group(Category::Plastic).expect("plastic group");
        assert_eq!(plastic.available_kg, 5.5);
        assert_eq!(plastic.items.len(), 2);

        let metal = catalog.group(Category::Metal).expect("metal group");
        assert_eq!(metal.available_kg, 5.0);

        assert!(catalog.group(Category::Glass).is_none());
    }

    #[test]
    fn groups_follow_display_order() {
        let catalog = Catalog::from_items(vec![
            item(1, Category::Other, 1.0),
            item(2, Category::Plastic, 1.0),
            item(3, Category::Paper, 1.0),
        ]);
        let order: Vec<Category> = catalog.groups.iter().map(|group| group.category).collect();
        assert_eq!(
            order,
            vec![Category::Plastic, Category::Paper, Category::Other]
        );
    }

    #[test]
    fn empty_listings_produce_an_empty_catalog() {
        let catalog = Catalog::from_items(Vec::new());
        assert!(catalog.groups.is_empty());
    }
}
