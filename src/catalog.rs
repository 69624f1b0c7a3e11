//! Static product catalog backing `search_products` and cart pricing.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Price charged for products the catalog does not know.
pub const DEFAULT_PRICE: f64 = 99.99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub in_stock: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ProductFilter {
    fn effective_limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit > 0 => limit as usize,
            _ => DEFAULT_SEARCH_LIMIT,
        }
    }

    fn matches(&self, product: &Product) -> bool {
        if let Some(category) = non_empty(&self.category) {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }

        if let Some(query) = non_empty(&self.query) {
            let query = query.to_lowercase();
            if !product.name.to_lowercase().contains(&query)
                && !product.description.to_lowercase().contains(&query)
            {
                return false;
            }
        }

        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn product(name: &str, category: &str, price: f64, description: &str) -> Product {
    Product {
        name: name.to_string(),
        category: category.to_string(),
        price,
        description: description.to_string(),
        in_stock: true,
    }
}

static PRODUCTS: Lazy<Vec<Product>> = Lazy::new(|| {
    vec![
        product("iPhone 15", "electronics", 999.99, "Latest Apple smartphone with advanced features"),
        product("Samsung Galaxy S24", "electronics", 899.99, "Premium Android smartphone with excellent camera"),
        product("Wireless Headphones", "electronics", 199.99, "High-quality wireless headphones with noise cancellation"),
        product("MacBook Pro", "electronics", 1999.99, "Professional laptop for developers and creators"),
        product("Running Shoes", "clothing", 129.99, "Comfortable running shoes for daily exercise"),
        product("Winter Jacket", "clothing", 89.99, "Warm winter jacket for cold weather"),
        product("Coffee Maker", "home", 79.99, "Automatic coffee maker for perfect morning brew"),
        product("Vacuum Cleaner", "home", 149.99, "Powerful vacuum cleaner for home cleaning"),
        product("Programming Book", "books", 49.99, "Learn programming with this comprehensive guide"),
        product("Cookbook", "books", 29.99, "Delicious recipes for home cooking"),
        product("Tennis Racket", "sports", 159.99, "Professional tennis racket for competitive play"),
        product("Yoga Mat", "sports", 39.99, "Non-slip yoga mat for comfortable practice"),
        product("Face Cream", "beauty", 24.99, "Moisturizing face cream for healthy skin"),
        product("Shampoo", "beauty", 12.99, "Gentle shampoo for all hair types"),
        product("Board Game", "toys", 34.99, "Fun board game for family entertainment"),
        product("Action Figure", "toys", 19.99, "Collectible action figure for kids and collectors"),
        product("Organic Pasta", "food", 4.99, "Organic whole wheat pasta for healthy meals"),
        product("Green Tea", "food", 8.99, "Premium green tea with antioxidants"),
    ]
});

pub fn products() -> &'static [Product] {
    &PRODUCTS
}

/// Products matching the filter, in catalog order, truncated to the filter's limit.
pub fn search(filter: &ProductFilter) -> Vec<Product> {
    PRODUCTS
        .iter()
        .filter(|product| filter.matches(product))
        .take(filter.effective_limit())
        .cloned()
        .collect()
}

/// Exact-name price lookup; unknown products cost [`DEFAULT_PRICE`].
pub fn price_of(product_name: &str) -> f64 {
    PRODUCTS
        .iter()
        .find(|product| product.name == product_name)
        .map(|product| product.price)
        .unwrap_or(DEFAULT_PRICE)
}
