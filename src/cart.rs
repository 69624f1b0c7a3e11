use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_name: String,
    pub quantity: u32,
    pub price: f64,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSummary {
    pub session_id: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub total: f64,
    pub item_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl CartSummary {
    fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            items: Vec::new(),
            total: 0.0,
            item_count: 0,
            updated_at: Utc::now(),
        }
    }

    fn recompute_totals(&mut self) {
        self.total = self.items.iter().map(|item| item.subtotal).sum();
        self.item_count = self.items.iter().map(|item| item.quantity).sum();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub order_id: String,
    pub total: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Cart contents a test case starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialCartState {
    #[serde(default)]
    pub items: Vec<InitialCartItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialCartItem {
    pub product_name: String,
    pub quantity: i64,
}

/// Per-session carts. Carts are created on first access and live until the store is dropped;
/// checkout empties a cart but keeps the session.
#[derive(Debug, Default)]
pub struct CartStore {
    carts: Mutex<HashMap<String, CartSummary>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation recomputes totals before releasing the guard, so a poisoned
    // map still holds consistent carts.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CartSummary>> {
        self.carts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `quantity` units (non-positive counts as 1), merging into an existing line.
    pub fn add_to_cart(&self, session_id: &str, product_name: &str, quantity: i64) -> CartSummary {
        let quantity = normalize_quantity(quantity);
        let mut carts = self.lock();
        let cart = get_or_create(&mut carts, session_id);

        match cart
            .items
            .iter_mut()
            .find(|item| item.product_name == product_name)
        {
            Some(item) => {
                item.quantity = item.quantity.saturating_add(quantity);
                item.subtotal = f64::from(item.quantity) * item.price;
            }
            None => {
                let price = catalog::price_of(product_name);
                cart.items.push(CartItem {
                    product_name: product_name.to_string(),
                    quantity,
                    price,
                    subtotal: f64::from(quantity) * price,
                });
            }
        }

        cart.recompute_totals();
        cart.clone()
    }

    /// Drops the first line for `product_name`; absent products leave the cart unchanged.
    pub fn remove_from_cart(&self, session_id: &str, product_name: &str) -> CartSummary {
        let mut carts = self.lock();
        let cart = get_or_create(&mut carts, session_id);

        if let Some(index) = cart
            .items
            .iter()
            .position(|item| item.product_name == product_name)
        {
            cart.items.remove(index);
        }

        cart.recompute_totals();
        cart.clone()
    }

    pub fn summary(&self, session_id: &str) -> CartSummary {
        let mut carts = self.lock();
        get_or_create(&mut carts, session_id).clone()
    }

    /// Places the order and empties the cart.
    pub fn checkout(&self, session_id: &str) -> CheckoutResult {
        let mut carts = self.lock();
        let cart = get_or_create(&mut carts, session_id);
        let total = cart.total;
        let now = Utc::now();

        cart.items.clear();
        cart.recompute_totals();

        CheckoutResult {
            success: true,
            order_id: format!("ORD-{}", now.timestamp()),
            total,
            message: "Order processed successfully".to_string(),
            timestamp: now,
        }
    }

    /// Replaces the session's cart with `state`, skipping lines with non-positive quantity.
    pub fn initialize(&self, session_id: &str, state: &InitialCartState) -> CartSummary {
        let mut cart = CartSummary::empty(session_id);
        for item in state.items.iter().filter(|item| item.quantity > 0) {
            let quantity = normalize_quantity(item.quantity);
            let price = catalog::price_of(&item.product_name);
            cart.items.push(CartItem {
                product_name: item.product_name.clone(),
                quantity,
                price,
                subtotal: f64::from(quantity) * price,
            });
        }
        cart.recompute_totals();

        self.lock().insert(session_id.to_string(), cart.clone());
        cart
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

fn get_or_create<'a>(
    carts: &'a mut HashMap<String, CartSummary>,
    session_id: &str,
) -> &'a mut CartSummary {
    carts
        .entry(session_id.to_string())
        .or_insert_with(|| CartSummary::empty(session_id))
}

fn normalize_quantity(quantity: i64) -> u32 {
    if quantity <= 0 {
        1
    } else {
        u32::try_from(quantity).unwrap_or(u32::MAX)
    }
}
