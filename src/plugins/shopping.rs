//! The five shopping tools exposed to the model, bound to one cart session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    cart::CartStore,
    catalog::{self, ProductFilter},
    functions::{
        json_schema_for, FunctionDefinition, FunctionParameter, FunctionRegistry, KernelFunction,
        PARSE_ERROR_KEY,
    },
    types::null_as_default,
    LLMError,
};

pub const SEARCH_PRODUCTS: &str = "search_products";
pub const ADD_TO_CART: &str = "add_to_cart";
pub const REMOVE_FROM_CART: &str = "remove_from_cart";
pub const VIEW_CART: &str = "view_cart";
pub const CHECKOUT: &str = "checkout";

pub const TOOL_NAMES: [&str; 5] = [SEARCH_PRODUCTS, ADD_TO_CART, REMOVE_FROM_CART, VIEW_CART, CHECKOUT];

/// Registry with every shopping tool acting on `session_id`'s cart.
pub fn shopping_registry(store: Arc<CartStore>, session_id: impl Into<String>) -> FunctionRegistry {
    let session = Session {
        store,
        id: session_id.into(),
    };

    let mut registry = FunctionRegistry::new();
    registry.register(Arc::new(SearchProducts));
    registry.register(Arc::new(AddToCart(session.clone())));
    registry.register(Arc::new(RemoveFromCart(session.clone())));
    registry.register(Arc::new(ViewCart(session.clone())));
    registry.register(Arc::new(Checkout(session)));
    registry
}

#[derive(Clone)]
struct Session {
    store: Arc<CartStore>,
    id: String,
}

const INVALID_ARGUMENTS: &str = "Invalid arguments";

/// Missing or null fields take their defaults; only unparseable payloads and
/// type mismatches are rejected, always with the same message.
fn parse_args<T: DeserializeOwned>(function: &str, arguments: &Value) -> Result<T, LLMError> {
    if arguments.get(PARSE_ERROR_KEY).is_some() {
        return Err(LLMError::InvalidFunctionArguments(INVALID_ARGUMENTS.to_string()));
    }
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|error| {
        debug!(function, %error, "rejected tool arguments");
        LLMError::InvalidFunctionArguments(INVALID_ARGUMENTS.to_string())
    })
}

struct SearchProducts;

#[async_trait]
impl KernelFunction for SearchProducts {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(SEARCH_PRODUCTS)
            .with_description("Search for products by query, category, or price range")
            .with_parameter(
                FunctionParameter::new("query", json_schema_for::<String>())
                    .with_description("Search query for product name or description")
                    .optional(),
            )
            .with_parameter(
                FunctionParameter::new("category", json_schema_for::<String>())
                    .with_description(
                        "Product category (electronics, clothing, books, home, sports, beauty, toys, food)",
                    )
                    .optional(),
            )
            .with_parameter(
                FunctionParameter::new("limit", json_schema_for::<i64>())
                    .with_description("Maximum number of results to return (default: 10)")
                    .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let filter: ProductFilter = parse_args(SEARCH_PRODUCTS, arguments)?;
        Ok(serde_json::to_value(catalog::search(&filter))?)
    }
}

#[derive(Deserialize)]
struct AddToCartArgs {
    #[serde(default, deserialize_with = "null_as_default")]
    product_name: String,
    #[serde(default)]
    quantity: Option<i64>,
}

struct AddToCart(Session);

#[async_trait]
impl KernelFunction for AddToCart {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(ADD_TO_CART)
            .with_description("Add a product to the shopping cart")
            .with_parameter(
                FunctionParameter::new("product_name", json_schema_for::<String>())
                    .with_description("The name of the product to add"),
            )
            .with_parameter(
                FunctionParameter::new("quantity", json_schema_for::<i64>())
                    .with_description("Quantity to add (default: 1)")
                    .optional(),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: AddToCartArgs = parse_args(ADD_TO_CART, arguments)?;
        let cart = self.0.store.add_to_cart(
            &self.0.id,
            &args.product_name,
            args.quantity.unwrap_or(1),
        );
        Ok(serde_json::to_value(cart)?)
    }
}

#[derive(Deserialize)]
struct RemoveFromCartArgs {
    #[serde(default, deserialize_with = "null_as_default")]
    product_name: String,
}

struct RemoveFromCart(Session);

#[async_trait]
impl KernelFunction for RemoveFromCart {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(REMOVE_FROM_CART)
            .with_description("Remove a product from the shopping cart")
            .with_parameter(
                FunctionParameter::new("product_name", json_schema_for::<String>())
                    .with_description("The name of the product to remove"),
            )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: RemoveFromCartArgs = parse_args(REMOVE_FROM_CART, arguments)?;
        let cart = self.0.store.remove_from_cart(&self.0.id, &args.product_name);
        Ok(serde_json::to_value(cart)?)
    }
}

struct ViewCart(Session);

#[async_trait]
impl KernelFunction for ViewCart {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(VIEW_CART)
            .with_description("View the current shopping cart contents and totals")
    }

    async fn invoke(&self, _arguments: &Value) -> Result<Value, LLMError> {
        Ok(serde_json::to_value(self.0.store.summary(&self.0.id))?)
    }
}

struct Checkout(Session);

#[async_trait]
impl KernelFunction for Checkout {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new(CHECKOUT).with_description("Process checkout for the current cart")
    }

    async fn invoke(&self, _arguments: &Value) -> Result<Value, LLMError> {
        Ok(serde_json::to_value(self.0.store.checkout(&self.0.id))?)
    }
}
