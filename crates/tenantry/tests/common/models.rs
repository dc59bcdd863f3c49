//! Record types shared by the integration tests.

use std::collections::HashMap;

use tenantry::{DefinedFields, Model};

#[derive(Model, Debug, Clone, Default, PartialEq)]
#[tenantry(table = "accounts")]
pub struct Account {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup, required)]
    pub name: String,
}

impl Account {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "customers")]
pub struct Customer {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup, required)]
    pub email: String,
    #[tenantry(column)]
    pub display_name: Option<String>,
    #[tenantry(encrypted)]
    pub tax_number: Option<String>,
    #[tenantry(jsonb)]
    pub tags: Vec<String>,
    #[tenantry(audit = "created_by")]
    pub created_by: Option<String>,
    #[tenantry(audit = "updated_by")]
    pub updated_by: Option<String>,
    #[tenantry(audit = "created_at")]
    pub created_at: Option<i64>,
    #[tenantry(audit = "updated_at")]
    pub updated_at: Option<i64>,
    #[tenantry(child(foreign_key = "customer_id", delete_orphans))]
    pub orders: Vec<Order>,
    #[tenantry(child(
        foreign_key = "customer_id",
        key_mapping = "label",
        value_mappings(kind = "postal")
    ))]
    pub addresses: HashMap<String, Address>,
    #[tenantry(defined_fields)]
    pub defined: Option<DefinedFields>,
}

impl Customer {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            ..Self::default()
        }
    }

    pub fn with_orders(mut self, numbers: &[&str]) -> Self {
        self.orders = numbers.iter().map(|n| Order::new(n)).collect();
        self
    }
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "orders")]
pub struct Order {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(foreign_key = "customers.id")]
    pub customer_id: Option<i64>,
    #[tenantry(lookup, required)]
    pub number: String,
    #[tenantry(column)]
    pub total: i64,
    #[tenantry(child(foreign_key = "order_id", delete_orphans))]
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(number: &str) -> Self {
        Self {
            number: number.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "order_lines")]
pub struct OrderLine {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup, foreign_key = "orders.id")]
    pub order_id: Option<i64>,
    #[tenantry(lookup)]
    pub sku: String,
    #[tenantry(column)]
    pub quantity: i32,
}

impl OrderLine {
    pub fn new(sku: &str, quantity: i32) -> Self {
        Self {
            sku: sku.to_string(),
            quantity,
            ..Self::default()
        }
    }
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "addresses")]
pub struct Address {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup, foreign_key = "customers.id")]
    pub customer_id: Option<i64>,
    #[tenantry(lookup)]
    pub label: String,
    #[tenantry(column)]
    pub kind: String,
    #[tenantry(column)]
    pub street: String,
}

impl Address {
    pub fn at(street: &str) -> Self {
        Self {
            street: street.to_string(),
            ..Self::default()
        }
    }
}

/// Identified by its account's name rather than the account id.
#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "contacts")]
pub struct Contact {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(foreign_key = "accounts.id")]
    pub account_id: Option<i64>,
    #[tenantry(lookup, related(table = "accounts", column = "name", via = "account_id"))]
    pub account_name: String,
    #[tenantry(lookup)]
    pub email: String,
    #[tenantry(column)]
    pub phone: Option<String>,
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "price_lists")]
pub struct PriceList {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup)]
    pub region: String,
    #[tenantry(child(grouping(region = "region"), delete_orphans))]
    pub prices: Vec<Price>,
}

#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "prices")]
pub struct Price {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(multitenancy_key)]
    pub tenant_id: i64,
    #[tenantry(lookup)]
    pub region: String,
    #[tenantry(lookup)]
    pub sku: String,
    #[tenantry(column)]
    pub amount: i64,
}

impl Price {
    pub fn new(sku: &str, amount: i64) -> Self {
        Self {
            sku: sku.to_string(),
            amount,
            ..Self::default()
        }
    }
}

/// Untenanted record without a lookup key.
#[derive(Model, Debug, Clone, Default)]
#[tenantry(table = "simple_records")]
pub struct Simple {
    #[tenantry(primary_key)]
    pub id: Option<i64>,
    #[tenantry(column)]
    pub name: String,
    #[tenantry(column = "type")]
    pub kind: String,
    #[tenantry(audit = "created_by")]
    pub created_by: Option<String>,
    #[tenantry(audit = "updated_by")]
    pub updated_by: Option<String>,
    #[tenantry(audit = "created_at")]
    pub created_at: Option<i64>,
    #[tenantry(audit = "updated_at")]
    pub updated_at: Option<i64>,
}
