#![allow(dead_code)]

use domainbus_core::{Category, DomainEvent, EventEnvelope};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Auth,
    Sync,
    Shop,
}

impl Category for Area {
    fn value(&self) -> &str {
        match self {
            Area::Auth => "app.auth",
            Area::Sync => "app.sync",
            Area::Shop => "app.shop",
        }
    }

    fn display_name(&self) -> &str {
        match self {
            Area::Auth => "Authentication",
            Area::Sync => "Synchronisation",
            Area::Shop => "Shop",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCreated {
    pub envelope: EventEnvelope,
    pub order_id: String,
    pub amount: f64,
}

impl OrderCreated {
    pub fn new(order_id: &str, amount: f64) -> Self {
        Self {
            envelope: EventEnvelope::new("order.created", Area::Shop),
            order_id: order_id.to_string(),
            amount,
        }
    }
}

impl DomainEvent for OrderCreated {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    fn payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("orderId".into(), json!(self.order_id));
        map.insert("amount".into(), json!(self.amount));
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRegistered {
    pub envelope: EventEnvelope,
    pub user_id: String,
}

impl UserRegistered {
    pub fn new(user_id: &str, area: Area) -> Self {
        Self {
            envelope: EventEnvelope::new("user.registered", area),
            user_id: user_id.to_string(),
        }
    }
}

impl DomainEvent for UserRegistered {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    fn payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("userId".into(), json!(self.user_id));
        map
    }
}
