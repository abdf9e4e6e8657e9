//! Structural diff of broker orders.
//!
//! Updates name the changed field by path: `status`, `avg_fill_price`,
//! `legs.len`, `legs.1.status`, and so on. Values are JSON; a field that is
//! absent on one side is `null` there. Applying the deltas from
//! [`reconcile`] to the old orders in order rebuilds the new ones.

use std::collections::{BTreeMap, HashSet};

use optflow_core::{Order, OrderDelta, OrderLeg, OrderSide, OrderStatus};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const LEG_FIELDS: [&str; 6] = [
    "option_symbol",
    "side",
    "quantity",
    "status",
    "avg_fill_price",
    "filled_quantity",
];

fn json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

struct Changes<'a> {
    id: &'a str,
    deltas: Vec<OrderDelta>,
}

impl Changes<'_> {
    fn field<T: Serialize + PartialEq>(&mut self, path: impl Into<String>, old: &T, new: &T) {
        if old != new {
            self.deltas.push(OrderDelta::OrderUpdate {
                id: self.id.to_string(),
                field: path.into(),
                old: json(old),
                new: json(new),
            });
        }
    }

    fn added(&mut self, path: String, new: Value) {
        self.deltas.push(OrderDelta::OrderUpdate {
            id: self.id.to_string(),
            field: path,
            old: Value::Null,
            new,
        });
    }
}

fn leg_value(leg: &OrderLeg, field: &str) -> Value {
    match field {
        "option_symbol" => json(&leg.option_symbol),
        "side" => json(&leg.side),
        "quantity" => json(&leg.quantity),
        "status" => json(&leg.status),
        "avg_fill_price" => json(&leg.avg_fill_price),
        "filled_quantity" => json(&leg.filled_quantity),
        _ => Value::Null,
    }
}

/// Field-level updates turning `old` into `new`. Both must share an id.
#[must_use]
pub fn diff_order(old: &Order, new: &Order) -> Vec<OrderDelta> {
    let mut changes = Changes {
        id: &new.id,
        deltas: Vec::new(),
    };
    changes.field("status", &old.status, &new.status);
    changes.field("quantity", &old.quantity, &new.quantity);
    changes.field("price", &old.price, &new.price);
    changes.field("avg_fill_price", &old.avg_fill_price, &new.avg_fill_price);
    changes.field("filled_quantity", &old.filled_quantity, &new.filled_quantity);
    changes.field("transaction_date", &old.transaction_date, &new.transaction_date);
    changes.field("legs.len", &old.legs.len(), &new.legs.len());

    for (i, new_leg) in new.legs.iter().enumerate() {
        match old.legs.get(i) {
            Some(old_leg) => {
                changes.field(format!("legs.{i}.option_symbol"), &old_leg.option_symbol, &new_leg.option_symbol);
                changes.field(format!("legs.{i}.side"), &old_leg.side, &new_leg.side);
                changes.field(format!("legs.{i}.quantity"), &old_leg.quantity, &new_leg.quantity);
                changes.field(format!("legs.{i}.status"), &old_leg.status, &new_leg.status);
                changes.field(format!("legs.{i}.avg_fill_price"), &old_leg.avg_fill_price, &new_leg.avg_fill_price);
                changes.field(format!("legs.{i}.filled_quantity"), &old_leg.filled_quantity, &new_leg.filled_quantity);
            }
            None => {
                for field in LEG_FIELDS {
                    changes.added(format!("legs.{i}.{field}"), leg_value(new_leg, field));
                }
            }
        }
    }
    changes.deltas
}

/// Reconciles `store` with the broker's current orders.
///
/// Runs the delete pass first, in id order, then creates and updates in
/// the order the broker listed them. `store` ends up equal to `fetched`.
pub fn reconcile(store: &mut BTreeMap<String, Order>, fetched: Vec<Order>) -> Vec<OrderDelta> {
    let live: HashSet<&str> = fetched.iter().map(|o| o.id.as_str()).collect();
    let gone: Vec<String> = store
        .keys()
        .filter(|id| !live.contains(id.as_str()))
        .cloned()
        .collect();

    let mut deltas = Vec::new();
    for id in gone {
        store.remove(&id);
        deltas.push(OrderDelta::OrderDelete { id });
    }

    for order in fetched {
        match store.get_mut(&order.id) {
            Some(existing) => {
                deltas.extend(diff_order(existing, &order));
                *existing = order;
            }
            None => {
                deltas.push(OrderDelta::OrderCreate {
                    order: order.clone(),
                });
                store.insert(order.id.clone(), order);
            }
        }
    }
    deltas
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("no order with id {0}")]
    UnknownOrder(String),

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("bad value for {field}: {source}")]
    Value {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

fn decode<T: DeserializeOwned>(field: &str, value: &Value) -> Result<T, ApplyError> {
    serde_json::from_value(value.clone()).map_err(|source| ApplyError::Value {
        field: field.to_string(),
        source,
    })
}

fn placeholder_leg() -> OrderLeg {
    OrderLeg {
        option_symbol: String::new(),
        side: OrderSide::Other,
        quantity: Decimal::ZERO,
        status: OrderStatus::default(),
        avg_fill_price: None,
        filled_quantity: Decimal::ZERO,
    }
}

fn apply_leg_field(leg: &mut OrderLeg, path: &str, field: &str, value: &Value) -> Result<(), ApplyError> {
    match field {
        "option_symbol" => leg.option_symbol = decode(path, value)?,
        "side" => leg.side = decode(path, value)?,
        "quantity" => leg.quantity = decode(path, value)?,
        "status" => leg.status = decode(path, value)?,
        "avg_fill_price" => leg.avg_fill_price = decode(path, value)?,
        "filled_quantity" => leg.filled_quantity = decode(path, value)?,
        _ => return Err(ApplyError::UnknownField(path.to_string())),
    }
    Ok(())
}

fn apply_field(order: &mut Order, path: &str, value: &Value) -> Result<(), ApplyError> {
    match path {
        "status" => order.status = decode(path, value)?,
        "quantity" => order.quantity = decode(path, value)?,
        "price" => order.price = decode(path, value)?,
        "avg_fill_price" => order.avg_fill_price = decode(path, value)?,
        "filled_quantity" => order.filled_quantity = decode(path, value)?,
        "transaction_date" => order.transaction_date = decode(path, value)?,
        "legs.len" => {
            let len: usize = decode(path, value)?;
            order.legs.resize_with(len, placeholder_leg);
        }
        _ => {
            let unknown = || ApplyError::UnknownField(path.to_string());
            let rest = path.strip_prefix("legs.").ok_or_else(unknown)?;
            let (index, field) = rest.split_once('.').ok_or_else(unknown)?;
            let index: usize = index.parse().map_err(|_| unknown())?;
            let leg = order.legs.get_mut(index).ok_or_else(unknown)?;
            apply_leg_field(leg, path, field, value)?;
        }
    }
    Ok(())
}

/// Applies one delta to a keyed set of orders.
///
/// # Errors
///
/// Fails when an update or delete names an unknown order, or an update names
/// an unknown field or carries a value of the wrong shape.
pub fn apply(orders: &mut BTreeMap<String, Order>, delta: &OrderDelta) -> Result<(), ApplyError> {
    match delta {
        OrderDelta::OrderCreate { order } => {
            orders.insert(order.id.clone(), order.clone());
        }
        OrderDelta::OrderDelete { id } => {
            orders
                .remove(id)
                .ok_or_else(|| ApplyError::UnknownOrder(id.clone()))?;
        }
        OrderDelta::OrderUpdate { id, field, new, .. } => {
            let order = orders
                .get_mut(id)
                .ok_or_else(|| ApplyError::UnknownOrder(id.clone()))?;
            apply_field(order, field, new)?;
        }
    }
    Ok(())
}
