use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// Upper bound for a single line so quantities always fit the order schema.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// What the bag holds for one product: a bare quantity, or a quantity per size.
///
/// Serialized the way the session has always stored it: a bare number, or
/// `{"items_by_size": {"m": 2}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CartEntry {
    Unsized(u32),
    Sized { items_by_size: BTreeMap<String, u32> },
}

/// Flattened view of a cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub size: Option<String>,
    pub quantity: u32,
}

/// The session cart. A product is either one unsized line or one or more
/// sized lines, never both, and no stored quantity is ever zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    entries: BTreeMap<Uuid, CartEntry>,
}

fn normalize_size(size: Option<&str>) -> Option<&str> {
    size.map(str::trim).filter(|s| !s.is_empty())
}

fn shape_conflict(product_id: Uuid, reason: impl Into<String>) -> ServiceError {
    ServiceError::CartShapeConflict {
        product_id,
        reason: reason.into(),
    }
}

fn quantity_too_large() -> ServiceError {
    ServiceError::InvalidInput(format!(
        "quantity must not exceed {}",
        MAX_LINE_QUANTITY
    ))
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, product_id: Uuid) -> Option<&CartEntry> {
        self.entries.get(&product_id)
    }

    /// Total number of units across every line.
    pub fn product_count(&self) -> u64 {
        self.lines().iter().map(|l| u64::from(l.quantity)).sum()
    }

    /// Lines ordered by product id, then size.
    pub fn lines(&self) -> Vec<CartLine> {
        let mut lines = Vec::new();
        for (product_id, entry) in &self.entries {
            match entry {
                CartEntry::Unsized(quantity) => lines.push(CartLine {
                    product_id: *product_id,
                    size: None,
                    quantity: *quantity,
                }),
                CartEntry::Sized { items_by_size } => {
                    lines.extend(items_by_size.iter().map(|(size, quantity)| CartLine {
                        product_id: *product_id,
                        size: Some(size.clone()),
                        quantity: *quantity,
                    }))
                }
            }
        }
        lines
    }

    /// Current quantity for a line; missing keys read as zero.
    pub fn quantity_of(&self, product_id: Uuid, size: Option<&str>) -> u32 {
        match (self.entries.get(&product_id), normalize_size(size)) {
            (Some(CartEntry::Unsized(quantity)), None) => *quantity,
            (Some(CartEntry::Sized { items_by_size }), Some(size)) => {
                items_by_size.get(size).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Increments a line, creating it at zero first. Returns the new quantity.
    pub fn add(
        &mut self,
        product_id: Uuid,
        quantity: u32,
        size: Option<&str>,
    ) -> Result<u32, ServiceError> {
        if quantity == 0 {
            return Err(ServiceError::InvalidInput(
                "quantity must be at least 1".into(),
            ));
        }
        let size = normalize_size(size);
        self.check_shape(product_id, size)?;

        let updated = self
            .quantity_of(product_id, size)
            .checked_add(quantity)
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(quantity_too_large)?;
        self.write(product_id, size, updated);
        Ok(updated)
    }

    /// Overwrites a line. A quantity of zero or less deletes it, and deleting
    /// the last size of a product deletes the product.
    pub fn set(
        &mut self,
        product_id: Uuid,
        quantity: i64,
        size: Option<&str>,
    ) -> Result<u32, ServiceError> {
        let size = normalize_size(size);
        self.check_shape(product_id, size)?;

        let updated = if quantity <= 0 {
            0
        } else {
            u32::try_from(quantity)
                .ok()
                .filter(|q| *q <= MAX_LINE_QUANTITY)
                .ok_or_else(quantity_too_large)?
        };
        self.write(product_id, size, updated);
        Ok(updated)
    }

    /// Deletes a line unconditionally. Without a size, the whole product goes,
    /// whichever shape it has.
    pub fn remove(&mut self, product_id: Uuid, size: Option<&str>) -> Result<(), ServiceError> {
        match (self.entries.get(&product_id), normalize_size(size)) {
            (None, _) => Ok(()),
            (Some(_), None) => {
                self.entries.remove(&product_id);
                Ok(())
            }
            (Some(CartEntry::Unsized(_)), Some(size)) => Err(shape_conflict(
                product_id,
                format!("product is in the bag without a size; no '{}' line to remove", size),
            )),
            (Some(CartEntry::Sized { .. }), Some(size)) => {
                self.write(product_id, Some(size), 0);
                Ok(())
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn check_shape(&self, product_id: Uuid, size: Option<&str>) -> Result<(), ServiceError> {
        match (self.entries.get(&product_id), size) {
            (Some(CartEntry::Unsized(_)), Some(size)) => Err(shape_conflict(
                product_id,
                format!("product is in the bag without a size; cannot use size '{}'", size),
            )),
            (Some(CartEntry::Sized { .. }), None) => Err(shape_conflict(
                product_id,
                "product is in the bag by size; a size is required",
            )),
            _ => Ok(()),
        }
    }

    // Callers check the shape first; zero deletes.
    fn write(&mut self, product_id: Uuid, size: Option<&str>, quantity: u32) {
        match size {
            None if quantity == 0 => {
                self.entries.remove(&product_id);
            }
            None => {
                self.entries.insert(product_id, CartEntry::Unsized(quantity));
            }
            Some(size) if quantity == 0 => {
                let now_empty = match self.entries.get_mut(&product_id) {
                    Some(CartEntry::Sized { items_by_size }) => {
                        items_by_size.remove(size);
                        items_by_size.is_empty()
                    }
                    _ => false,
                };
                if now_empty {
                    self.entries.remove(&product_id);
                }
            }
            Some(size) => {
                let entry = self
                    .entries
                    .entry(product_id)
                    .or_insert_with(|| CartEntry::Sized {
                        items_by_size: BTreeMap::new(),
                    });
                if let CartEntry::Sized { items_by_size } = entry {
                    items_by_size.insert(size.to_string(), quantity);
                }
            }
        }
    }

    /// Rebuilds a cart from whatever the session held, dropping anything that
    /// is not a well-formed positive line.
    pub fn from_session_value(value: &Value) -> Self {
        let mut cart = Cart::new();
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return cart,
            other => {
                warn!(kind = %json_kind(other), "discarding non-object session cart");
                return cart;
            }
        };

        for (key, raw) in map {
            let product_id = match Uuid::parse_str(key) {
                Ok(id) => id,
                Err(_) => {
                    warn!(key = %key, "dropping cart entry with invalid product id");
                    continue;
                }
            };

            match raw {
                Value::Number(_) => {
                    if let Some(quantity) = positive_quantity(raw) {
                        cart.entries.insert(product_id, CartEntry::Unsized(quantity));
                    }
                }
                Value::Object(obj) => {
                    let items_by_size: BTreeMap<String, u32> = obj
                        .get("items_by_size")
                        .and_then(Value::as_object)
                        .map(|sizes| {
                            sizes
                                .iter()
                                .filter_map(|(size, q)| {
                                    let size = size.trim();
                                    if size.is_empty() {
                                        return None;
                                    }
                                    positive_quantity(q).map(|q| (size.to_string(), q))
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    if !items_by_size.is_empty() {
                        cart.entries
                            .insert(product_id, CartEntry::Sized { items_by_size });
                    }
                }
                other => {
                    warn!(%product_id, kind = %json_kind(other), "dropping malformed cart entry");
                }
            }
        }
        cart
    }
}

fn positive_quantity(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .filter(|q| *q > 0 && *q <= u64::from(MAX_LINE_QUANTITY))
        .map(|q| q as u32)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn pid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn add_creates_then_increments() {
        let mut cart = Cart::new();
        assert_eq!(cart.add(pid(1), 2, None).unwrap(), 2);
        assert_eq!(cart.add(pid(1), 3, None).unwrap(), 5);
        assert_eq!(cart.quantity_of(pid(1), None), 5);
        assert_eq!(cart.product_count(), 5);
    }

    #[test]
    fn add_rejects_zero() {
        let mut cart = Cart::new();
        assert_matches!(
            cart.add(pid(1), 0, None),
            Err(ServiceError::InvalidInput(_))
        );
        assert!(cart.is_empty());
    }

    #[test]
    fn sizes_are_tracked_independently() {
        let mut cart = Cart::new();
        cart.add(pid(1), 1, Some("m")).unwrap();
        cart.add(pid(1), 2, Some("l")).unwrap();
        cart.add(pid(1), 1, Some("m")).unwrap();

        assert_eq!(cart.quantity_of(pid(1), Some("m")), 2);
        assert_eq!(cart.quantity_of(pid(1), Some("l")), 2);
        assert_eq!(cart.lines().len(), 2);
    }

    #[test]
    fn empty_size_means_no_size() {
        let mut cart = Cart::new();
        cart.add(pid(1), 1, Some("  ")).unwrap();
        assert_eq!(cart.entry(pid(1)), Some(&CartEntry::Unsized(1)));
    }

    #[test]
    fn set_zero_removes_line() {
        let mut cart = Cart::new();
        cart.add(pid(1), 4, None).unwrap();
        cart.set(pid(1), 0, None).unwrap();
        assert!(cart.is_empty());

        // Deleting something absent is a no-op.
        cart.set(pid(2), -3, None).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn removing_last_size_removes_product() {
        let mut cart = Cart::new();
        cart.add(pid(1), 1, Some("s")).unwrap();
        cart.add(pid(1), 1, Some("m")).unwrap();

        cart.set(pid(1), 0, Some("s")).unwrap();
        assert!(cart.entry(pid(1)).is_some());
        cart.remove(pid(1), Some("m")).unwrap();
        assert!(cart.entry(pid(1)).is_none());
    }

    #[test]
    fn mixing_shapes_is_a_conflict_and_leaves_cart_intact() {
        let mut cart = Cart::new();
        cart.add(pid(1), 2, None).unwrap();
        cart.add(pid(2), 1, Some("xl")).unwrap();
        let before = cart.clone();

        assert_matches!(
            cart.add(pid(1), 1, Some("m")),
            Err(ServiceError::CartShapeConflict { .. })
        );
        assert_matches!(
            cart.set(pid(2), 3, None),
            Err(ServiceError::CartShapeConflict { .. })
        );
        assert_matches!(
            cart.remove(pid(1), Some("m")),
            Err(ServiceError::CartShapeConflict { .. })
        );
        assert_eq!(cart, before);
    }

    #[test]
    fn remove_without_size_drops_every_size() {
        let mut cart = Cart::new();
        cart.add(pid(1), 1, Some("s")).unwrap();
        cart.add(pid(1), 1, Some("m")).unwrap();
        cart.remove(pid(1), None).unwrap();
        assert!(cart.is_empty());

        cart.remove(pid(9), None).unwrap();
    }

    #[test]
    fn overflowing_quantity_is_rejected() {
        let mut cart = Cart::new();
        cart.add(pid(1), MAX_LINE_QUANTITY, None).unwrap();
        assert_matches!(
            cart.add(pid(1), 1, None),
            Err(ServiceError::InvalidInput(_))
        );
        assert_matches!(
            cart.set(pid(2), i64::from(MAX_LINE_QUANTITY) + 1, None),
            Err(ServiceError::InvalidInput(_))
        );
        assert_eq!(cart.quantity_of(pid(1), None), MAX_LINE_QUANTITY);
    }

    #[test]
    fn serializes_in_session_format() {
        let mut cart = Cart::new();
        cart.add(pid(1), 3, None).unwrap();
        cart.add(pid(2), 2, Some("m")).unwrap();

        let value = serde_json::to_value(&cart).unwrap();
        assert_eq!(
            value,
            json!({
                pid(1).to_string(): 3,
                pid(2).to_string(): {"items_by_size": {"m": 2}},
            })
        );
        assert_eq!(Cart::from_session_value(&value), cart);
    }

    #[test]
    fn session_read_drops_malformed_entries() {
        let raw = json!({
            "not-a-uuid": 1,
            pid(1).to_string(): 0,
            pid(2).to_string(): -4,
            pid(3).to_string(): "7",
            pid(4).to_string(): {"items_by_size": {}},
            pid(5).to_string(): {"items_by_size": {"m": 0, "": 3, "l": 2}},
            pid(6).to_string(): 2,
        });
        let cart = Cart::from_session_value(&raw);

        let lines = cart.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(cart.quantity_of(pid(5), Some("l")), 2);
        assert_eq!(cart.quantity_of(pid(6), None), 2);

        assert!(Cart::from_session_value(&json!([1, 2])).is_empty());
        assert!(Cart::from_session_value(&Value::Null).is_empty());
    }
}
