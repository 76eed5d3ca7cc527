use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::ClientError;
use crate::models::{GuestCartLine, ProductSnapshot, MAX_LINE_QUANTITY};

/// Capacity of the change broadcast; slow subscribers only miss stale counts.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Local persistence for a guest cart (browser storage, a file, memory).
pub trait GuestCartStore: Send + Sync {
    fn load(&self) -> Result<Vec<GuestCartLine>, ClientError>;
    fn save(&self, lines: &[GuestCartLine]) -> Result<(), ClientError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    lines: Mutex<Vec<GuestCartLine>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GuestCartStore for MemoryStore {
    fn load(&self) -> Result<Vec<GuestCartLine>, ClientError> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .map_err(|_| ClientError::Storage("guest cart lock poisoned".to_string()))
    }

    fn save(&self, lines: &[GuestCartLine]) -> Result<(), ClientError> {
        let mut guard = self
            .lines
            .lock()
            .map_err(|_| ClientError::Storage("guest cart lock poisoned".to_string()))?;
        *guard = lines.to_vec();
        Ok(())
    }
}

/// JSON file store. A missing file is an empty cart.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GuestCartStore for JsonFileStore {
    fn load(&self) -> Result<Vec<GuestCartLine>, ClientError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, lines: &[GuestCartLine]) -> Result<(), ClientError> {
        // Write then rename so a crash never leaves a half-written cart.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(lines)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Counts published after every guest cart change (e.g. for a badge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartChanged {
    pub line_count: usize,
    pub item_count: i64,
}

impl CartChanged {
    fn of(lines: &[GuestCartLine]) -> Self {
        Self {
            line_count: lines.len(),
            item_count: lines.iter().map(|l| i64::from(l.quantity)).sum(),
        }
    }
}

/// Client-local cart with one line per product id.
pub struct GuestCart<S: GuestCartStore> {
    store: S,
    // Serializes load-modify-save sequences.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<CartChanged>,
}

impl<S: GuestCartStore> GuestCart<S> {
    pub fn new(store: S) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartChanged> {
        self.changes.subscribe()
    }

    pub fn lines(&self) -> Result<Vec<GuestCartLine>, ClientError> {
        self.store.load()
    }

    /// Adds a product or sets the quantity of its existing line.
    pub fn add(&self, product: ProductSnapshot, quantity: i32) -> Result<(), ClientError> {
        ensure_in_range(quantity)?;
        self.modify(|lines| {
            match lines.iter_mut().find(|l| l.product.id == product.id) {
                Some(line) => {
                    line.quantity = quantity;
                    line.product = product;
                }
                None => lines.push(GuestCartLine {
                    product,
                    quantity,
                    added_at: Utc::now(),
                }),
            }
            true
        })
    }

    /// Returns `false` when the product is not in the cart.
    pub fn set_quantity(&self, product_id: &str, quantity: i32) -> Result<bool, ClientError> {
        ensure_in_range(quantity)?;
        let mut found = false;
        self.modify(|lines| {
            if let Some(line) = lines.iter_mut().find(|l| l.product.id == product_id) {
                line.quantity = quantity;
                found = true;
            }
            found
        })?;
        Ok(found)
    }

    /// Removing an absent product is a no-op.
    pub fn remove(&self, product_id: &str) -> Result<(), ClientError> {
        self.modify(|lines| {
            let before = lines.len();
            lines.retain(|l| l.product.id != product_id);
            lines.len() != before
        })
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        self.take().map(|_| ())
    }

    /// Empties the cart and returns what it held.
    pub fn take(&self) -> Result<Vec<GuestCartLine>, ClientError> {
        let mut taken = Vec::new();
        self.modify(|lines| {
            taken = std::mem::take(lines);
            !taken.is_empty()
        })?;
        Ok(taken)
    }

    /// Puts `snapshot` back, adding quantities onto lines created since it was taken.
    pub fn restore(&self, snapshot: Vec<GuestCartLine>) -> Result<(), ClientError> {
        if snapshot.is_empty() {
            return Ok(());
        }
        self.modify(|lines| {
            let mut restored = Vec::with_capacity(snapshot.len() + lines.len());
            for old in snapshot {
                match lines.iter().position(|l| l.product.id == old.product.id) {
                    Some(pos) => {
                        let newer = lines.remove(pos);
                        restored.push(GuestCartLine {
                            quantity: old
                                .quantity
                                .saturating_add(newer.quantity)
                                .min(MAX_LINE_QUANTITY),
                            ..old
                        });
                    }
                    None => restored.push(old),
                }
            }
            restored.append(lines);
            *lines = restored;
            true
        })
    }

    fn modify<F>(&self, f: F) -> Result<(), ClientError>
    where
        F: FnOnce(&mut Vec<GuestCartLine>) -> bool,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ClientError::Storage("guest cart lock poisoned".to_string()))?;

        let mut lines = self.store.load()?;
        if !f(&mut lines) {
            return Ok(());
        }
        self.store.save(&lines)?;

        // No receivers is fine.
        if self.changes.send(CartChanged::of(&lines)).is_err() {
            debug!("guest cart changed with no subscribers");
        }
        Ok(())
    }
}

fn ensure_in_range(quantity: i32) -> Result<(), ClientError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        Err(ClientError::InvalidQuantity(quantity))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn product(id: &str) -> ProductSnapshot {
        ProductSnapshot::new(id)
    }

    #[test]
    fn add_sets_absolute_quantity() {
        let cart = GuestCart::new(MemoryStore::new());
        cart.add(product("a"), 3).unwrap();
        cart.add(product("a"), 5).unwrap();

        let lines = cart.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
    }

    #[test]
    fn rejects_non_positive_quantities() {
        let cart = GuestCart::new(MemoryStore::new());
        assert_matches!(cart.add(product("a"), 0), Err(ClientError::InvalidQuantity(0)));
        cart.add(product("a"), 1).unwrap();
        assert_matches!(
            cart.set_quantity("a", -1),
            Err(ClientError::InvalidQuantity(-1))
        );
        assert!(!cart.set_quantity("missing", 2).unwrap());
    }

    #[test]
    fn rejects_quantities_above_line_cap() {
        let cart = GuestCart::new(MemoryStore::new());
        let over = MAX_LINE_QUANTITY + 1;
        assert_matches!(
            cart.add(product("a"), over),
            Err(ClientError::InvalidQuantity(q)) if q == over
        );
        cart.add(product("a"), MAX_LINE_QUANTITY).unwrap();
        assert_eq!(cart.lines().unwrap()[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn remove_and_clear_are_idempotent() {
        let cart = GuestCart::new(MemoryStore::new());
        cart.add(product("a"), 1).unwrap();
        cart.remove("a").unwrap();
        cart.remove("a").unwrap();
        cart.clear().unwrap();
        assert!(cart.lines().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcasts_counts_on_change() {
        let cart = GuestCart::new(MemoryStore::new());
        let mut rx = cart.subscribe();

        cart.add(product("a"), 2).unwrap();
        cart.add(product("b"), 1).unwrap();
        cart.remove("missing").unwrap();
        cart.clear().unwrap();

        assert_eq!(rx.recv().await.unwrap(), CartChanged { line_count: 1, item_count: 2 });
        assert_eq!(rx.recv().await.unwrap(), CartChanged { line_count: 2, item_count: 3 });
        assert_eq!(rx.recv().await.unwrap(), CartChanged { line_count: 0, item_count: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn restore_adds_onto_lines_added_meanwhile() {
        let cart = GuestCart::new(MemoryStore::new());
        cart.add(product("a"), 2).unwrap();
        cart.add(product("b"), 1).unwrap();

        let snapshot = cart.take().unwrap();
        cart.add(product("a"), 1).unwrap();
        cart.add(product("c"), 4).unwrap();
        cart.restore(snapshot).unwrap();

        let lines: Vec<(String, i32)> = cart
            .lines()
            .unwrap()
            .into_iter()
            .map(|l| (l.product.id, l.quantity))
            .collect();
        assert_eq!(
            lines,
            vec![("a".into(), 3), ("b".into(), 1), ("c".into(), 4)]
        );
    }

    #[test]
    fn json_file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest-cart.json");

        let store = JsonFileStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let cart = GuestCart::new(store);
        cart.add(product("a"), 2).unwrap();

        let reopened = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened[0].quantity, 2);
    }
}
