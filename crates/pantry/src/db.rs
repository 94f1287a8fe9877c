use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::PantryError;
use crate::models::{GroceryItem, RemoveOutcome};

/// Async-safe handle to the inventory database: `Arc<Mutex>` around the
/// connection, all access on tokio's blocking pool.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<PantryDb>>,
}

impl DbHandle {
    pub fn new(db: PantryDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub async fn call<F, R>(&self, f: F) -> Result<R, PantryError>
    where
        F: FnOnce(&PantryDb) -> Result<R, PantryError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| PantryError::Database(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| PantryError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct PantryDb {
    conn: Connection,
}

impl PantryDb {
    pub fn new(path: &Path) -> Result<Self, PantryError> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self, PantryError> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<(), PantryError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS grocery_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    item_name TEXT NOT NULL UNIQUE,
                    quantity INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_grocery_items_name ON grocery_items(item_name);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Add stock. An existing item (exact name match) accumulates quantity;
    /// an unknown name creates a fresh row. Returns the merged record.
    pub fn add_item(&self, item_name: &str, quantity: i64) -> Result<GroceryItem, PantryError> {
        if quantity <= 0 {
            return Err(PantryError::Validation(
                "Quantity must be greater than 0.".into(),
            ));
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM grocery_items WHERE item_name = ?1",
                params![item_name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up item by name")?;

        let id = match existing {
            Some(id) => {
                self.conn
                    .execute(
                        "UPDATE grocery_items SET quantity = quantity + ?1 WHERE id = ?2",
                        params![quantity, id],
                    )
                    .context("Failed to increment quantity")?;
                id
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO grocery_items (item_name, quantity) VALUES (?1, ?2)",
                        params![item_name, quantity],
                    )
                    .context("Failed to insert item")?;
                self.conn.last_insert_rowid()
            }
        };
        self.get_item(id)
    }

    pub fn get_item(&self, item_id: i64) -> Result<GroceryItem, PantryError> {
        self.conn
            .query_row(
                "SELECT id, item_name, quantity FROM grocery_items WHERE id = ?1",
                params![item_id],
                |row| {
                    Ok(GroceryItem {
                        item_id: row.get(0)?,
                        item_name: row.get(1)?,
                        quantity: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query item")?
            .ok_or_else(|| PantryError::NotFound("Item not found.".into()))
    }

    pub fn list_items(&self) -> Result<Vec<GroceryItem>, PantryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, item_name, quantity FROM grocery_items ORDER BY id")
            .context("Failed to prepare list_items")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(GroceryItem {
                    item_id: row.get(0)?,
                    item_name: row.get(1)?,
                    quantity: row.get(2)?,
                })
            })
            .context("Failed to query items")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read item row")?);
        }
        Ok(items)
    }

    pub fn delete_item(&self, item_id: i64) -> Result<(), PantryError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM grocery_items WHERE id = ?1",
                params![item_id],
            )
            .context("Failed to delete item")?;
        if deleted == 0 {
            return Err(PantryError::NotFound("Item not found.".into()));
        }
        Ok(())
    }

    /// Take stock out of an item. Draining it (requested >= current stock)
    /// deletes the row; zero stock never leaves an empty record behind.
    pub fn remove_quantity(
        &self,
        item_id: i64,
        quantity: i64,
    ) -> Result<RemoveOutcome, PantryError> {
        let item = self.get_item(item_id)?;

        if quantity <= 0 {
            return Err(PantryError::Validation(
                "Quantity must be greater than 0.".into(),
            ));
        }

        if item.quantity <= quantity {
            self.delete_item(item_id)?;
            return Ok(RemoveOutcome::Deleted);
        }

        self.conn
            .execute(
                "UPDATE grocery_items SET quantity = quantity - ?1 WHERE id = ?2",
                params![quantity, item_id],
            )
            .context("Failed to decrement quantity")?;
        Ok(RemoveOutcome::Removed {
            removed: quantity,
            remaining: item.quantity - quantity,
        })
    }
}
