use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroceryItem {
    pub item_id: i64,
    pub item_name: String,
    pub quantity: i64,
}

/// Result of `remove_quantity`: either the row survived with stock left,
/// or the request drained it and the row is gone.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Deleted,
    Removed { removed: i64, remaining: i64 },
}
