use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A row of the shared list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Assigned by the store on creation
    pub id: i64,
    /// Assigned by the store on creation
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub completed: bool,
    /// Email of the user who added the item
    #[serde(default, deserialize_with = "null_as_empty")]
    pub added_by: String,
}

/// Insert payload; the store fills in `id` and `created_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewListItem {
    pub name: String,
    pub completed: bool,
    pub added_by: String,
}

impl NewListItem {
    /// Build an insert payload from raw user input.
    ///
    /// Returns `None` when the trimmed name is empty.
    pub fn new(name: &str, added_by: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            completed: false,
            added_by: added_by.to_string(),
        })
    }
}

/// Presentation order: newest first, ties broken by higher id first
pub fn newest_first(a: &ListItem, b: &ListItem) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
