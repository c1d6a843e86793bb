//! Remote table store: the capability the list synchronizer talks to.
//!
//! The production backend is a PostgREST endpoint paired with a Phoenix
//! realtime socket for row-level change notifications. [`MemoryStore`]
//! implements the same capability in-process.

pub mod memory;
pub mod postgrest;
pub mod realtime;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryStore, Operation};
pub use postgrest::PostgrestClient;
pub use realtime::{ChangeEvent, ChangeKind};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Realtime error: {0}")]
    Realtime(String),
}

/// Equality filter on a single column (`column = value`)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether a row satisfies this filter
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }

    /// PostgREST query pair, e.g. `("id", "eq.7")`
    pub fn to_query_pair(&self) -> (String, String) {
        let value = match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (self.column.clone(), format!("eq.{}", value))
    }
}

/// Sort order for a query
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// PostgREST `order` parameter value, e.g. `created_at.desc`
    pub fn to_query_value(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", self.column, direction)
    }

    /// Compare two rows by this order's column
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(a.get(&self.column), b.get(&self.column));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Total order over JSON column values: timestamps chronologically,
/// numbers numerically, everything else by its string form. Missing
/// values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Handle for a live change subscription.
///
/// Cancelling (explicitly or by dropping the handle) releases the
/// underlying connection. After cancellation no further events are
/// delivered to the subscriber's channel.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Release the subscription
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Query, mutate and watch rows of a remote table.
///
/// Rows travel as JSON objects; the store assigns `id` and `created_at`
/// on insert and returns the created rows.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoreError>;

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<(), StoreError>;

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), StoreError>;

    /// Deliver a [`ChangeEvent`] to `on_change` whenever any row of `table`
    /// is inserted, updated or deleted, regardless of which client wrote it.
    fn subscribe(
        &self,
        table: &str,
        on_change: mpsc::Sender<ChangeEvent>,
    ) -> Result<Subscription, StoreError>;
}
