use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ChangeEvent, ChangeKind, Filter, Order, RemoteStore, StoreError, Subscription};

/// Remote store operations, used for request accounting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    Insert,
    Update,
    Delete,
}

struct Listener {
    id: Uuid,
    table: String,
    sender: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct MemoryInner {
    tables: HashMap<String, Vec<Value>>,
    next_id: i64,
    listeners: Vec<Listener>,
    requests: HashMap<Operation, usize>,
    fail_next: HashSet<Operation>,
}

/// In-process [`RemoteStore`].
///
/// Assigns sequential ids and strictly increasing `created_at` timestamps
/// (one second apart), fans change events out to every subscriber of the
/// touched table, counts requests per operation and can be told to fail the
/// next call of a given operation.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    epoch: DateTime<Utc>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                next_id: 1,
                ..Default::default()
            })),
            epoch: Utc::now().trunc_subsecs(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        // A panicking test thread must not wedge every later call
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next call of `op` fail with a server error
    pub fn fail_next(&self, op: Operation) {
        self.lock().fail_next.insert(op);
    }

    /// Number of calls of `op` received so far (failed ones included)
    pub fn request_count(&self, op: Operation) -> usize {
        self.lock().requests.get(&op).copied().unwrap_or(0)
    }

    /// Number of live subscriptions across all tables
    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Snapshot of every row in `table`, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    fn begin(inner: &mut MemoryInner, op: Operation) -> Result<(), StoreError> {
        *inner.requests.entry(op).or_insert(0) += 1;
        if inner.fail_next.remove(&op) {
            log::debug!("memory store: injected failure for {:?}", op);
            return Err(StoreError::Server {
                status: 503,
                message: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn notify(inner: &mut MemoryInner, table: &str, kind: ChangeKind) {
        inner.listeners.retain(|listener| {
            if listener.table != table {
                return true;
            }
            let event = ChangeEvent {
                kind,
                table: table.to_string(),
            };
            match listener.sender.try_send(event) {
                Ok(()) => true,
                // A refresh is already queued for this subscriber
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Query)?;

        let mut rows: Vec<Value> = inner
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.map_or(true, |f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }

        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Insert)?;

        // Validate the whole batch before touching the table
        let mut objects: Vec<Map<String, Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Value::Object(map) => objects.push(map),
                other => {
                    return Err(StoreError::Server {
                        status: 400,
                        message: format!("row must be an object, got {}", other),
                    })
                }
            }
        }

        let mut created = Vec::with_capacity(objects.len());
        for mut object in objects {
            let id = inner.next_id;
            inner.next_id += 1;
            let created_at = self.epoch + Duration::seconds(id);
            object.insert("id".to_string(), Value::from(id));
            object.insert(
                "created_at".to_string(),
                Value::String(created_at.to_rfc3339()),
            );
            created.push(Value::Object(object));
        }

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(created.iter().cloned());

        if !created.is_empty() {
            Self::notify(&mut inner, table, ChangeKind::Insert);
        }

        Ok(created)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Update)?;

        let Value::Object(patch) = patch else {
            return Err(StoreError::Server {
                status: 400,
                message: "patch must be an object".to_string(),
            });
        };

        let mut touched = false;
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                if let Value::Object(fields) = row {
                    for (key, value) in &patch {
                        fields.insert(key.clone(), value.clone());
                    }
                    touched = true;
                }
            }
        }

        if touched {
            Self::notify(&mut inner, table, ChangeKind::Update);
        }

        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Delete)?;

        let mut removed = false;
        if let Some(rows) = inner.tables.get_mut(table) {
            let before = rows.len();
            rows.retain(|row| !filter.matches(row));
            removed = rows.len() != before;
        }

        if removed {
            Self::notify(&mut inner, table, ChangeKind::Delete);
        }

        Ok(())
    }

    fn subscribe(
        &self,
        table: &str,
        on_change: mpsc::Sender<ChangeEvent>,
    ) -> Result<Subscription, StoreError> {
        let id = Uuid::new_v4();
        self.lock().listeners.push(Listener {
            id,
            table: table.to_string(),
            sender: on_change,
        });

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(move || {
            let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.listeners.retain(|listener| listener.id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TABLE: &str = "grocery_items";

    #[tokio::test]
    async fn test_insert_assigns_identity() {
        let store = MemoryStore::new();
        let created = store
            .insert(TABLE, vec![json!({"name": "milk"}), json!({"name": "eggs"})])
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(created[0]["id"], json!(1));
        assert_eq!(created[1]["id"], json!(2));
        assert!(created[0]["created_at"].as_str().unwrap() < created[1]["created_at"].as_str().unwrap());
        assert_eq!(store.rows(TABLE).len(), 2);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = MemoryStore::new();
        store
            .insert(TABLE, vec![json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})])
            .await
            .unwrap();

        let rows = store
            .query(TABLE, None, Some(&Order::desc("created_at")))
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);

        let rows = store
            .query(TABLE, Some(&Filter::eq("id", 2)), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("b"));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = MemoryStore::new();
        store.insert(TABLE, vec![json!({"name": "a", "completed": false})]).await.unwrap();

        store
            .update(TABLE, &Filter::eq("id", 1), json!({"completed": true}))
            .await
            .unwrap();
        assert_eq!(store.rows(TABLE)[0]["completed"], json!(true));

        store.delete(TABLE, &Filter::eq("id", 1)).await.unwrap();
        assert!(store.rows(TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = MemoryStore::new();
        store.fail_next(Operation::Insert);

        let err = store.insert(TABLE, vec![json!({"name": "a"})]).await.unwrap_err();
        assert!(matches!(err, StoreError::Server { status: 503, .. }));
        assert!(store.rows(TABLE).is_empty());

        store.insert(TABLE, vec![json!({"name": "a"})]).await.unwrap();
        assert_eq!(store.request_count(Operation::Insert), 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes_until_cancelled() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::channel(8);
        let subscription = store.subscribe(TABLE, tx).unwrap();

        store.insert(TABLE, vec![json!({"name": "a"})]).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table, TABLE);

        // Other tables are not delivered
        store.insert("other", vec![json!({"name": "x"})]).await.unwrap();
        assert!(rx.try_recv().is_err());

        subscription.cancel();
        assert_eq!(store.subscriber_count(), 0);
        store.delete(TABLE, &Filter::eq("id", 1)).await.unwrap();
        // Sender was dropped with the listener, so the channel is closed
        assert!(rx.recv().await.is_none());
    }
}
