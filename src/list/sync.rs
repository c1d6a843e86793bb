//! Client-side projection of the shared list.
//!
//! [`ListSynchronizer`] is the only owner of the projection. Every change to
//! `items` comes from either a store acknowledgement or a full refetch, so a
//! failed write never shows up in the list. Change notifications from the
//! store trigger a full `load()` instead of patching rows individually.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::error::SyncError;
use super::model::{newest_first, ListItem, NewListItem};
use crate::store::{Filter, Order, RemoteStore, StoreError, Subscription};

/// State of the last `load()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Loading,
    Error,
}

/// Snapshot of the synchronizer, as seen by the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListState {
    pub items: Vec<ListItem>,
    pub status: SyncStatus,
    /// Message of the most recent failed operation, cleared by the next success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Owns the projection of one shared table
pub struct ListSynchronizer {
    store: Arc<dyn RemoteStore>,
    table: String,
    state: watch::Sender<ListState>,
}

impl ListSynchronizer {
    pub fn new(store: Arc<dyn RemoteStore>, table: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ListState::default());
        Self {
            store,
            table: table.into(),
            state,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Current snapshot
    pub fn state(&self) -> ListState {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<ListItem> {
        self.state.borrow().items.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.borrow().status
    }

    /// Observe every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ListState> {
        self.state.subscribe()
    }

    /// Fetch the full table and replace the projection.
    ///
    /// On failure the previous items stay visible and the status becomes
    /// [`SyncStatus::Error`].
    pub async fn load(&self) -> Result<(), SyncError> {
        self.state.send_modify(|s| s.status = SyncStatus::Loading);

        let order = Order::desc("created_at");
        let result = match self.store.query(&self.table, None, Some(&order)).await {
            Ok(rows) => decode_rows(rows),
            Err(e) => Err(e),
        };

        match result {
            Ok(mut items) => {
                // Don't rely on the store honoring the order clause
                items.sort_by(newest_first);
                log::debug!("Loaded {} items from {}", items.len(), self.table);
                self.state.send_modify(|s| {
                    s.items = items;
                    s.status = SyncStatus::Idle;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(e) => {
                let err = SyncError::from_store(e, SyncError::FetchFailed);
                log::error!("{}", err);
                self.state.send_modify(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    /// Add an item named `name` on behalf of `author`.
    ///
    /// Blank names are ignored without contacting the store (`Ok(None)`).
    /// The row enters the projection only once the store has assigned its
    /// identity.
    pub async fn add_item(&self, name: &str, author: &str) -> Result<Option<ListItem>, SyncError> {
        let Some(new_item) = NewListItem::new(name, author) else {
            log::debug!("Ignoring blank item name");
            return Ok(None);
        };

        let row = serde_json::to_value(&new_item)
            .map_err(|e| self.surface(SyncError::InsertFailed(StoreError::Decode(e.to_string()))))?;

        let item = match self.store.insert(&self.table, vec![row]).await {
            Ok(rows) => decode_rows(rows).and_then(|items| {
                items
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::Decode("insert returned no rows".to_string()))
            }),
            Err(e) => Err(e),
        }
        .map_err(|e| self.surface(SyncError::from_store(e, SyncError::InsertFailed)))?;

        self.state.send_modify(|s| {
            // A notification-triggered refresh may have delivered the row already
            s.items.retain(|existing| existing.id != item.id);
            let position = s
                .items
                .partition_point(|existing| newest_first(existing, &item).is_lt());
            s.items.insert(position, item.clone());
            s.last_error = None;
        });

        log::info!("Added item {} ({:?})", item.id, item.name);
        Ok(Some(item))
    }

    /// Flip `completed` for item `id`; returns the new value.
    ///
    /// The local flip is applied only after the store acknowledges the update.
    pub async fn toggle_item(&self, id: i64) -> Result<bool, SyncError> {
        let current = self
            .state
            .borrow()
            .items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.completed);

        let Some(current) = current else {
            return Err(self.surface(SyncError::NotFound(id)));
        };

        let completed = !current;
        self.store
            .update(&self.table, &Filter::eq("id", id), json!({ "completed": completed }))
            .await
            .map_err(|e| self.surface(SyncError::from_store(e, SyncError::UpdateFailed)))?;

        self.state.send_modify(|s| {
            if let Some(item) = s.items.iter_mut().find(|item| item.id == id) {
                item.completed = completed;
            }
            s.last_error = None;
        });

        log::info!("Toggled item {} to completed={}", id, completed);
        Ok(completed)
    }

    /// Delete item `id` from the store, then from the projection
    pub async fn remove_item(&self, id: i64) -> Result<(), SyncError> {
        self.store
            .delete(&self.table, &Filter::eq("id", id))
            .await
            .map_err(|e| self.surface(SyncError::from_store(e, SyncError::DeleteFailed)))?;

        self.state.send_modify(|s| {
            s.items.retain(|item| item.id != id);
            s.last_error = None;
        });

        log::info!("Removed item {}", id);
        Ok(())
    }

    /// Refresh the projection on every change notification for the table.
    ///
    /// The returned guard owns the subscription; stopping or dropping it
    /// releases the subscription and ends the refresh task.
    pub fn watch(self: &Arc<Self>) -> Result<LiveUpdates, SyncError> {
        // One queued notification is enough: a pending refresh covers any
        // change that arrives before it runs
        let (tx, mut rx) = mpsc::channel(1);

        let subscription = self
            .store
            .subscribe(&self.table, tx)
            .map_err(|e| self.surface(SyncError::from_store(e, SyncError::SubscribeFailed)))?;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log::debug!(
                    "Change notification ({:?} on {}), refreshing",
                    event.kind,
                    event.table
                );
                // Failures are already logged and recorded by load()
                let _ = this.load().await;
            }
            log::debug!("Change feed for {} closed", this.table);
        });

        log::info!("Watching {} for changes", self.table);
        Ok(LiveUpdates {
            subscription: Some(subscription),
            task,
        })
    }

    /// Log an error and record it for the presentation layer
    fn surface(&self, err: SyncError) -> SyncError {
        match &err {
            SyncError::NotFound(_) => log::warn!("{}", err),
            _ => log::error!("{}", err),
        }
        self.state.send_modify(|s| s.last_error = Some(err.to_string()));
        err
    }
}

fn decode_rows(rows: Vec<Value>) -> Result<Vec<ListItem>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| StoreError::Decode(e.to_string())))
        .collect()
}

/// Guard for a running change-notification refresh loop
pub struct LiveUpdates {
    subscription: Option<Subscription>,
    task: JoinHandle<()>,
}

impl LiveUpdates {
    /// Release the subscription and stop refreshing
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            self.task.abort();
        }
    }
}

impl Drop for LiveUpdates {
    fn drop(&mut self) {
        self.release();
    }
}
