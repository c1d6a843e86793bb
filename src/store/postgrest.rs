use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::realtime::{self, ChangeEvent, RealtimeParams};
use super::{Filter, Order, RemoteStore, StoreError, Subscription};
use crate::config::StoreConfig;

/// PostgREST client for the shared table, with realtime subscriptions
pub struct PostgrestClient {
    client: Client,
    base_url: String,
    anon_key: String,
    schema: String,
    channel: String,
    /// Signed-in user's JWT; requests fall back to the anon key without one.
    /// Realtime listeners hold receivers and rejoin with the latest value.
    access_token: watch::Sender<Option<String>>,
}

impl PostgrestClient {
    /// Create a new client from store settings
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        // Normalize URL - ensure no trailing slash
        let base_url = config.url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(StoreError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            anon_key: config.anon_key.clone(),
            schema: config.schema.clone(),
            channel: config.channel.clone(),
            access_token: watch::channel(None).0,
        })
    }

    /// Swap the bearer token used for subsequent requests and subscriptions
    pub fn set_access_token(&self, token: Option<String>) {
        self.access_token.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }

    fn bearer(&self) -> String {
        self.access_token
            .borrow()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Build full URL for a table
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, urlencoding::encode(table))
    }

    /// Attach auth and schema headers. PostgREST selects the schema with
    /// `Accept-Profile` on reads and `Content-Profile` on writes.
    fn authorize(&self, request: RequestBuilder, write: bool) -> RequestBuilder {
        let request = request
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer());

        if self.schema == "public" {
            request
        } else if write {
            request.header("Content-Profile", &self.schema)
        } else {
            request.header("Accept-Profile", &self.schema)
        }
    }

    /// Map error statuses onto [`StoreError`]
    async fn check(response: Response, table: &str) -> Result<Response, StoreError> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::AuthFailed),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(table.to_string())),
            status if !status.is_success() => Err(StoreError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response),
        }
    }

    async fn decode_rows(response: Response) -> Result<Vec<Value>, StoreError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        if let Some(filter) = filter {
            params.push(filter.to_query_pair());
        }
        if let Some(order) = order {
            params.push(("order".to_string(), order.to_query_value()));
        }

        log::debug!("postgrest: GET {} {:?}", table, params);

        let response = self
            .authorize(self.client.get(self.table_url(table)), false)
            .query(&params)
            .send()
            .await?;

        let response = Self::check(response, table).await?;
        Self::decode_rows(response).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        log::debug!("postgrest: POST {} ({} rows)", table, rows.len());

        let response = self
            .authorize(self.client.post(self.table_url(table)), true)
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;

        let response = Self::check(response, table).await?;
        Self::decode_rows(response).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<(), StoreError> {
        log::debug!("postgrest: PATCH {} where {:?}", table, filter);

        let response = self
            .authorize(self.client.patch(self.table_url(table)), true)
            .header("Prefer", "return=minimal")
            .query(&[filter.to_query_pair()])
            .json(&patch)
            .send()
            .await?;

        Self::check(response, table).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), StoreError> {
        log::debug!("postgrest: DELETE {} where {:?}", table, filter);

        let response = self
            .authorize(self.client.delete(self.table_url(table)), true)
            .query(&[filter.to_query_pair()])
            .send()
            .await?;

        Self::check(response, table).await?;
        Ok(())
    }

    fn subscribe(
        &self,
        table: &str,
        on_change: mpsc::Sender<ChangeEvent>,
    ) -> Result<Subscription, StoreError> {
        realtime::start_listener(
            RealtimeParams {
                base_url: self.base_url.clone(),
                api_key: self.anon_key.clone(),
                access_token: self.access_token.subscribe(),
                channel: self.channel.clone(),
                schema: self.schema.clone(),
                table: table.to_string(),
            },
            on_change,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    const TABLE: &str = "grocery_items";

    async fn spawn_fake(router: Router) -> PostgrestClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = StoreConfig {
            url: format!("http://{}/", addr),
            anon_key: "anon".to_string(),
            ..StoreConfig::default()
        };
        PostgrestClient::new(&config).unwrap()
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
        headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = StoreConfig {
            url: "localhost:54321".to_string(),
            anon_key: "anon".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            PostgrestClient::new(&config),
            Err(StoreError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_query_sends_order_and_keys() {
        let router = Router::new().route(
            "/rest/v1/grocery_items",
            get(|RawQuery(query): RawQuery, headers: HeaderMap| async move {
                let query = query.unwrap_or_default();
                assert!(query.contains("select=*") || query.contains("select=%2A"));
                assert!(query.contains("order=created_at.desc"));
                assert_eq!(header(&headers, "apikey"), "anon");
                assert_eq!(header(&headers, "authorization"), "Bearer jwt");
                Json(json!([
                    {"id": 2, "created_at": "2026-01-01T10:00:01Z", "name": "eggs", "completed": false, "added_by": "a@x.com"},
                    {"id": 1, "created_at": "2026-01-01T10:00:00Z", "name": "milk", "completed": true, "added_by": "a@x.com"}
                ]))
            }),
        );
        let client = spawn_fake(router).await;
        client.set_access_token(Some("jwt".to_string()));

        let rows = client
            .query(TABLE, None, Some(&Order::desc("created_at")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "eggs");
    }

    #[tokio::test]
    async fn test_insert_asks_for_representation() {
        let router = Router::new().route(
            "/rest/v1/grocery_items",
            axum::routing::post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(header(&headers, "prefer"), "return=representation");
                // Falls back to the anon key without a session
                assert_eq!(header(&headers, "authorization"), "Bearer anon");
                let mut row = body[0].clone();
                row["id"] = json!(1);
                row["created_at"] = json!("2026-01-01T10:00:00Z");
                (axum::http::StatusCode::CREATED, Json(json!([row])))
            }),
        );
        let client = spawn_fake(router).await;

        let created = client
            .insert(TABLE, vec![json!({"name": "milk", "completed": false, "added_by": "a@x.com"})])
            .await
            .unwrap();
        assert_eq!(created[0]["id"], 1);
        assert_eq!(created[0]["name"], "milk");
    }

    #[tokio::test]
    async fn test_update_and_delete_scope_by_id() {
        let router = Router::new().route(
            "/rest/v1/grocery_items",
            axum::routing::patch(|RawQuery(query): RawQuery, Json(body): Json<Value>| async move {
                assert_eq!(query.as_deref(), Some("id=eq.7"));
                assert_eq!(body, json!({"completed": true}));
                axum::http::StatusCode::NO_CONTENT
            })
            .delete(|RawQuery(query): RawQuery| async move {
                assert_eq!(query.as_deref(), Some("id=eq.7"));
                axum::http::StatusCode::NO_CONTENT
            }),
        );
        let client = spawn_fake(router).await;

        client
            .update(TABLE, &Filter::eq("id", 7), json!({"completed": true}))
            .await
            .unwrap();
        client.delete(TABLE, &Filter::eq("id", 7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let router = Router::new()
            .route(
                "/rest/v1/grocery_items",
                get(|| async { axum::http::StatusCode::UNAUTHORIZED }),
            )
            .route(
                "/rest/v1/broken",
                get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let client = spawn_fake(router).await;

        assert!(matches!(
            client.query(TABLE, None, None).await,
            Err(StoreError::AuthFailed)
        ));
        match client.query("broken", None, None).await {
            Err(StoreError::Server { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            client.query("missing", None, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hung_request_times_out_into_error_status() {
        use crate::list::{ListSynchronizer, SyncError, SyncStatus};
        use std::sync::Arc;
        use std::time::Duration;

        let router = Router::new().route(
            "/rest/v1/grocery_items",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!([]))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = PostgrestClient::new(&StoreConfig {
            url: format!("http://{}", addr),
            anon_key: "anon".to_string(),
            request_timeout_secs: 1,
            ..StoreConfig::default()
        })
        .unwrap();
        let sync = ListSynchronizer::new(Arc::new(client), TABLE);

        let result = tokio::time::timeout(Duration::from_secs(4), sync.load())
            .await
            .expect("request was not cut off by the client timeout");
        match result {
            Err(SyncError::FetchFailed(StoreError::Http(e))) => assert!(e.is_timeout()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sync.status(), SyncStatus::Error);
    }
}
