use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::IngredientError;
use crate::config::IngredientsConfig;
use crate::list::NewListItem;

/// Image analysis can take a while
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    ingredients: Vec<String>,
}

/// Client for the ingredient extraction service
pub struct IngredientClient {
    client: Client,
    base_url: String,
}

impl IngredientClient {
    pub fn new(config: &IngredientsConfig) -> Result<Self, IngredientError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(IngredientError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Send an image and get back the ingredient names found in it
    pub async fn extract(&self, image: &[u8]) -> Result<Vec<String>, IngredientError> {
        log::debug!("ingredients: extracting from {} byte image", image.len());

        let response = self
            .client
            .post(format!("{}/extract-ingredients", self.base_url))
            .json(&json!({ "imageData": STANDARD.encode(image) }))
            .send()
            .await?;

        let text = check(response).await?.text().await?;
        let parsed: ExtractResponse =
            serde_json::from_str(&text).map_err(|e| IngredientError::Decode(e.to_string()))?;

        log::info!("Extracted {} ingredients", parsed.ingredients.len());
        Ok(parsed.ingredients)
    }

    /// Insert rows as one batch. The service inserts all of them or none.
    pub async fn add_items(
        &self,
        rows: &[NewListItem],
        access_token: Option<&str>,
    ) -> Result<(), IngredientError> {
        if rows.is_empty() {
            return Err(IngredientError::EmptySelection);
        }

        let mut request = self
            .client
            .post(format!("{}/api/add-ingredients", self.base_url))
            .json(&json!({ "items": rows }));
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        check(request.send().await?).await?;
        log::info!("Added {} ingredients to the list", rows.len());
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, IngredientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(IngredientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    async fn spawn_fake(router: Router) -> IngredientClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        IngredientClient::new(&IngredientsConfig {
            base_url: format!("http://{}/", addr),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_sends_base64_image() {
        let router = Router::new().route(
            "/extract-ingredients",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["imageData"], "aW1n");
                Json(json!({"ingredients": ["flour", "eggs"]}))
            }),
        );
        let client = spawn_fake(router).await;

        let found = client.extract(b"img").await.unwrap();
        assert_eq!(found, vec!["flour".to_string(), "eggs".to_string()]);
    }

    #[tokio::test]
    async fn test_extract_server_error() {
        let router = Router::new().route(
            "/extract-ingredients",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Failed to analyze image"})),
                )
            }),
        );
        let client = spawn_fake(router).await;

        match client.extract(b"img").await {
            Err(IngredientError::Server { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "Failed to analyze image");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_items_posts_rows() {
        let router = Router::new().route(
            "/api/add-ingredients",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers.get("authorization").unwrap(), "Bearer tok");
                assert_eq!(
                    body,
                    json!({"items": [
                        {"name": "flour", "completed": false, "added_by": "a@x.com"},
                    ]})
                );
                Json(json!({"success": true}))
            }),
        );
        let client = spawn_fake(router).await;

        let rows = vec![NewListItem::new("flour", "a@x.com").unwrap()];
        client.add_items(&rows, Some("tok")).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_items_rejects_empty_batch() {
        let client = IngredientClient::new(&IngredientsConfig::default()).unwrap();
        assert!(matches!(
            client.add_items(&[], None).await,
            Err(IngredientError::EmptySelection)
        ));
    }

    #[test]
    fn test_rejects_bad_url() {
        let result = IngredientClient::new(&IngredientsConfig {
            base_url: "localhost:3000".to_string(),
        });
        assert!(matches!(result, Err(IngredientError::InvalidUrl(_))));
    }
}
