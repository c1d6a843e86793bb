//! Loopback HTTP listener that receives the OAuth redirect

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::AuthError;

const SUCCESS_PAGE: &str =
    "<html><body><h3>Signed in.</h3><p>You can close this tab and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str =
    "<html><body><h3>Sign-in failed.</h3><p>Return to the terminal for details.</p></body></html>";

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type ResultSlot = Arc<Mutex<Option<oneshot::Sender<Result<String, AuthError>>>>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<String>,
    result_tx: ResultSlot,
}

pub struct CallbackServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackServer {
    /// Bind on 127.0.0.1. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn redirect_uri(&self, state: &str) -> String {
        format!(
            "http://127.0.0.1:{}/callback?state={}",
            self.addr.port(),
            urlencoding::encode(state)
        )
    }

    /// Serve until the first `/callback` request arrives, then shut down and
    /// return its authorization code.
    pub async fn wait_for_code(self, expected_state: String, timeout: Duration) -> Result<String, AuthError> {
        let (result_tx, result_rx) = oneshot::channel();
        let state = CallbackState {
            expected_state: Arc::new(expected_state),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        };

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let outcome = tokio::time::timeout(timeout, result_rx).await;

        let _ = shutdown_tx.send(());
        let _ = server.await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::Callback("listener closed".to_string())),
            Err(_) => Err(AuthError::CallbackTimeout),
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let result = check_callback(&state.expected_state, params);
    let page = if result.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };

    let sender = state.result_tx.lock().ok().and_then(|mut slot| slot.take());
    if let Some(tx) = sender {
        let _ = tx.send(result);
    }

    Html(page)
}

fn check_callback(expected_state: &str, params: CallbackParams) -> Result<String, AuthError> {
    if let Some(error) = params.error {
        return Err(AuthError::Callback(params.error_description.unwrap_or(error)));
    }

    let state = params.state.unwrap_or_default();
    if !bool::from(state.as_bytes().ct_eq(expected_state.as_bytes())) {
        return Err(AuthError::Callback("state mismatch".to_string()));
    }

    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::Callback("missing authorization code".to_string()))
}
