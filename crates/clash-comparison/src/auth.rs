//! Access token acquisition
//!
//! A pre-issued token from the environment is used as is. Otherwise the
//! user signs in through the OAuth device authorization flow: the code is
//! printed, and the token endpoint is polled until sign-in completes.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::AuthConfig;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Extra wait added each time the provider asks us to slow down
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider rejected the request: {error}: {description}")]
    Rejected { error: String, description: String },

    #[error("device code expired before sign-in completed")]
    Expired,
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_expires_in() -> u64 {
    900
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Get a bearer token for both clients
pub async fn acquire_token(config: &AuthConfig) -> Result<String, AuthError> {
    if let Some(token) = &config.access_token {
        debug!("Using access token from environment");
        return Ok(token.clone());
    }
    device_sign_in(&Client::new(), config).await
}

async fn device_sign_in(http: &Client, config: &AuthConfig) -> Result<String, AuthError> {
    let response = http
        .post(format!("{}/connect/deviceauthorization", config.authority))
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scopes.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }
    let device: DeviceAuthorization = response.json().await?;

    println!(
        "To sign in, open {} and enter the code {}",
        device
            .verification_uri_complete
            .as_deref()
            .unwrap_or(&device.verification_uri),
        device.user_code
    );

    let deadline = Instant::now() + Duration::from_secs(device.expires_in);
    let mut interval = Duration::from_secs(device.interval);
    loop {
        tokio::time::sleep(interval).await;
        if Instant::now() >= deadline {
            return Err(AuthError::Expired);
        }

        let response = http
            .post(format!("{}/connect/token", config.authority))
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device.device_code.as_str()),
                ("client_id", config.client_id.as_str()),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await?;
            info!("Signed in");
            return Ok(token.access_token);
        }

        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) if err.error == "authorization_pending" => {
                debug!("Waiting for sign-in");
            }
            Ok(err) if err.error == "slow_down" => {
                interval += SLOW_DOWN_STEP;
            }
            Ok(err) if err.error == "expired_token" => return Err(AuthError::Expired),
            Ok(err) => {
                return Err(AuthError::Rejected {
                    error: err.error,
                    description: err.error_description,
                })
            }
            Err(_) => {
                return Err(AuthError::Rejected {
                    error: status.to_string(),
                    description: body,
                })
            }
        }
    }
}

async fn rejected(response: reqwest::Response) -> AuthError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(err) => AuthError::Rejected {
            error: err.error,
            description: err.error_description,
        },
        Err(_) => AuthError::Rejected {
            error: status.to_string(),
            description: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn config(authority: &str, token: Option<&str>) -> AuthConfig {
        AuthConfig {
            client_id: "app".to_string(),
            scopes: "clashdetection:read".to_string(),
            redirect_uri: "http://localhost:3000/signin-callback".to_string(),
            authority: authority.to_string(),
            access_token: token.map(str::to_string),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_environment_token_skips_sign_in() {
        let token = acquire_token(&config("http://127.0.0.1:9", Some("pre-issued")))
            .await
            .unwrap();
        assert_eq!(token, "pre-issued");
    }

    #[tokio::test]
    async fn test_device_flow_polls_until_signed_in() {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/connect/deviceauthorization",
                post(|| async {
                    Json(json!({
                        "device_code": "dev-1",
                        "user_code": "ABCD-EFGH",
                        "verification_uri": "https://example.test/device",
                        "expires_in": 60,
                        "interval": 0
                    }))
                }),
            )
            .route(
                "/connect/token",
                post(|State(polls): State<Arc<AtomicUsize>>| async move {
                    if polls.fetch_add(1, Ordering::SeqCst) < 2 {
                        (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "authorization_pending"})),
                        )
                    } else {
                        (StatusCode::OK, Json(json!({"access_token": "signed-in"})))
                    }
                }),
            )
            .with_state(Arc::clone(&polls));
        let authority = serve(app).await;

        let token = acquire_token(&config(&authority, None)).await.unwrap();
        assert_eq!(token, "signed-in");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_device_flow_denied() {
        let app = Router::new()
            .route(
                "/connect/deviceauthorization",
                post(|| async {
                    Json(json!({
                        "device_code": "dev-1",
                        "user_code": "ABCD",
                        "verification_uri": "https://example.test/device",
                        "interval": 0
                    }))
                }),
            )
            .route(
                "/connect/token",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json::<Value>(json!({
                            "error": "access_denied",
                            "error_description": "user declined"
                        })),
                    )
                }),
            );
        let authority = serve(app).await;

        let err = acquire_token(&config(&authority, None)).await.unwrap_err();
        assert!(
            matches!(&err, AuthError::Rejected { error, .. } if error == "access_denied"),
            "{}",
            err
        );
    }
}
