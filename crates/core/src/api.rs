//! HTTP client for the marketplace backend.
//!
//! The backend is an external collaborator: this module only shapes
//! requests, decodes responses, and passes server rejection messages
//! through verbatim. It never retries and never caches.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::{Category, Transaction, User, WasteItem};

/// Failure while talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the request; the message is shown to the
    /// user exactly as the server phrased it.
    #[error("{0}")]
    Rejected(String),
    /// Network or decoding failure. Users get a generic message; the
    /// underlying cause goes to the log.
    #[error("Network error. Please try again.")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        debug!("transport failure: {err}");
        ApiError::Transport(err)
    }
}

/// Successful token purchase as confirmed by the server.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BuyReceipt {
    /// Tokens credited to the buyer.
    pub tokens_added: i64,
    /// Amount actually charged.
    pub cost: f64,
}

/// Successful token sale as confirmed by the server.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SellReceipt {
    /// Tokens debited from the seller.
    pub tokens_sold: i64,
    /// Net payout after the fee.
    pub payout: f64,
}

/// Verdict of the category prediction service.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryCheck {
    /// Whether the declared category matched the prediction.
    pub verified: bool,
    /// Model confidence in its prediction, `0.0..=1.0`.
    pub confidence: f64,
    /// Category the model believes the image shows.
    #[serde(default)]
    pub predicted_category: Option<Category>,
}

/// Payload for persisting a new waste item.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub user_id: i64,
    pub username: String,
    pub description: String,
    pub image_url: String,
    pub category: Category,
    pub amount_kg: f64,
    /// Set when the user explicitly proceeded past a low-confidence
    /// category mismatch.
    pub force_unverified: bool,
}

/// Login response carrying the user and their credential token.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// The authenticated user.
    pub user: User,
    /// Credential stored alongside the user for the session lifetime.
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    token_balance: i64,
}

/// Client for the backend HTTP JSON API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Request a signup OTP for the given email.
    pub async fn send_otp(&self, email: &str, username: &str) -> Result<(), ApiError> {
        self.post_checked(
            "/api/auth/send-otp",
            &serde_json::json!({ "email": email, "username": username }),
        )
        .await
        .map(|_| ())
    }

    /// Confirm a signup OTP.
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), ApiError> {
        self.post_checked(
            "/api/auth/verify-otp",
            &serde_json::json!({ "email": email, "otp": otp }),
        )
        .await
        .map(|_| ())
    }

    /// Create an account after OTP confirmation.
    pub async fn signup(&self, username: &str, email: &str, password: &str) -> Result<(), ApiError> {
        self.post_checked(
            "/api/auth/signup",
            &serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            }),
        )
        .await
        .map(|_| ())
    }

    /// Authenticate and return the user plus credential token.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let value = self
            .post_checked(
                "/api/auth/login",
                &serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        decode_value(value)
    }

    /// Fetch the authoritative token balance for a user.
    pub async fn token_balance(&self, user_id: i64) -> Result<i64, ApiError> {
        let response: BalanceResponse = self
            .get_json("/api/token-balance", &[("user_id", user_id.to_string())])
            .await?;
        Ok(response.token_balance)
    }

    /// Buy tokens for a currency amount. The receipt carries the
    /// server-confirmed token count and cost.
    pub async fn buy_tokens(&self, user_id: i64, dollars: f64) -> Result<BuyReceipt, ApiError> {
        let value = self
            .post_checked(
                "/api/buy-tokens",
                &serde_json::json!({ "user_id": user_id, "dollars": dollars }),
            )
            .await?;
        decode_value(value)
    }

    /// Sell tokens back to the platform.
    pub async fn sell_tokens(&self, user_id: i64, tokens: u32) -> Result<SellReceipt, ApiError> {
        let value = self
            .post_checked(
                "/api/sell-tokens",
                &serde_json::json!({ "user_id": user_id, "tokens": tokens }),
            )
            .await?;
        decode_value(value)
    }

    /// Items uploaded by the given user.
    pub async fn listings(&self, user_id: i64) -> Result<Vec<WasteItem>, ApiError> {
        self.get_json("/api/listings", &[("user_id", user_id.to_string())])
            .await
    }

    /// Every item currently offered on the marketplace.
    pub async fn marketplace_listings(&self) -> Result<Vec<WasteItem>, ApiError> {
        self.get_json("/api/marketplace-listings", &[]).await
    }

    /// Completed transactions involving the given user.
    pub async fn transaction_history(&self, user_id: i64) -> Result<Vec<Transaction>, ApiError> {
        self.get_json(
            "/api/transaction-history",
            &[("user_id", user_id.to_string())],
        )
        .await
    }

    /// Ask the prediction service whether the declared category
    /// matches the uploaded image.
    pub async fn verify_category(
        &self,
        user_category: Category,
        image_url: &str,
    ) -> Result<CategoryCheck, ApiError> {
        let value = self
            .post_checked(
                "/api/verify-category",
                &serde_json::json!({
                    "user_category": user_category,
                    "image_url": image_url,
                }),
            )
            .await?;
        decode_value(value)
    }

    /// Persist a new waste item.
    pub async fn upload(&self, request: &UploadRequest) -> Result<(), ApiError> {
        self.post_checked("/api/upload", request).await.map(|_| ())
    }

    /// Buy a quantity of a category's aggregate stock. Returns the
    /// server's confirmation message.
    pub async fn buy_category(
        &self,
        buyer_id: i64,
        category: Category,
        quantity: f64,
    ) -> Result<String, ApiError> {
        let value = self
            .post_checked(
                "/api/buy-category",
                &serde_json::json!({
                    "buyer_id": buyer_id,
                    "category": category,
                    "quantity": quantity,
                }),
            )
            .await?;
        let msg = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Purchase complete.")
            .to_string();
        Ok(msg)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await?;
        let value = Self::read_body(response).await?;
        decode_value(value)
    }

    /// POST a JSON body and return the decoded response value, having
    /// already turned any rejection — non-2xx status or an
    /// `error`/`detail` field in the body — into [`ApiError::Rejected`].
    async fn post_checked<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::read_body(response).await
    }

    async fn read_body(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let value: Value = match response.json().await {
            Ok(value) => value,
            Err(err) if status.is_success() => return Err(err.into()),
            // Rejection with an unreadable body: all we can show is the status.
            Err(_) => return Err(ApiError::Rejected(format!("Request failed ({status})."))),
        };

        if let Some(message) = rejection_message(&value) {
            return Err(ApiError::Rejected(message));
        }
        if !status.is_success() {
            return Err(ApiError::Rejected(format!("Request failed ({status}).")));
        }
        Ok(value)
    }
}

fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::Rejected(format!("Unexpected response from server: {err}")))
}

/// The backend reports business-rule rejections as `detail` (FastAPI)
/// or `error` fields, sometimes on 2xx responses.
fn rejection_message(value: &Value) -> Option<String> {
    for key in ["detail", "error"] {
        if let Some(message) = value.get(key).and_then(Value::as_str) {
            return Some(message.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    /// Serve a single canned HTTP response and return the base URL.
    fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture addr");
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn balance_decodes_from_wire_shape() {
        let base = one_shot_server("200 OK", r#"{"token_balance": 42}"#);
        let client = ApiClient::new(base);
        let balance = client.token_balance(1).await.expect("balance");
        assert_eq!(balance, 42);
    }

    #[tokio::test]
    async fn error_field_on_2xx_is_a_rejection() {
        let base = one_shot_server("200 OK", r#"{"error": "Not enough tokens"}"#);
        let client = ApiClient::new(base);
        let err = client.sell_tokens(1, 10).await.expect_err("rejection");
        match err {
            ApiError::Rejected(message) => assert_eq!(message, "Not enough tokens"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detail_field_passes_through_verbatim() {
        let base = one_shot_server(
            "400 Bad Request",
            r#"{"detail": "Insufficient stock for Plastic"}"#,
        );
        let client = ApiClient::new(base);
        let err = client
            .buy_category(1, Category::Plastic, 5.0)
            .await
            .expect_err("rejection");
        match err {
            ApiError::Rejected(message) => assert_eq!(message, "Insufficient stock for Plastic"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_generic_to_the_user() {
        // Nothing listens on this port.
        let client = ApiClient::new("http://127.0.0.1:1");
        let err = client.token_balance(1).await.expect_err("transport error");
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.to_string(), "Network error. Please try again.");
    }

    #[tokio::test]
    async fn send_otp_accepts_a_plain_ok_body() {
        let base = one_shot_server("200 OK", r#"{"msg": "OTP sent"}"#);
        let client = ApiClient::new(base);
        client
            .send_otp("asha@example.com", "asha")
            .await
            .expect("otp request accepted");
    }

    #[tokio::test]
    async fn expired_otp_rejection_passes_through_verbatim() {
        let base = one_shot_server("400 Bad Request", r#"{"detail": "Invalid or expired OTP"}"#);
        let client = ApiClient::new(base);
        let err = client
            .verify_otp("asha@example.com", "000000")
            .await
            .expect_err("rejection");
        match err {
            ApiError::Rejected(message) => assert_eq!(message, "Invalid or expired OTP"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signup_surfaces_duplicate_account_rejection() {
        // The backend reports this one in the body of a 2xx response.
        let base = one_shot_server("200 OK", r#"{"error": "Email already registered"}"#);
        let client = ApiClient::new(base);
        let err = client
            .signup("asha", "asha@example.com", "hunter2")
            .await
            .expect_err("rejection");
        match err {
            ApiError::Rejected(message) => assert_eq!(message, "Email already registered"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn buy_category_returns_the_server_message() {
        let base = one_shot_server("200 OK", r#"{"msg": "Bought 5.0 kg of Plastic"}"#);
        let client = ApiClient::new(base);
        let msg = client
            .buy_category(1, Category::Plastic, 5.0)
            .await
            .expect("purchase");
        assert_eq!(msg, "Bought 5.0 kg of Plastic");
    }
}
