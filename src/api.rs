// API client module: a small blocking HTTP client for the Checkout API.
// Every call authenticates with the shared token passed as a query
// parameter, and reads the server/token at call time so the operator can
// change them mid-session.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

/// Upper bound for a single request, so a dead server cannot hang the shell.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced while talking to the Checkout API.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("No token or server set, cannot connect!")]
    Configuration,
    #[error("CheckoutException: {status} {body}")]
    Api { status: u16, body: String },
    #[error("Could not reach checkout server: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected response from checkout server: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A product as served by `/api/checkout/products`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(deserialize_with = "exact_decimal")]
    pub price: Decimal,
    pub image: Option<String>,
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, €{})", self.name, self.id, self.price)
    }
}

/// The card holder returned by `/api/checkout/card`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub uuid: String,
    pub first_name: String,
    #[serde(deserialize_with = "exact_decimal")]
    pub balance: Decimal,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.first_name, self.id, self.uuid)
    }
}

#[derive(Deserialize)]
struct TransactionResponse {
    #[serde(deserialize_with = "exact_decimal")]
    balance: Decimal,
}

/// The operations the interactive session needs from the remote service.
///
/// `CheckoutClient` is the HTTP implementation; tests substitute their own.
pub trait CheckoutApi {
    fn server(&self) -> Option<&str>;
    fn set_server(&mut self, server: &str);
    fn token(&self) -> Option<&str>;
    fn set_token(&mut self, token: &str);

    /// Whether both server and token are set.
    fn is_configured(&self) -> bool {
        matches!(self.server(), Some(s) if !s.is_empty())
            && matches!(self.token(), Some(t) if !t.is_empty())
    }

    fn fetch_products(&self) -> Result<Vec<Product>, CheckoutError>;
    fn fetch_user(&self, card_id: &str) -> Result<User, CheckoutError>;
    fn create_card(&self, card_id: &str, student_id: &str) -> Result<(), CheckoutError>;

    /// Buy `items` for `user`. On success the user's balance is replaced by
    /// the server's value; on failure `user` is left untouched.
    fn purchase(&self, user: &mut User, items: &[Product]) -> Result<(), CheckoutError>;
}

/// Blocking HTTP client for the Checkout API.
#[derive(Clone)]
pub struct CheckoutClient {
    client: Client,
    server: Option<String>,
    token: Option<String>,
}

impl CheckoutClient {
    /// Build a client; either value may be missing and set later.
    pub fn new(server: Option<String>, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(CheckoutClient {
            client,
            server: server.map(|s| normalize_server(&s)),
            token,
        })
    }

    /// Resolve the current server and token, or fail before any request.
    fn credentials(&self) -> Result<(&str, &str), CheckoutError> {
        match (self.server.as_deref(), self.token.as_deref()) {
            (Some(server), Some(token)) if !server.is_empty() && !token.is_empty() => {
                Ok((server, token))
            }
            _ => Err(CheckoutError::Configuration),
        }
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, CheckoutError> {
        let (server, token) = self.credentials()?;
        let url = format!("{server}/api/checkout/{path}");
        debug!(%url, "GET");
        Ok(self.client.get(url).query(&[("token", token)]))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, CheckoutError> {
        let (server, token) = self.credentials()?;
        let url = format!("{server}/api/checkout/{path}");
        debug!(%url, "POST");
        Ok(self.client.post(url).query(&[("token", token)]))
    }
}

impl CheckoutApi for CheckoutClient {
    fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    fn set_server(&mut self, server: &str) {
        self.server = Some(normalize_server(server));
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    fn fetch_products(&self) -> Result<Vec<Product>, CheckoutError> {
        let body = send(self.get("products")?)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn fetch_user(&self, card_id: &str) -> Result<User, CheckoutError> {
        let body = send(self.get("card")?.query(&[("uuid", card_id)]))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn create_card(&self, card_id: &str, student_id: &str) -> Result<(), CheckoutError> {
        let req = self
            .post("card")?
            .query(&[("uuid", card_id), ("student", student_id)]);
        send(req)?;
        Ok(())
    }

    fn purchase(&self, user: &mut User, items: &[Product]) -> Result<(), CheckoutError> {
        let mut params: Vec<(&str, &str)> =
            items.iter().map(|p| ("items", p.id.as_str())).collect();
        params.push(("uuid", user.uuid.as_str()));

        let body = send(self.post("transaction")?.query(&params))?;
        let resp: TransactionResponse = serde_json::from_str(&body)?;
        user.balance = resp.balance;
        Ok(())
    }
}

/// Send the request and return the body text, mapping status >= 400 to
/// `CheckoutError::Api`.
fn send(req: RequestBuilder) -> Result<String, CheckoutError> {
    let res = req.send()?;
    let status = res.status();
    let body = res.text().unwrap_or_default();
    if status.is_client_error() || status.is_server_error() {
        return Err(CheckoutError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn normalize_server(server: &str) -> String {
    server.trim().trim_end_matches('/').to_string()
}

/// JSON scalar that may arrive either quoted or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

fn opaque_id<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Scalar::deserialize(de)?.into_text())
}

// Parsed from the decimal text so 0.1 stays 0.1.
fn exact_decimal<'de, D: Deserializer<'de>>(de: D) -> Result<Decimal, D::Error> {
    let text = Scalar::deserialize(de)?.into_text();
    Decimal::from_str(text.trim())
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(serde::de::Error::custom)
}
