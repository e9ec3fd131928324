//! Thin capability client over a spot exchange REST API (Binance-shaped).
//!
//! `ApiClient` is the trait the [`executor::ExchangeGateway`] live variant is
//! built on: fetch OHLCV, fetch a ticker, fetch the account balance, and
//! place an order. Leverage, futures position risk, and the websocket kline
//! stream the teacher carried are not part of a spot control plane and were
//! dropped along with `live_connector.rs`.

use crate::auth::sign_request;
use crate::error::ApiError;
use async_trait::async_trait;
use configuration::settings::ApiConfig;
use core_types::{Kline, OrderRequest};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod auth;
pub mod error;
pub mod responses;

pub use responses::{AccountResponse, ApiErrorResponse, BalanceResponse, OrderResponse, TickerResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The generic, abstract interface for a trading exchange API client. This is
/// the capability the live `ExchangeGateway` variant delegates to.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetches public historical kline data.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, ApiError>;

    /// Fetches the current best bid/ask for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<TickerResponse, ApiError>;

    /// Places a new order on the exchange. (Authenticated)
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ApiError>;

    /// Fetches the current account balance for all assets. (Authenticated)
    async fn get_account_balance(&self) -> Result<Vec<BalanceResponse>, ApiError>;
}

/// A concrete implementation of the `ApiClient` for the Binance spot API.
#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(live_mode: bool, api_config: &ApiConfig) -> Self {
        let base_url = if live_mode {
            "https://api.binance.com".to_string()
        } else {
            "https://testnet.binance.vision".to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(&api_config.key).expect("Invalid API Key"),
        );

        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build reqwest client"),
            base_url,
            api_secret: api_config.secret.clone(),
        }
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ApiError::Timeout } else { ApiError::RequestBuild(e) })?;
        Self::decode(response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        self.signed_request(reqwest::Method::GET, path, params).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        self.signed_request(reqwest::Method::POST, path, params).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        params.insert("timestamp", timestamp.to_string());

        let query_string = serde_qs::to_string(params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let signature = sign_request(&self.api_secret, &query_string);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query_string, signature);

        let request = self.client.request(method, &url);
        let response = request
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ApiError::Timeout } else { ApiError::RequestBuild(e) })?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {}. Original text: {}",
                    e, text
                ))
            })?;
            Err(ApiError::BinanceError(api_error.code, api_error.msg))
        }
    }
}

// Intermediate struct for deserializing klines from Binance's spot `/api/v3/klines`.
#[derive(Deserialize)]
struct RawKline(i64, String, String, String, String, String, i64, String, i64, String, String, String);

#[async_trait]
impl ApiClient for BinanceClient {
    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<Kline>, ApiError> {
        let raw: Vec<RawKline> = self
            .get_public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        raw.into_iter()
            .map(|k| {
                Ok(Kline {
                    open_time: chrono::DateTime::from_timestamp_millis(k.0)
                        .ok_or_else(|| ApiError::InvalidData(format!("invalid open_time: {}", k.0)))?,
                    open: Decimal::from_str(&k.1).map_err(|e| ApiError::Deserialization(e.to_string()))?,
                    high: Decimal::from_str(&k.2).map_err(|e| ApiError::Deserialization(e.to_string()))?,
                    low: Decimal::from_str(&k.3).map_err(|e| ApiError::Deserialization(e.to_string()))?,
                    close: Decimal::from_str(&k.4).map_err(|e| ApiError::Deserialization(e.to_string()))?,
                    volume: Decimal::from_str(&k.5).map_err(|e| ApiError::Deserialization(e.to_string()))?,
                    close_time: chrono::DateTime::from_timestamp_millis(k.6)
                        .ok_or_else(|| ApiError::InvalidData(format!("invalid close_time: {}", k.6)))?,
                    interval: interval.to_string(),
                })
            })
            .collect()
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<TickerResponse, ApiError> {
        self.get_public("/api/v3/ticker/bookTicker", &[("symbol", symbol.to_string())])
            .await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", order.symbol.clone());
        params.insert("side", format!("{:?}", order.side).to_uppercase());
        params.insert("type", format!("{:?}", order.order_type).to_uppercase());
        params.insert("quantity", order.quantity.to_string());
        params.insert("newClientOrderId", order.client_order_id.to_string());
        if let Some(price) = order.price {
            params.insert("price", price.to_string());
            params.insert("timeInForce", "GTC".to_string());
        }

        self.post_signed("/api/v3/order", &mut params).await
    }

    async fn get_account_balance(&self) -> Result<Vec<BalanceResponse>, ApiError> {
        let mut params = BTreeMap::new();
        let account: AccountResponse = self.get_signed("/api/v3/account", &mut params).await?;
        Ok(account.balances)
    }
}
