//! Live REST `ExchangeAdapter` implementation. Every outbound call
//! passes through the rate limiter first, signs private
//! endpoints via `adapter::auth`, and classifies the HTTP/transport
//! outcome into an `AdapterError` so `safe_ops` and `retry::execute`
//! can reason about it uniformly.
//!
//! Connection pooling and per-call timeouts follow the builder style of
//! the pack's `reqwest`-based HTTP clients (e.g. nautilus_trader's venue
//! adapters); this crate has no such client of its own to draw from, so
//! the shape -- one shared `reqwest::Client`, timeouts set once at
//! construction -- is learned from there.

use super::clock::ClockSync;
use super::errors::AdapterError;
use super::rate_limit::RateLimiter;
use super::types::{
    Balance, ExchangeInfo, ExchangeOrderView, FillBatch, Orderbook, OrderbookLevel, RawOrderStatus,
    SubmitRequest,
};
use super::ExchangeAdapter;
use crate::config::Config;
use crate::core::types::{ClientOrderId, Fill, Side, Symbol, SymbolRules};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Live venue adapter: signed REST calls over `reqwest`, rate-limited
/// and clock-synced per-process.
pub struct RestAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    rate_limiter: RateLimiter,
    clock: ClockSync,
}

impl RestAdapter {
    pub fn new(config: &Config) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AdapterError::Network { detail: format!("client build failed: {e}") })?;

        Ok(Self {
            client,
            base_url: config.exchange_base_url.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            rate_limiter: RateLimiter::new(config.rate_limit.rps, config.rate_limit.burst),
            clock: ClockSync::new(config.clock_sync_max_abs_offset_ms),
        })
    }

    fn require_credentials(&self) -> Result<(&str, &str), AdapterError> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Ok((key.as_str(), secret.as_str())),
            _ => Err(AdapterError::Auth { detail: "no api credentials configured".into() }),
        }
    }

    fn sign_headers(&self) -> Result<(String, String, String), AdapterError> {
        let (api_key, api_secret) = self.require_credentials()?;
        let stamp_ms = self.clock.stamp_ms();
        let signature = super::auth::sign(api_key, api_secret, stamp_ms)
            .map_err(|detail| AdapterError::Auth { detail })?;
        Ok((api_key.to_string(), stamp_ms.to_string(), signature))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        private: bool,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, &url).query(query);

        if private {
            let (api_key, stamp_ms, signature) = self.sign_headers()?;
            builder = builder
                .header("X-PCK", api_key)
                .header("X-Stamp", stamp_ms)
                .header("X-Signature", signature);
        }
        if let Some(b) = &body {
            builder = builder.json(b);
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::Malformed { detail: format!("failed reading response body: {e}") })?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text)
                .map_err(|e| AdapterError::Malformed { detail: format!("invalid json response: {e}") })
        } else {
            Err(classify_status_error(status, &text))
        }
    }

    async fn request_public(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, AdapterError> {
        self.request(Method::GET, path, false, query, None).await
    }

    async fn request_private(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        self.request(method, path, true, query, body).await
    }
}

fn classify_transport_error(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() || err.is_connect() {
        AdapterError::Network { detail: err.to_string() }
    } else {
        AdapterError::Network { detail: err.to_string() }
    }
}

fn classify_status_error(status: StatusCode, body: &str) -> AdapterError {
    let detail = extract_error_message(body).unwrap_or_else(|| body.to_string());
    if status == StatusCode::TOO_MANY_REQUESTS {
        AdapterError::RateLimit { retry_after_ms: parse_retry_after_ms(body) }
    } else if status.is_server_error() {
        AdapterError::Server { status: status.as_u16(), detail }
    } else if status.is_client_error() {
        AdapterError::Client { status: status.as_u16(), detail }
    } else {
        AdapterError::Malformed { detail: format!("unexpected status {status}: {detail}") }
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("message")
        .or_else(|| parsed.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed.get("retryAfterMs").and_then(Value::as_u64)
}

#[derive(Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Deserialize)]
struct ExchangeInfoSymbol {
    #[serde(rename = "pairSymbol")]
    pair_symbol: String,
    #[serde(rename = "priceTick")]
    price_tick: Decimal,
    #[serde(rename = "quantityStep")]
    quantity_step: Decimal,
    #[serde(rename = "minNotional")]
    min_notional: Decimal,
    #[serde(rename = "minQuantity")]
    min_quantity: Decimal,
    #[serde(rename = "maxQuantity")]
    max_quantity: Decimal,
}

#[derive(Deserialize)]
struct OrderbookResponse {
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
    timestamp: i64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(rename = "newOrderClientId")]
    client_id: Option<String>,
    #[serde(rename = "pairSymbol")]
    pair_symbol: String,
    #[serde(rename = "orderType")]
    order_type: String,
    price: Decimal,
    quantity: Decimal,
    #[serde(rename = "amountFilled", default)]
    amount_filled: Decimal,
    status: String,
    #[serde(rename = "createdAt", default)]
    created_at: i64,
}

impl OrderResponse {
    fn into_view(self) -> ExchangeOrderView {
        ExchangeOrderView {
            exchange_order_id: self.id,
            client_order_id: self.client_id.map(ClientOrderId),
            symbol: Symbol::new(self.pair_symbol),
            side: if self.order_type.eq_ignore_ascii_case("buy") { Side::Buy } else { Side::Sell },
            price: self.price,
            qty: self.quantity,
            filled_qty: self.amount_filled,
            raw_status: RawOrderStatus(self.status),
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct TradeResponse {
    id: String,
    #[serde(rename = "orderId", default)]
    order_id: Option<String>,
    #[serde(rename = "pairSymbol")]
    pair_symbol: String,
    #[serde(rename = "orderType")]
    order_type: String,
    price: Decimal,
    amount: Decimal,
    fee: Decimal,
    #[serde(rename = "feeCurrency", default)]
    fee_currency: String,
    timestamp: i64,
}

#[async_trait]
impl ExchangeAdapter for RestAdapter {
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, AdapterError> {
        let body = self.request_public("/api/v2/server/exchangeinfo", &[]).await?;
        let parsed: ExchangeInfoResponse = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("exchangeinfo shape: {e}") })?;
        Ok(parsed
            .symbols
            .into_iter()
            .map(|s| {
                (
                    Symbol::new(s.pair_symbol),
                    SymbolRules {
                        price_tick: s.price_tick,
                        qty_step: s.quantity_step,
                        min_notional: s.min_notional,
                        min_qty: s.min_quantity,
                        max_qty: s.max_quantity,
                    },
                )
            })
            .collect())
    }

    async fn get_orderbook(&self, symbol: &Symbol) -> Result<Orderbook, AdapterError> {
        let body = self
            .request_public("/api/v2/orderbook", &[("pairSymbol", symbol.as_str().to_string())])
            .await?;
        let parsed: OrderbookResponse = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("orderbook shape: {e}") })?;
        Ok(Orderbook {
            symbol: symbol.clone(),
            bids: parsed.bids.into_iter().map(|[p, q]| OrderbookLevel { price: p, qty: q }).collect(),
            asks: parsed.asks.into_iter().map(|[p, q]| OrderbookLevel { price: p, qty: q }).collect(),
            ts: parsed.timestamp,
        })
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, AdapterError> {
        let body = self.request_private(Method::GET, "/api/v1/users/balances", &[], None).await?;
        let parsed: Vec<BalanceResponse> = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("balances shape: {e}") })?;
        Ok(parsed.into_iter().map(|b| Balance { asset: b.asset, free: b.free, locked: b.locked }).collect())
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<ExchangeOrderView>, AdapterError> {
        let body = self
            .request_private(
                Method::GET,
                "/api/v1/openOrders",
                &[("pairSymbol", symbol.as_str().to_string())],
                None,
            )
            .await?;
        let parsed: Vec<OrderResponse> = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("openOrders shape: {e}") })?;
        Ok(parsed.into_iter().map(OrderResponse::into_view).collect())
    }

    async fn get_all_orders(
        &self,
        symbol: &Symbol,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<ExchangeOrderView>, AdapterError> {
        let query = [
            ("pairSymbol", symbol.as_str().to_string()),
            ("startDate", start_ts.to_string()),
            ("endDate", end_ts.to_string()),
        ];
        let body = self.request_private(Method::GET, "/api/v1/allOrders", &query, None).await?;
        let parsed: Vec<OrderResponse> = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("allOrders shape: {e}") })?;
        Ok(parsed.into_iter().map(OrderResponse::into_view).collect())
    }

    async fn get_order_by_id(
        &self,
        _symbol: &Symbol,
        exchange_order_id: &str,
    ) -> Result<Option<ExchangeOrderView>, AdapterError> {
        let path = format!("/api/v1/order/{exchange_order_id}");
        match self.request_private(Method::GET, &path, &[], None).await {
            Ok(body) => {
                let parsed: OrderResponse = serde_json::from_value(body)
                    .map_err(|e| AdapterError::Malformed { detail: format!("order shape: {e}") })?;
                Ok(Some(parsed.into_view()))
            }
            Err(AdapterError::Client { status: 404, .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn get_recent_fills(
        &self,
        symbol: &Symbol,
        since_ts: Option<i64>,
    ) -> Result<FillBatch, AdapterError> {
        let mut query = vec![("pairSymbol", symbol.as_str().to_string())];
        if let Some(ts) = since_ts {
            query.push(("startDate", ts.to_string()));
        }
        let body = self.request_private(Method::GET, "/api/v1/users/transactions/trade", &query, None).await?;
        let parsed: Vec<TradeResponse> = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("trade history shape: {e}") })?;
        Ok(parsed
            .into_iter()
            .map(|t| Fill {
                fill_id: t.id,
                exchange_order_id: t.order_id,
                client_order_id: None,
                symbol: Symbol::new(t.pair_symbol),
                side: if t.order_type.eq_ignore_ascii_case("buy") { Side::Buy } else { Side::Sell },
                qty: t.amount,
                price: t.price,
                fee: t.fee,
                fee_currency: t.fee_currency,
                ts: t.timestamp,
                meta: None,
            })
            .collect())
    }

    async fn submit_limit_order(&self, req: &SubmitRequest) -> Result<ExchangeOrderView, AdapterError> {
        let body = serde_json::json!({
            "pairSymbol": req.symbol.as_str(),
            "price": req.price,
            "quantity": req.qty,
            "orderMethod": "limit",
            "orderType": match req.side { Side::Buy => "buy", Side::Sell => "sell" },
            "newOrderClientId": req.client_order_id.as_str(),
        });
        let body = self.request_private(Method::POST, "/api/v1/order", &[], Some(body)).await?;
        let parsed: OrderResponse = serde_json::from_value(body)
            .map_err(|e| AdapterError::Malformed { detail: format!("submit response shape: {e}") })?;
        Ok(parsed.into_view())
    }

    async fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: Option<&str>,
        client_order_id: Option<&ClientOrderId>,
    ) -> Result<(), AdapterError> {
        if let Some(xid) = exchange_order_id {
            let path = format!("/api/v1/order/{xid}");
            match self.request_private(Method::DELETE, &path, &[], None).await {
                Ok(_) => return Ok(()),
                Err(AdapterError::Client { status: 404, .. }) => {
                    // The venue accepts cancel in two incompatible shapes
                    // depending on deployment; fall back to the JSON-bodied
                    // form against the collection endpoint before giving up.
                }
                Err(other) => return Err(other),
            }
        }

        let body = serde_json::json!({
            "pairSymbol": symbol.as_str(),
            "id": exchange_order_id,
            "newOrderClientId": client_order_id.map(ClientOrderId::as_str),
        });
        self.request_private(Method::DELETE, "/api/v1/order", &[], Some(body)).await.map(|_| ())
    }
}
