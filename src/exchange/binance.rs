//! Binance spot adapter.
//!
//! REST calls are signed with HMAC-SHA256 over the query string. Timestamps
//! are shifted by the offset measured in `sync_server_time` so signed calls
//! stay inside the receive window when the local clock drifts.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::traits::{EventStream, ExchangeAdapter, ExchangeKind, ExchangeResult};
use crate::config::ExchangeConfig;
use crate::domain::{
    Balance, BookTicker, Kline, LotSize, Order, OrderSide, OrderStatus, PriceStats, UserDataEvent,
};
use crate::error::{ExchangeError, PumpError, Result};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const WS_CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct BinanceClient {
    http: Client,
    rest_url: String,
    ws_url: String,
    api_key: String,
    secret_key: String,
    recv_window_ms: u64,
    /// server time minus local time, in ms
    time_offset_ms: AtomicI64,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pumpbot/0.1")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PumpError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            recv_window_ms: config.recv_window_ms,
            time_offset_ms: AtomicI64::new(0),
        })
    }

    fn timestamp(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Decode(format!("invalid secret key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn api_key_header(&self) -> ExchangeResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-mbx-apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| ExchangeError::Decode(format!("invalid API key header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Encode `params`; signed queries also carry receive window, timestamp and signature.
    fn query_string(&self, params: &[(&str, String)], signed: bool) -> ExchangeResult<String> {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        if signed {
            serializer.append_pair("recvWindow", &self.recv_window_ms.to_string());
            serializer.append_pair("timestamp", &self.timestamp().to_string());
        }
        let mut query = serializer.finish();
        if signed {
            let signature = self.sign(&query)?;
            query.push_str("&signature=");
            query.push_str(&signature);
        }
        Ok(query)
    }

    /// Issue a request. `signed` appends timestamp, receive window and signature.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        with_key: bool,
    ) -> ExchangeResult<T> {
        let query = self.query_string(params, signed)?;
        let url = if query.is_empty() {
            format!("{}{}", self.rest_url, path)
        } else {
            format!("{}{}?{}", self.rest_url, path, query)
        };

        let mut req = self.http.request(method.clone(), &url);
        if signed || with_key {
            req = req.headers(self.api_key_header()?);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status, &text, &method, path));
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("{} {}: {}", method, path, e)))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<Order> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        let raw: RawOrder = self
            .request(Method::POST, "/api/v3/order", &params, true, true)
            .await?;
        raw.into_order()
    }

    async fn open_stream<T, F>(&self, path: &str, parse: F) -> ExchangeResult<EventStream<T>>
    where
        T: Send + 'static,
        F: Fn(&str) -> Option<ExchangeResult<T>> + Send + Sync + Copy + 'static,
    {
        let url = format!("{}/{}", self.ws_url, path);
        info!("Connecting to Binance WS: {}", url);

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(WS_CONNECT_TIMEOUT_SECS),
            connect_async(url),
        )
        .await
        .map_err(|_| ExchangeError::Transport("WebSocket connection timeout".to_string()))??;

        let stream = ws_stream
            .filter_map(move |msg| async move {
                match msg {
                    Ok(Message::Text(text)) => parse(&text),
                    Ok(Message::Close(frame)) => {
                        info!("Received close frame from Binance: {:?}", frame);
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ExchangeError::from(e))),
                }
            })
            .boxed();

        Ok(stream)
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str, method: &Method, path: &str) -> ExchangeError {
    // Throttling and server faults are retryable
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
    {
        return ExchangeError::Transport(format!("{} {} failed: status={}", method, path, status));
    }

    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => ExchangeError::api(err.code, err.msg),
        Err(_) => ExchangeError::api(
            -i64::from(status.as_u16()),
            format!("{} {} failed: status={} body={}", method, path, status, body),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: i64,
    #[serde(default)]
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    orig_qty: Decimal,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default, rename = "cummulativeQuoteQty")]
    cumulative_quote_qty: Decimal,
    status: String,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
}

impl RawOrder {
    fn into_order(self) -> ExchangeResult<Order> {
        let side = OrderSide::parse(&self.side)
            .ok_or_else(|| ExchangeError::Decode(format!("unknown order side '{}'", self.side)))?;
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            ExchangeError::Decode(format!("unknown order status '{}'", self.status))
        })?;
        Ok(Order {
            order_id: self.order_id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            side,
            quantity: self.orig_qty,
            cumulative_quote_qty: self.cumulative_quote_qty,
            executed_qty: self.executed_qty,
            status,
            transact_time: self.transact_time.or(self.update_time).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    min_qty: Decimal,
    max_qty: Decimal,
    step_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    high_price: Decimal,
    low_price: Decimal,
    last_price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKey {
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlineData,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct BookTickerEvent {
    #[serde(rename = "b")]
    bid_price: Decimal,
    #[serde(rename = "B")]
    bid_qty: Decimal,
    #[serde(rename = "a")]
    ask_price: Decimal,
    #[serde(rename = "A")]
    ask_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountPositionEvent {
    #[serde(rename = "B")]
    balances: Vec<WsBalance>,
}

#[derive(Debug, Deserialize)]
struct WsBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: Decimal,
    #[serde(rename = "l")]
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExecutionReportEvent {
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "z")]
    executed_qty: Decimal,
    #[serde(rename = "Z")]
    cumulative_quote_qty: Decimal,
}

fn decode<T: DeserializeOwned>(text: &str) -> ExchangeResult<T> {
    serde_json::from_str(text).map_err(|e| ExchangeError::Decode(e.to_string()))
}

fn parse_kline(text: &str) -> Option<ExchangeResult<Kline>> {
    Some(decode::<KlineEvent>(text).map(|ev| Kline {
        open_time: ev.kline.open_time,
        open: ev.kline.open,
        high: ev.kline.high,
        low: ev.kline.low,
        close: ev.kline.close,
        volume: ev.kline.volume,
        is_final: ev.kline.is_closed,
    }))
}

fn parse_book_ticker(text: &str) -> Option<ExchangeResult<BookTicker>> {
    Some(decode::<BookTickerEvent>(text).map(|ev| BookTicker {
        bid_price: ev.bid_price,
        bid_qty: ev.bid_qty,
        ask_price: ev.ask_price,
        ask_qty: ev.ask_qty,
    }))
}

fn parse_user_data(text: &str) -> Option<ExchangeResult<UserDataEvent>> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Some(Err(ExchangeError::Decode(e.to_string()))),
    };
    let event_type = value.get("e").and_then(Value::as_str).unwrap_or_default();

    let event = match event_type {
        "outboundAccountPosition" => serde_json::from_value::<AccountPositionEvent>(value)
            .map_err(|e| ExchangeError::Decode(e.to_string()))
            .map(|ev| UserDataEvent::AccountUpdate {
                balances: ev
                    .balances
                    .into_iter()
                    .map(|b| Balance {
                        asset: b.asset,
                        free: b.free,
                        locked: b.locked,
                    })
                    .collect(),
            }),
        "executionReport" => serde_json::from_value::<ExecutionReportEvent>(value)
            .map_err(|e| ExchangeError::Decode(e.to_string()))
            .and_then(|ev| {
                let side = OrderSide::parse(&ev.side).ok_or_else(|| {
                    ExchangeError::Decode(format!("unknown order side '{}'", ev.side))
                })?;
                let status = OrderStatus::parse(&ev.status).ok_or_else(|| {
                    ExchangeError::Decode(format!("unknown order status '{}'", ev.status))
                })?;
                Ok(UserDataEvent::ExecutionReport {
                    order_id: ev.order_id,
                    side,
                    status,
                    executed_qty: ev.executed_qty,
                    cumulative_quote_qty: ev.cumulative_quote_qty,
                })
            }),
        other => Ok(UserDataEvent::Other(other.to_string())),
    };
    Some(event)
}

fn value_decimal(value: Option<&Value>) -> ExchangeResult<Decimal> {
    match value {
        Some(Value::String(s)) => s
            .parse::<Decimal>()
            .map_err(|e| ExchangeError::Decode(format!("invalid decimal '{}': {}", s, e))),
        Some(Value::Number(n)) => n
            .to_string()
            .parse::<Decimal>()
            .map_err(|e| ExchangeError::Decode(format!("invalid decimal '{}': {}", n, e))),
        _ => Err(ExchangeError::Decode("missing decimal field".to_string())),
    }
}

/// Klines come back as positional arrays.
fn kline_from_row(row: &[Value]) -> ExchangeResult<Kline> {
    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| ExchangeError::Decode("kline row without open time".to_string()))?;
    Ok(Kline {
        open_time,
        open: value_decimal(row.get(1))?,
        high: value_decimal(row.get(2))?,
        low: value_decimal(row.get(3))?,
        close: value_decimal(row.get(4))?,
        volume: value_decimal(row.get(5))?,
        is_final: true,
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Binance
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<Order> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let raw: RawOrder = self
            .request(Method::GET, "/api/v3/order", &params, true, true)
            .await?;
        raw.into_order()
    }

    async fn submit_buy(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<Order> {
        self.place_market_order(symbol, OrderSide::Buy, quantity)
            .await
    }

    async fn submit_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<Order> {
        self.place_market_order(symbol, OrderSide::Sell, quantity)
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<Order> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let raw: RawOrder = self
            .request(Method::DELETE, "/api/v3/order", &params, true, true)
            .await?;
        raw.into_order()
    }

    async fn get_exchange_info(&self, symbol: &str) -> ExchangeResult<LotSize> {
        let params = [("symbol", symbol.to_string())];
        let info: ExchangeInfo = self
            .request(Method::GET, "/api/v3/exchangeInfo", &params, false, false)
            .await?;

        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ExchangeError::Decode(format!("symbol {} not listed", symbol)))?;

        let filter = symbol_info
            .filters
            .into_iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some("LOT_SIZE"))
            .ok_or_else(|| ExchangeError::Decode(format!("no LOT_SIZE filter for {}", symbol)))?;

        let lot: LotSizeFilter =
            serde_json::from_value(filter).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        Ok(LotSize {
            min_qty: lot.min_qty,
            max_qty: lot.max_qty,
            step_size: lot.step_size.normalize(),
        })
    }

    async fn get_available_funds(&self, asset: &str) -> ExchangeResult<Decimal> {
        let account: AccountInfo = self
            .request(Method::GET, "/api/v3/account", &[], true, true)
            .await?;
        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| {
                debug!(asset = %b.asset, free = %b.free, locked = %b.locked, "Balance");
                b.free
            })
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_recent_price_stats(&self, symbol: &str) -> ExchangeResult<PriceStats> {
        let params = [("symbol", symbol.to_string())];
        let ticker: Ticker24h = self
            .request(Method::GET, "/api/v3/ticker/24hr", &params, false, false)
            .await?;
        Ok(PriceStats {
            high_price: ticker.high_price,
            low_price: ticker.low_price,
            last_price: ticker.last_price,
        })
    }

    async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self
            .request(Method::GET, "/api/v3/klines", &params, false, false)
            .await?;
        rows.iter().map(|row| kline_from_row(row)).collect()
    }

    async fn open_kline_stream(
        &self,
        symbol: &str,
        interval: &str,
    ) -> ExchangeResult<EventStream<Kline>> {
        let path = format!("{}@kline_{}", symbol.to_lowercase(), interval);
        self.open_stream(&path, parse_kline).await
    }

    async fn open_book_ticker_stream(&self, symbol: &str) -> ExchangeResult<EventStream<BookTicker>> {
        let path = format!("{}@bookTicker", symbol.to_lowercase());
        self.open_stream(&path, parse_book_ticker).await
    }

    async fn open_user_data_stream(
        &self,
        listen_key: &str,
    ) -> ExchangeResult<EventStream<UserDataEvent>> {
        self.open_stream(listen_key, parse_user_data).await
    }

    async fn get_listen_key(&self) -> ExchangeResult<String> {
        let key: ListenKey = self
            .request(Method::POST, "/api/v3/userDataStream", &[], false, true)
            .await?;
        Ok(key.listen_key)
    }

    async fn keep_alive_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let params = [("listenKey", listen_key.to_string())];
        let _: Value = self
            .request(Method::PUT, "/api/v3/userDataStream", &params, false, true)
            .await?;
        Ok(())
    }

    async fn sync_server_time(&self) -> ExchangeResult<i64> {
        let before = Utc::now().timestamp_millis();
        let server: ServerTime = self
            .request(Method::GET, "/api/v3/time", &[], false, false)
            .await?;
        let after = Utc::now().timestamp_millis();

        // assume the server stamped the midpoint of the round trip
        let offset = server.server_time - (before + after) / 2;
        let previous = self.time_offset_ms.swap(offset, Ordering::Relaxed);
        if (offset - previous).abs() > 1000 {
            warn!(offset_ms = offset, previous_ms = previous, "Server clock offset moved");
        }
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_documented_example() {
        let mut config = ExchangeConfig::default();
        config.secret_key =
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string();
        let client = BinanceClient::new(&config).unwrap();

        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(payload).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_ends_with_its_signature() {
        let mut config = ExchangeConfig::default();
        config.secret_key = "secret".to_string();
        let client = BinanceClient::new(&config).unwrap();

        let query = client
            .query_string(&[("symbol", "BTCUSDT".to_string()), ("orderId", "7".to_string())], true)
            .unwrap();
        let (payload, signature) = query.rsplit_once("&signature=").unwrap();
        assert!(payload.starts_with("symbol=BTCUSDT&orderId=7&recvWindow=5000&timestamp="));
        assert_eq!(client.sign(payload).unwrap(), signature);

        let plain = client.query_string(&[("symbol", "BTCUSDT".to_string())], false).unwrap();
        assert_eq!(plain, "symbol=BTCUSDT");
    }

    #[test]
    fn adapter_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let client = BinanceClient::new(&ExchangeConfig::default()).unwrap();
        assert_send(&client.get_order("BTCUSDT", 1));
        assert_send(&client.submit_buy("BTCUSDT", dec!(0.01)));
        assert_send(&client.sync_server_time());
    }

    #[test]
    fn order_response_decodes() {
        let raw: RawOrder = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"abc","transactTime":1507725176595,
                "origQty":"0.01000000","executedQty":"0.01000000","cummulativeQuoteQty":"500.00000000",
                "status":"FILLED","side":"BUY","type":"MARKET"}"#,
        )
        .unwrap();
        let order = raw.into_order().unwrap();
        assert_eq!(order.order_id, 28);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.effective_price(), dec!(50000));
    }

    #[test]
    fn error_body_keeps_code() {
        let err = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2011,"msg":"Unknown order sent."}"#,
            &Method::DELETE,
            "/api/v3/order",
        );
        assert_eq!(err.code(), Some(-2011));

        let err = classify_failure(StatusCode::BAD_GATEWAY, "", &Method::GET, "/api/v3/order");
        assert!(err.is_transport());
    }

    #[test]
    fn user_data_events_decode() {
        let report = parse_user_data(
            r#"{"e":"executionReport","i":4293153,"S":"SELL","X":"PARTIALLY_FILLED","z":"0.005","Z":"250.5"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            report,
            UserDataEvent::ExecutionReport {
                order_id: 4293153,
                side: OrderSide::Sell,
                status: OrderStatus::PartiallyFilled,
                executed_qty: dec!(0.005),
                cumulative_quote_qty: dec!(250.5),
            }
        );

        let other = parse_user_data(r#"{"e":"listenKeyExpired"}"#).unwrap().unwrap();
        assert_eq!(other, UserDataEvent::Other("listenKeyExpired".to_string()));
    }

    #[test]
    fn kline_rows_decode() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999]"#,
        )
        .unwrap();
        let kline = kline_from_row(&row).unwrap();
        assert_eq!(kline.close, dec!(0.01577100));
        assert!(kline.is_final);
    }
}
