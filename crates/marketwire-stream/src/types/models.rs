/*
[INPUT]:  REST snapshot payloads from the exchange public API
[OUTPUT]: Typed snapshot models convertible to stream-event JSON
[POS]:    Data layer - REST response models
[UPDATE]: When snapshot endpoints or stream payload shapes change
*/

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// GET /api/v3/ticker/24hr
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change_percent: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weighted_avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub open_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
    pub open_time: i64,
    pub close_time: i64,
    #[serde(default)]
    pub first_id: i64,
    #[serde(default)]
    pub last_id: i64,
    #[serde(default)]
    pub count: u64,
}

impl Ticker24h {
    /// Shape of a `24hrTicker` stream event.
    pub fn to_stream_payload(&self) -> Value {
        json!({
            "e": "24hrTicker",
            "E": event_time(),
            "s": self.symbol,
            "p": self.price_change.to_string(),
            "P": self.price_change_percent.to_string(),
            "w": self.weighted_avg_price.to_string(),
            "c": self.last_price.to_string(),
            "Q": self.last_qty.to_string(),
            "b": self.bid_price.to_string(),
            "B": self.bid_qty.to_string(),
            "a": self.ask_price.to_string(),
            "A": self.ask_qty.to_string(),
            "o": self.open_price.to_string(),
            "h": self.high_price.to_string(),
            "l": self.low_price.to_string(),
            "v": self.volume.to_string(),
            "q": self.quote_volume.to_string(),
            "O": self.open_time,
            "C": self.close_time,
            "F": self.first_id,
            "L": self.last_id,
            "n": self.count,
        })
    }

    /// Shape of a `24hrMiniTicker` stream event.
    pub fn to_mini_stream_payload(&self) -> Value {
        json!({
            "e": "24hrMiniTicker",
            "E": event_time(),
            "s": self.symbol,
            "c": self.last_price.to_string(),
            "o": self.open_price.to_string(),
            "h": self.high_price.to_string(),
            "l": self.low_price.to_string(),
            "v": self.volume.to_string(),
            "q": self.quote_volume.to_string(),
        })
    }
}

/// GET /api/v3/ticker/bookTicker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_qty: Decimal,
}

impl BookTicker {
    pub fn to_stream_payload(&self) -> Value {
        json!({
            "u": 0,
            "s": self.symbol,
            "b": self.bid_price.to_string(),
            "B": self.bid_qty.to_string(),
            "a": self.ask_price.to_string(),
            "A": self.ask_qty.to_string(),
        })
    }
}

/// GET /api/v3/trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrade {
    pub id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub quote_qty: Decimal,
    pub time: i64,
    pub is_buyer_maker: bool,
    #[serde(default)]
    pub is_best_match: bool,
}

impl RecentTrade {
    pub fn to_stream_payload(&self, symbol: &str) -> Value {
        json!({
            "e": "trade",
            "E": event_time(),
            "s": symbol,
            "t": self.id,
            "p": self.price.to_string(),
            "q": self.qty.to_string(),
            "T": self.time,
            "m": self.is_buyer_maker,
            "M": self.is_best_match,
        })
    }
}

/// GET /api/v3/aggTrades (exchange uses single-letter keys here too)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggTrade {
    #[serde(rename = "a")]
    pub agg_id: i64,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(rename = "f")]
    pub first_trade_id: i64,
    #[serde(rename = "l")]
    pub last_trade_id: i64,
    #[serde(rename = "T")]
    pub time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

impl AggTrade {
    pub fn to_stream_payload(&self, symbol: &str) -> Value {
        json!({
            "e": "aggTrade",
            "E": event_time(),
            "s": symbol,
            "a": self.agg_id,
            "p": self.price.to_string(),
            "q": self.qty.to_string(),
            "f": self.first_trade_id,
            "l": self.last_trade_id,
            "T": self.time,
            "m": self.is_buyer_maker,
            "M": self.is_best_match,
        })
    }
}

/// One row of GET /api/v3/klines, which the exchange encodes as a positional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "KlineRow", into = "KlineRow")]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_volume: Decimal,
    pub trades: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

#[derive(Clone, Serialize, Deserialize)]
struct KlineRow(
    i64,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    i64,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    u64,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    #[serde(with = "rust_decimal::serde::str")] Decimal,
    Value,
);

impl From<KlineRow> for Kline {
    fn from(row: KlineRow) -> Self {
        Self {
            open_time: row.0,
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            volume: row.5,
            close_time: row.6,
            quote_volume: row.7,
            trades: row.8,
            taker_buy_base_volume: row.9,
            taker_buy_quote_volume: row.10,
        }
    }
}

impl From<Kline> for KlineRow {
    fn from(k: Kline) -> Self {
        KlineRow(
            k.open_time,
            k.open,
            k.high,
            k.low,
            k.close,
            k.volume,
            k.close_time,
            k.quote_volume,
            k.trades,
            k.taker_buy_base_volume,
            k.taker_buy_quote_volume,
            Value::String("0".to_string()),
        )
    }
}

impl Kline {
    /// Shape of a `kline` stream event. `closed` marks the final update of the bar.
    pub fn to_stream_payload(&self, symbol: &str, interval: &str, closed: bool) -> Value {
        json!({
            "e": "kline",
            "E": event_time(),
            "s": symbol,
            "k": {
                "t": self.open_time,
                "T": self.close_time,
                "s": symbol,
                "i": interval,
                "o": self.open.to_string(),
                "c": self.close.to_string(),
                "h": self.high.to_string(),
                "l": self.low.to_string(),
                "v": self.volume.to_string(),
                "n": self.trades,
                "x": closed,
                "q": self.quote_volume.to_string(),
                "V": self.taker_buy_base_volume.to_string(),
                "Q": self.taker_buy_quote_volume.to_string(),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel(
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
);

impl PriceLevel {
    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn qty(&self) -> Decimal {
        self.1
    }
}

/// GET /api/v3/depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    /// Partial book stream (`depth5/10/20`) carries the snapshot shape unchanged.
    pub fn to_partial_payload(&self) -> Value {
        json!({
            "lastUpdateId": self.last_update_id,
            "bids": levels_json(&self.bids),
            "asks": levels_json(&self.asks),
        })
    }

    /// Diff-depth stream shape covering the whole snapshot.
    pub fn to_diff_payload(&self, symbol: &str) -> Value {
        json!({
            "e": "depthUpdate",
            "E": event_time(),
            "s": symbol,
            "U": self.last_update_id,
            "u": self.last_update_id,
            "b": levels_json(&self.bids),
            "a": levels_json(&self.asks),
        })
    }
}

fn levels_json(levels: &[PriceLevel]) -> Value {
    Value::Array(
        levels
            .iter()
            .map(|level| json!([level.0.to_string(), level.1.to_string()]))
            .collect(),
    )
}

fn event_time() -> i64 {
    Utc::now().timestamp_millis()
}
