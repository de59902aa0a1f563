/*
[INPUT]:  Symbol identifiers and query parameters
[OUTPUT]: Market data snapshots (ticker, book ticker, trades, klines, depth)
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::http::{MarketClient, MarketwireError, Result};
use crate::session::fallback::SnapshotSource;
use crate::types::{
    AggTrade, BookTicker, DepthSnapshot, Kline, RecentTrade, StreamKind, StreamName, Ticker24h,
};

const DIFF_DEPTH_SNAPSHOT_LIMIT: u16 = 100;

impl MarketClient {
    /// 24 hour rolling window statistics
    ///
    /// GET /api/v3/ticker/24hr?symbol={symbol}
    pub async fn ticker_24hr(&self, symbol: &str) -> Result<Ticker24h> {
        let builder = self
            .request(Method::GET, "/api/v3/ticker/24hr")?
            .query(&[("symbol", symbol)]);
        self.send_json(builder).await
    }

    /// Best bid/ask
    ///
    /// GET /api/v3/ticker/bookTicker?symbol={symbol}
    pub async fn book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let builder = self
            .request(Method::GET, "/api/v3/ticker/bookTicker")?
            .query(&[("symbol", symbol)]);
        self.send_json(builder).await
    }

    /// GET /api/v3/trades?symbol={symbol}&limit={limit}
    pub async fn recent_trades(&self, symbol: &str, limit: u16) -> Result<Vec<RecentTrade>> {
        let builder = self
            .request(Method::GET, "/api/v3/trades")?
            .query(&[("symbol", symbol.to_string()), ("limit", limit.to_string())]);
        self.send_json(builder).await
    }

    /// GET /api/v3/aggTrades?symbol={symbol}&limit={limit}
    pub async fn agg_trades(&self, symbol: &str, limit: u16) -> Result<Vec<AggTrade>> {
        let builder = self
            .request(Method::GET, "/api/v3/aggTrades")?
            .query(&[("symbol", symbol.to_string()), ("limit", limit.to_string())]);
        self.send_json(builder).await
    }

    /// Kline/candlestick bars, oldest first
    ///
    /// GET /api/v3/klines?symbol={symbol}&interval={interval}&limit={limit}
    pub async fn klines(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        let builder = self.request(Method::GET, "/api/v3/klines")?.query(&[
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send_json(builder).await
    }

    /// Order book
    ///
    /// GET /api/v3/depth?symbol={symbol}&limit={limit}
    pub async fn depth(&self, symbol: &str, limit: u16) -> Result<DepthSnapshot> {
        let builder = self
            .request(Method::GET, "/api/v3/depth")?
            .query(&[("symbol", symbol.to_string()), ("limit", limit.to_string())]);
        self.send_json(builder).await
    }
}

fn empty_snapshot(stream: &StreamName) -> MarketwireError {
    MarketwireError::InvalidResponse(format!("empty snapshot for {stream}"))
}

#[async_trait]
impl SnapshotSource for MarketClient {
    async fn fetch_snapshot(&self, stream: &StreamName) -> Result<Value> {
        let symbol = stream.rest_symbol();
        match stream.kind() {
            StreamKind::Trade => self
                .recent_trades(&symbol, 1)
                .await?
                .last()
                .map(|trade| trade.to_stream_payload(&symbol))
                .ok_or_else(|| empty_snapshot(stream)),
            StreamKind::AggTrade => self
                .agg_trades(&symbol, 1)
                .await?
                .last()
                .map(|trade| trade.to_stream_payload(&symbol))
                .ok_or_else(|| empty_snapshot(stream)),
            StreamKind::Ticker => Ok(self.ticker_24hr(&symbol).await?.to_stream_payload()),
            StreamKind::MiniTicker => Ok(self.ticker_24hr(&symbol).await?.to_mini_stream_payload()),
            StreamKind::BookTicker => Ok(self.book_ticker(&symbol).await?.to_stream_payload()),
            StreamKind::Kline { interval } => self
                .klines(&symbol, interval, 1)
                .await?
                .last()
                .map(|kline| kline.to_stream_payload(&symbol, interval, false))
                .ok_or_else(|| empty_snapshot(stream)),
            StreamKind::Depth {
                levels: Some(levels),
            } => Ok(self.depth(&symbol, *levels).await?.to_partial_payload()),
            StreamKind::Depth { levels: None } => Ok(self
                .depth(&symbol, DIFF_DEPTH_SNAPSHOT_LIMIT)
                .await?
                .to_diff_payload(&symbol)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::http::{ClientConfig, MarketClient, MarketwireError};
    use crate::session::fallback::SnapshotSource;
    use crate::types::{BookTicker, StreamName};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MarketClient {
        MarketClient::with_config_and_base_url(ClientConfig::default(), &server.uri())
            .expect("client init")
    }

    #[tokio::test]
    async fn test_book_ticker() {
        let server = MockServer::start().await;
        let mock_response = r#"{
            "symbol": "BTCUSDT",
            "bidPrice": "64000.10",
            "bidQty": "1.5",
            "askPrice": "64000.20",
            "askQty": "0.7"
        }"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/ticker/bookTicker"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .book_ticker("BTCUSDT")
            .await
            .expect("book_ticker failed");

        let expected = BookTicker {
            symbol: "BTCUSDT".to_string(),
            bid_price: "64000.10".parse().expect("bid_price"),
            bid_qty: "1.5".parse().expect("bid_qty"),
            ask_price: "64000.20".parse().expect("ask_price"),
            ask_qty: "0.7".parse().expect("ask_qty"),
        };
        assert_eq!(response, expected);
    }

    #[tokio::test]
    async fn test_klines_snapshot_routes_to_kline_stream_shape() {
        let server = MockServer::start().await;
        let mock_response = r#"[
            [1700000000000,"10.0","12.0","9.5","11.0","100.0",1700000059999,"1050.0",42,"60.0","630.0","0"]
        ]"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "ETHUSDT"))
            .and(query_param("interval", "1m"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let stream = StreamName::parse("ethusdt@kline_1m").expect("stream");
        let payload = client_for(&server)
            .fetch_snapshot(&stream)
            .await
            .expect("snapshot");

        assert_eq!(payload["e"], "kline");
        assert_eq!(payload["s"], "ETHUSDT");
        assert_eq!(payload["k"]["c"], "11.0");
        assert_eq!(payload["k"]["n"], 42);
    }

    #[tokio::test]
    async fn test_empty_trades_is_invalid_response() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/trades"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
            .mount(&server)
            .await;

        let stream = StreamName::parse("btcusdt@trade").expect("stream");
        let err = client_for(&server)
            .fetch_snapshot(&stream)
            .await
            .expect_err("empty trades");
        assert!(matches!(err, MarketwireError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_exchange_error_body_maps_to_api_error() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"code":-1121,"msg":"Invalid symbol."}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .depth("NOPE", 5)
            .await
            .expect_err("invalid symbol");
        match err {
            MarketwireError::Api { code, message } => {
                assert_eq!(code, -1121);
                assert_eq!(message, "Invalid symbol.");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }
}
