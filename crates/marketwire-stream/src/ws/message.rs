/*
[INPUT]:  Raw WebSocket text frames and outbound subscription changes
[OUTPUT]: Control messages and classified inbound frames with routing keys
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

const CONTROL_LOG_LIMIT: usize = 10;
const UNROUTABLE_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static CONTROL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNROUTABLE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMethod {
    Subscribe,
    Unsubscribe,
}

/// `{"method": "...", "params": [...], "id": n}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub method: ControlMethod,
    pub params: Vec<String>,
    pub id: u64,
}

impl ControlMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Combined-stream envelope naming its stream.
    Stream { stream: String, data: Value },
    /// Raw event payload keyed by `symbol@event` from its own fields.
    Derived { stream: String, data: Value },
    /// `{"result": null, "id": n}`
    Ack { id: u64 },
    /// `{"error": {"code": c, "msg": m}, "id": n}`
    ApiError {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    Unroutable(Value),
}

pub fn parse_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    Ok(classify(value))
}

fn classify(value: Value) -> InboundFrame {
    let Value::Object(mut map) = value else {
        return InboundFrame::Unroutable(value);
    };

    if let Some(Value::String(stream)) = map.get("stream")
        && map.contains_key("data")
    {
        let stream = stream.clone();
        let data = map.remove("data").unwrap_or(Value::Null);
        return InboundFrame::Stream { stream, data };
    }

    let request_id = map.get("id").and_then(Value::as_u64);
    if let Some(error) = map.get("error") {
        return InboundFrame::ApiError {
            id: request_id,
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        };
    }
    if let Some(id) = request_id
        && map.contains_key("result")
    {
        return InboundFrame::Ack { id };
    }

    match derive_stream_key(&map) {
        Some(stream) => InboundFrame::Derived {
            stream,
            data: Value::Object(map),
        },
        None => InboundFrame::Unroutable(Value::Object(map)),
    }
}

/// Canonical `symbol@eventtype` key for a raw event payload.
pub fn derive_stream_key(payload: &Map<String, Value>) -> Option<String> {
    let symbol = payload.get("s")?.as_str()?.to_ascii_lowercase();

    let suffix = match payload.get("e").and_then(Value::as_str) {
        Some("trade") => "trade".to_string(),
        Some("aggTrade") => "aggTrade".to_string(),
        Some("24hrTicker") => "ticker".to_string(),
        Some("24hrMiniTicker") => "miniTicker".to_string(),
        Some("depthUpdate") => "depth".to_string(),
        Some("kline") => {
            let interval = payload.get("k")?.get("i")?.as_str()?;
            format!("kline_{interval}")
        }
        Some(_) => return None,
        None if ["u", "b", "a"].iter().all(|key| payload.contains_key(*key)) => {
            "bookTicker".to_string()
        }
        None => return None,
    };

    Some(format!("{symbol}@{suffix}"))
}

pub(crate) fn log_control_sent(message: &ControlMessage) {
    let count = CONTROL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= CONTROL_LOG_LIMIT {
        return;
    }
    info!(
        sample_index = count + 1,
        sample_limit = CONTROL_LOG_LIMIT,
        method = ?message.method,
        streams = message.params.len(),
        request_id = message.id,
        "ws control message sent"
    );
}

pub(crate) fn log_unroutable_once(raw: &str) {
    let count = UNROUTABLE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNROUTABLE_LOG_LIMIT {
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = UNROUTABLE_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message unroutable"
        );
    }
}

pub(crate) fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn control_message_wire_format() {
        let message = ControlMessage {
            method: ControlMethod::Subscribe,
            params: vec!["btcusdt@trade".to_string()],
            id: 7,
        };
        let wire: Value = serde_json::from_str(&message.to_json()).unwrap();
        assert_eq!(
            wire,
            json!({"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 7})
        );
    }

    #[test]
    fn combined_envelope_is_unwrapped() {
        let frame = parse_frame(r#"{"stream":"btcusdt@depth@100ms","data":{"u":1}}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Stream {
                stream: "btcusdt@depth@100ms".to_string(),
                data: json!({"u": 1}),
            }
        );
    }

    #[rstest]
    #[case(json!({"e": "trade", "s": "BTCUSDT", "p": "1"}), "btcusdt@trade")]
    #[case(json!({"e": "aggTrade", "s": "ETHUSDT"}), "ethusdt@aggTrade")]
    #[case(json!({"e": "24hrTicker", "s": "BNBUSDT"}), "bnbusdt@ticker")]
    #[case(json!({"e": "24hrMiniTicker", "s": "BNBUSDT"}), "bnbusdt@miniTicker")]
    #[case(json!({"e": "depthUpdate", "s": "BTCUSDT"}), "btcusdt@depth")]
    #[case(json!({"e": "kline", "s": "BTCUSDT", "k": {"i": "5m"}}), "btcusdt@kline_5m")]
    #[case(json!({"u": 400900217, "s": "BNBUSDT", "b": "25.3", "B": "31.2", "a": "25.4", "A": "40.6"}), "bnbusdt@bookTicker")]
    fn raw_events_derive_keys(#[case] payload: Value, #[case] expected: &str) {
        match parse_frame(&payload.to_string()).unwrap() {
            InboundFrame::Derived { stream, .. } => assert_eq!(stream, expected),
            other => panic!("expected derived frame, got {other:?}"),
        }
    }

    #[test]
    fn control_replies_are_classified() {
        assert_eq!(
            parse_frame(r#"{"result":null,"id":3}"#).unwrap(),
            InboundFrame::Ack { id: 3 }
        );
        assert_eq!(
            parse_frame(r#"{"error":{"code":2,"msg":"Invalid request"},"id":4}"#).unwrap(),
            InboundFrame::ApiError {
                id: Some(4),
                code: 2,
                message: "Invalid request".to_string(),
            }
        );
    }

    #[test]
    fn unknown_shapes_are_unroutable() {
        assert!(matches!(
            parse_frame(r#"{"e":"outboundAccountPosition","s":"X"}"#).unwrap(),
            InboundFrame::Unroutable(_)
        ));
        assert!(matches!(parse_frame("[1,2,3]").unwrap(), InboundFrame::Unroutable(_)));
        assert!(parse_frame("{not json").is_err());
    }
}
