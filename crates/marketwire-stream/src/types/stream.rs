/*
[INPUT]:  Raw stream names such as "btcusdt@trade" or "ethusdt@depth20@100ms"
[OUTPUT]: Validated StreamName values with symbol/kind split out
[POS]:    Data layer - logical stream identifiers
[UPDATE]: When supporting new stream kinds or kline intervals
*/

use std::fmt;
use std::str::FromStr;

use crate::http::{MarketwireError, Result};

const KLINE_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

const DEPTH_LEVELS: &[u16] = &[5, 10, 20];

/// Event family carried by a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Trade,
    AggTrade,
    Ticker,
    MiniTicker,
    BookTicker,
    Kline { interval: String },
    Depth { levels: Option<u16> },
}

impl StreamKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "trade" => Some(StreamKind::Trade),
            "aggTrade" => Some(StreamKind::AggTrade),
            "ticker" => Some(StreamKind::Ticker),
            "miniTicker" => Some(StreamKind::MiniTicker),
            "bookTicker" => Some(StreamKind::BookTicker),
            "depth" => Some(StreamKind::Depth { levels: None }),
            _ => {
                if let Some(interval) = token.strip_prefix("kline_") {
                    return KLINE_INTERVALS
                        .contains(&interval)
                        .then(|| StreamKind::Kline {
                            interval: interval.to_string(),
                        });
                }
                let levels = token.strip_prefix("depth")?.parse::<u16>().ok()?;
                DEPTH_LEVELS
                    .contains(&levels)
                    .then_some(StreamKind::Depth {
                        levels: Some(levels),
                    })
            }
        }
    }

    fn token(&self) -> String {
        match self {
            StreamKind::Trade => "trade".to_string(),
            StreamKind::AggTrade => "aggTrade".to_string(),
            StreamKind::Ticker => "ticker".to_string(),
            StreamKind::MiniTicker => "miniTicker".to_string(),
            StreamKind::BookTicker => "bookTicker".to_string(),
            StreamKind::Kline { interval } => format!("kline_{interval}"),
            StreamKind::Depth { levels: None } => "depth".to_string(),
            StreamKind::Depth {
                levels: Some(levels),
            } => format!("depth{levels}"),
        }
    }
}

/// A validated logical stream name in canonical `symbol@kind[@speed]` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName {
    canonical: String,
    symbol: String,
    kind: StreamKind,
    speed: Option<String>,
}

impl StreamName {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |reason: &str| MarketwireError::InvalidStream(format!("{raw}: {reason}"));

        let mut parts = raw.split('@');
        let symbol = parts.next().unwrap_or_default();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("symbol must be non-empty and alphanumeric"));
        }

        let kind_token = parts.next().ok_or_else(|| invalid("missing event type"))?;
        let kind = StreamKind::parse(kind_token).ok_or_else(|| invalid("unknown event type"))?;

        let speed = match parts.next() {
            None => None,
            Some(speed @ ("100ms" | "1000ms" | "1s")) => Some(speed.to_string()),
            Some(_) => return Err(invalid("unsupported update speed")),
        };
        if parts.next().is_some() {
            return Err(invalid("too many segments"));
        }

        let symbol = symbol.to_ascii_lowercase();
        let mut canonical = format!("{symbol}@{}", kind.token());
        if let Some(speed) = &speed {
            canonical.push('@');
            canonical.push_str(speed);
        }

        Ok(Self {
            canonical,
            symbol,
            kind,
            speed,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Lower-case symbol as used on the streaming endpoint.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Upper-case symbol as used on the REST endpoint.
    pub fn rest_symbol(&self) -> String {
        self.symbol.to_ascii_uppercase()
    }

    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    pub fn speed(&self) -> Option<&str> {
        self.speed.as_deref()
    }

    /// Routing key without the update-speed suffix.
    pub fn base_key(&self) -> String {
        format!("{}@{}", self.symbol, self.kind.token())
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for StreamName {
    type Err = MarketwireError;

    fn from_str(s: &str) -> Result<Self> {
        StreamName::parse(s)
    }
}
