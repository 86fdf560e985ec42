use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::regime::Regime;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1.0 for longs, -1.0 for shorts
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Bar intervals the pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "5s")]
    S5,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::S1,
        Timeframe::S5,
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::S5 => "5s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::S1 => Duration::seconds(1),
            Timeframe::S5 => Duration::seconds(5),
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// Rolling buffer depth kept by the kline store
    pub fn default_capacity(&self) -> usize {
        match self {
            Timeframe::S1 => 3600,
            Timeframe::S5 => 720,
            Timeframe::M1 => 500,
            Timeframe::M5 => 500,
            Timeframe::M15 | Timeframe::H1 | Timeframe::H4 => 200,
            Timeframe::D1 => 90,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV bar, immutable once closed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest order book / trade flow reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroSnapshot {
    pub timestamp: DateTime<Utc>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_bps: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub ladder_imbalance: f64, // (bid - ask) / (bid + ask), in [-1, 1]
    pub cvd: f64,
    pub cvd_slope: f64,
    pub trade_volume: f64,
    pub ok: bool, // false when the feed flagged the book as unhealthy
}

impl MicroSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) <= max_age
    }

    pub fn mid(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }

    /// Bid/ask depth ratio; None when the ask side is empty
    pub fn depth_ratio(&self) -> Option<f64> {
        if self.ask_depth > 0.0 {
            Some(self.bid_depth / self.ask_depth)
        } else {
            None
        }
    }
}

/// A local extremum that may become a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub side: Side,
    pub extremum_price: f64, // low[i] for longs, high[i] for shorts
    pub bar_index: usize,
    pub bar_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub timeout_minutes: i64,
}

impl Candidate {
    pub const DEFAULT_TIMEOUT_MINUTES: i64 = 30;

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(self.timeout_minutes)
    }
}

/// Confluence quality class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    #[serde(rename = "SKIP")]
    Skip,
}

impl Tier {
    pub fn size_multiplier(&self) -> f64 {
        match self {
            Tier::A => 1.0,
            Tier::B => 0.5,
            Tier::Skip => 0.0,
        }
    }

    pub fn is_tradeable(&self) -> bool {
        !matches!(self, Tier::Skip)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::A => write!(f, "A"),
            Tier::B => write!(f, "B"),
            Tier::Skip => write!(f, "SKIP"),
        }
    }
}

/// Fully specified trade intent emitted by the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub trail_atr_mult: f64,
    pub atr: f64, // ATR(5m) at signal time, drives the trailing distance
    pub tier: Tier,
    pub size_multiplier: f64,
    pub extremum_index: usize,
    pub confirm_index: usize,
    pub regime: Regime,
    pub confluence_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Distance from entry to the initial stop
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }
}
