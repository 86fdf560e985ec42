//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use swingbot::execution::{CandleStore, MicroStore};
use swingbot::{Candle, MicroSnapshot, StateMachine, Timeframe};

pub const SWING_BAR: usize = 60;
pub const CONFIRM_BAR: usize = 63;
pub const WINDOW_LEN: usize = 76;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()
}

/// Cycle time: the close of the last 5m bar in the window
pub fn now() -> DateTime<Utc> {
    start() + Duration::minutes(5 * WINDOW_LEN as i64)
}

fn bar(ts: DateTime<Utc>, close: f64, half_range: f64, volume: f64) -> Candle {
    Candle {
        timestamp: ts,
        open: close,
        high: close + half_range,
        low: close - half_range,
        close,
        volume,
    }
}

/// 5m window: choppy base, selloff into a volume-spike low at bar 60, two
/// quiet bars, a breakout on heavy volume at bar 63, then a steady grind up
pub fn swing_window() -> Vec<Candle> {
    let at = |k: usize| start() + Duration::minutes(5 * k as i64);
    let mut candles = Vec::with_capacity(WINDOW_LEN);

    for k in 0..48 {
        let close = if k % 2 == 0 { 100.4 } else { 99.6 };
        candles.push(bar(at(k), close, 0.6, 1000.0 + (k % 3) as f64 * 100.0));
    }
    for k in 48..60 {
        candles.push(bar(at(k), 100.0 - 0.25 * (k - 47) as f64, 0.6, 1100.0));
    }
    candles.push(Candle {
        timestamp: at(60),
        open: 96.9,
        high: 97.35,
        low: 96.0,
        close: 97.1,
        volume: 2500.0,
    });
    for k in 61..63 {
        candles.push(bar(at(k), 97.2 + 0.1 * (k - 60) as f64, 0.4, 900.0));
    }
    candles.push(Candle {
        timestamp: at(63),
        open: 97.6,
        high: 98.7,
        low: 97.5,
        close: 98.5,
        volume: 3000.0,
    });
    for k in 64..WINDOW_LEN {
        candles.push(bar(at(k), 98.5 + 0.15 * (k - 63) as f64, 0.4, 1000.0));
    }
    candles
}

/// Straight trend ending just before `end`
pub fn trend(n: usize, step: f64, spacing: Duration, end: DateTime<Utc>) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + step * i as f64;
            Candle {
                timestamp: end - spacing * (n - i) as i32,
                open: close - step / 2.0,
                high: close.max(close - step) + 0.2,
                low: close.min(close - step) - 0.2,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// 1m bars: gentle rise, then a wide-range surge on `surge`x volume
pub fn impulse_1m(end: DateTime<Utc>, surge: f64) -> Vec<Candle> {
    let first = end - Duration::minutes(61);
    let mut candles: Vec<Candle> = (0..60)
        .map(|i| {
            let close = 100.0 + 0.05 * i as f64;
            Candle {
                timestamp: first + Duration::minutes(i as i64),
                open: close - 0.05,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 1000.0,
            }
        })
        .collect();
    candles.push(Candle {
        timestamp: first + Duration::minutes(60),
        open: 103.0,
        high: 104.1,
        low: 102.9,
        close: 104.0,
        volume: 1000.0 * surge,
    });
    candles
}

/// Kline store with aligned uptrends on every context timeframe and an
/// A-grade 1m surge
pub fn bullish_store() -> CandleStore {
    bullish_store_with_surge(2.2)
}

pub fn bullish_store_with_surge(surge: f64) -> CandleStore {
    let store = CandleStore::new();
    let end = now();
    store
        .extend(Timeframe::M15, &trend(60, 0.5, Duration::minutes(15), end))
        .unwrap();
    store
        .extend(Timeframe::H1, &trend(60, 0.5, Duration::hours(1), end))
        .unwrap();
    store
        .extend(Timeframe::H4, &trend(60, 1.0, Duration::hours(4), end))
        .unwrap();
    store
        .extend(Timeframe::D1, &trend(60, 3.0, Duration::days(1), end))
        .unwrap();
    store.extend(Timeframe::M1, &impulse_1m(end, surge)).unwrap();
    store
}

/// Healthy book around `mid`: 8 bps spread, bids 1.5x asks
pub fn snapshot(at: DateTime<Utc>, mid: f64, imbalance: f64) -> MicroSnapshot {
    MicroSnapshot {
        timestamp: at,
        best_bid: mid - 0.04,
        best_ask: mid + 0.04,
        spread_bps: 8.0,
        bid_depth: 150_000.0,
        ask_depth: 100_000.0,
        ladder_imbalance: imbalance,
        cvd: 0.0,
        cvd_slope: 0.0,
        trade_volume: 0.0,
        ok: true,
    }
}

pub fn machine(store: &CandleStore, micro: &MicroStore) -> StateMachine {
    StateMachine::new(Arc::new(store.clone()), Arc::new(micro.clone()))
}
