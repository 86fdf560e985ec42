use chrono::{DateTime, Duration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::models::{Candle, MicroSnapshot, Timeframe};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MarketScenario {
    /// Oscillating swings (~6h period) with volume spikes at the turns
    Swings,
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Sideways/choppy market (±1% around mean)
    Sideways,
    /// High volatility (±2% per bar)
    Volatile,
}

/// Generates synthetic price data for replays
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    swing_period: usize,   // Bars per full swing cycle
    swing_amplitude: f64,  // Fraction of base price
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 10_000.0,
            swing_period: 72,
            swing_amplitude: 0.03,
        }
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate candles ending at the most recent day boundary
    pub fn generate(&mut self, scenario: MarketScenario, num_candles: usize, interval_minutes: i64) -> Vec<Candle> {
        let end = day_start(Utc::now());
        let start = end - Duration::minutes(num_candles as i64 * interval_minutes);
        self.generate_from(scenario, start, num_candles, interval_minutes)
    }

    pub fn generate_from(
        &mut self,
        scenario: MarketScenario,
        start_time: DateTime<Utc>,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut current_price = self.base_price;
        let daily_bars = 24.0 * 60.0 / interval_minutes as f64;

        for i in 0..num_candles {
            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);
            let previous = current_price;

            let mut volume_boost = 1.0;
            current_price = match scenario {
                MarketScenario::Swings => {
                    let phase = 2.0 * PI * i as f64 / self.swing_period as f64;
                    let noise = self.rng.gen_range(-0.001..0.001);
                    volume_boost += 2.5 * (-(phase.cos() * 4.0).powi(2)).exp();
                    self.base_price * (1.0 + self.swing_amplitude * phase.sin() + noise)
                }
                MarketScenario::Uptrend => {
                    let drift = current_price * 0.02 / daily_bars;
                    current_price + drift + current_price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Downtrend => {
                    let drift = current_price * -0.02 / daily_bars;
                    current_price + drift + current_price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - current_price) * 0.1;
                    current_price + reversion + current_price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    let next = current_price * (1.0 + self.rng.gen_range(-0.02..0.02));
                    next.max(self.base_price * 0.5)
                }
            };

            candles.push(self.create_candle(previous, current_price, timestamp, volume_boost));
        }

        candles
    }

    /// `count` bars of `timeframe` ending just before `end`, closing at `end_price`
    pub fn history(&mut self, timeframe: Timeframe, count: usize, end: DateTime<Utc>, end_price: f64, drift: f64) -> Vec<Candle> {
        let step = timeframe.duration();
        let start = end - step * count as i32;
        let mut candles = Vec::with_capacity(count);
        let mut price = self.base_price;

        for i in 0..count {
            let previous = price;
            price *= 1.0 + drift + self.rng.gen_range(-0.004..0.004);
            candles.push(self.create_candle(previous, price, start + step * i as i32, 1.0));
        }

        // Rescale so the series joins the replay at its first price
        let scale = match candles.last() {
            Some(last) if last.close > 0.0 => end_price / last.close,
            _ => 1.0,
        };
        for candle in &mut candles {
            candle.open *= scale;
            candle.high *= scale;
            candle.low *= scale;
            candle.close *= scale;
        }
        candles
    }

    /// Break a bar spanning `span` into `parts` sub-bars that trace open → extremes → close
    pub fn split(&mut self, candle: &Candle, span: Duration, parts: usize) -> Vec<Candle> {
        if parts == 0 {
            return Vec::new();
        }
        let (first, second) = if candle.close >= candle.open {
            (candle.low, candle.high)
        } else {
            (candle.high, candle.low)
        };
        let waypoints = [candle.open, first, second, candle.close];
        let path: Vec<f64> = (0..=parts)
            .map(|k| {
                let pos = k as f64 / parts as f64 * 3.0;
                let seg = (pos.floor() as usize).min(2);
                let frac = pos - seg as f64;
                waypoints[seg] + (waypoints[seg + 1] - waypoints[seg]) * frac
            })
            .collect();

        let step = Duration::milliseconds((span.num_milliseconds() / parts as i64).max(1));
        (0..parts)
            .map(|k| {
                let (open, close) = (path[k], path[k + 1]);
                Candle {
                    timestamp: candle.timestamp + step * k as i32,
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: candle.volume / parts as f64 * self.rng.gen_range(0.5..1.5),
                }
            })
            .collect()
    }

    /// Book snapshot consistent with a bar: depth leans in the bar's direction
    pub fn snapshot(&mut self, candle: &Candle, at: DateTime<Utc>) -> MicroSnapshot {
        let spread_bps = self.rng.gen_range(1.0..6.0);
        let half = candle.close * spread_bps / 20_000.0;
        let lean = if candle.close >= candle.open { 1.35 } else { 1.0 / 1.35 };
        let bid_depth = 150_000.0 * self.rng.gen_range(0.9..1.1) * lean;
        let ask_depth = 150_000.0 * self.rng.gen_range(0.9..1.1);
        let signed_volume = if candle.close >= candle.open {
            candle.volume
        } else {
            -candle.volume
        };

        MicroSnapshot {
            timestamp: at,
            best_bid: candle.close - half,
            best_ask: candle.close + half,
            spread_bps,
            bid_depth,
            ask_depth,
            ladder_imbalance: (bid_depth - ask_depth) / (bid_depth + ask_depth),
            cvd: signed_volume,
            cvd_slope: signed_volume / 60.0,
            trade_volume: candle.volume,
            ok: true,
        }
    }

    /// Create realistic OHLC from the previous and current close
    fn create_candle(&mut self, open: f64, close: f64, timestamp: DateTime<Utc>, volume_boost: f64) -> Candle {
        let noise_pct = 0.003; // Intrabar excursion beyond the body
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let volume = self.base_volume * volume_boost * self.rng.gen_range(0.7..1.3);

        Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::days(1)).unwrap_or(at)
}

/// Opening time of the `timeframe` bucket containing `at`
pub fn bucket_start(at: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    at.duration_trunc(timeframe.duration()).unwrap_or(at)
}

/// Aggregate bars into a coarser timeframe, keeping a trailing partial bucket
pub fn resample(candles: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    for candle in candles {
        let bucket = bucket_start(candle.timestamp, timeframe);
        match out.last_mut() {
            Some(bar) if bar.timestamp == bucket => merge(bar, candle),
            _ => out.push(Candle {
                timestamp: bucket,
                ..*candle
            }),
        }
    }
    out
}

/// Fold a finer bar into a bucket bar that already holds earlier bars
pub fn merge(bar: &mut Candle, candle: &Candle) {
    bar.high = bar.high.max(candle.high);
    bar.low = bar.low.min(candle.low);
    bar.close = candle.close;
    bar.volume += candle.volume;
}
