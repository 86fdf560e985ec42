use crate::error::{Error, Result};
use crate::execution::feeds::KlineSource;
use crate::models::{Candle, Timeframe};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Thread-safe rolling candle windows, one per timeframe
///
/// Each timeframe has a single ingestion writer; the pipeline only reads.
#[derive(Clone, Default)]
pub struct CandleStore {
    data: Arc<RwLock<HashMap<Timeframe, VecDeque<Candle>>>>,
    history: Arc<RwLock<Option<Vec<Candle>>>>,
    capacity: Option<usize>, // Overrides the per-timeframe default
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `capacity` candles for every timeframe
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    fn capacity_for(&self, timeframe: Timeframe) -> usize {
        self.capacity.unwrap_or_else(|| timeframe.default_capacity())
    }

    /// Append a candle; a candle with the same timestamp as the newest one
    /// replaces it (in-progress bar update)
    pub fn push(&self, timeframe: Timeframe, candle: Candle) -> Result<()> {
        let capacity = self.capacity_for(timeframe);
        let mut data = self.data.write().map_err(|e| Error::Feed(e.to_string()))?;
        let window = data.entry(timeframe).or_default();

        match window.back() {
            Some(last) if last.timestamp == candle.timestamp => {
                if let Some(slot) = window.back_mut() {
                    *slot = candle;
                }
            }
            Some(last) if last.timestamp > candle.timestamp => {
                tracing::debug!(%timeframe, "dropping out-of-order candle");
            }
            _ => window.push_back(candle),
        }

        while window.len() > capacity {
            window.pop_front();
        }
        Ok(())
    }

    pub fn extend(&self, timeframe: Timeframe, candles: &[Candle]) -> Result<()> {
        for candle in candles {
            self.push(timeframe, *candle)?;
        }
        Ok(())
    }

    pub fn get_candles(&self, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let data = self.data.read().map_err(|e| Error::Feed(e.to_string()))?;
        Ok(data
            .get(&timeframe)
            .map(|window| window.iter().copied().collect())
            .unwrap_or_default())
    }

    /// The `n` most recent candles, oldest first
    pub fn get_recent(&self, timeframe: Timeframe, n: usize) -> Result<Vec<Candle>> {
        let data = self.data.read().map_err(|e| Error::Feed(e.to_string()))?;
        Ok(data
            .get(&timeframe)
            .map(|window| window.iter().skip(window.len().saturating_sub(n)).copied().collect())
            .unwrap_or_default())
    }

    pub fn candle_count(&self, timeframe: Timeframe) -> Result<usize> {
        let data = self.data.read().map_err(|e| Error::Feed(e.to_string()))?;
        Ok(data.get(&timeframe).map(|w| w.len()).unwrap_or(0))
    }

    pub fn load_history(&self, candles: Vec<Candle>) -> Result<()> {
        let mut history = self.history.write().map_err(|e| Error::Feed(e.to_string()))?;
        tracing::info!(bars = candles.len(), "historical primary series loaded");
        *history = Some(candles);
        Ok(())
    }

    pub fn clear(&self, timeframe: Timeframe) -> Result<()> {
        let mut data = self.data.write().map_err(|e| Error::Feed(e.to_string()))?;
        data.remove(&timeframe);
        Ok(())
    }

    pub fn clear_all(&self) -> Result<()> {
        self.data.write().map_err(|e| Error::Feed(e.to_string()))?.clear();
        *self.history.write().map_err(|e| Error::Feed(e.to_string()))? = None;
        Ok(())
    }
}

impl KlineSource for CandleStore {
    fn get_klines(&self, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        self.get_recent(timeframe, limit)
    }

    fn get_dataframe(&self) -> Result<Option<Vec<Candle>>> {
        let history = self.history.read().map_err(|e| Error::Feed(e.to_string()))?;
        Ok(history.clone())
    }
}
