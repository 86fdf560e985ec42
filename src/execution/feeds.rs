//! Read-side seams between ingestion and the decision pipeline

use crate::error::Result;
use crate::models::{Candle, MicroSnapshot, Timeframe};

/// Per-timeframe candle windows, oldest first
pub trait KlineSource: Send + Sync {
    fn get_klines(&self, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;

    /// Historical primary (5m) series loaded ahead of the live stream
    fn get_dataframe(&self) -> Result<Option<Vec<Candle>>> {
        Ok(None)
    }
}

pub trait SnapshotSource: Send + Sync {
    /// Latest microstructure snapshot, if any has been published
    fn get_snapshot(&self) -> Option<MicroSnapshot>;
}
