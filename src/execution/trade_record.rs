//! Closed-trade records handed to an external logger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::tp_sl::{ExitFill, ExitReason, ManagedPosition, TrailingStatus};
use crate::models::{Signal, Tier};
use crate::regime::Regime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeContext {
    pub regime: Regime,
    pub tier: Tier,
    pub confluence_score: f64,
    pub size_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub position_size_usd: f64,
    pub risk_usd: f64,
    pub liq_price: f64,
    pub slip_attempts: usize,
    pub total_slip_pct: f64,
    pub order_ids: Vec<Uuid>,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpSlSummary {
    pub initial_stop: f64,
    pub final_stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub tp3_hit: bool,
    pub trailing_status: TrailingStatus,
    pub early_reduce_triggered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSummary {
    pub reason: ExitReason, // Reason of the fill that flattened the position
    pub exit_time: DateTime<Utc>,
    pub average_exit_price: f64,
    pub fills: Vec<ExitFill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub realized_pnl: f64,
    pub pnl_pct: f64,     // Of entry notional
    pub r_multiple: f64,  // Realized PnL over initial risk
    pub hold_minutes: i64,
    pub win: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub signal: Signal,
    pub context: TradeContext,
    pub execution: ExecutionSummary,
    pub tp_sl: TpSlSummary,
    pub exit: ExitSummary,
    pub performance: Performance,
}

impl TradeRecord {
    /// Assemble a record from a flat position; `None` while it is still open
    pub fn from_position(signal: &Signal, execution: ExecutionSummary, position: &ManagedPosition) -> Option<Self> {
        if !position.closed {
            return None;
        }
        let last = position.exits.last()?;

        let notional = position.entry_price * position.original_quantity;
        let initial_risk = (position.entry_price - position.initial_stop).abs() * position.original_quantity;

        Some(Self {
            id: position.id,
            signal: signal.clone(),
            context: TradeContext {
                regime: signal.regime,
                tier: signal.tier,
                confluence_score: signal.confluence_score,
                size_multiplier: signal.size_multiplier,
            },
            execution,
            tp_sl: TpSlSummary {
                initial_stop: position.initial_stop,
                final_stop: position.current_stop,
                tp1: position.levels.tp1,
                tp2: position.levels.tp2,
                tp3: position.levels.tp3,
                tp1_hit: position.tp1_hit,
                tp2_hit: position.tp2_hit,
                tp3_hit: position.tp3_hit,
                trailing_status: position.trailing_status,
                early_reduce_triggered: position.early_reduce_triggered,
            },
            exit: ExitSummary {
                reason: last.reason,
                exit_time: last.at,
                average_exit_price: position.average_exit_price().unwrap_or(last.price),
                fills: position.exits.clone(),
            },
            performance: Performance {
                realized_pnl: position.realized_pnl,
                pnl_pct: if notional > 0.0 {
                    position.realized_pnl / notional * 100.0
                } else {
                    0.0
                },
                r_multiple: if initial_risk > 0.0 {
                    position.realized_pnl / initial_risk
                } else {
                    0.0
                },
                hold_minutes: (last.at - position.entry_time).num_minutes(),
                win: position.realized_pnl > 0.0,
            },
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidState(format!("trade record encode: {e}")))
    }
}

/// Destination for closed trades
pub trait TradeSink: Send + Sync {
    fn record(&self, trade: &TradeRecord) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySink {
    trades: Mutex<Vec<TradeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl TradeSink for MemorySink {
    fn record(&self, trade: &TradeRecord) -> Result<()> {
        self.trades
            .lock()
            .map_err(|e| Error::InvalidState(e.to_string()))?
            .push(trade.clone());
        Ok(())
    }
}

/// Appends one JSON document per line
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TradeSink for JsonlSink {
    fn record(&self, trade: &TradeRecord) -> Result<()> {
        let line = trade.to_json()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::InvalidState(format!("open {}: {e}", self.path.display())))?;
        writeln!(file, "{line}").map_err(|e| Error::InvalidState(format!("write trade record: {e}")))
    }
}
