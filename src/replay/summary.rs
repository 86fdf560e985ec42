use serde::{Deserialize, Serialize};

use crate::execution::TradeRecord;
use crate::models::Signal;
use crate::state_machine::MachineStatus;

/// Outcome of one replay run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub bars: usize,
    pub signals: Vec<Signal>,
    pub trades: Vec<TradeRecord>,
    pub entries_rejected: usize, // Vetoed, risk-rejected or unfilled signals
    pub orders_submitted: usize,
    pub status: MachineStatus,
    pub metrics: ReplayMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_r_multiple: f64,
    pub profit_factor: f64, // Gross wins / gross losses
    pub max_drawdown: f64,  // Peak-to-trough of cumulative realized PnL
    pub avg_hold_minutes: f64,
}

impl ReplayMetrics {
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.performance.win).count();
        let gross_win: f64 = trades
            .iter()
            .map(|t| t.performance.realized_pnl)
            .filter(|p| *p > 0.0)
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .map(|t| t.performance.realized_pnl)
            .filter(|p| *p < 0.0)
            .map(f64::abs)
            .sum();

        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for trade in trades {
            equity += trade.performance.realized_pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }

        let n = total_trades as f64;
        Self {
            total_trades,
            winning_trades,
            losing_trades: total_trades - winning_trades,
            win_rate: winning_trades as f64 / n * 100.0,
            total_pnl: equity,
            avg_r_multiple: trades.iter().map(|t| t.performance.r_multiple).sum::<f64>() / n,
            profit_factor: if gross_loss > 0.0 {
                gross_win / gross_loss
            } else if gross_win > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
            max_drawdown,
            avg_hold_minutes: trades.iter().map(|t| t.performance.hold_minutes as f64).sum::<f64>() / n,
        }
    }
}
