//! Trade desk: risk-gated entries and exit routing for one instrument

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::order_manager::{OrderManager, ProtocolReport};
use crate::execution::tp_sl::{ExitAction, ExitReason, ManagedPosition, TpSlManager};
use crate::execution::trade_record::{ExecutionSummary, TradeRecord, TradeSink};
use crate::models::{MicroSnapshot, Signal};
use crate::risk::{RiskCheck, RiskManager};
use crate::veto::VetoResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryOutcome {
    Opened(ManagedPosition),
    Vetoed(VetoResult),
    RiskRejected(RiskCheck),
    NotFilled(ProtocolReport),
}

struct OpenTrade {
    signal: Signal,
    execution: ExecutionSummary,
}

pub struct TradeDesk {
    risk: RiskManager,
    orders: OrderManager,
    tp_sl: TpSlManager,
    sink: Arc<dyn TradeSink>,
    open: HashMap<Uuid, OpenTrade>,
    cancel: CancellationToken,
}

impl TradeDesk {
    pub fn new(risk: RiskManager, orders: OrderManager, tp_sl: TpSlManager, sink: Arc<dyn TradeSink>) -> Self {
        Self {
            risk,
            orders,
            tp_sl,
            sink,
            open: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts any running order protocol
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn has_open_position(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn open_position(&self) -> Option<&ManagedPosition> {
        self.open.keys().next().and_then(|id| self.tp_sl.get_position(*id))
    }

    /// Veto, size and enter a signal; the fill becomes a managed position
    pub async fn place_and_manage(
        &mut self,
        signal: &Signal,
        snapshot: &MicroSnapshot,
        vetoes: &VetoResult,
        leverage: f64,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome> {
        if self.has_open_position() {
            return Err(Error::InvalidState("a position is already open".to_string()));
        }
        if vetoes.any_veto {
            tracing::warn!(reasons = %vetoes.summary(), "entry blocked by veto");
            return Ok(EntryOutcome::Vetoed(vetoes.clone()));
        }

        let check = self
            .risk
            .check_entry_risk(signal.entry, signal.stop_loss, signal.side, signal.tier, leverage);
        if !check.entry_allowed {
            return Ok(EntryOutcome::RiskRejected(check));
        }

        let report = self
            .orders
            .place_and_manage(signal.side, check.quantity, snapshot, false, false, &self.cancel)
            .await;
        if report.filled_quantity <= 0.0 {
            tracing::warn!(outcome = ?report.outcome, "entry not filled");
            return Ok(EntryOutcome::NotFilled(report));
        }

        let fill_price = report.average_price.unwrap_or(signal.entry);
        let id = self.tp_sl.open_position(signal, fill_price, report.filled_quantity, now);
        let execution = ExecutionSummary {
            entry_price: fill_price,
            quantity: report.filled_quantity,
            leverage,
            position_size_usd: fill_price * report.filled_quantity,
            risk_usd: check.risk_usd,
            liq_price: check.liq_price,
            slip_attempts: report.attempts,
            total_slip_pct: report.total_slip_pct,
            order_ids: report.order_ids.clone(),
            filled_at: now,
        };
        self.open.insert(
            id,
            OpenTrade {
                signal: signal.clone(),
                execution,
            },
        );

        let position = self
            .tp_sl
            .get_position(id)
            .cloned()
            .ok_or(Error::PositionNotFound(id))?;
        Ok(EntryOutcome::Opened(position))
    }

    /// Run exits due at `price`; returns records of positions that went flat
    pub async fn manage(
        &mut self,
        price: f64,
        snapshot: &MicroSnapshot,
        reversal: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>> {
        let ids: Vec<Uuid> = self.open.keys().copied().collect();
        let mut closed = Vec::new();

        for id in ids {
            let actions = self.tp_sl.on_price(id, price, now)?;
            if let Some(record) = self.execute_exits(id, actions, price, snapshot, now).await? {
                closed.push(record);
                continue;
            }
            // Reversal flags are consumed upstream; apply them even on a ladder tick
            if let Some(action) = self.tp_sl.check_early_reduce(id, reversal, price)? {
                if let Some(record) = self.execute_exits(id, vec![action], price, snapshot, now).await? {
                    closed.push(record);
                }
            }
        }
        Ok(closed)
    }

    /// Close every open position with urgent exits
    pub async fn flatten(&mut self, price: f64, snapshot: &MicroSnapshot, now: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let ids: Vec<Uuid> = self.open.keys().copied().collect();
        let mut closed = Vec::new();
        for id in ids {
            let Some(position) = self.tp_sl.get_position(id) else {
                continue;
            };
            let action = ExitAction {
                position_id: id,
                reason: ExitReason::Manual,
                quantity: position.remaining_quantity,
                trigger_price: price,
                closes_position: true,
            };
            if let Some(record) = self.execute_exits(id, vec![action], price, snapshot, now).await? {
                closed.push(record);
            }
        }
        Ok(closed)
    }

    async fn execute_exits(
        &mut self,
        id: Uuid,
        actions: Vec<ExitAction>,
        price: f64,
        snapshot: &MicroSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<TradeRecord>> {
        for action in actions {
            let position = self.tp_sl.get_position(id).ok_or(Error::PositionNotFound(id))?;
            let leverage = self.open.get(&id).map(|t| t.execution.leverage).unwrap_or(1.0);
            let ongoing = self.risk.check_ongoing_risk(
                price,
                position.entry_price,
                position.current_stop,
                position.side,
                leverage,
            );
            let urgent = action.reason.is_urgent() || action.reason == ExitReason::Manual || ongoing.near_stop;
            let exit_side = position.side.opposite();

            let report = self
                .orders
                .place_and_manage(exit_side, action.quantity, snapshot, true, urgent, &self.cancel)
                .await;
            if report.filled_quantity <= 0.0 {
                tracing::warn!(%id, reason = ?action.reason, outcome = ?report.outcome, "exit not filled");
                return Ok(None);
            }

            let fill_price = report.average_price.unwrap_or(action.trigger_price);
            let flat = self
                .tp_sl
                .record_exit(id, action.reason, report.filled_quantity, fill_price, now)?;
            if flat {
                return Ok(self.finish(id));
            }
        }
        Ok(None)
    }

    fn finish(&mut self, id: Uuid) -> Option<TradeRecord> {
        let trade = self.open.remove(&id)?;
        let position = self.tp_sl.take_closed(id)?;
        let record = TradeRecord::from_position(&trade.signal, trade.execution, &position)?;

        tracing::info!(
            %id,
            pnl = record.performance.realized_pnl,
            r_multiple = record.performance.r_multiple,
            reason = ?record.exit.reason,
            "trade closed"
        );
        if let Err(err) = self.sink.record(&record) {
            tracing::error!(%id, %err, "trade sink rejected record");
        }
        Some(record)
    }
}
