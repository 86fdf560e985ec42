//! Exit management for open positions
//!
//! Three-tier take-profit ladder, breakeven-then-trail stop, regime time stop
//! and the early-reduce protocol on reversal signals. Checks return
//! `ExitAction`s; state only changes when a fill is recorded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Side, Signal};
use crate::regime::RegimeParams;

const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TpSlConfig {
    pub tp1_pct: f64,
    pub tp2_pct: f64,
    pub tp3_pct: f64,
    pub trail_atr_mult: f64, // × ATR(5m)
    pub early_reduce_pct: f64,
}

impl Default for TpSlConfig {
    fn default() -> Self {
        Self {
            tp1_pct: 0.50,
            tp2_pct: 0.30,
            tp3_pct: 0.20,
            trail_atr_mult: 0.5,
            early_reduce_pct: 0.50,
        }
    }
}

impl TpSlConfig {
    pub fn validate(&self) -> Result<()> {
        let sum = self.tp1_pct + self.tp2_pct + self.tp3_pct;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(Error::Config(format!("TP percentages sum to {sum}, expected 1.0")));
        }
        if !(0.0..1.0).contains(&self.early_reduce_pct) {
            return Err(Error::Config("early_reduce_pct must be in [0, 1)".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpSlLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub risk: f64, // R
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub tp1_pct: f64,
    pub tp2_pct: f64,
    pub tp3_pct: f64,
    pub trail_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingStatus {
    Inactive,
    Breakeven,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Tp1,
    Tp2,
    Tp3,
    StopLoss,
    TrailingStop,
    TimeStop,
    EarlyReduce,
    ReversalExit,
    Manual,
}

impl ExitReason {
    /// Exits that must complete even at the cost of crossing the spread
    pub fn is_urgent(&self) -> bool {
        matches!(
            self,
            ExitReason::StopLoss | ExitReason::TrailingStop | ExitReason::TimeStop | ExitReason::ReversalExit
        )
    }
}

/// Requested reduction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitAction {
    pub position_id: Uuid,
    pub reason: ExitReason,
    pub quantity: f64,
    pub trigger_price: f64,
    pub closes_position: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitFill {
    pub reason: ExitReason,
    pub quantity: f64,
    pub price: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub id: Uuid,
    pub side: Side,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    pub levels: TpSlLevels,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub tp3_hit: bool,
    pub original_quantity: f64,
    pub remaining_quantity: f64,
    pub trailing_status: TrailingStatus,
    pub favourable_extreme: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub max_hold_hours: i64,
    pub early_reduce_triggered: bool,
    pub closed: bool,
    pub realized_pnl: f64,
    pub exits: Vec<ExitFill>,
}

impl ManagedPosition {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.side.sign() * self.remaining_quantity
    }

    pub fn hold_time(&self, now: DateTime<Utc>) -> Duration {
        now - self.entry_time
    }

    /// Volume-weighted exit price across all fills
    pub fn average_exit_price(&self) -> Option<f64> {
        let qty: f64 = self.exits.iter().map(|e| e.quantity).sum();
        if qty <= 0.0 {
            return None;
        }
        Some(self.exits.iter().map(|e| e.quantity * e.price).sum::<f64>() / qty)
    }

    fn stop_breached(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price <= self.current_stop,
            Side::Short => price >= self.current_stop,
        }
    }

    /// True when `candidate` is a tighter stop than the current one
    fn tightens(&self, candidate: f64) -> bool {
        match self.side {
            Side::Long => candidate > self.current_stop,
            Side::Short => candidate < self.current_stop,
        }
    }
}

pub struct TpSlManager {
    config: TpSlConfig,
    positions: HashMap<Uuid, ManagedPosition>,
}

impl Default for TpSlManager {
    fn default() -> Self {
        Self::new(TpSlConfig::default())
    }
}

impl TpSlManager {
    pub fn new(config: TpSlConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TpSlConfig {
        &self.config
    }

    pub fn calculate_levels(
        &self,
        entry: f64,
        stop: f64,
        side: Side,
        params: &RegimeParams,
        atr: f64,
    ) -> TpSlLevels {
        let risk = (entry - stop).abs();
        let sign = side.sign();
        TpSlLevels {
            entry,
            stop_loss: stop,
            risk,
            tp1: entry + sign * params.tp1_r * risk,
            tp2: entry + sign * params.tp2_r * risk,
            tp3: entry + sign * params.tp3_r * risk,
            tp1_pct: self.config.tp1_pct,
            tp2_pct: self.config.tp2_pct,
            tp3_pct: self.config.tp3_pct,
            trail_distance: self.config.trail_atr_mult * atr,
        }
    }

    /// Track a filled entry; levels are rebuilt around the actual fill price
    pub fn open_position(&mut self, signal: &Signal, fill_price: f64, quantity: f64, now: DateTime<Utc>) -> Uuid {
        let params = signal.regime.params();
        let levels = self.calculate_levels(fill_price, signal.stop_loss, signal.side, &params, signal.atr);
        let position = ManagedPosition {
            id: Uuid::new_v4(),
            side: signal.side,
            entry_price: fill_price,
            initial_stop: signal.stop_loss,
            current_stop: signal.stop_loss,
            levels,
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            original_quantity: quantity,
            remaining_quantity: quantity,
            trailing_status: TrailingStatus::Inactive,
            favourable_extreme: None,
            entry_time: now,
            max_hold_hours: params.max_hold_hours,
            early_reduce_triggered: false,
            closed: false,
            realized_pnl: 0.0,
            exits: Vec::new(),
        };

        tracing::info!(
            id = %position.id,
            side = %position.side,
            entry = fill_price,
            stop = position.current_stop,
            tp1 = levels.tp1,
            tp2 = levels.tp2,
            tp3 = levels.tp3,
            quantity,
            "position opened"
        );

        let id = position.id;
        self.positions.insert(id, position);
        id
    }

    pub fn get_position(&self, id: Uuid) -> Option<&ManagedPosition> {
        self.positions.get(&id)
    }

    fn position_mut(&mut self, id: Uuid) -> Result<&mut ManagedPosition> {
        self.positions.get_mut(&id).ok_or(Error::PositionNotFound(id))
    }

    fn open_ref(&self, id: Uuid) -> Result<&ManagedPosition> {
        let position = self.positions.get(&id).ok_or(Error::PositionNotFound(id))?;
        if position.closed {
            return Err(Error::InvalidState(format!("position {id} already closed")));
        }
        Ok(position)
    }

    pub fn open_positions(&self) -> Vec<&ManagedPosition> {
        self.positions.values().filter(|p| !p.closed).collect()
    }

    /// TP levels crossed at `price` that have not been taken yet
    pub fn check_tp_hits(&self, id: Uuid, price: f64) -> Result<Vec<ExitAction>> {
        let position = self.open_ref(id)?;
        let levels = &position.levels;
        let reached = |level: f64| match position.side {
            Side::Long => price >= level,
            Side::Short => price <= level,
        };

        let mut actions = Vec::new();
        let mut remaining = position.remaining_quantity;
        let ladder = [
            (ExitReason::Tp1, position.tp1_hit, levels.tp1, levels.tp1_pct),
            (ExitReason::Tp2, position.tp2_hit, levels.tp2, levels.tp2_pct),
            (ExitReason::Tp3, position.tp3_hit, levels.tp3, levels.tp3_pct),
        ];
        for (reason, hit, level, pct) in ladder {
            if hit || !reached(level) || remaining <= QTY_EPSILON {
                continue;
            }
            let quantity = if reason == ExitReason::Tp3 {
                remaining
            } else {
                (position.original_quantity * pct).min(remaining)
            };
            remaining -= quantity;
            actions.push(ExitAction {
                position_id: id,
                reason,
                quantity,
                trigger_price: level,
                closes_position: remaining <= QTY_EPSILON,
            });
        }
        Ok(actions)
    }

    /// Move the stop after TP1: breakeven first, then trail the favourable
    /// extreme. Returns the new stop when it moved.
    pub fn update_trailing_stop(&mut self, id: Uuid, price: f64) -> Result<Option<f64>> {
        let position = self.position_mut(id)?;
        if position.closed || !position.tp1_hit {
            return Ok(None);
        }

        if position.trailing_status == TrailingStatus::Inactive {
            position.trailing_status = TrailingStatus::Breakeven;
            if position.tightens(position.entry_price) {
                position.current_stop = position.entry_price;
            }
            tracing::info!(id = %id, stop = position.current_stop, "trailing armed at breakeven");
            return Ok(Some(position.current_stop));
        }

        let extreme = match (position.side, position.favourable_extreme) {
            (Side::Long, Some(e)) => e.max(price),
            (Side::Short, Some(e)) => e.min(price),
            (_, None) => price,
        };
        position.favourable_extreme = Some(extreme);

        let candidate = match position.side {
            Side::Long => extreme - position.levels.trail_distance,
            Side::Short => extreme + position.levels.trail_distance,
        };
        if position.tightens(candidate) {
            position.current_stop = candidate;
            position.trailing_status = TrailingStatus::Active;
            tracing::debug!(id = %id, stop = candidate, extreme, "trailing stop tightened");
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    pub fn check_stop(&self, id: Uuid, price: f64) -> Result<Option<ExitAction>> {
        let position = self.open_ref(id)?;
        if !position.stop_breached(price) {
            return Ok(None);
        }
        let reason = if position.trailing_status == TrailingStatus::Inactive {
            ExitReason::StopLoss
        } else {
            ExitReason::TrailingStop
        };
        Ok(Some(ExitAction {
            position_id: id,
            reason,
            quantity: position.remaining_quantity,
            trigger_price: position.current_stop,
            closes_position: true,
        }))
    }

    pub fn check_time_stop(&self, id: Uuid, price: f64, now: DateTime<Utc>) -> Result<Option<ExitAction>> {
        let position = self.open_ref(id)?;
        if position.hold_time(now) < Duration::hours(position.max_hold_hours) {
            return Ok(None);
        }
        tracing::warn!(
            id = %id,
            hold_hours = position.hold_time(now).num_minutes() as f64 / 60.0,
            max_hold_hours = position.max_hold_hours,
            "time stop triggered"
        );
        Ok(Some(ExitAction {
            position_id: id,
            reason: ExitReason::TimeStop,
            quantity: position.remaining_quantity,
            trigger_price: price,
            closes_position: true,
        }))
    }

    /// First reversal cuts the position, the second one closes it
    pub fn check_early_reduce(&self, id: Uuid, reversal: bool, price: f64) -> Result<Option<ExitAction>> {
        let position = self.open_ref(id)?;
        if !reversal {
            return Ok(None);
        }
        if position.early_reduce_triggered {
            return Ok(Some(ExitAction {
                position_id: id,
                reason: ExitReason::ReversalExit,
                quantity: position.remaining_quantity,
                trigger_price: price,
                closes_position: true,
            }));
        }
        Ok(Some(ExitAction {
            position_id: id,
            reason: ExitReason::EarlyReduce,
            quantity: position.remaining_quantity * self.config.early_reduce_pct,
            trigger_price: price,
            closes_position: false,
        }))
    }

    /// All exits due at `price`; a stop breach supersedes everything else
    pub fn on_price(&mut self, id: Uuid, price: f64, now: DateTime<Utc>) -> Result<Vec<ExitAction>> {
        if let Some(stop) = self.check_stop(id, price)? {
            return Ok(vec![stop]);
        }
        let mut actions = self.check_tp_hits(id, price)?;
        if actions.iter().any(|a| a.closes_position) {
            return Ok(actions);
        }
        self.update_trailing_stop(id, price)?;
        if let Some(time_stop) = self.check_time_stop(id, price, now)? {
            let taken: f64 = actions.iter().map(|a| a.quantity).sum();
            actions.push(ExitAction {
                quantity: (time_stop.quantity - taken).max(0.0),
                ..time_stop
            });
        }
        Ok(actions)
    }

    /// Apply an executed exit; returns true once the position is flat
    pub fn record_exit(
        &mut self,
        id: Uuid,
        reason: ExitReason,
        quantity: f64,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let position = self.position_mut(id)?;
        if position.closed {
            return Err(Error::InvalidState(format!("position {id} already closed")));
        }

        let quantity = quantity.min(position.remaining_quantity);
        position.remaining_quantity -= quantity;
        position.realized_pnl += (price - position.entry_price) * position.side.sign() * quantity;
        position.exits.push(ExitFill {
            reason,
            quantity,
            price,
            at: now,
        });

        match reason {
            ExitReason::Tp1 => position.tp1_hit = true,
            ExitReason::Tp2 => position.tp2_hit = true,
            ExitReason::Tp3 => position.tp3_hit = true,
            ExitReason::EarlyReduce => {
                position.early_reduce_triggered = true;
                if position.tightens(position.entry_price) {
                    position.current_stop = position.entry_price;
                }
            }
            _ => {}
        }

        if position.remaining_quantity <= QTY_EPSILON {
            position.remaining_quantity = 0.0;
            position.closed = true;
        }

        tracing::info!(
            id = %id,
            ?reason,
            quantity,
            price,
            remaining = position.remaining_quantity,
            realized_pnl = position.realized_pnl,
            "exit recorded"
        );
        Ok(position.closed)
    }

    /// Flatten whatever remains at `price`
    pub fn close_position(
        &mut self,
        id: Uuid,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ManagedPosition> {
        let remaining = self.open_ref(id)?.remaining_quantity;
        self.record_exit(id, reason, remaining, price, now)?;
        self.positions
            .get(&id)
            .cloned()
            .ok_or(Error::PositionNotFound(id))
    }

    /// Drop a closed position from the book
    pub fn take_closed(&mut self, id: Uuid) -> Option<ManagedPosition> {
        if self.positions.get(&id).is_some_and(|p| p.closed) {
            return self.positions.remove(&id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::regime::Regime;

    fn signal(side: Side, entry: f64, stop: f64, regime: Regime) -> Signal {
        let r = (entry - stop).abs();
        Signal {
            side,
            entry,
            stop_loss: stop,
            tp1: entry + side.sign() * r,
            tp2: entry + side.sign() * 2.0 * r,
            tp3: entry + side.sign() * 3.0 * r,
            trail_atr_mult: 0.5,
            atr: 1.0,
            tier: Tier::A,
            size_multiplier: 1.0,
            extremum_index: 10,
            confirm_index: 13,
            regime,
            confluence_score: 40.0,
            created_at: Utc::now(),
        }
    }

    fn long_position(mgr: &mut TpSlManager) -> Uuid {
        mgr.open_position(&signal(Side::Long, 100.0, 98.0, Regime::Normal), 100.0, 10.0, Utc::now())
    }

    #[test]
    fn test_ladder_ordering_per_regime() {
        let mgr = TpSlManager::default();
        for regime in [Regime::Squeeze, Regime::Normal, Regime::Wide] {
            let params = regime.params();
            assert!(params.tp1_r < params.tp2_r && params.tp2_r < params.tp3_r);

            let long = mgr.calculate_levels(100.0, 98.0, Side::Long, &params, 1.0);
            assert!(long.tp1 < long.tp2 && long.tp2 < long.tp3);
            assert!((long.tp1_pct + long.tp2_pct + long.tp3_pct - 1.0).abs() < 1e-12);

            let short = mgr.calculate_levels(100.0, 102.0, Side::Short, &params, 1.0);
            assert!(short.tp1 > short.tp2 && short.tp2 > short.tp3);
        }

        let squeeze = mgr.calculate_levels(100.0, 98.0, Side::Long, &Regime::Squeeze.params(), 1.0);
        assert_eq!(squeeze.tp2, 105.0);
        assert_eq!(squeeze.tp3, 108.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(TpSlConfig::default().validate().is_ok());
        let bad = TpSlConfig {
            tp3_pct: 0.3,
            ..TpSlConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_tp1_then_breakeven() {
        let mut mgr = TpSlManager::default();
        let id = long_position(&mut mgr);

        let actions = mgr.on_price(id, 102.1, Utc::now()).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].reason, ExitReason::Tp1);
        assert_eq!(actions[0].quantity, 5.0);

        mgr.record_exit(id, ExitReason::Tp1, 5.0, 102.0, Utc::now()).unwrap();
        let moved = mgr.update_trailing_stop(id, 102.1).unwrap();
        assert_eq!(moved, Some(100.0));

        let position = mgr.get_position(id).unwrap();
        assert_eq!(position.trailing_status, TrailingStatus::Breakeven);
        assert_eq!(position.remaining_quantity, 5.0);
        assert!((position.realized_pnl - 10.0).abs() < 1e-9);

        // TP1 is not offered twice
        assert!(mgr.check_tp_hits(id, 102.5).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_stop_monotonic() {
        let mut mgr = TpSlManager::default();
        let id = long_position(&mut mgr);
        mgr.record_exit(id, ExitReason::Tp1, 5.0, 102.0, Utc::now()).unwrap();
        mgr.update_trailing_stop(id, 102.0).unwrap();

        let mut last_stop = mgr.get_position(id).unwrap().current_stop;
        for price in [102.0, 102.5, 102.5, 103.0, 103.8, 104.0] {
            mgr.update_trailing_stop(id, price).unwrap();
            let stop = mgr.get_position(id).unwrap().current_stop;
            assert!(stop >= last_stop);
            last_stop = stop;
        }
        assert!((last_stop - 103.5).abs() < 1e-9);

        // Pullback does not loosen the stop
        mgr.update_trailing_stop(id, 103.6).unwrap();
        assert_eq!(mgr.get_position(id).unwrap().current_stop, last_stop);
        assert_eq!(mgr.get_position(id).unwrap().trailing_status, TrailingStatus::Active);
    }

    #[test]
    fn test_short_trailing_tightens_downward() {
        let mut mgr = TpSlManager::default();
        let id = mgr.open_position(&signal(Side::Short, 100.0, 102.0, Regime::Normal), 100.0, 4.0, Utc::now());
        mgr.record_exit(id, ExitReason::Tp1, 2.0, 98.0, Utc::now()).unwrap();
        mgr.update_trailing_stop(id, 98.0).unwrap();
        assert_eq!(mgr.get_position(id).unwrap().current_stop, 100.0);

        mgr.update_trailing_stop(id, 97.0).unwrap();
        assert!((mgr.get_position(id).unwrap().current_stop - 97.5).abs() < 1e-9);
        mgr.update_trailing_stop(id, 98.5).unwrap();
        assert!((mgr.get_position(id).unwrap().current_stop - 97.5).abs() < 1e-9);

        let stop = mgr.check_stop(id, 97.6).unwrap().unwrap();
        assert_eq!(stop.reason, ExitReason::TrailingStop);
        assert_eq!(stop.quantity, 2.0);
    }

    #[test]
    fn test_initial_stop_hit() {
        let mut mgr = TpSlManager::default();
        let id = long_position(&mut mgr);
        let actions = mgr.on_price(id, 97.9, Utc::now()).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].reason, ExitReason::StopLoss);
        assert!(actions[0].closes_position);

        let closed = mgr.close_position(id, 97.9, ExitReason::StopLoss, Utc::now()).unwrap();
        assert!(closed.closed);
        assert!(closed.realized_pnl < 0.0);
        assert!(mgr.on_price(id, 97.0, Utc::now()).is_err());
        assert!(mgr.take_closed(id).is_some());
    }

    #[test]
    fn test_gap_through_all_targets_closes() {
        let mut mgr = TpSlManager::default();
        let id = long_position(&mut mgr);
        let actions = mgr.on_price(id, 107.0, Utc::now()).unwrap();
        let reasons: Vec<_> = actions.iter().map(|a| a.reason).collect();
        assert_eq!(reasons, vec![ExitReason::Tp1, ExitReason::Tp2, ExitReason::Tp3]);
        let total: f64 = actions.iter().map(|a| a.quantity).sum();
        assert!((total - 10.0).abs() < 1e-9);
        assert!(actions[2].closes_position);
    }

    #[test]
    fn test_time_stop_by_regime() {
        let mut mgr = TpSlManager::default();
        let opened = Utc::now() - Duration::hours(13);
        let squeeze = mgr.open_position(&signal(Side::Long, 100.0, 98.0, Regime::Squeeze), 100.0, 1.0, opened);
        let normal = mgr.open_position(&signal(Side::Long, 100.0, 98.0, Regime::Normal), 100.0, 1.0, opened);

        let now = Utc::now();
        assert!(mgr.check_time_stop(squeeze, 100.5, now).unwrap().is_some());
        assert!(mgr.check_time_stop(normal, 100.5, now).unwrap().is_none());
        assert!(mgr.check_time_stop(normal, 100.5, now + Duration::hours(11)).unwrap().is_some());
    }

    #[test]
    fn test_early_reduce_then_exit() {
        let mut mgr = TpSlManager::default();
        let id = long_position(&mut mgr);
        assert!(mgr.check_early_reduce(id, false, 101.0).unwrap().is_none());

        let first = mgr.check_early_reduce(id, true, 101.0).unwrap().unwrap();
        assert_eq!(first.reason, ExitReason::EarlyReduce);
        assert_eq!(first.quantity, 5.0);
        mgr.record_exit(id, first.reason, first.quantity, 101.0, Utc::now()).unwrap();

        let position = mgr.get_position(id).unwrap();
        assert!(position.early_reduce_triggered);
        assert_eq!(position.current_stop, 100.0);

        let second = mgr.check_early_reduce(id, true, 100.8).unwrap().unwrap();
        assert_eq!(second.reason, ExitReason::ReversalExit);
        assert_eq!(second.quantity, 5.0);
        let flat = mgr.record_exit(id, second.reason, second.quantity, 100.8, Utc::now()).unwrap();
        assert!(flat);
        assert!(mgr.open_positions().is_empty());
    }
}
