use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::confluence::{ConfluenceEngine, ConfluenceResult, FeatureSet, TriggerCheck};
use crate::error::{Error, Result};
use crate::execution::{KlineSource, SnapshotSource};
use crate::indicators::{value_at, IndicatorSet};
use crate::models::{Candidate, Candle, Side, Signal, Timeframe};
use crate::regime::{RegimeDetector, RegimeResult};
use crate::state_machine::transition::{transition, Counter, Effect, EntryPlan, Event, MachineState, Phase};
use crate::strategy::{micro_confirm, CandidateScanner, ConfirmationConfig, InvalidationCache};
use crate::veto::{MarketContext, VetoResult, VetoSystem};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub hold_until_closed: bool, // Stay in MANAGE until the position is reported closed
    pub detect_reversals: bool,
    pub kline_limit: usize,      // Bars fetched per timeframe for confluence
    pub sl_atr5_mult: f64,
    pub trail_atr_mult: f64,
    pub invalidation_ttl_minutes: i64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            hold_until_closed: true,
            detect_reversals: true,
            kline_limit: 200,
            sl_atr5_mult: 0.9,
            trail_atr_mult: 0.5,
            invalidation_ttl_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub candidates_detected: u64,
    pub candidates_expired: u64,
    pub micro_confirms: u64,
    pub micro_rejects: u64,
    pub executions: u64,
    pub vetoes: u64,
    pub resets: u64,
}

impl Counters {
    fn bump(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::CandidatesDetected => &mut self.candidates_detected,
            Counter::CandidatesExpired => &mut self.candidates_expired,
            Counter::MicroConfirms => &mut self.micro_confirms,
            Counter::MicroRejects => &mut self.micro_rejects,
            Counter::Executions => &mut self.executions,
            Counter::Vetoes => &mut self.vetoes,
            Counter::Resets => &mut self.resets,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub state: Phase,
    pub candidate: Option<Candidate>,
    pub candidate_age_secs: Option<i64>,
    pub candidate_expired: bool,
    pub counters: Counters,
    pub invalidated_count: usize,
}

/// Single-threaded driver for the swing pipeline
///
/// Each `run_cycle` performs exactly one step for the current state. Faults
/// inside a step are logged and reset the machine to SCAN.
pub struct StateMachine {
    config: MachineConfig,
    scanner: CandidateScanner,
    confirmation: ConfirmationConfig,
    regime: RegimeDetector,
    confluence: ConfluenceEngine,
    vetoes: VetoSystem,
    market: MarketContext,
    klines: Arc<dyn KlineSource>,
    snapshots: Arc<dyn SnapshotSource>,
    invalidated: InvalidationCache,
    state: MachineState,
    counters: Counters,
    pending_reversal: bool,
    last_confluence: Option<ConfluenceResult>,
    last_veto: Option<VetoResult>,
}

impl StateMachine {
    pub fn new(klines: Arc<dyn KlineSource>, snapshots: Arc<dyn SnapshotSource>) -> Self {
        let config = MachineConfig::default();
        Self {
            invalidated: InvalidationCache::new(chrono::Duration::minutes(config.invalidation_ttl_minutes)),
            config,
            scanner: CandidateScanner::default(),
            confirmation: ConfirmationConfig::default(),
            regime: RegimeDetector::default(),
            confluence: ConfluenceEngine::default(),
            vetoes: VetoSystem::default(),
            market: MarketContext::default(),
            klines,
            snapshots,
            state: MachineState::Scan,
            counters: Counters::default(),
            pending_reversal: false,
            last_confluence: None,
            last_veto: None,
        }
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.invalidated = InvalidationCache::new(chrono::Duration::minutes(config.invalidation_ttl_minutes));
        self.config = config;
        self
    }

    pub fn with_scanner(mut self, scanner: CandidateScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationConfig) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_regime(mut self, regime: RegimeDetector) -> Self {
        self.regime = regime;
        self
    }

    pub fn with_confluence(mut self, confluence: ConfluenceEngine) -> Self {
        self.confluence = confluence;
        self
    }

    pub fn with_vetoes(mut self, vetoes: VetoSystem) -> Self {
        self.vetoes = vetoes;
        self
    }

    /// Venue readings (funding, mark, ADL, liquidations) for the veto checks
    pub fn set_market_context(&mut self, market: MarketContext) {
        self.market = market;
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn last_confluence(&self) -> Option<&ConfluenceResult> {
        self.last_confluence.as_ref()
    }

    pub fn last_veto(&self) -> Option<&VetoResult> {
        self.last_veto.as_ref()
    }

    pub fn status(&self) -> MachineStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> MachineStatus {
        let candidate = self.state.candidate().cloned();
        MachineStatus {
            state: self.state.phase(),
            candidate_age_secs: candidate.as_ref().map(|c| (now - c.created_at).num_seconds()),
            candidate_expired: candidate.as_ref().is_some_and(|c| c.is_expired(now)),
            candidate,
            counters: self.counters.clone(),
            invalidated_count: self.invalidated.len(),
        }
    }

    pub fn run_cycle(&mut self, window: &[Candle]) -> Option<Signal> {
        self.run_cycle_at(window, Utc::now())
    }

    /// One state-machine step over the primary (5m) window
    pub fn run_cycle_at(&mut self, window: &[Candle], now: DateTime<Utc>) -> Option<Signal> {
        self.invalidated.prune(now);
        let event = match self.step(window, now) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(state = %self.state.phase(), %err, "step failed, resetting to SCAN");
                Event::Fault(err.to_string())
            }
        };
        self.apply(event, now)
    }

    /// The desk finished the position opened from the last signal
    pub fn on_position_closed(&mut self) {
        self.apply(Event::PositionClosed, Utc::now());
    }

    /// The last signal never became a position
    pub fn on_execution_failed(&mut self, vetoed: bool) {
        self.apply(Event::ExecutionFailed { vetoed }, Utc::now());
    }

    /// Consume a pending reversal flag raised while managing a position
    pub fn take_reversal(&mut self) -> bool {
        std::mem::take(&mut self.pending_reversal)
    }

    /// Drop the candidate and return to SCAN
    ///
    /// Ignored in MANAGE; call `on_position_closed` once the desk is flat.
    pub fn reset(&mut self) {
        self.apply(Event::Fault("manual reset".to_string()), Utc::now());
    }

    fn apply(&mut self, event: Event, now: DateTime<Utc>) -> Option<Signal> {
        let state = std::mem::replace(&mut self.state, MachineState::Scan);
        let from = state.phase();
        let (next, effects) = transition(state, event);
        if next.phase() != from {
            tracing::info!(from = %from, to = %next.phase(), "state transition");
        }
        self.state = next;

        let mut emitted = None;
        for effect in effects {
            match effect {
                Effect::Count(counter) => self.counters.bump(counter),
                Effect::Invalidate(bar_index) => self.invalidated.insert(bar_index, now),
                Effect::Emit(signal) => emitted = Some(signal),
                Effect::Reversal => self.pending_reversal = true,
            }
        }
        emitted
    }

    fn step(&mut self, window: &[Candle], now: DateTime<Utc>) -> Result<Event> {
        match &self.state {
            MachineState::Scan => {
                let indicators = IndicatorSet::compute(window);
                Ok(self
                    .scanner
                    .scan(window, &indicators, &self.invalidated, now)
                    .map(Event::CandidateFound)
                    .unwrap_or(Event::NothingFound))
            }
            MachineState::Candidate(_) => Ok(Event::Advance),
            MachineState::MicroConfirm(candidate) => {
                let candidate = candidate.clone();
                self.confirm_step(&candidate, window, now)
            }
            MachineState::Execute { candidate, plan } => {
                let (candidate, plan) = (candidate.clone(), plan.clone());
                self.execute_step(&candidate, &plan, window, now)
            }
            MachineState::Manage { signal, .. } => {
                let side = signal.side;
                Ok(self.manage_step(side, window, now))
            }
        }
    }

    fn confirm_step(&mut self, candidate: &Candidate, window: &[Candle], now: DateTime<Utc>) -> Result<Event> {
        if candidate.is_expired(now) {
            tracing::info!(side = %candidate.side, price = candidate.extremum_price, "candidate expired");
            return Ok(Event::Expired);
        }
        let i = candidate.bar_index;
        if i >= window.len() || window[i].timestamp != candidate.bar_timestamp {
            return Err(Error::InvalidState(format!(
                "candidate bar {i} no longer in the {}-bar window",
                window.len()
            )));
        }

        let indicators = IndicatorSet::compute(window);
        let snapshot = self.snapshots.get_snapshot();
        let detected = self.regime.detect_regime(window);
        let confirmation = match &detected {
            Some(r) => ConfirmationConfig {
                breakout_atr_mult: r.params.trigger_atr_mult,
                confirmation_bars: r.params.confirmation_bars,
                ..self.confirmation.clone()
            },
            None => self.confirmation.clone(),
        };
        let regime = detected.unwrap_or_else(RegimeResult::fallback);
        let outcome = micro_confirm(window, &indicators, candidate, &confirmation, snapshot.as_ref(), now);
        let Some(j) = outcome.confirm_index else {
            tracing::info!(
                side = %candidate.side,
                breakout_bars = outcome.breakout_bars,
                micro_vetoes = outcome.micro_vetoes.len(),
                "micro confirmation failed"
            );
            return Ok(Event::Rejected {
                vetoed: !outcome.micro_vetoes.is_empty(),
            });
        };

        let features = self.collect_features(window)?;
        let flow = features.tape().map(|t| t.flow.as_slice());
        let veto = self.vetoes.run(candidate.side, flow, snapshot.as_ref(), &self.market);
        let confluence = self.confluence.evaluate(
            &features,
            snapshot.as_ref(),
            Some(candidate.side),
            None,
            Some(TriggerCheck::from_confirmation(&outcome)),
            &veto,
        );
        let final_score = confluence.final_score.clone();
        self.last_veto = Some(veto.clone());
        self.last_confluence = Some(confluence);

        if !final_score.tier.is_tradeable() {
            tracing::info!(
                side = %candidate.side,
                score = final_score.score,
                bottleneck = ?final_score.bottleneck,
                "micro rejected: insufficient confluence"
            );
            return Ok(Event::Rejected { vetoed: veto.any_veto });
        }

        let atr5 = value_at(&indicators.atr5, i)
            .ok_or_else(|| Error::InsufficientData(format!("ATR5 unavailable at bar {i}")))?;
        let entry = window[j].close;
        let offset = self.config.sl_atr5_mult * atr5;
        let stop_loss = match candidate.side {
            Side::Long => window[i].low.min(entry - offset),
            Side::Short => window[i].high.max(entry + offset),
        };

        tracing::info!(
            side = %candidate.side,
            tier = %final_score.tier,
            score = final_score.score,
            confirm_index = j,
            regime = %regime.regime,
            "micro confirmed"
        );
        Ok(Event::Confirmed(EntryPlan {
            entry,
            stop_loss,
            confirm_index: j,
            confirm_timestamp: window[j].timestamp,
            regime,
            tier: final_score.tier,
            size_multiplier: final_score.size_multiplier,
            confluence_score: final_score.score,
        }))
    }

    fn execute_step(
        &mut self,
        candidate: &Candidate,
        plan: &EntryPlan,
        window: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<Event> {
        if candidate.is_expired(now) {
            tracing::info!(side = %candidate.side, "candidate expired waiting for trigger");
            return Ok(Event::Expired);
        }

        let indicators = IndicatorSet::compute(window);
        let (Some(last), Some(atr)) = (window.last(), indicators.atr14.last().copied().flatten()) else {
            return Ok(Event::TriggerPending);
        };
        let offset = plan.regime.params.trigger_atr_mult * atr;
        let triggered = match candidate.side {
            Side::Long => last.close > candidate.extremum_price + offset,
            Side::Short => last.close < candidate.extremum_price - offset,
        };
        if !triggered {
            tracing::debug!(close = last.close, extremum = candidate.extremum_price, offset, "trigger not reached");
            return Ok(Event::TriggerPending);
        }

        // Book and venue may have moved since confirmation
        let features = self.collect_features(window)?;
        let flow = features.tape().map(|t| t.flow.as_slice());
        let snapshot = self.snapshots.get_snapshot();
        let veto = self.vetoes.run(candidate.side, flow, snapshot.as_ref(), &self.market);
        let vetoed = veto.any_veto;
        if vetoed {
            tracing::warn!(side = %candidate.side, reasons = %veto.summary(), "execution vetoed");
        }
        self.last_veto = Some(veto);
        if vetoed {
            return Ok(Event::Rejected { vetoed: true });
        }

        let side = candidate.side;
        let entry = plan.entry;
        let r = (entry - plan.stop_loss).abs();
        let params = &plan.regime.params;
        let signal = Signal {
            side,
            entry,
            stop_loss: plan.stop_loss,
            tp1: entry + side.sign() * params.tp1_r * r,
            tp2: entry + side.sign() * params.tp2_r * r,
            tp3: entry + side.sign() * params.tp3_r * r,
            trail_atr_mult: self.config.trail_atr_mult,
            atr,
            tier: plan.tier,
            size_multiplier: plan.size_multiplier,
            extremum_index: candidate.bar_index,
            confirm_index: plan.confirm_index,
            regime: plan.regime.regime,
            confluence_score: plan.confluence_score,
            created_at: now,
        };

        tracing::info!(
            %side,
            entry,
            stop = signal.stop_loss,
            tp1 = signal.tp1,
            tier = %signal.tier,
            "signal executed"
        );
        Ok(Event::Executed(signal))
    }

    fn manage_step(&self, side: Side, window: &[Candle], now: DateTime<Utc>) -> Event {
        if !self.config.hold_until_closed {
            return Event::Advance;
        }
        if !self.config.detect_reversals {
            return Event::NothingFound;
        }
        let indicators = IndicatorSet::compute(window);
        match self.scanner.scan(window, &indicators, &self.invalidated, now) {
            Some(c) if c.side == side.opposite() => {
                tracing::info!(%side, bar_index = c.bar_index, "opposing swing while in position");
                Event::ReversalDetected(c.bar_timestamp)
            }
            _ => Event::NothingFound,
        }
    }

    fn collect_features(&self, window: &[Candle]) -> Result<FeatureSet> {
        let mut features = FeatureSet::new();
        for timeframe in Timeframe::ALL {
            if timeframe == Timeframe::M5 {
                features.insert_candles(timeframe, window);
                continue;
            }
            let candles = self.klines.get_klines(timeframe, self.config.kline_limit)?;
            features.insert_candles(timeframe, &candles);
        }
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CandleStore, MicroStore};

    fn machine() -> StateMachine {
        StateMachine::new(Arc::new(CandleStore::new()), Arc::new(MicroStore::default()))
    }

    #[test]
    fn test_fresh_status() {
        let status = machine().status();
        assert_eq!(status.state, Phase::Scan);
        assert!(status.candidate.is_none());
        assert_eq!(status.counters, Counters::default());
        assert_eq!(status.invalidated_count, 0);
    }

    #[test]
    fn test_empty_window_keeps_scanning() {
        let mut sm = machine();
        assert!(sm.run_cycle(&[]).is_none());
        assert_eq!(sm.state().phase(), Phase::Scan);
        assert_eq!(sm.counters().resets, 0);
    }

    #[test]
    fn test_reset_counts() {
        let mut sm = machine();
        sm.reset();
        assert_eq!(sm.counters().resets, 1);
        assert!(!sm.take_reversal());
    }
}
