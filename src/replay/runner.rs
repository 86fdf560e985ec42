use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::execution::{
    CandleStore, EntryOutcome, FillModel, MemorySink, MicroStore, OrderConfig, OrderManager, PaperExchange,
    TpSlManager, TradeDesk,
};
use crate::models::{Candle, Timeframe};
use crate::replay::summary::{ReplayMetrics, ReplaySummary};
use crate::replay::synthetic::{bucket_start, merge, MarketScenario, SyntheticDataGenerator};
use crate::risk::RiskManager;
use crate::state_machine::Phase;
use crate::veto::VetoResult;

/// Higher timeframes seeded with history before the replay starts
const CONTEXT_TIMEFRAMES: [Timeframe; 4] = [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];
const HISTORY_BARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub scenario: MarketScenario,
    pub seed: u64,
    pub bars: usize,
    pub leverage: f64,
    pub fill_model: FillModel,
    pub start: DateTime<Utc>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            scenario: MarketScenario::Swings,
            seed: 42,
            bars: 600,
            leverage: 3.0,
            fill_model: FillModel::Immediate,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
        }
    }
}

/// Drives the state machine and trade desk bar by bar over synthetic data
///
/// The 5m window handed to the machine grows from the first bar, so candidate
/// bar indices stay valid across cycles.
pub struct ReplayRunner {
    config: AppConfig,
    settings: ReplaySettings,
}

impl ReplayRunner {
    pub fn new(config: AppConfig, settings: ReplaySettings) -> Self {
        Self { config, settings }
    }

    pub async fn run(&self) -> Result<ReplaySummary> {
        let settings = &self.settings;
        if settings.bars == 0 {
            return Err(Error::InsufficientData("replay needs at least one bar".to_string()));
        }

        let mut gen = SyntheticDataGenerator::new(settings.seed);
        let candles = gen.generate_from(settings.scenario, settings.start, settings.bars, Timeframe::M5.duration().num_minutes());
        let first_price = candles.first().map(|c| c.open).unwrap_or(gen.base_price());

        let store = CandleStore::new();
        let micro = MicroStore::default();
        for timeframe in CONTEXT_TIMEFRAMES {
            let history = gen.history(timeframe, HISTORY_BARS, settings.start, first_price, 0.0005);
            store.extend(timeframe, &history)?;
        }

        let mut machine = self.config.build_machine(Arc::new(store.clone()), Arc::new(micro.clone()))?;
        let exchange = Arc::new(PaperExchange::new(settings.fill_model));
        let orders = OrderManager::new(
            OrderConfig {
                unfilled_wait_ms: 1, // Paper fills settle on submission
                ..self.config.orders.clone()
            },
            exchange.clone(),
        );
        let sink = Arc::new(MemorySink::new());
        let mut desk = TradeDesk::new(
            RiskManager::new(self.config.risk.clone()),
            orders,
            TpSlManager::new(self.config.tp_sl.clone()),
            sink.clone(),
        );

        tracing::info!(
            scenario = ?settings.scenario,
            seed = settings.seed,
            bars = settings.bars,
            "starting replay"
        );

        let mut open_buckets: HashMap<Timeframe, Candle> = HashMap::new();
        let mut signals = Vec::new();
        let mut entries_rejected = 0;
        let bar_span = Timeframe::M5.duration();

        for (i, candle) in candles.iter().enumerate() {
            let now = candle.timestamp + bar_span;
            self.feed_bar(&mut gen, &store, &mut open_buckets, candle, bar_span)?;
            let snapshot = gen.snapshot(candle, now);
            micro.publish(snapshot.clone());

            let window = &candles[..=i];
            if let Some(signal) = machine.run_cycle_at(window, now) {
                if desk.has_open_position() {
                    tracing::debug!("signal while a position is open, skipped");
                    machine.on_execution_failed(false);
                } else {
                    let veto = machine.last_veto().cloned().unwrap_or_else(VetoResult::clear);
                    match desk
                        .place_and_manage(&signal, &snapshot, &veto, settings.leverage, now)
                        .await?
                    {
                        EntryOutcome::Opened(position) => {
                            tracing::info!(id = %position.id, entry = position.entry_price, "replay position opened");
                        }
                        EntryOutcome::Vetoed(_) => {
                            entries_rejected += 1;
                            machine.on_execution_failed(true);
                        }
                        EntryOutcome::RiskRejected(_) | EntryOutcome::NotFilled(_) => {
                            entries_rejected += 1;
                            machine.on_execution_failed(false);
                        }
                    }
                }
                signals.push(signal);
            }

            if desk.has_open_position() {
                let reversal = machine.take_reversal();
                let closed = desk.manage(candle.close, &snapshot, reversal, now).await?;
                if !closed.is_empty() && machine.state().phase() == Phase::Manage {
                    machine.on_position_closed();
                }
            }
        }

        if let Some(last) = candles.last() {
            let now = last.timestamp + bar_span;
            let snapshot = gen.snapshot(last, now);
            if !desk.flatten(last.close, &snapshot, now).await?.is_empty() && machine.state().phase() == Phase::Manage {
                machine.on_position_closed();
            }
        }

        let trades = sink.trades();
        let end = candles.last().map(|c| c.timestamp + bar_span).unwrap_or(settings.start);
        let summary = ReplaySummary {
            bars: candles.len(),
            metrics: ReplayMetrics::from_trades(&trades),
            signals,
            trades,
            entries_rejected,
            orders_submitted: exchange.submitted_count(),
            status: machine.status_at(end),
        };

        tracing::info!(
            signals = summary.signals.len(),
            trades = summary.metrics.total_trades,
            pnl = summary.metrics.total_pnl,
            "replay complete"
        );
        Ok(summary)
    }

    /// Push a closed 5m bar plus its derived 1m/5s bars and the running higher-timeframe buckets
    fn feed_bar(
        &self,
        gen: &mut SyntheticDataGenerator,
        store: &CandleStore,
        open_buckets: &mut HashMap<Timeframe, Candle>,
        candle: &Candle,
        span: Duration,
    ) -> Result<()> {
        store.push(Timeframe::M5, *candle)?;

        let minutes = gen.split(candle, span, 5);
        for minute in &minutes {
            store.push(Timeframe::M1, *minute)?;
            for tick in gen.split(minute, Timeframe::M1.duration(), 12) {
                store.push(Timeframe::S5, tick)?;
            }
        }

        for timeframe in CONTEXT_TIMEFRAMES {
            let bucket = bucket_start(candle.timestamp, timeframe);
            let bar = open_buckets
                .entry(timeframe)
                .and_modify(|bar| {
                    if bar.timestamp == bucket {
                        merge(bar, candle);
                    } else {
                        *bar = Candle {
                            timestamp: bucket,
                            ..*candle
                        };
                    }
                })
                .or_insert(Candle {
                    timestamp: bucket,
                    ..*candle
                });
            store.push(timeframe, *bar)?;
        }
        Ok(())
    }
}
