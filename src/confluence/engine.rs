//! Two-leg confluence scoring with bottleneck tiering
//!
//! Context and micro legs are each worth 50 points. The final score is the
//! weaker leg, so a trade is only as good as its worst side.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::confluence::context::{evaluate_context, ContextGates};
use crate::confluence::features::FeatureSet;
use crate::confluence::macro_gate::{check_macro_alignment, resolve_conflict, MacroAlignment, MacroConflict};
use crate::confluence::micro::{check_1m_impulse, check_trigger_5m, ImpulseCheck, ImpulseConfig, TriggerCheck};
use crate::confluence::tape::{check_tape_filters, TapeCheck, TapeConfig};
use crate::error::{Error, Result};
use crate::models::{MicroSnapshot, Side, Tier, Timeframe};
use crate::veto::VetoResult;

pub const LEG_POINTS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    EmaAlignment,
    Oscillator,
    PivotStructure,
    MacroGate,
    Trigger5m,
    Impulse1m,
    Tape,
    VetoHygiene,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::EmaAlignment => "ema_alignment",
            Component::Oscillator => "oscillator",
            Component::PivotStructure => "pivot_structure",
            Component::MacroGate => "macro_gate",
            Component::Trigger5m => "trigger_5m",
            Component::Impulse1m => "impulse_1m",
            Component::Tape => "tape",
            Component::VetoHygiene => "veto_hygiene",
        };
        f.write_str(name)
    }
}

/// Point weights per component; each leg must sum to 50
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub ema_alignment: f64,
    pub oscillator: f64,
    pub pivot_structure: f64,
    pub macro_gate: f64,
    pub trigger_5m: f64,
    pub impulse_1m: f64,
    pub tape: f64,
    pub veto_hygiene: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            ema_alignment: 20.0,
            oscillator: 10.0,
            pivot_structure: 10.0,
            macro_gate: 10.0,
            trigger_5m: 20.0,
            impulse_1m: 15.0,
            tape: 10.0,
            veto_hygiene: 5.0,
        }
    }
}

impl ComponentWeights {
    pub fn weight(&self, component: Component) -> f64 {
        match component {
            Component::EmaAlignment => self.ema_alignment,
            Component::Oscillator => self.oscillator,
            Component::PivotStructure => self.pivot_structure,
            Component::MacroGate => self.macro_gate,
            Component::Trigger5m => self.trigger_5m,
            Component::Impulse1m => self.impulse_1m,
            Component::Tape => self.tape,
            Component::VetoHygiene => self.veto_hygiene,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let context = self.ema_alignment + self.oscillator + self.pivot_structure + self.macro_gate;
        let micro = self.trigger_5m + self.impulse_1m + self.tape + self.veto_hygiene;
        for (leg, total) in [("context", context), ("micro", micro)] {
            if (total - LEG_POINTS).abs() > 1e-9 {
                return Err(Error::Config(format!(
                    "{leg} weights sum to {total}, expected {LEG_POINTS}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub weights: ComponentWeights,
    pub min_ema_aligned_pairs: usize,  // 15m/1h, of 3 pairs
    pub macro_min_aligned_pairs: usize, // 4h/1D, of 3 pairs
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub trigger_vol_mult: f64,
    pub tier_a_context_pct: f64,
    pub tier_a_micro_pct: f64,
    pub tier_b_context_pct: f64,
    pub tier_b_micro_pct: f64,
    pub impulse: ImpulseConfig,
    pub tape: TapeConfig,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            weights: ComponentWeights::default(),
            min_ema_aligned_pairs: 3,
            macro_min_aligned_pairs: 2,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            trigger_vol_mult: 1.5,
            tier_a_context_pct: 75.0,
            tier_a_micro_pct: 80.0,
            tier_b_context_pct: 60.0,
            tier_b_micro_pct: 70.0,
            impulse: ImpulseConfig::default(),
            tape: TapeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component: Component,
    pub weight: f64,
    pub ratio: f64, // 0..=1 share of the weight earned
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegScore {
    pub total: f64, // 0..=50
    pub components: Vec<ComponentScore>,
}

impl LegScore {
    fn from_components(components: Vec<ComponentScore>) -> Self {
        let total = components.iter().map(|c| c.points).sum::<f64>().clamp(0.0, LEG_POINTS);
        Self { total, components }
    }

    pub fn pct(&self) -> f64 {
        self.total / LEG_POINTS * 100.0
    }

    pub fn component(&self, component: Component) -> Option<&ComponentScore> {
        self.components.iter().find(|c| c.component == component)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bottleneck {
    Context,
    Micro,
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub score: f64,
    pub tier: Tier,
    pub bottleneck: Bottleneck,
    pub size_multiplier: f64,
}

/// Gate-level detail behind the leg scores, kept for the trade record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceDetails {
    pub side: Option<Side>,
    pub context: Option<ContextGates>,
    pub macro_alignment: Option<MacroAlignment>,
    pub macro_conflict: Option<MacroConflict>,
    pub trigger: Option<TriggerCheck>,
    pub impulse: Option<ImpulseCheck>,
    pub tape: Option<TapeCheck>,
    pub veto_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceResult {
    pub context: LegScore,
    pub micro: LegScore,
    pub final_score: FinalScore,
    pub details: ConfluenceDetails,
}

pub struct ConfluenceEngine {
    config: ConfluenceConfig,
}

impl Default for ConfluenceEngine {
    fn default() -> Self {
        Self {
            config: ConfluenceConfig::default(),
        }
    }
}

impl ConfluenceEngine {
    pub fn new(config: ConfluenceConfig) -> Result<Self> {
        config.weights.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    /// Score both legs and classify the tier
    ///
    /// Without a side the directional gates earn nothing. `trigger` carries
    /// the 5m breakout outcome when the caller already confirmed one;
    /// otherwise it is read off the 5m features. `tier` selects the impulse
    /// volume multiple (A is stricter). Left as None, an A result is
    /// re-checked against the A multiple and downgraded to B when it fails.
    pub fn evaluate(
        &self,
        features: &FeatureSet,
        snapshot: Option<&MicroSnapshot>,
        side: Option<Side>,
        tier: Option<Tier>,
        trigger: Option<TriggerCheck>,
        vetoes: &VetoResult,
    ) -> ConfluenceResult {
        let cfg = &self.config;
        let w = &cfg.weights;
        let score = |component: Component, ratio: f64| {
            let weight = w.weight(component);
            let ratio = ratio.clamp(0.0, 1.0);
            ComponentScore {
                component,
                weight,
                ratio,
                points: weight * ratio,
            }
        };

        let mut details = ConfluenceDetails {
            side,
            context: None,
            macro_alignment: None,
            macro_conflict: None,
            trigger: None,
            impulse: None,
            tape: None,
            veto_reasons: vetoes.reasons.clone(),
        };

        // ── Context leg ──
        let (context, macro_clearance) = match side {
            Some(side) => {
                let gates = evaluate_context(
                    features.get(Timeframe::M15),
                    features.get(Timeframe::H1),
                    side,
                    cfg.min_ema_aligned_pairs,
                    cfg.rsi_oversold,
                    cfg.rsi_overbought,
                );
                let alignment = check_macro_alignment(
                    features.get(Timeframe::H4),
                    features.get(Timeframe::D1),
                    side,
                    cfg.macro_min_aligned_pairs,
                );
                let leg = LegScore::from_components(vec![
                    score(Component::EmaAlignment, gates.ema_ratio()),
                    score(Component::Oscillator, gates.oscillator_ok() as u8 as f64),
                    score(Component::PivotStructure, gates.structure.structure_ok as u8 as f64),
                    score(Component::MacroGate, alignment.score / 100.0),
                ]);
                let clearance = alignment.tier_clearance;
                details.macro_conflict = Some(resolve_conflict(&alignment, gates.play_type));
                details.context = Some(gates);
                details.macro_alignment = Some(alignment);
                (leg, clearance)
            }
            None => (
                LegScore::from_components(vec![
                    score(Component::EmaAlignment, 0.0),
                    score(Component::Oscillator, 0.0),
                    score(Component::PivotStructure, 0.0),
                    score(Component::MacroGate, 0.0),
                ]),
                Tier::B,
            ),
        };

        // ── Micro leg ──
        let hygiene = if vetoes.any_veto { 0.0 } else { 1.0 };
        let micro = match side {
            Some(side) => {
                let trigger = trigger.unwrap_or_else(|| {
                    check_trigger_5m(features.get(Timeframe::M5), side, cfg.trigger_vol_mult)
                });
                let impulse = check_1m_impulse(features.get(Timeframe::M1), side, tier, &cfg.impulse);
                let atr_5m = features.get(Timeframe::M5).and_then(|f| f.atr14);
                let tape = check_tape_filters(features.tape(), snapshot, side, atr_5m, &cfg.tape);
                let leg = LegScore::from_components(vec![
                    score(Component::Trigger5m, trigger.ratio()),
                    score(Component::Impulse1m, impulse.ratio()),
                    score(Component::Tape, tape.ratio()),
                    score(Component::VetoHygiene, hygiene),
                ]);
                details.trigger = Some(trigger);
                details.impulse = Some(impulse);
                details.tape = Some(tape);
                leg
            }
            None => LegScore::from_components(vec![
                score(Component::Trigger5m, 0.0),
                score(Component::Impulse1m, 0.0),
                score(Component::Tape, 0.0),
                score(Component::VetoHygiene, hygiene),
            ]),
        };

        let mut final_score = self.final_score(&context, &micro, macro_clearance, vetoes.any_veto);

        // A-tier needs the stricter impulse volume; scored at B it falls back to B
        if let (Some(side), None, Tier::A) = (side, tier, final_score.tier) {
            let strict = check_1m_impulse(features.get(Timeframe::M1), side, Some(Tier::A), &cfg.impulse);
            if !strict.volume_ok {
                tracing::debug!(volume_ratio = ?strict.volume_ratio, "A-tier impulse volume not met, downgraded to B");
                final_score.tier = Tier::B;
                final_score.size_multiplier = Tier::B.size_multiplier();
            }
        }

        tracing::debug!(
            side = ?side,
            context = context.total,
            micro = micro.total,
            tier = %final_score.tier,
            bottleneck = ?final_score.bottleneck,
            "confluence evaluated"
        );

        ConfluenceResult {
            context,
            micro,
            final_score,
            details,
        }
    }

    /// Bottleneck score and tier from two leg scores
    pub fn final_score(
        &self,
        context: &LegScore,
        micro: &LegScore,
        macro_clearance: Tier,
        any_veto: bool,
    ) -> FinalScore {
        let cfg = &self.config;
        let score = context.total.min(micro.total);
        let bottleneck = if (context.total - micro.total).abs() < 1e-9 {
            Bottleneck::Balanced
        } else if context.total < micro.total {
            Bottleneck::Context
        } else {
            Bottleneck::Micro
        };

        let (context_pct, micro_pct) = (context.pct(), micro.pct());
        let tier = if any_veto {
            Tier::Skip
        } else if macro_clearance == Tier::A
            && context_pct >= cfg.tier_a_context_pct
            && micro_pct >= cfg.tier_a_micro_pct
        {
            Tier::A
        } else if context_pct >= cfg.tier_b_context_pct && micro_pct >= cfg.tier_b_micro_pct {
            Tier::B
        } else {
            Tier::Skip
        };

        FinalScore {
            score,
            tier,
            bottleneck,
            size_multiplier: tier.size_multiplier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use crate::veto::{VetoCheck, VetoKind};
    use chrono::Utc;

    fn trend(n: usize, step: f64, minutes: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + step * i as f64;
                Candle {
                    timestamp: Utc::now() + chrono::Duration::minutes(minutes * i as i64),
                    open: close - step / 2.0,
                    high: close + 0.3,
                    low: close - 0.3,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    fn leg(total: f64) -> LegScore {
        LegScore {
            total,
            components: Vec::new(),
        }
    }

    fn bullish_context() -> FeatureSet {
        FeatureSet::new()
            .with_candles(Timeframe::M15, &trend(60, 0.2, 15))
            .with_candles(Timeframe::H1, &trend(60, 0.5, 60))
            .with_candles(Timeframe::H4, &trend(60, 1.0, 240))
            .with_candles(Timeframe::D1, &trend(60, 2.0, 1440))
    }

    #[test]
    fn test_bottleneck_is_min_of_legs() {
        let engine = ConfluenceEngine::default();
        for (c, m) in [(40.0, 30.0), (20.0, 45.0), (35.0, 35.0), (0.0, 50.0)] {
            let result = engine.final_score(&leg(c), &leg(m), Tier::A, false);
            assert_eq!(result.score, f64::min(c, m));
        }
        assert_eq!(engine.final_score(&leg(40.0), &leg(30.0), Tier::A, false).bottleneck, Bottleneck::Micro);
        assert_eq!(engine.final_score(&leg(20.0), &leg(45.0), Tier::A, false).bottleneck, Bottleneck::Context);
        assert_eq!(engine.final_score(&leg(35.0), &leg(35.0), Tier::A, false).bottleneck, Bottleneck::Balanced);
    }

    #[test]
    fn test_tier_thresholds() {
        let engine = ConfluenceEngine::default();
        // 75% / 80% with macro clearance → A
        let a = engine.final_score(&leg(37.5), &leg(40.0), Tier::A, false);
        assert_eq!(a.tier, Tier::A);
        assert_eq!(a.size_multiplier, 1.0);
        // Same legs, mixed macro → B
        assert_eq!(engine.final_score(&leg(37.5), &leg(40.0), Tier::B, false).tier, Tier::B);
        // 60% / 70% → B
        assert_eq!(engine.final_score(&leg(30.0), &leg(35.0), Tier::A, false).tier, Tier::B);
        // Below B on either leg → SKIP
        assert_eq!(engine.final_score(&leg(29.0), &leg(50.0), Tier::A, false).tier, Tier::Skip);
        assert_eq!(engine.final_score(&leg(50.0), &leg(34.0), Tier::A, false).tier, Tier::Skip);
        // Any veto → SKIP
        let vetoed = engine.final_score(&leg(50.0), &leg(50.0), Tier::A, true);
        assert_eq!(vetoed.tier, Tier::Skip);
        assert_eq!(vetoed.size_multiplier, 0.0);
    }

    #[test]
    fn test_a_thresholds_dominate_b() {
        let cfg = ConfluenceConfig::default();
        assert!(cfg.tier_a_context_pct >= cfg.tier_b_context_pct);
        assert!(cfg.tier_a_micro_pct >= cfg.tier_b_micro_pct);
    }

    #[test]
    fn test_full_context_leg() {
        let engine = ConfluenceEngine::default();
        let result = engine.evaluate(
            &bullish_context(),
            None,
            Some(Side::Long),
            None,
            Some(TriggerCheck {
                trigger_ok: true,
                volume_ok: true,
            }),
            &VetoResult::clear(),
        );
        assert_eq!(result.context.total, 50.0);
        assert_eq!(result.context.components.len(), 4);
        // Trigger 20 + hygiene 5; no 1m or tape data
        assert_eq!(result.micro.total, 25.0);
        assert_eq!(result.final_score.score, 25.0);
        assert_eq!(result.final_score.bottleneck, Bottleneck::Micro);
        assert_eq!(result.final_score.tier, Tier::Skip);
        assert_eq!(
            result.details.macro_alignment.as_ref().map(|m| m.tier_clearance),
            Some(Tier::A)
        );
    }

    /// 1m drift higher, then a breakout bar on `surge`× the usual volume
    fn impulse_1m(surge: f64) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..60)
            .map(|i| {
                let close = 100.0 + 0.05 * i as f64;
                Candle {
                    timestamp: Utc::now() + chrono::Duration::minutes(i as i64),
                    open: close - 0.05,
                    high: close + 0.1,
                    low: close - 0.1,
                    close,
                    volume: 1000.0,
                }
            })
            .collect();
        candles.push(Candle {
            timestamp: Utc::now() + chrono::Duration::minutes(60),
            open: 103.0,
            high: 104.1,
            low: 102.9,
            close: 104.0,
            volume: 1000.0 * surge,
        });
        candles
    }

    fn evaluate_with_surge(surge: f64) -> ConfluenceResult {
        let features = bullish_context().with_candles(Timeframe::M1, &impulse_1m(surge));
        ConfluenceEngine::default().evaluate(
            &features,
            None,
            Some(Side::Long),
            None,
            Some(TriggerCheck {
                trigger_ok: true,
                volume_ok: true,
            }),
            &VetoResult::clear(),
        )
    }

    #[test]
    fn test_a_tier_requires_stricter_impulse_volume() {
        // 1.8x clears the B multiple but not the A one
        let result = evaluate_with_surge(1.8);
        assert!(result.details.impulse.as_ref().unwrap().impulse_ok());
        assert!(result.micro.pct() >= 80.0);
        assert_eq!(result.final_score.tier, Tier::B);
        assert_eq!(result.final_score.size_multiplier, 0.5);

        let result = evaluate_with_surge(2.2);
        assert_eq!(result.final_score.tier, Tier::A);
        assert_eq!(result.final_score.size_multiplier, 1.0);
    }

    #[test]
    fn test_no_side_scores_only_hygiene() {
        let engine = ConfluenceEngine::default();
        let result = engine.evaluate(&bullish_context(), None, None, None, None, &VetoResult::clear());
        assert_eq!(result.context.total, 0.0);
        assert_eq!(result.micro.total, 5.0);
        assert_eq!(result.final_score.tier, Tier::Skip);
    }

    #[test]
    fn test_veto_zeroes_hygiene() {
        let engine = ConfluenceEngine::default();
        let vetoes = VetoResult::from_checks(vec![VetoCheck {
            kind: VetoKind::Spread,
            veto: true,
            value: Some(0.5),
            reason: Some("spread too wide".into()),
        }]);
        let result = engine.evaluate(&bullish_context(), None, Some(Side::Long), None, None, &vetoes);
        assert_eq!(result.micro.component(Component::VetoHygiene).unwrap().points, 0.0);
        assert_eq!(result.final_score.tier, Tier::Skip);
        assert_eq!(result.details.veto_reasons, vec!["spread too wide".to_string()]);
    }

    #[test]
    fn test_weights_must_sum_to_leg_points() {
        let config = ConfluenceConfig {
            weights: ComponentWeights {
                tape: 20.0,
                ..ComponentWeights::default()
            },
            ..ConfluenceConfig::default()
        };
        assert!(matches!(ConfluenceEngine::new(config), Err(Error::Config(_))));
        assert!(ComponentWeights::default().validate().is_ok());
    }
}
