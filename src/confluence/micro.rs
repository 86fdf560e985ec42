//! Micro leg gates: 5m trigger and 1m impulse

use serde::{Deserialize, Serialize};

use crate::confluence::features::TimeframeFeatures;
use crate::models::{Side, Tier};
use crate::strategy::ConfirmationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerCheck {
    pub trigger_ok: bool,
    pub volume_ok: bool,
}

impl TriggerCheck {
    pub fn ratio(&self) -> f64 {
        (self.trigger_ok as u8 + self.volume_ok as u8) as f64 / 2.0
    }

    /// Trigger from a completed breakout confirmation
    pub fn from_confirmation(outcome: &ConfirmationOutcome) -> Self {
        let confirmed = outcome.confirmed();
        Self {
            trigger_ok: confirmed,
            volume_ok: confirmed,
        }
    }
}

/// Trigger read straight off the 5m bars: a break of structure in the trade
/// direction and volume at `vol_mult` × the 50-bar median
pub fn check_trigger_5m(f5m: Option<&TimeframeFeatures>, side: Side, vol_mult: f64) -> TriggerCheck {
    let Some(f) = f5m else {
        return TriggerCheck {
            trigger_ok: false,
            volume_ok: false,
        };
    };
    let expected = match side {
        Side::Long => 1,
        Side::Short => -1,
    };
    TriggerCheck {
        trigger_ok: f.bos == expected,
        volume_ok: f.volume_ratio.is_some_and(|r| r >= vol_mult),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseCheck {
    pub rsi_hold_ok: bool,
    pub bos_ok: bool,
    pub volume_ok: bool,
    pub volume_ratio: Option<f64>,
}

impl ImpulseCheck {
    pub fn ratio(&self) -> f64 {
        let passed = [self.rsi_hold_ok, self.bos_ok, self.volume_ok]
            .iter()
            .filter(|ok| **ok)
            .count();
        passed as f64 / 3.0
    }

    pub fn impulse_ok(&self) -> bool {
        self.rsi_hold_ok && self.bos_ok && self.volume_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpulseConfig {
    pub rsi_hold_bars: usize,
    pub volume_mult_b: f64,
    pub volume_mult_a: f64,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            rsi_hold_bars: 2,
            volume_mult_b: 1.5,
            volume_mult_a: 2.0,
        }
    }
}

/// 1m impulse: RSI-12 held on the trade side, BOS in direction, volume surge
///
/// A-tier candidates face the stricter volume multiple.
pub fn check_1m_impulse(
    f1m: Option<&TimeframeFeatures>,
    side: Side,
    tier: Option<Tier>,
    config: &ImpulseConfig,
) -> ImpulseCheck {
    let Some(f) = f1m else {
        return ImpulseCheck {
            rsi_hold_ok: false,
            bos_ok: false,
            volume_ok: false,
            volume_ratio: None,
        };
    };

    let hold = config.rsi_hold_bars;
    let rsi_hold_ok = f.rsi12_tail.len() >= hold
        && f.rsi12_tail[f.rsi12_tail.len() - hold..]
            .iter()
            .all(|rsi| match side {
                Side::Long => *rsi >= 50.0,
                Side::Short => *rsi <= 50.0,
            });

    let bos_ok = match side {
        Side::Long => f.bos == 1,
        Side::Short => f.bos == -1,
    };

    let mult = match tier {
        Some(Tier::A) => config.volume_mult_a,
        _ => config.volume_mult_b,
    };
    let volume_ok = f.volume_ratio.is_some_and(|r| r >= mult);

    ImpulseCheck {
        rsi_hold_ok,
        bos_ok,
        volume_ok,
        volume_ratio: f.volume_ratio,
    }
}
