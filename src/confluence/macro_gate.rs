//! 4h/1D macro alignment and tier clearance

use serde::{Deserialize, Serialize};

use crate::confluence::context::{check_ema_alignment, PlayType};
use crate::confluence::features::TimeframeFeatures;
use crate::models::{Side, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroAlignment {
    pub aligned_4h: bool,
    pub aligned_1d: bool,
    pub score: f64, // 0-100, half per aligned timeframe
    pub tier_clearance: Tier,
}

impl MacroAlignment {
    pub fn fully_aligned(&self) -> bool {
        self.aligned_4h && self.aligned_1d
    }
}

/// Each higher timeframe counts as aligned with `min_aligned_pairs` of its
/// three EMA pairs ordered with the trade. A-tier clearance needs both.
pub fn check_macro_alignment(
    f4h: Option<&TimeframeFeatures>,
    f1d: Option<&TimeframeFeatures>,
    side: Side,
    min_aligned_pairs: usize,
) -> MacroAlignment {
    let aligned_4h = check_ema_alignment(f4h, side, min_aligned_pairs).aligned;
    let aligned_1d = check_ema_alignment(f1d, side, min_aligned_pairs).aligned;

    let score = [aligned_4h, aligned_1d]
        .iter()
        .filter(|aligned| **aligned)
        .count() as f64
        * 50.0;
    let tier_clearance = if aligned_4h && aligned_1d {
        Tier::A
    } else {
        Tier::B
    };

    MacroAlignment {
        aligned_4h,
        aligned_1d,
        score,
        tier_clearance,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Aligned,
    ContextDeviation,
    DeferToMacro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroConflict {
    pub has_conflict: bool,
    pub resolution: ConflictResolution,
    pub recommended_tier: Tier,
}

/// Reconcile the macro view with the context play type
///
/// Only a fully aligned macro picture recommends A; anything mixed is B.
pub fn resolve_conflict(alignment: &MacroAlignment, play_type: PlayType) -> MacroConflict {
    if alignment.fully_aligned() {
        return MacroConflict {
            has_conflict: false,
            resolution: ConflictResolution::Aligned,
            recommended_tier: Tier::A,
        };
    }
    let resolution = match play_type {
        PlayType::Deviation => ConflictResolution::ContextDeviation,
        PlayType::Continuation => ConflictResolution::DeferToMacro,
    };
    MacroConflict {
        has_conflict: true,
        resolution,
        recommended_tier: Tier::B,
    }
}
