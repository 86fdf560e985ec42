// Multi-timeframe confluence scoring: context leg, micro leg, macro gate
pub mod context;
pub mod engine;
pub mod features;
pub mod macro_gate;
pub mod micro;
pub mod tape;

pub use context::{ContextGates, PlayType};
pub use engine::{
    Bottleneck, Component, ComponentScore, ComponentWeights, ConfluenceConfig, ConfluenceEngine,
    ConfluenceResult, FinalScore, LegScore,
};
pub use features::{extract_features, FeatureSet, TimeframeFeatures};
pub use macro_gate::{resolve_conflict, ConflictResolution, MacroAlignment};
pub use micro::TriggerCheck;
pub use tape::{debounce, TapeCheck};
