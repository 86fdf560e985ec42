// Pipeline orchestration: SCAN → CANDIDATE → MICRO_CONFIRM → EXECUTE → MANAGE
pub mod machine;
pub mod transition;

pub use machine::{Counters, MachineConfig, MachineStatus, StateMachine};
pub use transition::{transition, Counter, Effect, EntryPlan, Event, MachineState, Phase};
