//! Pipeline states and the pure transition function
//!
//! `transition` never performs I/O. The driver in `machine.rs` turns the
//! current market view into an `Event`, applies the transition and then
//! carries out the returned effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Candidate, Signal, Tier};
use crate::regime::RegimeResult;

/// Entry terms fixed at confirmation time, consumed by EXECUTE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub entry: f64, // Close of the confirmation bar
    pub stop_loss: f64,
    pub confirm_index: usize,
    pub confirm_timestamp: DateTime<Utc>,
    pub regime: RegimeResult,
    pub tier: Tier,
    pub size_multiplier: f64,
    pub confluence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MachineState {
    Scan,
    Candidate(Candidate),
    MicroConfirm(Candidate),
    Execute {
        candidate: Candidate,
        plan: EntryPlan,
    },
    Manage {
        signal: Signal,
        entry_bar_at: DateTime<Utc>,
        last_reversal_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Scan,
    Candidate,
    MicroConfirm,
    Execute,
    Manage,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scan => "SCAN",
            Phase::Candidate => "CANDIDATE",
            Phase::MicroConfirm => "MICRO_CONFIRM",
            Phase::Execute => "EXECUTE",
            Phase::Manage => "MANAGE",
        };
        f.write_str(name)
    }
}

impl MachineState {
    pub fn phase(&self) -> Phase {
        match self {
            MachineState::Scan => Phase::Scan,
            MachineState::Candidate(_) => Phase::Candidate,
            MachineState::MicroConfirm(_) => Phase::MicroConfirm,
            MachineState::Execute { .. } => Phase::Execute,
            MachineState::Manage { .. } => Phase::Manage,
        }
    }

    /// The live candidate, if any
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            MachineState::Candidate(c) | MachineState::MicroConfirm(c) => Some(c),
            MachineState::Execute { candidate, .. } => Some(candidate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CandidateFound(Candidate),
    NothingFound,
    Advance,
    Expired,
    Confirmed(EntryPlan),
    Rejected { vetoed: bool },
    TriggerPending,
    Executed(Signal),
    ReversalDetected(DateTime<Utc>),
    PositionClosed,
    ExecutionFailed { vetoed: bool },
    Fault(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Counter {
    CandidatesDetected,
    CandidatesExpired,
    MicroConfirms,
    MicroRejects,
    Executions,
    Vetoes,
    Resets,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Count(Counter),
    Invalidate(usize), // Bar index enters the cooldown cache
    Emit(Signal),
    Reversal,
}

pub fn transition(state: MachineState, event: Event) -> (MachineState, Vec<Effect>) {
    use MachineState as S;

    match (state, event) {
        // An open position is only released by the desk
        (state @ S::Manage { .. }, Event::Fault(_)) => (state, vec![]),
        (_, Event::Fault(_)) => (S::Scan, vec![Effect::Count(Counter::Resets)]),

        (S::Scan, Event::CandidateFound(candidate)) => (
            S::Candidate(candidate),
            vec![Effect::Count(Counter::CandidatesDetected)],
        ),

        (S::Candidate(candidate), Event::Advance) => (S::MicroConfirm(candidate), vec![]),

        (S::MicroConfirm(candidate), Event::Expired) | (S::Execute { candidate, .. }, Event::Expired) => (
            S::Scan,
            vec![
                Effect::Count(Counter::CandidatesExpired),
                Effect::Invalidate(candidate.bar_index),
            ],
        ),

        (S::MicroConfirm(candidate), Event::Confirmed(plan)) => (
            S::Execute { candidate, plan },
            vec![Effect::Count(Counter::MicroConfirms)],
        ),

        (S::MicroConfirm(candidate), Event::Rejected { vetoed }) => {
            let mut effects = vec![Effect::Count(Counter::MicroRejects)];
            if vetoed {
                effects.push(Effect::Count(Counter::Vetoes));
            }
            effects.push(Effect::Invalidate(candidate.bar_index));
            (S::Scan, effects)
        }

        // Veto raised between confirmation and entry
        (S::Execute { candidate, .. }, Event::Rejected { vetoed }) => {
            let mut effects = Vec::new();
            if vetoed {
                effects.push(Effect::Count(Counter::Vetoes));
            }
            effects.push(Effect::Invalidate(candidate.bar_index));
            (S::Scan, effects)
        }

        (S::Execute { candidate, plan }, Event::Executed(signal)) => (
            S::Manage {
                signal: signal.clone(),
                entry_bar_at: plan.confirm_timestamp,
                last_reversal_at: None,
            },
            vec![
                Effect::Count(Counter::Executions),
                Effect::Invalidate(candidate.bar_index),
                Effect::Emit(signal),
            ],
        ),

        (
            S::Manage {
                signal,
                entry_bar_at,
                last_reversal_at,
            },
            Event::ReversalDetected(at),
        ) => {
            let fresh = at > entry_bar_at && last_reversal_at.map_or(true, |last| at > last);
            let last_reversal_at = if fresh { Some(at) } else { last_reversal_at };
            let effects = if fresh { vec![Effect::Reversal] } else { vec![] };
            (
                S::Manage {
                    signal,
                    entry_bar_at,
                    last_reversal_at,
                },
                effects,
            )
        }

        (S::Manage { .. }, Event::PositionClosed) | (S::Manage { .. }, Event::Advance) => (S::Scan, vec![]),

        (S::Manage { .. }, Event::ExecutionFailed { vetoed }) => {
            let effects = if vetoed {
                vec![Effect::Count(Counter::Vetoes)]
            } else {
                vec![]
            };
            (S::Scan, effects)
        }

        // Waiting events and anything not meaningful in the current state
        (state, _) => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use crate::regime::Regime;
    use chrono::Duration;

    fn candidate(bar_index: usize) -> Candidate {
        Candidate {
            side: Side::Long,
            extremum_price: 96.0,
            bar_index,
            bar_timestamp: Utc::now(),
            created_at: Utc::now(),
            timeout_minutes: 30,
        }
    }

    fn plan() -> EntryPlan {
        EntryPlan {
            entry: 98.5,
            stop_loss: 96.0,
            confirm_index: 63,
            confirm_timestamp: Utc::now(),
            regime: RegimeResult::fallback(),
            tier: Tier::B,
            size_multiplier: 0.5,
            confluence_score: 37.5,
        }
    }

    fn signal() -> Signal {
        Signal {
            side: Side::Long,
            entry: 98.5,
            stop_loss: 96.0,
            tp1: 101.0,
            tp2: 103.5,
            tp3: 106.0,
            trail_atr_mult: 0.5,
            atr: 1.0,
            tier: Tier::B,
            size_multiplier: 0.5,
            extremum_index: 60,
            confirm_index: 63,
            regime: Regime::Normal,
            confluence_score: 37.5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path() {
        let (state, effects) = transition(MachineState::Scan, Event::CandidateFound(candidate(60)));
        assert_eq!(state.phase(), Phase::Candidate);
        assert_eq!(effects, vec![Effect::Count(Counter::CandidatesDetected)]);

        let (state, _) = transition(state, Event::Advance);
        assert_eq!(state.phase(), Phase::MicroConfirm);

        let (state, effects) = transition(state, Event::Confirmed(plan()));
        assert_eq!(state.phase(), Phase::Execute);
        assert_eq!(effects, vec![Effect::Count(Counter::MicroConfirms)]);

        let (state, effects) = transition(state, Event::TriggerPending);
        assert_eq!(state.phase(), Phase::Execute);
        assert!(effects.is_empty());

        let (state, effects) = transition(state, Event::Executed(signal()));
        assert_eq!(state.phase(), Phase::Manage);
        assert!(state.candidate().is_none());
        assert!(effects.contains(&Effect::Invalidate(60)));
        assert!(matches!(effects.last(), Some(Effect::Emit(_))));

        let (state, _) = transition(state, Event::PositionClosed);
        assert_eq!(state, MachineState::Scan);
    }

    #[test]
    fn test_rejection_invalidates_bar() {
        let state = MachineState::MicroConfirm(candidate(42));
        let (state, effects) = transition(state, Event::Rejected { vetoed: true });
        assert_eq!(state, MachineState::Scan);
        assert_eq!(
            effects,
            vec![
                Effect::Count(Counter::MicroRejects),
                Effect::Count(Counter::Vetoes),
                Effect::Invalidate(42),
            ]
        );
    }

    #[test]
    fn test_veto_at_execute_drops_candidate() {
        let state = MachineState::Execute {
            candidate: candidate(9),
            plan: plan(),
        };
        let (state, effects) = transition(state, Event::Rejected { vetoed: true });
        assert_eq!(state, MachineState::Scan);
        assert_eq!(effects, vec![Effect::Count(Counter::Vetoes), Effect::Invalidate(9)]);
    }

    #[test]
    fn test_expiry_from_execute() {
        let state = MachineState::Execute {
            candidate: candidate(7),
            plan: plan(),
        };
        let (state, effects) = transition(state, Event::Expired);
        assert_eq!(state, MachineState::Scan);
        assert!(effects.contains(&Effect::Count(Counter::CandidatesExpired)));
    }

    #[test]
    fn test_fault_resets_every_state() {
        let states = vec![
            MachineState::Scan,
            MachineState::Candidate(candidate(1)),
            MachineState::MicroConfirm(candidate(1)),
            MachineState::Execute {
                candidate: candidate(1),
                plan: plan(),
            },
        ];
        for state in states {
            let (next, effects) = transition(state, Event::Fault("feed down".to_string()));
            assert_eq!(next, MachineState::Scan);
            assert_eq!(effects, vec![Effect::Count(Counter::Resets)]);
        }
    }

    #[test]
    fn test_fault_keeps_open_position_managed() {
        let state = MachineState::Manage {
            signal: signal(),
            entry_bar_at: Utc::now(),
            last_reversal_at: None,
        };
        let (next, effects) = transition(state.clone(), Event::Fault("manual reset".to_string()));
        assert_eq!(next, state);
        assert!(effects.is_empty());

        let (next, _) = transition(next, Event::PositionClosed);
        assert_eq!(next, MachineState::Scan);
    }

    #[test]
    fn test_reversal_counted_once_per_bar() {
        let entry_bar_at = Utc::now();
        let state = MachineState::Manage {
            signal: signal(),
            entry_bar_at,
            last_reversal_at: None,
        };
        let first = entry_bar_at + Duration::minutes(30);

        let (state, effects) = transition(state, Event::ReversalDetected(first));
        assert_eq!(effects, vec![Effect::Reversal]);
        let (state, effects) = transition(state, Event::ReversalDetected(first));
        assert!(effects.is_empty());
        let (_, effects) = transition(state, Event::ReversalDetected(entry_bar_at - Duration::minutes(5)));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_unrelated_event_is_ignored() {
        let (state, effects) = transition(MachineState::Scan, Event::Executed(signal()));
        assert_eq!(state, MachineState::Scan);
        assert!(effects.is_empty());
    }
}
