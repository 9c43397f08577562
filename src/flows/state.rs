//! Flow kinds and their named states.
//!
//! A session's position is a [`FlowState`]: the flow kind and the step are
//! carried together, so a session can never hold a step that belongs to a
//! different flow.

use serde::{Deserialize, Serialize};

/// The guided dialogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Diary,
    Sos,
    MorningRoutine,
}

impl FlowKind {
    pub const ALL: [FlowKind; 3] = [FlowKind::Diary, FlowKind::Sos, FlowKind::MorningRoutine];

    /// Human-facing name, as shown on the menu and in journal headers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Diary => "Diário Pessoal",
            Self::Sos => "SOS Mente Ansiosa",
            Self::MorningRoutine => "Rotina Matinal",
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Diary => "diary",
            Self::Sos => "sos",
            Self::MorningRoutine => "morning_routine",
        };
        write!(f, "{s}")
    }
}

/// Steps of the Diary flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiaryStep {
    MainMoment,
    DeepenReflection,
    BodySensation,
    Gratitude,
    FinalThought,
}

/// Steps of the SOS (cognitive reappraisal) flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosStep {
    OriginalThought,
    EvidenceFor,
    EvidenceAgainst,
    KinderReframe,
}

/// Steps of the morning routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorningStep {
    Affirmation,
    BeliefToday,
    CertaintyRating,
    DailyIntention,
}

/// Position of an active session: flow kind plus the step awaiting an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "flow", content = "step", rename_all = "snake_case")]
pub enum FlowState {
    Diary(DiaryStep),
    Sos(SosStep),
    MorningRoutine(MorningStep),
}

impl FlowState {
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Diary(_) => FlowKind::Diary,
            Self::Sos(_) => FlowKind::Sos,
            Self::MorningRoutine(_) => FlowKind::MorningRoutine,
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            Self::Diary(s) => match s {
                DiaryStep::MainMoment => "main_moment",
                DiaryStep::DeepenReflection => "deepen_reflection",
                DiaryStep::BodySensation => "body_sensation",
                DiaryStep::Gratitude => "gratitude",
                DiaryStep::FinalThought => "final_thought",
            },
            Self::Sos(s) => match s {
                SosStep::OriginalThought => "original_thought",
                SosStep::EvidenceFor => "evidence_for",
                SosStep::EvidenceAgainst => "evidence_against",
                SosStep::KinderReframe => "kinder_reframe",
            },
            Self::MorningRoutine(s) => match s {
                MorningStep::Affirmation => "affirmation",
                MorningStep::BeliefToday => "belief_today",
                MorningStep::CertaintyRating => "certainty_rating",
                MorningStep::DailyIntention => "daily_intention",
            },
        };
        write!(f, "{}.{step}", self.kind())
    }
}
