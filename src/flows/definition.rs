//! Declarative state tables for the guided flows.
//!
//! Each flow is an ordered list of steps. Entering a step sends its prompt;
//! the next reply is stored under the step's field. The answer to the last
//! step triggers the flow's terminal action.

use std::collections::HashMap;

use super::prompts;
use super::state::{DiaryStep, FlowKind, FlowState, MorningStep, SosStep};

/// Answers collected so far, keyed by field name.
pub type Answers = HashMap<&'static str, String>;

/// Where the text for entering a step comes from.
#[derive(Clone, Copy)]
pub enum PromptSource {
    /// Fixed template.
    Static(&'static str),
    /// Generated by the synthesizer from the prior answers, with a fixed
    /// question used when synthesis fails.
    Derived {
        build: fn(&Answers) -> String,
        fallback: &'static str,
    },
}

impl std::fmt::Debug for PromptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Derived { fallback, .. } => f
                .debug_struct("Derived")
                .field("fallback", fallback)
                .finish_non_exhaustive(),
        }
    }
}

/// One step of a flow.
#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub state: FlowState,
    /// Key the reply is stored under.
    pub field: &'static str,
    /// Label used when answers are shown to the synthesizer or journaled.
    pub label: &'static str,
    pub prompt: PromptSource,
}

/// Immutable description of one flow.
pub struct FlowDefinition {
    pub kind: FlowKind,
    pub steps: &'static [StepSpec],
    synthesis: fn(&FlowDefinition, &Answers) -> String,
}

impl std::fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("kind", &self.kind)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// What the terminal action needs: a synthesis prompt and the text used if
/// synthesis fails.
#[derive(Debug, Clone)]
pub struct TerminalPlan {
    pub prompt: String,
    pub fallback_summary: String,
}

impl FlowDefinition {
    /// The step a new session starts at.
    pub fn initial(&self) -> &StepSpec {
        &self.steps[0]
    }

    pub fn step(&self, state: FlowState) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.state == state)
    }

    /// The step following `state`, or `None` when `state` is the last one.
    pub fn next_after(&self, state: FlowState) -> Option<&StepSpec> {
        let idx = self.steps.iter().position(|s| s.state == state)?;
        self.steps.get(idx + 1)
    }

    pub fn is_last(&self, state: FlowState) -> bool {
        self.steps.last().is_some_and(|s| s.state == state)
    }

    /// Answers as `(label, value)` pairs, in step order.
    pub fn labelled_pairs(&self, answers: &Answers) -> Vec<(String, String)> {
        self.steps
            .iter()
            .filter_map(|step| {
                answers
                    .get(step.field)
                    .map(|value| (step.label.to_string(), value.clone()))
            })
            .collect()
    }

    /// Answers rendered as `Label: value` lines, in step order.
    pub fn labelled_answers(&self, answers: &Answers) -> String {
        self.labelled_pairs(answers)
            .into_iter()
            .map(|(label, value)| format!("{label}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the terminal action inputs for the full answer set.
    pub fn terminal(&self, answers: &Answers) -> TerminalPlan {
        TerminalPlan {
            prompt: (self.synthesis)(self, answers),
            fallback_summary: self.labelled_answers(answers),
        }
    }
}

static DIARY_STEPS: [StepSpec; 5] = [
    StepSpec {
        state: FlowState::Diary(DiaryStep::MainMoment),
        field: "main_moment",
        label: "Momento marcante",
        prompt: PromptSource::Static(prompts::DIARY_MAIN_MOMENT),
    },
    StepSpec {
        state: FlowState::Diary(DiaryStep::DeepenReflection),
        field: "deepen_reflection",
        label: "Reflexão",
        prompt: PromptSource::Derived {
            build: prompts::diary_deepen_prompt,
            fallback: prompts::DIARY_DEEPEN_FALLBACK,
        },
    },
    StepSpec {
        state: FlowState::Diary(DiaryStep::BodySensation),
        field: "body_sensation",
        label: "Sensação no corpo",
        prompt: PromptSource::Static(prompts::DIARY_BODY_SENSATION),
    },
    StepSpec {
        state: FlowState::Diary(DiaryStep::Gratitude),
        field: "gratitude",
        label: "Gratidão",
        prompt: PromptSource::Static(prompts::DIARY_GRATITUDE),
    },
    StepSpec {
        state: FlowState::Diary(DiaryStep::FinalThought),
        field: "final_thought",
        label: "Pensamento final",
        prompt: PromptSource::Static(prompts::DIARY_FINAL_THOUGHT),
    },
];

static SOS_STEPS: [StepSpec; 4] = [
    StepSpec {
        state: FlowState::Sos(SosStep::OriginalThought),
        field: "original_thought",
        label: "Pensamento original",
        prompt: PromptSource::Static(prompts::SOS_ORIGINAL_THOUGHT),
    },
    StepSpec {
        state: FlowState::Sos(SosStep::EvidenceFor),
        field: "evidence_for",
        label: "Evidências a favor",
        prompt: PromptSource::Static(prompts::SOS_EVIDENCE_FOR),
    },
    StepSpec {
        state: FlowState::Sos(SosStep::EvidenceAgainst),
        field: "evidence_against",
        label: "Evidências contra",
        prompt: PromptSource::Static(prompts::SOS_EVIDENCE_AGAINST),
    },
    StepSpec {
        state: FlowState::Sos(SosStep::KinderReframe),
        field: "kinder_reframe",
        label: "Reformulação",
        prompt: PromptSource::Static(prompts::SOS_KINDER_REFRAME),
    },
];

static MORNING_STEPS: [StepSpec; 4] = [
    StepSpec {
        state: FlowState::MorningRoutine(MorningStep::Affirmation),
        field: "affirmation",
        label: "Afirmação",
        prompt: PromptSource::Static(prompts::MORNING_AFFIRMATION),
    },
    StepSpec {
        state: FlowState::MorningRoutine(MorningStep::BeliefToday),
        field: "belief_today",
        label: "Crença de hoje",
        prompt: PromptSource::Static(prompts::MORNING_BELIEF_TODAY),
    },
    StepSpec {
        state: FlowState::MorningRoutine(MorningStep::CertaintyRating),
        field: "certainty_rating",
        label: "Certeza (1-10)",
        prompt: PromptSource::Static(prompts::MORNING_CERTAINTY_RATING),
    },
    StepSpec {
        state: FlowState::MorningRoutine(MorningStep::DailyIntention),
        field: "daily_intention",
        label: "Intenção do dia",
        prompt: PromptSource::Static(prompts::MORNING_DAILY_INTENTION),
    },
];

static DIARY: FlowDefinition = FlowDefinition {
    kind: FlowKind::Diary,
    steps: &DIARY_STEPS,
    synthesis: prompts::diary_synthesis_prompt,
};

static SOS: FlowDefinition = FlowDefinition {
    kind: FlowKind::Sos,
    steps: &SOS_STEPS,
    synthesis: prompts::sos_synthesis_prompt,
};

static MORNING_ROUTINE: FlowDefinition = FlowDefinition {
    kind: FlowKind::MorningRoutine,
    steps: &MORNING_STEPS,
    synthesis: prompts::morning_synthesis_prompt,
};

/// The definition for a flow kind.
pub fn definition(kind: FlowKind) -> &'static FlowDefinition {
    match kind {
        FlowKind::Diary => &DIARY,
        FlowKind::Sos => &SOS,
        FlowKind::MorningRoutine => &MORNING_ROUTINE,
    }
}
