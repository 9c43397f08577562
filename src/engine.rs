//! Flow engine: starts, advances, cancels and completes guided dialogs.
//!
//! Every operation takes the user's session slot for its whole duration,
//! including synthesizer calls and journal writes, so operations for one
//! user apply strictly one after another. Operations return the replies to
//! send; delivery is the caller's job.

use std::sync::Arc;

use crate::channels::{Keyboard, OutgoingResponse};
use crate::config::EngineConfig;
use crate::flows::{Answers, FlowKind, PromptSource, StepSpec, definition, prompts};
use crate::llm::{Synthesizer, generate_bounded};
use crate::scheduler::ScheduleHandle;
use crate::session::{Session, SessionRegistry};
use crate::store::{EntryKind, JournalEntry, JournalStore, UserRegistry};

/// The main menu keyboard.
pub fn main_menu() -> Keyboard {
    Keyboard::new(
        prompts::MENU_BUTTONS
            .iter()
            .map(|row| row.iter().map(|label| label.to_string()).collect())
            .collect(),
    )
}

/// Shared components the engine works against.
pub struct EngineDeps {
    pub sessions: Arc<SessionRegistry>,
    pub journal: Arc<dyn JournalStore>,
    pub registry: Arc<dyn UserRegistry>,
    pub synth: Arc<dyn Synthesizer>,
    /// Arms the daily invitation for new registrations.
    pub schedule: Option<ScheduleHandle>,
}

pub struct FlowEngine {
    config: EngineConfig,
    deps: EngineDeps,
}

impl FlowEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        Self { config, deps }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.deps.sessions
    }

    /// Start `kind` for the user. Rejected while another flow is active; the
    /// active flow is left untouched.
    pub async fn start_flow(&self, user_id: &str, kind: FlowKind) -> Vec<OutgoingResponse> {
        let mut slot = self.deps.sessions.lock(user_id).await;

        if let Some(active) = slot.as_ref() {
            tracing::info!(
                user_id,
                flow = %kind,
                active = %active.state,
                "Start rejected, flow already active"
            );
            return vec![OutgoingResponse::text(prompts::busy(active.kind().label()))];
        }

        let session = Session::new(user_id, kind);
        let step = definition(kind).initial();
        let prompt = self.render_prompt(user_id, step, &session.answers).await;
        tracing::info!(user_id, flow = %kind, state = %session.state, "Flow started");
        *slot = Some(session);

        vec![OutgoingResponse::text(prompt)]
    }

    /// Apply one inbound text. With an active flow the text answers the
    /// current step; otherwise it goes to the free-form assistant.
    pub async fn handle_input(&self, user_id: &str, text: &str) -> Vec<OutgoingResponse> {
        let mut slot = self.deps.sessions.lock(user_id).await;

        let Some(session) = slot.as_mut() else {
            return vec![self.free_form(user_id, text).await];
        };

        let def = definition(session.kind());
        let Some(step) = def.step(session.state) else {
            tracing::error!(user_id, state = %session.state, "Session state not in its flow; clearing");
            *slot = None;
            return vec![OutgoingResponse::text(prompts::CANCELLED).with_keyboard(main_menu())];
        };

        session.answers.insert(step.field, text.to_string());
        tracing::debug!(user_id, flow = %def.kind, state = %session.state, field = step.field, "Answer stored");

        if !def.is_last(session.state) {
            let Some(next) = def.next_after(session.state) else {
                tracing::error!(user_id, state = %session.state, "No step after non-final state; clearing");
                *slot = None;
                return vec![OutgoingResponse::text(prompts::CANCELLED).with_keyboard(main_menu())];
            };
            session.state = next.state;
            let answers = session.answers.clone();
            let prompt = self.render_prompt(user_id, next, &answers).await;
            tracing::info!(user_id, flow = %def.kind, state = %next.state, "Flow advanced");
            return vec![OutgoingResponse::text(prompt)];
        }

        // Last step answered. The session leaves the registry before the
        // terminal action runs; the slot guard keeps the user serialized.
        let Some(session) = slot.take() else {
            return Vec::new();
        };
        self.complete(session).await
    }

    /// Drop any active flow for the user.
    pub async fn cancel(&self, user_id: &str) -> Vec<OutgoingResponse> {
        let cleared = self.deps.sessions.lock(user_id).await.take();
        let text = match cleared {
            Some(session) => {
                tracing::info!(user_id, flow = %session.kind(), state = %session.state, "Flow cancelled");
                prompts::CANCELLED
            }
            None => prompts::NOTHING_TO_CANCEL,
        };
        vec![OutgoingResponse::text(text).with_keyboard(main_menu())]
    }

    /// Persist the user as the invitation recipient and arm the daily job.
    /// A storage failure still produces a greeting.
    pub async fn register(&self, user_id: &str) -> Vec<OutgoingResponse> {
        let text = match self.deps.registry.register(user_id).await {
            Ok(registration) => {
                tracing::info!(user_id, registered_at = %registration.registered_at, "User registered");
                if let Some(schedule) = &self.deps.schedule {
                    schedule.arm(user_id);
                }
                prompts::GREETING
            }
            Err(e) => {
                tracing::error!(user_id, "Failed to persist registration: {}", e);
                prompts::REGISTRATION_FAILED
            }
        };
        vec![OutgoingResponse::text(text).with_keyboard(main_menu())]
    }

    /// One-shot journal entry tagged with the mood the synthesizer reads
    /// from the text.
    pub async fn quick_note(&self, user_id: &str, text: &str) -> Vec<OutgoingResponse> {
        let _slot = self.deps.sessions.lock(user_id).await;

        let mood = match generate_bounded(
            self.deps.synth.as_ref(),
            &prompts::mood_prompt(text),
            self.config.synth_timeout,
        )
        .await
        {
            Ok(mood) => mood,
            Err(e) => {
                tracing::warn!(user_id, "Mood extraction failed, using fallback: {}", e);
                prompts::MOOD_UNKNOWN.to_string()
            }
        };

        let entry =
            JournalEntry::new(user_id, EntryKind::QuickNote, text.to_string(), false).with_mood(&mood);
        match self.deps.journal.append(&entry).await {
            Ok(()) => {
                tracing::info!(user_id, entry_id = %entry.id, "Quick note saved");
                vec![OutgoingResponse::text(prompts::COMPLETED)]
            }
            Err(e) => {
                tracing::error!(user_id, "Failed to save quick note: {}", e);
                vec![OutgoingResponse::text(format!(
                    "{}\n\n{}",
                    prompts::COMPLETED_NOT_SAVED,
                    text.trim()
                ))]
            }
        }
    }

    /// Terminal action: summarize, journal, acknowledge.
    async fn complete(&self, session: Session) -> Vec<OutgoingResponse> {
        let user_id = session.user_id.as_str();
        let def = definition(session.kind());
        let plan = def.terminal(&session.answers);

        let (summary, synthesized) = match generate_bounded(
            self.deps.synth.as_ref(),
            &plan.prompt,
            self.config.synth_timeout,
        )
        .await
        {
            Ok(text) => (text, true),
            Err(e) => {
                tracing::warn!(user_id, flow = %def.kind, "Summary synthesis failed, using fallback: {}", e);
                (plan.fallback_summary, false)
            }
        };

        let mut entry = JournalEntry::new(user_id, EntryKind::Flow(def.kind), summary, synthesized);
        if self.config.journal_raw_answers {
            entry = entry.with_answers(def.labelled_pairs(&session.answers));
        }

        match self.deps.journal.append(&entry).await {
            Ok(()) => {
                tracing::info!(user_id, flow = %def.kind, entry_id = %entry.id, synthesized, "Flow completed");
                vec![
                    OutgoingResponse::text(entry.summary),
                    OutgoingResponse::text(prompts::COMPLETED).with_keyboard(main_menu()),
                ]
            }
            Err(e) => {
                tracing::error!(user_id, flow = %def.kind, "Journal write failed: {}", e);
                vec![
                    OutgoingResponse::text(format!(
                        "{}\n\n{}",
                        prompts::COMPLETED_NOT_SAVED,
                        entry.summary
                    ))
                    .with_keyboard(main_menu()),
                ]
            }
        }
    }

    /// Text sent on entering `step`.
    async fn render_prompt(&self, user_id: &str, step: &StepSpec, answers: &Answers) -> String {
        match step.prompt {
            PromptSource::Static(text) => text.to_string(),
            PromptSource::Derived { build, fallback } => {
                match generate_bounded(
                    self.deps.synth.as_ref(),
                    &build(answers),
                    self.config.synth_timeout,
                )
                .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(user_id, state = %step.state, "Prompt synthesis failed, using fallback: {}", e);
                        fallback.to_string()
                    }
                }
            }
        }
    }

    async fn free_form(&self, user_id: &str, text: &str) -> OutgoingResponse {
        match generate_bounded(self.deps.synth.as_ref(), text, self.config.synth_timeout).await {
            Ok(reply) => OutgoingResponse::text(reply),
            Err(e) => {
                tracing::warn!(user_id, "Assistant reply failed: {}", e);
                OutgoingResponse::text(prompts::assistant_error(prompts::synth_failure(&e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::error::{JournalError, SynthError};
    use crate::flows::{DiaryStep, FlowState, SosStep};
    use crate::llm::DisabledSynthesizer;
    use crate::store::{MemoryJournal, MemoryRegistry};

    /// Records prompts and answers with a fixed text.
    struct Echo {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Synthesizer for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, prompt: &str) -> Result<String, SynthError> {
            self.prompts.lock().await.push(prompt.to_string());
            Ok("gerado".into())
        }
    }

    struct BrokenJournal;

    #[async_trait]
    impl JournalStore for BrokenJournal {
        async fn append(&self, _entry: &JournalEntry) -> Result<(), JournalError> {
            Err(JournalError::Write("disk full".into()))
        }
    }

    fn engine_with(
        synth: Arc<dyn Synthesizer>,
        journal: Arc<dyn JournalStore>,
    ) -> FlowEngine {
        FlowEngine::new(
            EngineConfig::default(),
            EngineDeps {
                sessions: Arc::new(SessionRegistry::new()),
                journal,
                registry: Arc::new(MemoryRegistry::new(true)),
                synth,
                schedule: None,
            },
        )
    }

    #[tokio::test]
    async fn start_sends_initial_prompt() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        let replies = engine.start_flow("42", FlowKind::Sos).await;
        assert_eq!(replies, vec![OutgoingResponse::text(prompts::SOS_ORIGINAL_THOUGHT)]);
        let session = engine.sessions().get("42").await.unwrap();
        assert_eq!(session.state, FlowState::Sos(SosStep::OriginalThought));
    }

    #[tokio::test]
    async fn busy_start_keeps_active_flow() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        engine.start_flow("42", FlowKind::Diary).await;
        engine.handle_input("42", "algo").await;

        let replies = engine.start_flow("42", FlowKind::Sos).await;
        assert!(replies[0].content.contains("Diário Pessoal"));
        let session = engine.sessions().get("42").await.unwrap();
        assert_eq!(session.state, FlowState::Diary(DiaryStep::DeepenReflection));
    }

    #[tokio::test]
    async fn derived_prompt_uses_synthesizer() {
        let echo = Arc::new(Echo {
            prompts: Mutex::new(Vec::new()),
        });
        let engine = engine_with(echo.clone(), Arc::new(MemoryJournal::new()));
        engine.start_flow("42", FlowKind::Diary).await;
        let replies = engine.handle_input("42", "Tive um dia difícil").await;

        assert_eq!(replies, vec![OutgoingResponse::text("gerado")]);
        assert!(echo.prompts.lock().await[0].contains("Tive um dia difícil"));
    }

    #[tokio::test]
    async fn derived_prompt_falls_back() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        engine.start_flow("42", FlowKind::Diary).await;
        let replies = engine.handle_input("42", "Tive um dia difícil").await;
        assert_eq!(replies, vec![OutgoingResponse::text(prompts::DIARY_DEEPEN_FALLBACK)]);
    }

    #[tokio::test]
    async fn free_form_without_session() {
        let engine = engine_with(
            Arc::new(Echo {
                prompts: Mutex::new(Vec::new()),
            }),
            Arc::new(MemoryJournal::new()),
        );
        assert_eq!(
            engine.handle_input("42", "Olá").await,
            vec![OutgoingResponse::text("gerado")]
        );
    }

    #[tokio::test]
    async fn free_form_failure_names_the_cause() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        let replies = engine.handle_input("42", "Olá").await;
        assert!(replies[0].content.contains("não está configurado"));
    }

    #[tokio::test]
    async fn journal_failure_still_clears_session() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(BrokenJournal));
        engine.start_flow("42", FlowKind::MorningRoutine).await;
        let mut last = Vec::new();
        for answer in ["Sou capaz", "Mereço descanso", "7", "Caminhar"] {
            last = engine.handle_input("42", answer).await;
        }
        assert!(engine.sessions().get("42").await.is_none());
        assert!(last[0].content.starts_with(prompts::COMPLETED_NOT_SAVED));
        assert!(last[0].content.contains("Caminhar"));
    }

    #[tokio::test]
    async fn cancel_without_session() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        let replies = engine.cancel("42").await;
        assert_eq!(replies[0].content, prompts::NOTHING_TO_CANCEL);
        assert_eq!(replies[0].keyboard, Some(main_menu()));
    }

    #[tokio::test]
    async fn quick_note_falls_back_to_unknown_mood() {
        let journal = Arc::new(MemoryJournal::new());
        let engine = engine_with(Arc::new(DisabledSynthesizer), journal.clone());
        engine.quick_note("42", "Dormi bem").await;

        let entries = journal.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::QuickNote);
        assert_eq!(entries[0].mood.as_deref(), Some(prompts::MOOD_UNKNOWN));
        assert_eq!(entries[0].summary, "Dormi bem");
    }

    #[tokio::test]
    async fn register_replies_with_menu() {
        let engine = engine_with(Arc::new(DisabledSynthesizer), Arc::new(MemoryJournal::new()));
        let replies = engine.register("42").await;
        assert_eq!(replies[0].content, prompts::GREETING);
        assert_eq!(replies[0].keyboard, Some(main_menu()));
        assert_eq!(
            engine.deps.registry.load().await.unwrap().unwrap().user_id,
            "42"
        );
    }

    #[test]
    fn main_menu_has_every_flow() {
        let menu = main_menu();
        for kind in FlowKind::ALL {
            assert!(menu.labels().any(|label| label.contains(kind.label())));
        }
    }
}
