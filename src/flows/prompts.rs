//! User-facing texts and synthesizer prompts for the guided flows.

use super::definition::{Answers, FlowDefinition};
use crate::error::SynthError;

// ── Diary ───────────────────────────────────────────────────────────

pub const DIARY_MAIN_MOMENT: &str = "\
Vamos escrever o seu diário de hoje. 📝

Qual foi o momento mais marcante do seu dia?";

pub const DIARY_DEEPEN_FALLBACK: &str = "\
Obrigado por partilhar. 💛 Como se sentiu nesse momento, e porque acha que foi tão marcante?";

pub const DIARY_BODY_SENSATION: &str = "\
Onde sentiu isso no corpo? Descreva qualquer sensação física (tensão, aperto, leveza...).";

pub const DIARY_GRATITUDE: &str = "\
Pelo que se sente grato hoje? Pode ser algo pequeno.";

pub const DIARY_FINAL_THOUGHT: &str = "\
Para fechar: que pensamento ou intenção quer levar consigo para amanhã?";

/// Synthesizer prompt for the dynamic second Diary question.
pub fn diary_deepen_prompt(answers: &Answers) -> String {
    let moment = answers.get("main_moment").map(String::as_str).unwrap_or("");
    format!(
        "Uma pessoa está a escrever o seu diário e partilhou o momento mais marcante do dia:\n\
         \"{moment}\"\n\n\
         Faça UMA pergunta curta e empática que a ajude a aprofundar a reflexão sobre este \
         momento. Responda apenas com a pergunta."
    )
}

// ── SOS ─────────────────────────────────────────────────────────────

pub const SOS_ORIGINAL_THOUGHT: &str = "\
Vamos fazer juntos um exercício para acalmar a mente. 🫂

Qual é o pensamento ansioso que está a ter agora? Escreva-o tal como lhe surge.";

pub const SOS_EVIDENCE_FOR: &str = "\
Que factos apoiam este pensamento? Só factos, não interpretações.";

pub const SOS_EVIDENCE_AGAINST: &str = "\
E que factos contrariam este pensamento, ou mostram que pode não ser totalmente verdade?";

pub const SOS_KINDER_REFRAME: &str = "\
Olhando para os dois lados, como poderia reformular esse pensamento de forma mais equilibrada e gentil consigo?";

// ── Morning routine ─────────────────────────────────────────────────

pub const MORNING_AFFIRMATION: &str = "\
Bom dia! ☀️ Vamos começar a Rotina Matinal.

Escreva uma afirmação positiva para hoje.";

pub const MORNING_BELIEF_TODAY: &str = "\
Em que é que escolhe acreditar hoje sobre si?";

pub const MORNING_CERTAINTY_RATING: &str = "\
De 1 a 10, quão certo se sente dessa crença neste momento?";

pub const MORNING_DAILY_INTENTION: &str = "\
Qual é a sua intenção principal para o dia de hoje?";

/// Invitation sent by the scheduler each morning.
pub const MORNING_INVITATION: &str = "\
Bom dia! ☀️ Está na hora da sua Rotina Matinal. Toque em \"Iniciar Rotina Matinal\" quando estiver pronto.";

// ── Terminal synthesis ──────────────────────────────────────────────

pub fn diary_synthesis_prompt(def: &FlowDefinition, answers: &Answers) -> String {
    format!(
        "Com base nas respostas abaixo, escreva uma entrada de diário na primeira pessoa, \
         em 1 a 2 parágrafos, acolhedora e fiel ao que foi dito. Não invente factos.\n\n{}",
        def.labelled_answers(answers)
    )
}

pub fn sos_synthesis_prompt(def: &FlowDefinition, answers: &Answers) -> String {
    format!(
        "Resuma este exercício de reestruturação cognitiva num registo curto para o diário: \
         o pensamento original, o que o apoia, o que o contraria e a reformulação final. \
         Termine com uma frase de encorajamento.\n\n{}",
        def.labelled_answers(answers)
    )
}

pub fn morning_synthesis_prompt(def: &FlowDefinition, answers: &Answers) -> String {
    format!(
        "Escreva um resumo motivador da rotina matinal abaixo, em 3 a 4 frases, \
         retomando a afirmação, a crença, o grau de certeza e a intenção do dia.\n\n{}",
        def.labelled_answers(answers)
    )
}

// ── Quick entry ─────────────────────────────────────────────────────

/// Mood recorded when the synthesizer cannot classify a quick entry.
pub const MOOD_UNKNOWN: &str = "Não identificado";

pub fn mood_prompt(text: &str) -> String {
    format!("Dado este texto, extrai o humor principal. Responda apenas com o humor. Texto: {text}")
}

// ── Menu and acknowledgments ────────────────────────────────────────

/// Main menu buttons, two per row.
pub const MENU_BUTTONS: [[&str; 2]; 2] = [
    ["📝 Diário Pessoal", "🆘 SOS Mente Ansiosa"],
    ["☀️ Rotina Matinal", "🤖 Assistente Inteligente"],
];

pub const GREETING: &str = "\
Olá! Eu sou o Alex, o seu assistente de reflexão. Fica registado para receber o convite da Rotina Matinal todas as manhãs. Como se sente hoje?";

pub const REGISTRATION_FAILED: &str = "\
Olá! Eu sou o Alex. Não consegui guardar o seu registo agora, por isso o convite matinal pode não chegar. Pode tentar /registrar mais tarde.";

pub const MENU_HINT: &str = "Escolha uma opção no menu ou escreva livremente.";

pub const HELP: &str = "\
Comandos disponíveis:
/diario - Diário Pessoal (ou /diario <texto> para um registo rápido)
/sos - SOS Mente Ansiosa
/rotina - Rotina Matinal
/cancelar - cancelar o exercício em curso
/registrar - receber o convite matinal

Qualquer outra mensagem vai para o Assistente Inteligente.";

pub const ASSISTANT_INFO: &str = "\
Modo Assistente Inteligente: escreva a sua pergunta ou o que lhe vai na mente e eu respondo.";

pub const CANCELLED: &str = "Exercício cancelado. Quando quiser, escolha outra opção no menu.";

pub const NOTHING_TO_CANCEL: &str = "Não há nenhum exercício em curso.";

pub const COMPLETED: &str = "O seu registo no diário foi guardado com sucesso! ✨";

pub const COMPLETED_NOT_SAVED: &str = "\
Exercício concluído, mas não consegui guardar o registo no diário. Aqui fica o resumo:";

pub fn busy(active: &str) -> String {
    format!(
        "Já tem o exercício \"{active}\" em curso. Termine-o primeiro ou use /cancelar."
    )
}

pub fn assistant_error(reason: &str) -> String {
    format!("Desculpe, houve um erro ao processar o seu pedido: {reason}")
}

/// Short Portuguese description of a synthesizer failure, for the user.
pub fn synth_failure(err: &SynthError) -> &'static str {
    match err {
        SynthError::Timeout(_) => "o serviço demorou demasiado a responder",
        SynthError::Quota(_) => "o limite de utilização do serviço foi atingido",
        SynthError::Transport(_) => "não foi possível contactar o serviço",
        SynthError::Disabled => "o assistente não está configurado",
        SynthError::Other(_) => "ocorreu um erro inesperado",
    }
}
