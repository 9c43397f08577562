//! Parses inbound text into commands.
//!
//! Slash commands and menu phrases are matched case-insensitively after
//! trimming. Menu buttons carry a leading emoji, which is ignored.

use crate::flows::FlowKind;

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`, `/registrar`.
    Register,
    /// A flow's command or menu phrase.
    StartFlow(FlowKind),
    /// `/diario <texto>`: a one-shot journal entry.
    QuickNote(String),
    /// "Assistente Inteligente".
    AssistantInfo,
    /// `/menu`.
    Menu,
    /// `/ajuda`, `/help`.
    Help,
    /// `/cancelar`, `/cancel`.
    Cancel,
    /// Anything else: an answer to the active step or a free-form question.
    Input(String),
}

impl Command {
    pub fn parse(content: &str) -> Command {
        let trimmed = content.trim();
        if trimmed.starts_with('/') {
            if let Some(command) = parse_slash(trimmed) {
                return command;
            }
        } else if let Some(command) = parse_phrase(trimmed) {
            return command;
        }
        Command::Input(content.to_string())
    }
}

/// `/name[@bot] [args]`.
fn parse_slash(trimmed: &str) -> Option<Command> {
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    let command = match name.as_str() {
        "/start" | "/registrar" => Command::Register,
        "/diario" | "/diário" if !rest.is_empty() => Command::QuickNote(rest.to_string()),
        "/diario" | "/diário" => Command::StartFlow(FlowKind::Diary),
        "/sos" => Command::StartFlow(FlowKind::Sos),
        "/rotina" => Command::StartFlow(FlowKind::MorningRoutine),
        "/menu" => Command::Menu,
        "/ajuda" | "/help" => Command::Help,
        "/cancelar" | "/cancel" => Command::Cancel,
        _ => return None,
    };
    Some(command)
}

/// Menu phrases, with or without the button's emoji.
fn parse_phrase(trimmed: &str) -> Option<Command> {
    let phrase = trimmed
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim()
        .to_lowercase();

    let command = match phrase.as_str() {
        "diário pessoal" | "diario pessoal" => Command::StartFlow(FlowKind::Diary),
        "sos mente ansiosa" => Command::StartFlow(FlowKind::Sos),
        "rotina matinal" | "iniciar rotina matinal" => {
            Command::StartFlow(FlowKind::MorningRoutine)
        }
        "assistente inteligente" => Command::AssistantInfo,
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::main_menu;
    use crate::scheduler::START_ROUTINE_BUTTON;

    #[test]
    fn test_parse_registration() {
        assert_eq!(Command::parse("/start"), Command::Register);
        assert_eq!(Command::parse("/registrar"), Command::Register);
        assert_eq!(Command::parse("/start@AlexBot"), Command::Register);
    }

    #[test]
    fn test_parse_flow_commands() {
        assert_eq!(Command::parse("/diario"), Command::StartFlow(FlowKind::Diary));
        assert_eq!(Command::parse("/SOS"), Command::StartFlow(FlowKind::Sos));
        assert_eq!(
            Command::parse("  /rotina  "),
            Command::StartFlow(FlowKind::MorningRoutine)
        );
    }

    #[test]
    fn test_parse_quick_note_keeps_text() {
        assert_eq!(
            Command::parse("/diario Hoje Correu Bem"),
            Command::QuickNote("Hoje Correu Bem".into())
        );
    }

    #[test]
    fn test_parse_cancel_and_help() {
        assert_eq!(Command::parse("/cancelar"), Command::Cancel);
        assert_eq!(Command::parse("/cancel"), Command::Cancel);
        assert_eq!(Command::parse("/ajuda"), Command::Help);
        assert_eq!(Command::parse("/menu"), Command::Menu);
    }

    #[test]
    fn test_parse_every_menu_button() {
        let expected = [
            Command::StartFlow(FlowKind::Diary),
            Command::StartFlow(FlowKind::Sos),
            Command::StartFlow(FlowKind::MorningRoutine),
            Command::AssistantInfo,
        ];
        let parsed: Vec<Command> = main_menu().labels().map(Command::parse).collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_parse_invitation_button() {
        assert_eq!(
            Command::parse(START_ROUTINE_BUTTON),
            Command::StartFlow(FlowKind::MorningRoutine)
        );
    }

    #[test]
    fn test_parse_phrase_case_insensitive() {
        assert_eq!(
            Command::parse("diário PESSOAL"),
            Command::StartFlow(FlowKind::Diary)
        );
    }

    #[test]
    fn test_parse_fallback_is_verbatim_input() {
        assert_eq!(
            Command::parse(" Tive um dia difícil "),
            Command::Input(" Tive um dia difícil ".into())
        );
        assert_eq!(Command::parse("/desconhecido"), Command::Input("/desconhecido".into()));
        // A phrase inside a longer answer is still an answer.
        assert_eq!(
            Command::parse("Hoje fiz a rotina matinal"),
            Command::Input("Hoje fiz a rotina matinal".into())
        );
    }
}
