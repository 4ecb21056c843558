use super::command_registry::{find_command, BotAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Noop,
    Command(BotAction),
    Unknown { command: String },
    Text(String),
}

/// Parses a text message. Group chats address commands as `/status@SomeBot`;
/// the command name stops at the `@`, and arguments are ignored.
pub fn parse_input(text: &str) -> ChatInput {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatInput::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            if let Some(spec) = find_command(&command) {
                return ChatInput::Command(spec.action);
            }
            return ChatInput::Unknown { command };
        }
    }

    ChatInput::Text(raw_trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_input, BotAction, ChatInput};

    #[test]
    fn parse_registered_commands() {
        assert_eq!(parse_input("/start"), ChatInput::Command(BotAction::Start));
        assert_eq!(
            parse_input("  /SET_STYLE "),
            ChatInput::Command(BotAction::SetStyle)
        );
        assert_eq!(
            parse_input("/done_style"),
            ChatInput::Command(BotAction::DoneStyle)
        );
        assert_eq!(
            parse_input("/clear_style now"),
            ChatInput::Command(BotAction::ClearStyle)
        );
    }

    #[test]
    fn parse_strips_bot_mention() {
        assert_eq!(
            parse_input("/status@moodboard_bot"),
            ChatInput::Command(BotAction::Status)
        );
        assert_eq!(
            parse_input("/magic@moodboard_bot foo bar"),
            ChatInput::Unknown {
                command: "magic".to_string(),
            }
        );
    }

    #[test]
    fn parse_plain_text_and_blank() {
        assert_eq!(parse_input("   "), ChatInput::Noop);
        assert_eq!(
            parse_input(" hello there "),
            ChatInput::Text("hello there".to_string())
        );
        assert_eq!(parse_input("/ nope"), ChatInput::Text("/ nope".to_string()));
    }
}
