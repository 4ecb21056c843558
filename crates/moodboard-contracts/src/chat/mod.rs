mod classifier;
mod command_parser;
mod command_registry;

pub use classifier::{
    classify, normalize_caption, CaptionKeywords, PhotoIntent, SaveTrigger,
    DEFAULT_SAVE_KEYWORDS,
};
pub use command_parser::{parse_input, ChatInput};
pub use command_registry::{find_command, menu_commands, BotAction, CommandSpec, COMMANDS};
