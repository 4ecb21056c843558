#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotAction {
    Start,
    Help,
    SetStyle,
    DoneStyle,
    ClearStyle,
    Status,
}

#[derive(Clone, Copy, Debug)]
pub struct CommandSpec {
    pub command: &'static str,
    pub action: BotAction,
    pub description: &'static str,
    /// Listed in the transport's command menu.
    pub menu: bool,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "start",
        action: BotAction::Start,
        description: "Start the bot and show the instructions",
        menu: true,
    },
    CommandSpec {
        command: "set_style",
        action: BotAction::SetStyle,
        description: "Start sending mood reference images",
        menu: true,
    },
    CommandSpec {
        command: "done_style",
        action: BotAction::DoneStyle,
        description: "Stop adding reference images",
        menu: true,
    },
    CommandSpec {
        command: "clear_style",
        action: BotAction::ClearStyle,
        description: "Delete every saved reference image",
        menu: true,
    },
    CommandSpec {
        command: "status",
        action: BotAction::Status,
        description: "Show how many references are saved",
        menu: true,
    },
    CommandSpec {
        command: "help",
        action: BotAction::Help,
        description: "Show the instructions",
        menu: false,
    },
];

pub fn find_command(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

pub fn menu_commands() -> impl Iterator<Item = &'static CommandSpec> {
    COMMANDS.iter().filter(|spec| spec.menu)
}
