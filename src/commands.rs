use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start over with an empty conversation
    Reset,
    /// Print the conversation so far
    History,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Reset => "clear the conversation history",
            SlashCommand::History => "show the conversation so far",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "clear" | "new" => Some(SlashCommand::Reset),
        "h" | "?" => Some(SlashCommand::Help),
        "log" => Some(SlashCommand::History),
        _ => None,
    })?;

    let argument = if tail.is_empty() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nAliases: /q, /quit, /exit for /bye; /clear, /new for /reset; /log for /history");
    help.push_str("\nPress Ctrl-C while waiting for a reply to abandon it, or at the prompt to quit.");

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names() {
        let parsed = parse_slash_command("/reset").unwrap();
        assert_eq!(parsed.command, SlashCommand::Reset);
        assert_eq!(parsed.argument(), None);

        assert_eq!(
            parse_slash_command("/history").unwrap().command,
            SlashCommand::History
        );
    }

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!(parse_slash_command("/Q").unwrap().command, SlashCommand::Bye);
        assert_eq!(parse_slash_command("  /clear ").unwrap().command, SlashCommand::Reset);
        assert_eq!(parse_slash_command("/?").unwrap().command, SlashCommand::Help);
    }

    #[test]
    fn keeps_trailing_argument() {
        let parsed = parse_slash_command("/history last 5").unwrap();
        assert_eq!(parsed.argument(), Some("last 5"));
    }

    #[test]
    fn ignores_plain_text_and_unknown_commands() {
        assert_eq!(parse_slash_command("what is /reset?"), None);
        assert_eq!(parse_slash_command("/teleport"), None);
        assert_eq!(parse_slash_command("/"), None);
    }

    #[test]
    fn help_lists_every_command() {
        let help = get_help_text();
        for command in SlashCommand::iter() {
            assert!(help.contains(&format!("/{}", command.command())));
        }
    }
}
