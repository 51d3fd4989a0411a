//! Chat command surface
//!
//! Commands are matched case-sensitively on the first whitespace-separated
//! token of a chat line.

use crate::betting::PoolId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Register,
    Credits,
    Bet {
        pool: PoolId,
        target: Option<String>,
        amount: Option<String>,
    },
    Top10,
    Bankrupt,
    UndoBets,
    Chat {
        text: String,
    },
    /// Any other `!` token
    Unknown(String),
}

impl ChatCommand {
    /// Parse a chat line; None for ordinary chatter
    pub fn parse(text: &str) -> Option<ChatCommand> {
        let text = text.trim();
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?;
        if !head.starts_with('!') {
            return None;
        }

        let command = match head {
            "!register" => ChatCommand::Register,
            "!credits" => ChatCommand::Credits,
            "!top10" => ChatCommand::Top10,
            "!bankrupt" => ChatCommand::Bankrupt,
            "!undobets" => ChatCommand::UndoBets,
            "!chat" => ChatCommand::Chat {
                text: text[head.len()..].trim().to_string(),
            },
            _ => match PoolId::ALL.iter().find(|p| p.command() == head) {
                Some(&pool) => ChatCommand::Bet {
                    pool,
                    target: tokens.next().map(str::to_string),
                    amount: tokens.next().map(str::to_string),
                },
                None => ChatCommand::Unknown(head.to_string()),
            },
        };
        Some(command)
    }
}
