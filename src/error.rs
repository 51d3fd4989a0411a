//! Error types for the transport and betting layers
//!
//! Transport errors are logged and degrade the link to Disconnected.
//! Betting errors never touch the ledger and are turned into a chat reply
//! addressed to the user who issued the command.

use thiserror::Error;

/// Socket-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket could not be created or switched to non-blocking mode
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),
    /// Host resolution or connect failed
    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },
    /// Write failed while connected
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),
    /// Read failed with something other than "would block"
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
}

/// Reasons a wager is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    #[error("betting is closed")]
    BettingClosed,
    /// Target or amount missing; carries the command usage
    #[error("malformed command, expected {usage}")]
    MalformedCommand { usage: &'static str },
    #[error("no account")]
    NoAccount,
    #[error("bettor already holds a wager in this pool")]
    DuplicateBet,
    /// Carries the bettor's current balance for the reply
    #[error("insufficient funds ({balance} available)")]
    InsufficientFunds { balance: i64 },
    #[error("wager exceeds the maximum of {max}")]
    OverMaxBet { max: i64 },
    #[error("{target} is not an active participant")]
    UnknownTarget { target: String },
}

impl BetError {
    /// Chat reply shown to the bettor
    pub fn user_message(&self, bettor: &str) -> String {
        match self {
            BetError::BettingClosed => format!("{} betting is not open right now!", bettor),
            BetError::MalformedCommand { usage } => {
                format!("{} you must bet in the format \"{}\" !", bettor, usage)
            }
            BetError::NoAccount => {
                format!("No account exists for {}, please use !register", bettor)
            }
            BetError::DuplicateBet => format!("{} you've already placed a bet!", bettor),
            BetError::InsufficientFunds { balance } => {
                format!("{} you only have {} credits to wager!", bettor, balance)
            }
            BetError::OverMaxBet { max } => {
                format!("{} the maximum bet is {} credits!", bettor, max)
            }
            BetError::UnknownTarget { target } => format!(
                "{} I'm sorry, but {} is not an active player in the match!",
                bettor, target
            ),
        }
    }
}
