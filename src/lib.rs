//! Chat Wagering Bot Library
//!
//! Viewers of a live game stream bet virtual credits from chat on who wins
//! the match, who takes first blood and who suicides first. Two halves:
//!
//! 1. **Connection engine**: a non-blocking socket, line framing with a
//!    fixed command→handler table, and a timed login/join/announce handshake.
//!
//! 2. **Wagering engine**: a persistent credit ledger, three bet pools and a
//!    scheduler that holds payouts back for a configured delay.

pub mod betting;
pub mod bot;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod handshake;
pub mod ledger;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use betting::{BettingEngine, Participants, PoolId, Settlement, Wager};
pub use bot::Bot;
pub use commands::ChatCommand;
pub use config::{BettingConfig, Config, HandshakeConfig};
pub use db::Database;
pub use error::{BetError, TransportError};
pub use handshake::{ConnectionStateMachine, HandshakeAction, HandshakeState};
pub use ledger::{Account, AccountStore, LedgerStore, MemoryStore};
pub use protocol::{LineProtocolEngine, Message};
pub use scheduler::{EventKind, EventScheduler};
pub use session::{BettingSession, HostRelay, LogRelay, MatchState};
pub use transport::{LinkStatus, SocketTransport};
