//! Bot runtime: one owner for the socket, the protocol engine, the
//! handshake and the betting session, driven by a periodic tick.

use crate::config::Config;
use crate::handshake::{ConnectionStateMachine, HandshakeAction};
use crate::ledger::AccountStore;
use crate::protocol::{self, Dispatch, Handler, LineProtocolEngine, Message};
use crate::session::{BettingSession, HostRelay};
use crate::transport::{LinkStatus, ReadOutcome, SocketTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reads drained per tick before yielding to the rest of the tick
const MAX_READS_PER_TICK: usize = 16;

/// Messages collected by the protocol handlers during one tick
#[derive(Debug, Default)]
pub struct Inbound {
    /// (nickname, text) pairs from PRIVMSG
    chats: Vec<(String, String)>,
    /// PING tokens awaiting a PONG
    pings: Vec<String>,
}

const ON_PRIVMSG: &[Handler<Inbound>] = &[queue_chat];
const ON_PING: &[Handler<Inbound>] = &[queue_pong];

impl Dispatch for Inbound {
    fn handlers_for(command: &str) -> &'static [Handler<Self>] {
        match command {
            "PRIVMSG" => ON_PRIVMSG,
            "PING" => ON_PING,
            _ => &[],
        }
    }
}

fn queue_chat(inbound: &mut Inbound, message: &Message) {
    let (Some(nick), Some(text)) = (message.nick(), message.trailing()) else {
        return;
    };
    // A PRIVMSG needs both target and text
    if message.params.len() < 2 {
        return;
    }
    inbound.chats.push((nick.to_string(), text.to_string()));
}

fn queue_pong(inbound: &mut Inbound, message: &Message) {
    let token = message.trailing().unwrap_or_default();
    inbound.pings.push(token.to_string());
}

pub struct Bot<S, H> {
    config: Config,
    transport: SocketTransport,
    engine: LineProtocolEngine,
    handshake: ConnectionStateMachine,
    session: BettingSession<S, H>,
    inbound: Inbound,
    clock: Duration,
    /// Operator wants the link up; cleared by `disconnect`
    wants_link: bool,
    last_connect_attempt: Option<Duration>,
}

impl<S: AccountStore, H: HostRelay> Bot<S, H> {
    pub fn new(config: Config, session: BettingSession<S, H>) -> Self {
        Self {
            handshake: ConnectionStateMachine::new(&config.handshake),
            config,
            transport: SocketTransport::new(),
            engine: LineProtocolEngine::new(),
            session,
            inbound: Inbound::default(),
            clock: Duration::ZERO,
            wants_link: false,
            last_connect_attempt: None,
        }
    }

    pub fn session(&self) -> &BettingSession<S, H> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut BettingSession<S, H> {
        &mut self.session
    }

    pub fn link_status(&self) -> LinkStatus {
        self.transport.status()
    }

    pub fn handshake(&self) -> &ConnectionStateMachine {
        &self.handshake
    }

    /// Open the socket and start connecting. Failures are logged and leave
    /// the link down; auto-reconnect retries later.
    pub fn connect(&mut self) {
        self.wants_link = true;
        self.last_connect_attempt = Some(self.clock);

        if self.transport.status() != LinkStatus::Disconnected {
            debug!("Connect requested while {:?}", self.transport.status());
            return;
        }

        info!(
            "Connecting to {}:{}",
            self.config.irc_host, self.config.irc_port
        );
        let result = self
            .transport
            .init()
            .and_then(|_| self.transport.connect(&self.config.irc_host, self.config.irc_port));
        if let Err(e) = result {
            warn!("Connect failed: {}", e);
            self.transport.disconnect();
        }
    }

    /// Drop the link and stay offline until `connect` is called again
    pub fn disconnect(&mut self) {
        self.wants_link = false;
        self.drop_link();
        info!("Disconnected");
    }

    fn drop_link(&mut self) {
        self.transport.disconnect();
        self.engine.reset();
        self.handshake.reset();
        self.inbound = Inbound::default();
    }

    /// One pass of the runtime loop
    pub async fn tick(&mut self, delta: Duration) {
        self.clock += delta;

        if self.transport.is_connecting() {
            if let Err(e) = self.transport.poll_connect() {
                warn!("{}", e);
                self.drop_link();
            }
        }

        if let Some(action) = self.handshake.step(self.transport.status(), self.clock) {
            self.perform(action);
        }

        if let Err(e) = self.transport.flush() {
            warn!("{}", e);
            self.drop_link();
        }

        self.pump_reads();

        let Inbound { chats, pings } = std::mem::take(&mut self.inbound);
        for token in pings {
            self.write(&protocol::pong_line(&token));
        }
        for (user, text) in chats {
            self.session.handle_chat(&user, &text).await;
        }

        self.session.tick(delta);
        self.send_outbox();
        self.maybe_reconnect();
    }

    fn perform(&mut self, action: HandshakeAction) {
        let line = match action {
            HandshakeAction::Login => {
                protocol::login_lines(&self.config.nickname, &self.config.oauth)
            }
            HandshakeAction::Join => {
                info!("Joining {}", self.config.channel);
                protocol::join_line(&self.config.channel)
            }
            HandshakeAction::Announce => {
                protocol::privmsg_line(&self.config.channel, &self.config.handshake.greeting)
            }
        };
        self.write(&line);
    }

    fn pump_reads(&mut self) {
        for _ in 0..MAX_READS_PER_TICK {
            match self.transport.receive() {
                Ok(ReadOutcome::Data(bytes)) => {
                    self.engine.process(&bytes, &mut self.inbound);
                }
                Ok(ReadOutcome::Idle) => break,
                Ok(ReadOutcome::Closed) => {
                    self.drop_link();
                    break;
                }
                Err(e) => {
                    warn!("{}", e);
                    self.drop_link();
                    break;
                }
            }
        }
    }

    fn send_outbox(&mut self) {
        let lines = self.session.drain_outbox();
        if lines.is_empty() {
            return;
        }
        if !self.handshake.has_joined() {
            debug!("Dropping {} chat lines, channel not joined", lines.len());
            return;
        }
        for line in lines {
            let wire = protocol::privmsg_line(&self.config.channel, &line);
            self.write(&wire);
        }
    }

    fn write(&mut self, line: &str) {
        debug!("> {}", line.trim_end());
        if let Err(e) = self.transport.send(line.as_bytes()) {
            warn!("{}", e);
            self.drop_link();
        }
    }

    fn maybe_reconnect(&mut self) {
        if !self.wants_link
            || !self.config.auto_connect
            || self.transport.status() != LinkStatus::Disconnected
        {
            return;
        }
        let due = match self.last_connect_attempt {
            Some(at) => self.clock.saturating_sub(at) >= self.config.reconnect_delay,
            None => true,
        };
        if due {
            info!("Reconnecting");
            self.connect();
        }
    }

    /// Admin: write every account to the store
    pub async fn flush(&self) -> usize {
        let written = self.session.flush().await;
        info!("Flushed {} accounts", written);
        written
    }

    /// Admin: refund every open wager
    pub fn forgive_bets(&mut self) -> i64 {
        let refunded = self.session.forgive_bets();
        info!("Forgave all bets, {} credits refunded", refunded);
        refunded
    }

    /// Persist the ledger and close the link
    pub async fn shutdown(&mut self) {
        self.flush().await;
        self.disconnect();
    }
}
