//! Betting session: ledger, pools, scheduler and participants behind one owner
//!
//! Chat commands and host reports mutate the session; replies and
//! announcements are queued in an outbox that the runtime writes to the
//! channel at the end of each tick.

use crate::betting::{BettingEngine, Participants, PoolId, Settlement};
use crate::commands::ChatCommand;
use crate::config::BettingConfig;
use crate::ledger::{AccountStore, LedgerStore};
use crate::scheduler::{DelayedEvent, EventKind, EventScheduler};
use std::time::Duration;
use tracing::{debug, info};

/// Entries shown by !top10
const TOP_LIMIT: usize = 10;

/// Output into the host game besides the chat socket
pub trait HostRelay {
    /// Show a line of viewer chat inside the game
    fn relay_chat(&mut self, text: &str);
}

/// Host that only logs relayed lines
#[derive(Debug, Default)]
pub struct LogRelay;

impl HostRelay for LogRelay {
    fn relay_chat(&mut self, text: &str) {
        info!("[relay] {}", text);
    }
}

/// Match lifecycle as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchState {
    EnteringMap { map: String },
    WaitingToStart { map: String },
    InProgress,
    WaitingPostMatch { winner: Option<String> },
    Aborted,
}

pub struct BettingSession<S, H> {
    config: BettingConfig,
    ledger: LedgerStore<S>,
    engine: BettingEngine,
    scheduler: EventScheduler,
    participants: Participants,
    host: H,
    outbox: Vec<String>,
    /// Sum of tick deltas
    clock: Duration,
    last_top10: Option<Duration>,
    in_progress: bool,
    first_blood: bool,
    first_suicide: bool,
}

impl<S: AccountStore, H: HostRelay> BettingSession<S, H> {
    pub fn new(config: BettingConfig, store: S, host: H) -> Self {
        Self {
            engine: BettingEngine::new(config.max_bet),
            config,
            ledger: LedgerStore::new(store),
            scheduler: EventScheduler::new(),
            participants: Participants::default(),
            host,
            outbox: Vec::new(),
            clock: Duration::ZERO,
            last_top10: None,
            in_progress: false,
            first_blood: false,
            first_suicide: false,
        }
    }

    /// Read persisted accounts
    pub async fn load(&mut self) {
        self.ledger.load().await;
    }

    pub fn ledger(&self) -> &LedgerStore<S> {
        &self.ledger
    }

    pub fn engine(&self) -> &BettingEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn last_top10(&self) -> Option<Duration> {
        self.last_top10
    }

    /// Take every queued chat line
    pub fn drain_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    fn say(&mut self, text: String) {
        self.outbox.push(text);
    }

    /// Advance the session clock and fire expired events
    pub fn tick(&mut self, delta: Duration) {
        self.clock += delta;
        for event in self.scheduler.advance(delta) {
            self.fire(event);
        }
    }

    // ---- chat commands ----

    /// Handle one chat line from `user`
    pub async fn handle_chat(&mut self, user: &str, text: &str) {
        let Some(command) = ChatCommand::parse(text) else {
            return;
        };
        debug!("{} issued {:?}", user, command);

        if command == ChatCommand::Register {
            self.register(user).await;
            return;
        }

        if !self.ledger.contains(user) {
            self.say(format!(
                "No account exists for {}, please use !register",
                user
            ));
            return;
        }
        self.ledger.touch(user);

        match command {
            ChatCommand::Register => {}
            ChatCommand::Credits => self.report_credits(user),
            ChatCommand::Bet {
                pool,
                target,
                amount,
            } => self.place_bet(user, pool, target.as_deref(), amount.as_deref()),
            ChatCommand::Top10 => self.top10(),
            ChatCommand::Bankrupt => self.bankrupt(user),
            ChatCommand::UndoBets => self.undo_bets(user),
            ChatCommand::Chat { text } => self.relay_chat(user, &text),
            ChatCommand::Unknown(_) => {}
        }
    }

    async fn register(&mut self, user: &str) {
        let (_, created) = self
            .ledger
            .get_or_create(user, self.config.initial_credits)
            .await;
        if created {
            self.say(format!("Account created for {}!", user));
        } else {
            self.say(format!("Account already exists for {}!", user));
        }
    }

    fn report_credits(&mut self, user: &str) {
        let credits = self.ledger.balance(user).unwrap_or_default();
        self.say(format!("{} you have {} credits.", user, credits));
    }

    fn place_bet(&mut self, user: &str, pool: PoolId, target: Option<&str>, amount: Option<&str>) {
        match self.engine.place_bet(
            &mut self.ledger,
            pool,
            user,
            target,
            amount,
            &self.participants,
        ) {
            Ok(wager) => {
                if self.config.print_bet_confirmations {
                    self.say(format!(
                        "{} you've placed {} on {} {}",
                        user, wager.amount, wager.target, pool
                    ));
                }
            }
            Err(e) => {
                debug!("Rejected wager from {}: {}", user, e);
                self.say(e.user_message(user));
            }
        }
    }

    /// Leaderboard, at most once per cooldown. A suppressed call emits
    /// nothing and does not restart the cooldown.
    fn top10(&mut self) {
        if let Some(last) = self.last_top10 {
            if self.clock.saturating_sub(last) < self.config.top10_cooldown {
                debug!("!top10 suppressed by cooldown");
                return;
            }
        }

        let lines: Vec<String> = self
            .ledger
            .top(TOP_LIMIT)
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}. {} - {}", i + 1, a.name, a.credits))
            .collect();
        self.outbox.extend(lines);
        self.last_top10 = Some(self.clock);
    }

    fn bankrupt(&mut self, user: &str) {
        let initial = self.config.initial_credits;
        if self.engine.has_active_bets(user) {
            self.say(format!(
                "{} you can't declare bankruptcy with active bets!",
                user
            ));
            return;
        }

        let credits = self.ledger.balance(user).unwrap_or_default();
        if credits >= initial {
            self.say(format!("{} you still have {} credits!", user, credits));
            return;
        }

        if let Some(times) = self.ledger.declare_bankrupt(user, initial) {
            self.say(format!(
                "{} you've been restored to {} credits, you've gone bankrupt {} times",
                user, initial, times
            ));
        }
    }

    fn undo_bets(&mut self, user: &str) {
        let refunded = self.engine.undo(&mut self.ledger, user);
        if refunded > 0 {
            self.say(format!(
                "{} your bets have been cancelled, {} credits refunded.",
                user, refunded
            ));
        } else {
            self.say(format!("{} you have no active bets.", user));
        }
    }

    fn relay_chat(&mut self, user: &str, text: &str) {
        if text.is_empty() {
            self.say(format!(
                "{} you must chat in the format \"!chat <text>\" !",
                user
            ));
            return;
        }

        let cost = self.config.chat_cost;
        let credits = self.ledger.balance(user).unwrap_or_default();
        if credits < cost {
            self.say(format!(
                "{} chatting costs {} credits, you only have {}!",
                user, cost, credits
            ));
            return;
        }

        self.ledger.debit(user, cost);
        self.host.relay_chat(&format!("{}: {}", user, text));
    }

    // ---- host reports ----

    pub fn report_participant_joined(&mut self, name: &str) {
        if self.participants.add(name) {
            self.say(format!("{} has joined the game!", name));
        }
    }

    pub fn report_match_state(&mut self, state: MatchState) {
        info!("Match state: {:?}", state);
        match state {
            MatchState::EnteringMap { map } => {
                self.settle_pending();
                self.say(format!("We've started {} map!", map));
                self.participants.clear();
                self.engine.open_betting();
            }
            MatchState::WaitingToStart { map } => {
                self.settle_pending();
                self.say(format!("The match is waiting to start on {}!", map));
                self.engine.open_betting();
            }
            MatchState::InProgress => {
                self.in_progress = true;
                self.first_blood = false;
                self.first_suicide = false;
                let delay = self.config.betting_close_delay;
                if delay.is_zero() {
                    self.say("The match is starting, betting is now closed!".to_string());
                    self.engine.close_betting();
                } else {
                    self.say(format!(
                        "The match is starting, betting closes in {} seconds!",
                        delay.as_secs()
                    ));
                    self.scheduler.schedule(EventKind::BettingClosed, None, delay);
                }
            }
            MatchState::WaitingPostMatch { winner } => {
                self.say("The match is over, thanks for betting!".to_string());
                self.in_progress = false;
                self.engine.close_betting();
                self.participants.clear();
                self.scheduler
                    .schedule(EventKind::MatchEnd, winner, self.config.event_delay);
            }
            MatchState::Aborted => {
                self.say("The match was aborted, active bets are forgiven!".to_string());
                self.in_progress = false;
                self.scheduler.clear();
                self.engine.close_betting();
                self.engine.forgive_all(&mut self.ledger);
            }
        }
    }

    /// A kill during the match. No killer, or the victim as killer, is a
    /// suicide.
    pub fn report_kill(&mut self, killer: Option<&str>, victim: &str) {
        if !self.in_progress {
            return;
        }

        match killer.filter(|k| *k != victim) {
            Some(killer) => {
                if !self.first_blood {
                    self.first_blood = true;
                    self.scheduler.schedule(
                        EventKind::FirstBlood,
                        Some(killer.to_string()),
                        self.config.event_delay,
                    );
                }
            }
            None => {
                if !self.first_suicide {
                    self.first_suicide = true;
                    self.scheduler.schedule(
                        EventKind::FirstSuicide,
                        Some(victim.to_string()),
                        self.config.event_delay,
                    );
                }
            }
        }
    }

    fn fire(&mut self, event: DelayedEvent) {
        debug!("Firing {:?}", event.kind);
        match event.kind {
            EventKind::BettingClosed => {
                self.engine.close_betting();
                self.say("Betting is now closed!".to_string());
            }
            EventKind::FirstBlood => {
                let winner = event.winner.unwrap_or_default();
                self.say(format!("First Blood goes to {}!", winner));
                let settlement = self.engine.settle(&mut self.ledger, PoolId::FirstBlood, Some(&winner));
                self.announce_settlement(settlement);
            }
            EventKind::FirstSuicide => {
                let winner = event.winner.unwrap_or_default();
                self.say(format!("{} is the first to suicide!", winner));
                let settlement =
                    self.engine.settle(&mut self.ledger, PoolId::FirstSuicide, Some(&winner));
                self.announce_settlement(settlement);
            }
            EventKind::MatchEnd => {
                match event.winner.as_deref() {
                    Some(winner) => {
                        self.say(format!("{} wins the match!", winner));
                        let settlement = self.engine.settle(&mut self.ledger, PoolId::Match, Some(winner));
                        self.announce_settlement(settlement);
                    }
                    None => {
                        if self.engine.forgive(&mut self.ledger, PoolId::Match) > 0 {
                            self.say("No winner this time, match bets are forgiven!".to_string());
                        }
                    }
                }
                // Side pools nobody resolved this match
                if !self.scheduler.is_pending(EventKind::FirstBlood) {
                    self.engine.forgive(&mut self.ledger, PoolId::FirstBlood);
                }
                if !self.scheduler.is_pending(EventKind::FirstSuicide) {
                    self.engine.forgive(&mut self.ledger, PoolId::FirstSuicide);
                }
            }
        }
    }

    /// Resolve everything the previous match left scheduled so a new
    /// betting window starts with empty pools. Side pools settle before the
    /// match pool so their payouts are not forgiven.
    fn settle_pending(&mut self) {
        let mut pending = self.scheduler.drain();
        if pending.is_empty() {
            return;
        }
        debug!("Settling {} pending events early", pending.len());
        pending.sort_by_key(|e| e.kind == EventKind::MatchEnd);
        for event in pending {
            if event.kind != EventKind::BettingClosed {
                self.fire(event);
            }
        }
    }

    fn announce_settlement(&mut self, settlement: Settlement) {
        self.say(format!(
            "Betting stats: {} credits paid out, {} credits lost",
            settlement.paid_out, settlement.house_take
        ));
    }

    // ---- admin ----

    /// Refund every pool and forget the participants
    pub fn forgive_bets(&mut self) -> i64 {
        self.participants.clear();
        self.engine.forgive_all(&mut self.ledger)
    }

    pub async fn flush(&self) -> usize {
        self.ledger.flush().await
    }

    pub fn restore(&mut self, name: &str, credits: i64) {
        self.ledger.restore(name, credits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;

    #[derive(Default)]
    struct RecordingHost {
        relayed: Vec<String>,
    }

    impl HostRelay for RecordingHost {
        fn relay_chat(&mut self, text: &str) {
            self.relayed.push(text.to_string());
        }
    }

    type TestSession = BettingSession<MemoryStore, RecordingHost>;

    fn session_with(config: BettingConfig) -> TestSession {
        BettingSession::new(config, MemoryStore::new(), RecordingHost::default())
    }

    fn session() -> TestSession {
        session_with(BettingConfig::default())
    }

    /// Open betting with `players` in the match
    fn open_match(s: &mut TestSession, players: &[&str]) {
        s.report_match_state(MatchState::EnteringMap { map: "DM-Deck".to_string() });
        for p in players {
            s.report_participant_joined(p);
        }
        s.drain_outbox();
    }

    #[tokio::test]
    async fn test_register_twice_keeps_balance() {
        let mut s = session();
        s.handle_chat("alice", "!register").await;
        s.ledger.debit("alice", 100);
        s.handle_chat("alice", "!register").await;

        assert_eq!(s.ledger().balance("alice"), Some(1400));
        assert_eq!(
            s.drain_outbox(),
            vec!["Account created for alice!", "Account already exists for alice!"]
        );
        assert_eq!(s.ledger().store().row("alice").await.unwrap().credits, 1500);
    }

    #[tokio::test]
    async fn test_unregistered_user_is_told_to_register() {
        let mut s = session();
        s.handle_chat("bob", "!credits").await;
        s.handle_chat("bob", "!whatever").await;
        s.handle_chat("bob", "just chatting").await;
        assert_eq!(
            s.drain_outbox(),
            vec![
                "No account exists for bob, please use !register",
                "No account exists for bob, please use !register",
            ]
        );
    }

    #[tokio::test]
    async fn test_bet_and_win_scenario() {
        let mut s = session();
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["B", "C"]);

        s.handle_chat("A", "!bet B 500").await;
        assert_eq!(s.ledger().balance("A"), Some(1000));
        let wager = s.engine().pool(PoolId::Match).get("A").unwrap();
        assert_eq!((wager.target.as_str(), wager.amount), ("B", 500));

        s.report_match_state(MatchState::InProgress);
        s.report_match_state(MatchState::WaitingPostMatch { winner: Some("B".to_string()) });
        // Payout waits for the scheduler
        assert_eq!(s.ledger().balance("A"), Some(1000));
        s.drain_outbox();

        s.tick(Duration::from_millis(50));
        assert_eq!(s.ledger().balance("A"), Some(2000));
        assert!(s.engine().pool(PoolId::Match).is_empty());
        assert_eq!(
            s.drain_outbox(),
            vec!["B wins the match!", "Betting stats: 500 credits paid out, 0 credits lost"]
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_scenario() {
        let mut s = session();
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["B"]);
        s.drain_outbox();

        s.handle_chat("A", "!bet B 2000").await;
        assert_eq!(s.drain_outbox(), vec!["A you only have 1500 credits to wager!"]);
        assert_eq!(s.ledger().balance("A"), Some(1500));
        assert!(s.engine().pool(PoolId::Match).is_empty());
    }

    #[tokio::test]
    async fn test_bet_then_undo_restores_balance() {
        let mut s = session();
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["B"]);
        s.handle_chat("A", "!bet B 321").await;
        s.handle_chat("A", "!firstbloodbet B 79").await;
        s.drain_outbox();

        s.handle_chat("A", "!undobets").await;
        assert_eq!(s.ledger().balance("A"), Some(1500));
        assert_eq!(
            s.drain_outbox(),
            vec!["A your bets have been cancelled, 400 credits refunded."]
        );
    }

    #[tokio::test]
    async fn test_top10_cooldown_suppresses_second_call() {
        let mut s = session();
        for name in ["a", "b", "c"] {
            s.handle_chat(name, "!register").await;
        }
        s.drain_outbox();

        s.tick(Duration::from_secs(1));
        s.handle_chat("a", "!top10").await;
        assert_eq!(s.drain_outbox(), vec!["1. a - 1500", "2. b - 1500", "3. c - 1500"]);
        let stamped = s.last_top10();
        assert_eq!(stamped, Some(Duration::from_secs(1)));

        s.tick(Duration::from_secs(30));
        s.handle_chat("b", "!top10").await;
        assert!(s.drain_outbox().is_empty());
        assert_eq!(s.last_top10(), stamped);

        s.tick(Duration::from_secs(30));
        s.handle_chat("b", "!top10").await;
        assert_eq!(s.drain_outbox().len(), 3);
        assert_eq!(s.last_top10(), Some(Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn test_bankrupt_rules() {
        let mut s = session();
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["B"]);
        s.drain_outbox();

        s.handle_chat("A", "!bankrupt").await;
        assert_eq!(s.drain_outbox(), vec!["A you still have 1500 credits!"]);

        s.handle_chat("A", "!bet B 1400").await;
        s.handle_chat("A", "!bankrupt").await;
        assert_eq!(
            s.drain_outbox(),
            vec!["A you can't declare bankruptcy with active bets!"]
        );

        s.report_match_state(MatchState::InProgress);
        s.report_match_state(MatchState::WaitingPostMatch { winner: Some("Nobody".to_string()) });
        s.tick(Duration::ZERO);
        assert_eq!(s.ledger().balance("A"), Some(100));
        s.drain_outbox();

        s.handle_chat("A", "!bankrupt").await;
        assert_eq!(s.ledger().balance("A"), Some(1500));
        assert_eq!(s.ledger().get("A").unwrap().bankrupts, 1);
        assert_eq!(
            s.drain_outbox(),
            vec!["A you've been restored to 1500 credits, you've gone bankrupt 1 times"]
        );
    }

    #[tokio::test]
    async fn test_chat_relay_costs_credits() {
        let mut s = session_with(BettingConfig {
            chat_cost: 1000,
            ..Default::default()
        });
        s.handle_chat("A", "!register").await;
        s.drain_outbox();

        s.handle_chat("A", "!chat nice shot").await;
        assert_eq!(s.ledger().balance("A"), Some(500));
        assert_eq!(s.host().relayed, vec!["A: nice shot"]);

        s.handle_chat("A", "!chat again").await;
        assert_eq!(s.ledger().balance("A"), Some(500));
        assert_eq!(s.host().relayed.len(), 1);
        assert_eq!(
            s.drain_outbox(),
            vec!["A chatting costs 1000 credits, you only have 500!"]
        );
    }

    #[tokio::test]
    async fn test_first_blood_and_suicide_pools() {
        let mut s = session_with(BettingConfig {
            event_delay: Duration::from_secs(2),
            ..Default::default()
        });
        for name in ["A", "B"] {
            s.handle_chat(name, "!register").await;
        }
        open_match(&mut s, &["Red", "Blue"]);
        s.handle_chat("A", "!firstbloodbet Red 100").await;
        s.handle_chat("B", "!firstsuicidebet Blue 200").await;
        s.report_match_state(MatchState::InProgress);
        s.drain_outbox();

        s.report_kill(Some("Red"), "Blue");
        s.report_kill(Some("Blue"), "Red");
        s.report_kill(None, "Red");
        s.report_kill(Some("Blue"), "Blue");
        assert_eq!(s.scheduler().len(), 2);

        s.tick(Duration::from_secs(1));
        assert_eq!(s.ledger().balance("A"), Some(1400));
        s.tick(Duration::from_secs(1));
        assert_eq!(s.ledger().balance("A"), Some(1600));
        assert_eq!(s.ledger().balance("B"), Some(1300));
        assert_eq!(
            s.drain_outbox(),
            vec![
                "First Blood goes to Red!",
                "Betting stats: 100 credits paid out, 0 credits lost",
                "Red is the first to suicide!",
                "Betting stats: 0 credits paid out, 200 credits lost",
            ]
        );
    }

    #[tokio::test]
    async fn test_betting_closes_after_delay() {
        let mut s = session_with(BettingConfig {
            betting_close_delay: Duration::from_secs(5),
            ..Default::default()
        });
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["Red"]);
        s.report_match_state(MatchState::InProgress);
        assert!(s.engine().is_open());

        s.tick(Duration::from_secs(4));
        s.handle_chat("A", "!bet Red 10").await;
        assert_eq!(s.ledger().balance("A"), Some(1490));

        s.tick(Duration::from_secs(1));
        assert!(!s.engine().is_open());
        s.drain_outbox();
        s.handle_chat("A", "!firstbloodbet Red 10").await;
        assert_eq!(s.drain_outbox(), vec!["A betting is not open right now!"]);
    }

    #[tokio::test]
    async fn test_match_end_without_winner_forgives_everything() {
        let mut s = session();
        for name in ["A", "B"] {
            s.handle_chat(name, "!register").await;
        }
        open_match(&mut s, &["Red"]);
        s.handle_chat("A", "!bet Red 700").await;
        s.handle_chat("B", "!firstbloodbet Red 300").await;
        s.report_match_state(MatchState::InProgress);
        s.report_match_state(MatchState::WaitingPostMatch { winner: None });
        assert!(s.participants().is_empty());

        s.tick(Duration::from_millis(50));
        assert_eq!(s.ledger().balance("A"), Some(1500));
        assert_eq!(s.ledger().balance("B"), Some(1500));
        assert_eq!(s.engine().total_staked(), 0);
    }

    #[tokio::test]
    async fn test_abort_forgives_and_cancels_pending_payouts() {
        let mut s = session_with(BettingConfig {
            event_delay: Duration::from_secs(3),
            ..Default::default()
        });
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["Red", "Blue"]);
        s.handle_chat("A", "!firstbloodbet Red 500").await;
        s.report_match_state(MatchState::InProgress);
        s.report_kill(Some("Blue"), "Red");

        s.report_match_state(MatchState::Aborted);
        assert!(s.scheduler().is_empty());
        assert_eq!(s.ledger().balance("A"), Some(1500));
        s.tick(Duration::from_secs(5));
        assert_eq!(s.ledger().balance("A"), Some(1500));
    }

    #[tokio::test]
    async fn test_next_map_before_delayed_payout_settles_old_match_first() {
        let mut s = session_with(BettingConfig {
            event_delay: Duration::from_secs(10),
            ..Default::default()
        });
        s.handle_chat("A", "!register").await;
        open_match(&mut s, &["Red", "Blue"]);
        s.handle_chat("A", "!bet Red 200").await;
        s.handle_chat("A", "!firstbloodbet Blue 100").await;
        s.report_match_state(MatchState::InProgress);
        s.report_kill(Some("Blue"), "Red");
        s.report_match_state(MatchState::WaitingPostMatch { winner: Some("Red".to_string()) });
        assert_eq!(s.ledger().balance("A"), Some(1200));

        s.tick(Duration::from_secs(5));
        s.report_match_state(MatchState::EnteringMap { map: "DM-Morpheus".to_string() });
        // Both old payouts landed before the new window opened
        assert!(s.scheduler().is_empty());
        assert_eq!(s.engine().total_staked(), 0);
        assert_eq!(s.ledger().balance("A"), Some(1800));

        s.report_participant_joined("Blue");
        s.handle_chat("A", "!bet Blue 100").await;
        s.tick(Duration::from_secs(10));
        assert_eq!(s.participants().names(), ["Blue".to_string()]);
        assert_eq!(s.engine().pool(PoolId::Match).total(), 100);
        assert_eq!(s.ledger().balance("A"), Some(1700));

        s.drain_outbox();
        s.handle_chat("A", "!firstbloodbet Blue 100").await;
        assert!(s.drain_outbox().is_empty());
        assert_eq!(s.ledger().balance("A"), Some(1600));
    }

    #[tokio::test]
    async fn test_kills_outside_match_are_ignored() {
        let mut s = session();
        open_match(&mut s, &["Red", "Blue"]);
        s.report_kill(Some("Red"), "Blue");
        assert!(s.scheduler().is_empty());
    }

    #[tokio::test]
    async fn test_credits_conserved_across_full_match() {
        let mut s = session();
        let names = ["u1", "u2", "u3", "u4"];
        for name in names {
            s.handle_chat(name, "!register").await;
        }
        open_match(&mut s, &["Red", "Blue"]);
        s.handle_chat("u1", "!bet Red 100").await;
        s.handle_chat("u2", "!bet Blue 200").await;
        s.handle_chat("u3", "!bet Red 300").await;
        s.handle_chat("u4", "!bet Red 400").await;
        s.handle_chat("u4", "!undobets").await;

        let staked = s.engine().pool(PoolId::Match).total();
        let before = s.ledger().total_credits() + staked;

        s.report_match_state(MatchState::InProgress);
        s.report_match_state(MatchState::WaitingPostMatch { winner: Some("Red".to_string()) });
        s.tick(Duration::ZERO);

        // Winners' stakes come back doubled, losers' stakes leave circulation
        assert_eq!(s.ledger().total_credits(), before + 400 - 200);
        for name in names {
            assert!(s.ledger().balance(name).unwrap() >= 0);
        }
    }
}
