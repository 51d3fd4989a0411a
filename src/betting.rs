//! Bet pools and the wager lifecycle
//!
//! Every pool works the same way; they differ only by [`PoolId`]. A stake is
//! debited when the wager is placed. Settlement returns 2× the stake to
//! winners and lets losing stakes leave circulation. Forgiveness and undo
//! refund the stake exactly.

use crate::error::BetError;
use crate::ledger::{AccountStore, LedgerStore};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Independent pool a wager lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolId {
    /// Winner of the match
    Match,
    /// Player who scores the first kill
    FirstBlood,
    /// Player who kills themselves first
    FirstSuicide,
}

impl PoolId {
    pub const ALL: [PoolId; 3] = [PoolId::Match, PoolId::FirstBlood, PoolId::FirstSuicide];

    /// Chat command that places a wager in this pool
    pub fn command(&self) -> &'static str {
        match self {
            PoolId::Match => "!bet",
            PoolId::FirstBlood => "!firstbloodbet",
            PoolId::FirstSuicide => "!firstsuicidebet",
        }
    }

    pub fn usage(&self) -> &'static str {
        match self {
            PoolId::Match => "!bet <winner> <amount>",
            PoolId::FirstBlood => "!firstbloodbet <winner> <amount>",
            PoolId::FirstSuicide => "!firstsuicidebet <winner> <amount>",
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolId::Match => write!(f, "to win the match"),
            PoolId::FirstBlood => write!(f, "to take first blood"),
            PoolId::FirstSuicide => write!(f, "to suicide first"),
        }
    }
}

/// One user's stake on an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wager {
    pub bettor: String,
    pub target: String,
    pub amount: i64,
    pub pool: PoolId,
}

/// Wagers keyed by bettor; ordered so settlement is deterministic
#[derive(Debug, Default, Clone)]
pub struct BetPool {
    wagers: BTreeMap<String, Wager>,
}

impl BetPool {
    pub fn get(&self, bettor: &str) -> Option<&Wager> {
        self.wagers.get(bettor)
    }

    pub fn len(&self) -> usize {
        self.wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
    }

    /// Sum of all stakes
    pub fn total(&self) -> i64 {
        self.wagers.values().map(|w| w.amount).sum()
    }

    pub fn wagers(&self) -> impl Iterator<Item = &Wager> {
        self.wagers.values()
    }
}

/// Totals of one settlement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settlement {
    /// Winnings on top of returned stakes (1× each winning stake)
    pub paid_out: i64,
    /// Losing stakes removed from circulation
    pub house_take: i64,
}

/// Names currently eligible as wager targets, in join order
#[derive(Debug, Default, Clone)]
pub struct Participants {
    names: Vec<String>,
}

impl Participants {
    /// Returns false if the name was already present
    pub fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug)]
pub struct BettingEngine {
    pools: BTreeMap<PoolId, BetPool>,
    open: bool,
    /// Largest accepted stake, 0 for no ceiling
    max_bet: i64,
}

impl BettingEngine {
    pub fn new(max_bet: i64) -> Self {
        Self {
            pools: PoolId::ALL.iter().map(|&id| (id, BetPool::default())).collect(),
            open: false,
            max_bet,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open_betting(&mut self) {
        if !self.open {
            info!("Betting opened");
        }
        self.open = true;
    }

    pub fn close_betting(&mut self) {
        if self.open {
            info!("Betting closed");
        }
        self.open = false;
    }

    pub fn pool(&self, id: PoolId) -> &BetPool {
        &self.pools[&id]
    }

    fn pool_mut(&mut self, id: PoolId) -> &mut BetPool {
        self.pools.entry(id).or_default()
    }

    pub fn has_active_bets(&self, bettor: &str) -> bool {
        self.pools.values().any(|p| p.wagers.contains_key(bettor))
    }

    /// Sum of every open stake across pools
    pub fn total_staked(&self) -> i64 {
        self.pools.values().map(BetPool::total).sum()
    }

    /// Validate and record a wager, debiting the stake.
    ///
    /// `amount` that does not parse counts as zero.
    pub fn place_bet<S: AccountStore>(
        &mut self,
        ledger: &mut LedgerStore<S>,
        pool: PoolId,
        bettor: &str,
        target: Option<&str>,
        amount: Option<&str>,
        participants: &Participants,
    ) -> Result<Wager, BetError> {
        if !self.open {
            return Err(BetError::BettingClosed);
        }

        let (target, amount) = match (target, amount) {
            (Some(t), Some(a)) if !t.is_empty() => (t, a),
            _ => return Err(BetError::MalformedCommand { usage: pool.usage() }),
        };

        let balance = ledger.balance(bettor).ok_or(BetError::NoAccount)?;

        if self.pool(pool).get(bettor).is_some() {
            return Err(BetError::DuplicateBet);
        }

        let amount: i64 = amount.trim().parse().unwrap_or(0);
        if amount <= 0 || amount > balance {
            return Err(BetError::InsufficientFunds { balance });
        }

        if self.max_bet > 0 && amount > self.max_bet {
            return Err(BetError::OverMaxBet { max: self.max_bet });
        }

        if !participants.contains(target) {
            return Err(BetError::UnknownTarget {
                target: target.to_string(),
            });
        }

        let wager = Wager {
            bettor: bettor.to_string(),
            target: target.to_string(),
            amount,
            pool,
        };
        ledger.debit(bettor, amount);
        self.pool_mut(pool)
            .wagers
            .insert(bettor.to_string(), wager.clone());

        debug!("{} placed {} on {} ({:?})", bettor, amount, target, pool);
        Ok(wager)
    }

    /// Pay out a pool against `winner` and clear it. Without a winner the
    /// pool is forgiven and both totals are zero.
    pub fn settle<S: AccountStore>(
        &mut self,
        ledger: &mut LedgerStore<S>,
        pool: PoolId,
        winner: Option<&str>,
    ) -> Settlement {
        let Some(winner) = winner else {
            self.forgive(ledger, pool);
            return Settlement::default();
        };

        let wagers = std::mem::take(&mut self.pool_mut(pool).wagers);
        let mut settlement = Settlement::default();
        for wager in wagers.into_values() {
            if wager.target == winner {
                if !ledger.credit(&wager.bettor, wager.amount.saturating_mul(2)) {
                    warn!("Winning bettor {} has no account", wager.bettor);
                }
                settlement.paid_out = settlement.paid_out.saturating_add(wager.amount);
            } else {
                settlement.house_take = settlement.house_take.saturating_add(wager.amount);
            }
        }

        info!(
            "Settled {:?} on {}: {} paid out, {} lost",
            pool, winner, settlement.paid_out, settlement.house_take
        );
        settlement
    }

    /// Refund every wager in a pool and clear it. Returns credits refunded.
    pub fn forgive<S: AccountStore>(&mut self, ledger: &mut LedgerStore<S>, pool: PoolId) -> i64 {
        let wagers = std::mem::take(&mut self.pool_mut(pool).wagers);
        let mut refunded: i64 = 0;
        for wager in wagers.into_values() {
            if !ledger.credit(&wager.bettor, wager.amount) {
                warn!("Refunded bettor {} has no account", wager.bettor);
            }
            refunded = refunded.saturating_add(wager.amount);
        }
        if refunded > 0 {
            info!("Forgave {:?}: {} credits refunded", pool, refunded);
        }
        refunded
    }

    pub fn forgive_all<S: AccountStore>(&mut self, ledger: &mut LedgerStore<S>) -> i64 {
        PoolId::ALL
            .iter()
            .map(|&pool| self.forgive(ledger, pool))
            .sum()
    }

    /// Cancel every wager `bettor` holds, in any pool, regardless of the
    /// betting window. Returns credits refunded.
    pub fn undo<S: AccountStore>(&mut self, ledger: &mut LedgerStore<S>, bettor: &str) -> i64 {
        let mut refunded: i64 = 0;
        for pool in self.pools.values_mut() {
            if let Some(wager) = pool.wagers.remove(bettor) {
                ledger.credit(bettor, wager.amount);
                refunded = refunded.saturating_add(wager.amount);
            }
        }
        refunded
    }
}
