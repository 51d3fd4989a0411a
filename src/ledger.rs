//! In-memory account ledger backed by a persistent store
//!
//! Memory is authoritative between flushes. Store failures are logged and
//! never roll back or block in-memory state; a failed initial load turns
//! persistence off for the rest of the session.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One user's balance sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub credits: i64,
    pub bankrupts: i64,
    pub join_time: DateTime<Utc>,
    pub last_use: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(name: &str, credits: i64) -> Self {
        Self {
            name: name.to_string(),
            credits,
            bankrupts: 0,
            join_time: Utc::now(),
            last_use: None,
        }
    }
}

/// Read/write contract of the persistent account table
#[allow(async_fn_in_trait)]
pub trait AccountStore {
    /// Every stored account
    async fn load_accounts(&self) -> Result<Vec<Account>>;
    /// Persist a freshly registered account
    async fn insert_account(&self, account: &Account) -> Result<()>;
    /// Upsert the mutable fields of an account
    async fn update_account(&self, account: &Account) -> Result<()>;
}

/// Store kept entirely in memory, for tests and database-less runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Account>>,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every operation fails
    pub fn failing() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            failing: true,
        }
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        Self {
            rows: Mutex::new(accounts.into_iter().map(|a| (a.name.clone(), a)).collect()),
            failing: false,
        }
    }

    pub async fn row(&self, name: &str) -> Option<Account> {
        self.rows.lock().await.get(name).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            anyhow::bail!("memory store configured to fail");
        }
        Ok(())
    }
}

impl AccountStore for MemoryStore {
    async fn load_accounts(&self) -> Result<Vec<Account>> {
        self.check()?;
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&account.name) {
            anyhow::bail!("account {} already exists", account.name);
        }
        rows.insert(account.name.clone(), account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        self.check()?;
        self.rows
            .lock()
            .await
            .insert(account.name.clone(), account.clone());
        Ok(())
    }
}

pub struct LedgerStore<S> {
    accounts: HashMap<String, Account>,
    store: S,
    persistence: bool,
}

impl<S: AccountStore> LedgerStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            accounts: HashMap::new(),
            store,
            persistence: true,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence
    }

    /// Read every account into memory. On failure the ledger starts empty
    /// and stops writing to the store.
    pub async fn load(&mut self) {
        match self.store.load_accounts().await {
            Ok(accounts) => {
                self.accounts = accounts
                    .into_iter()
                    .map(|a| (a.name.clone(), a))
                    .collect();
                self.persistence = true;
                info!("Loaded {} accounts", self.accounts.len());
            }
            Err(e) => {
                warn!("Could not load accounts, running without persistence: {}", e);
                self.accounts.clear();
                self.persistence = false;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    pub fn balance(&self, name: &str) -> Option<i64> {
        self.accounts.get(name).map(|a| a.credits)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sum of every balance
    pub fn total_credits(&self) -> i64 {
        self.accounts.values().map(|a| a.credits).sum()
    }

    /// Existing account, or a new one with `initial` credits written to the
    /// store right away. The flag is true when the account was created.
    pub async fn get_or_create(&mut self, name: &str, initial: i64) -> (&Account, bool) {
        let created = !self.accounts.contains_key(name);
        if created {
            let account = Account::new(name, initial);
            if self.persistence {
                if let Err(e) = self.store.insert_account(&account).await {
                    warn!("Could not persist new account {}: {}", name, e);
                }
            }
            info!("Registered {} with {} credits", name, initial);
            self.accounts.insert(name.to_string(), account);
        }
        (&self.accounts[name], created)
    }

    /// Write every account back to the store. Returns rows written.
    pub async fn flush(&self) -> usize {
        if !self.persistence {
            debug!("Persistence disabled, skipping flush");
            return 0;
        }

        let mut written = 0;
        for account in self.accounts.values() {
            match self.store.update_account(account).await {
                Ok(()) => written += 1,
                Err(e) => warn!("Could not flush account {}: {}", account.name, e),
            }
        }
        debug!("Flushed {}/{} accounts", written, self.accounts.len());
        written
    }

    /// Add credits. Returns false if the account does not exist.
    pub fn credit(&mut self, name: &str, amount: i64) -> bool {
        match self.accounts.get_mut(name) {
            Some(account) => {
                account.credits = account.credits.saturating_add(amount);
                true
            }
            None => false,
        }
    }

    /// Remove credits. The caller validates the balance first.
    pub fn debit(&mut self, name: &str, amount: i64) -> bool {
        match self.accounts.get_mut(name) {
            Some(account) => {
                account.credits = account.credits.saturating_sub(amount);
                true
            }
            None => false,
        }
    }

    /// Bankruptcy: reset to `credits` and count it
    pub fn declare_bankrupt(&mut self, name: &str, credits: i64) -> Option<i64> {
        let account = self.accounts.get_mut(name)?;
        account.credits = credits;
        account.bankrupts += 1;
        Some(account.bankrupts)
    }

    /// Admin override of a balance, creating the account if needed
    pub fn restore(&mut self, name: &str, credits: i64) {
        self.accounts
            .entry(name.to_string())
            .and_modify(|a| a.credits = credits)
            .or_insert_with(|| Account::new(name, credits));
        info!("Restored {} to {} credits", name, credits);
    }

    /// Record that the owner just used a command
    pub fn touch(&mut self, name: &str) {
        if let Some(account) = self.accounts.get_mut(name) {
            account.last_use = Some(Utc::now());
        }
    }

    /// Highest balances first, ties by name
    pub fn top(&self, limit: usize) -> Vec<&Account> {
        let mut accounts: Vec<&Account> = self.accounts.values().collect();
        accounts.sort_by(|a, b| b.credits.cmp(&a.credits).then_with(|| a.name.cmp(&b.name)));
        accounts.truncate(limit);
        accounts
    }
}
