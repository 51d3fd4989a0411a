//! Configuration management for the wager bot

use anyhow::Result;
use std::env;
use std::time::Duration;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat server host
    pub irc_host: String,

    /// Chat server port
    pub irc_port: u16,

    /// Opaque credential sent with PASS (e.g. "oauth:...")
    pub oauth: String,

    /// Nickname the bot logs in with
    pub nickname: String,

    /// Channel to join, always starting with '#'
    pub channel: String,

    /// Path to SQLite database
    pub database_path: String,

    /// Connect on startup and reconnect after drops
    pub auto_connect: bool,

    /// Wait between reconnect attempts
    pub reconnect_delay: Duration,

    /// Driver tick cadence
    pub tick_interval: Duration,

    /// Wager and ledger settings
    pub betting: BettingConfig,

    /// Login/join/announce pacing
    pub handshake: HandshakeConfig,
}

#[derive(Debug, Clone)]
pub struct BettingConfig {
    /// Balance granted on !register and restored by !bankrupt (default: 1500)
    pub initial_credits: i64,
    /// Largest single wager, 0 disables the ceiling (default: 0)
    pub max_bet: i64,
    /// Cost of relaying one !chat line into the game (default: 500)
    pub chat_cost: i64,
    /// Minimum time between two !top10 listings (default: 60s)
    pub top10_cooldown: Duration,
    /// Delay before first blood / match end payouts are announced (default: 0)
    pub event_delay: Duration,
    /// Delay between match start and betting closing (default: 0)
    pub betting_close_delay: Duration,
    /// Reply to every accepted wager (default: false)
    pub print_bet_confirmations: bool,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            initial_credits: 1500,
            max_bet: 0,
            chat_cost: 500,
            top10_cooldown: Duration::from_secs(60),
            event_delay: Duration::ZERO,
            betting_close_delay: Duration::ZERO,
            print_bet_confirmations: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Wait after login before joining the channel (default: 1s)
    pub post_auth_delay: Duration,
    /// Wait after joining before the greeting (default: 1s)
    pub post_join_delay: Duration,
    /// One-time greeting sent after joining
    pub greeting: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            post_auth_delay: Duration::from_secs(1),
            post_join_delay: Duration::from_secs(1),
            greeting: "Hello friends, your friendly betting bot is back!".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Offline subcommands
    /// use it unvalidated; `validate` runs before the bot connects.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let irc_host = env::var("IRC_HOST").unwrap_or_else(|_| "irc.chat.twitch.tv".to_string());

        let irc_port = env::var("IRC_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6667);

        let oauth = env::var("BOT_OAUTH").unwrap_or_default();
        let nickname = env::var("BOT_NICKNAME").unwrap_or_default();
        let channel = normalize_channel(&env::var("BOT_CHANNEL").unwrap_or_default());

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "wagerbot.db".to_string());

        let auto_connect = env::var("AUTO_CONNECT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        let reconnect_delay = Duration::from_secs(env_parse("RECONNECT_DELAY_SECONDS", 5));
        let tick_interval = Duration::from_millis(env_parse("TICK_INTERVAL_MS", 50));

        let defaults = BettingConfig::default();
        let betting = BettingConfig {
            initial_credits: env_parse("INITIAL_CREDITS", defaults.initial_credits),
            max_bet: env_parse("MAX_BET", defaults.max_bet),
            chat_cost: env_parse("CHAT_COST", defaults.chat_cost),
            top10_cooldown: Duration::from_secs(env_parse("TOP10_COOLDOWN_SECONDS", 60)),
            event_delay: env_secs("EVENT_DELAY_SECONDS", defaults.event_delay),
            betting_close_delay: env_secs(
                "BETTING_CLOSE_DELAY_SECONDS",
                defaults.betting_close_delay,
            ),
            print_bet_confirmations: env::var("PRINT_BET_CONFIRMATIONS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
        };

        let mut handshake = HandshakeConfig {
            post_auth_delay: Duration::from_millis(env_parse("POST_AUTH_DELAY_MS", 1000)),
            post_join_delay: Duration::from_millis(env_parse("POST_JOIN_DELAY_MS", 1000)),
            ..Default::default()
        };
        if let Ok(greeting) = env::var("BOT_GREETING") {
            if !greeting.is_empty() {
                handshake.greeting = greeting;
            }
        }

        let config = Self {
            irc_host,
            irc_port,
            oauth,
            nickname,
            channel,
            database_path,
            auto_connect,
            reconnect_delay,
            tick_interval,
            betting,
            handshake,
        };
        Ok(config)
    }

    /// Reject settings the bot cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auto_connect {
            if self.oauth.is_empty() {
                anyhow::bail!("BOT_OAUTH required when AUTO_CONNECT is enabled");
            }
            if self.nickname.is_empty() {
                anyhow::bail!("BOT_NICKNAME required when AUTO_CONNECT is enabled");
            }
            if self.channel.len() < 2 {
                anyhow::bail!("BOT_CHANNEL required when AUTO_CONNECT is enabled");
            }
        }
        if self.betting.initial_credits <= 0 {
            anyhow::bail!("INITIAL_CREDITS must be positive");
        }
        if self.betting.max_bet < 0 || self.betting.chat_cost < 0 {
            anyhow::bail!("MAX_BET and CHAT_COST must not be negative");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Fractional seconds; negative or non-finite values keep the default
fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}

/// Channel names on the wire always carry the leading '#'
pub fn normalize_channel(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            irc_host: "localhost".to_string(),
            irc_port: 6667,
            oauth: "oauth:abc".to_string(),
            nickname: "wagerbot".to_string(),
            channel: "#arena".to_string(),
            database_path: "sqlite::memory:".to_string(),
            auto_connect: true,
            reconnect_delay: Duration::from_secs(5),
            tick_interval: Duration::from_millis(50),
            betting: BettingConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }

    #[test]
    fn test_normalize_channel() {
        assert_eq!(normalize_channel("arena"), "#arena");
        assert_eq!(normalize_channel("#arena"), "#arena");
        assert_eq!(normalize_channel("  "), "");
    }

    #[test]
    fn test_validate_requires_credentials_for_auto_connect() {
        let mut config = sample();
        assert!(config.validate().is_ok());

        config.oauth.clear();
        assert!(config.validate().is_err());

        config.auto_connect = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_secs_rejects_unrepresentable_delays() {
        let default = Duration::from_secs(3);
        for (key, value) in [
            ("WAGER_TEST_DELAY_NEG", "-1"),
            ("WAGER_TEST_DELAY_NAN", "NaN"),
            ("WAGER_TEST_DELAY_INF", "inf"),
            ("WAGER_TEST_DELAY_TEXT", "soon"),
        ] {
            env::set_var(key, value);
            assert_eq!(env_secs(key, default), default, "{}={}", key, value);
        }

        env::set_var("WAGER_TEST_DELAY_OK", "2.5");
        assert_eq!(env_secs("WAGER_TEST_DELAY_OK", default), Duration::from_millis(2500));
        assert_eq!(env_secs("WAGER_TEST_DELAY_UNSET", default), default);
    }

    #[test]
    fn test_validate_rejects_non_positive_grant() {
        let mut config = sample();
        config.betting.initial_credits = 0;
        assert!(config.validate().is_err());
    }
}
