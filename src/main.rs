//! Chat Wagering Bot CLI
//!
//! Runs the betting bot against a chat channel, with a console standing in
//! for the game host.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wager_bot::{
    AccountStore, BettingSession, Bot, Config, Database, HostRelay, LedgerStore, MatchState,
    MemoryStore,
};

#[derive(Parser)]
#[command(name = "wager-bot")]
#[command(about = "Chat betting bot for live game matches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to chat and run the bot (type `help` on the console)
    Run {
        /// Keep accounts in memory only
        #[arg(long)]
        no_db: bool,
    },

    /// Show the richest accounts
    Top {
        /// Number of accounts to show
        #[arg(short, long, default_value = "10")]
        limit: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set an account's balance, creating it if needed
    Restore {
        name: String,
        credits: i64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run { no_db } => {
            config.validate()?;
            if no_db {
                run_bot(config, MemoryStore::new()).await?
            } else {
                let db = Database::new(&config.database_path).await?;
                run_bot(config, db).await?
            }
        }
        Commands::Top { limit, json } => show_top(&config, limit, json).await?,
        Commands::Restore { name, credits } => restore(&config, &name, credits).await?,
    }

    Ok(())
}

/// Prints relayed viewer chat where the game would show it
struct ConsoleRelay;

impl HostRelay for ConsoleRelay {
    fn relay_chat(&mut self, text: &str) {
        println!("{} {}", "[game]".cyan(), text);
    }
}

/// Operator input during `run`
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Connect,
    Disconnect,
    Flush,
    Forgive,
    Join(String),
    State(MatchState),
    Kill {
        killer: Option<String>,
        victim: String,
    },
    Help,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<ConsoleCommand> {
        let mut tokens = line.split_whitespace();
        let command = match tokens.next()? {
            "connect" => ConsoleCommand::Connect,
            "disconnect" => ConsoleCommand::Disconnect,
            "flush" => ConsoleCommand::Flush,
            "forgive" => ConsoleCommand::Forgive,
            "join" => ConsoleCommand::Join(tokens.next()?.to_string()),
            "state" => {
                let state = match tokens.next()? {
                    "entering" => MatchState::EnteringMap {
                        map: tokens.next()?.to_string(),
                    },
                    "waiting" => MatchState::WaitingToStart {
                        map: tokens.next()?.to_string(),
                    },
                    "progress" => MatchState::InProgress,
                    "post" => MatchState::WaitingPostMatch {
                        winner: tokens.next().map(str::to_string),
                    },
                    "aborted" => MatchState::Aborted,
                    _ => return None,
                };
                ConsoleCommand::State(state)
            }
            "kill" => {
                let killer = tokens.next()?;
                let victim = tokens.next()?;
                ConsoleCommand::Kill {
                    killer: (killer != "-").then(|| killer.to_string()),
                    victim: victim.to_string(),
                }
            }
            "help" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return None,
        };
        Some(command)
    }
}

const CONSOLE_HELP: &str = "commands: connect | disconnect | flush | forgive | join <name> | \
state <entering|waiting> <map> | state progress | state post [winner] | state aborted | \
kill <killer|-> <victim> | quit";

async fn run_bot<S: AccountStore>(config: Config, store: S) -> Result<()> {
    println!("\n{}", "=".repeat(70));
    println!("  WAGER BOT");
    println!(
        "  Server: {}:{} | Channel: {}",
        config.irc_host, config.irc_port, config.channel
    );
    println!(
        "  Starting credits: {} | Max bet: {}",
        config.betting.initial_credits,
        if config.betting.max_bet > 0 {
            config.betting.max_bet.to_string()
        } else {
            "none".to_string()
        }
    );
    println!("{}\n", "=".repeat(70));

    let mut session = BettingSession::new(config.betting.clone(), store, ConsoleRelay);
    session.load().await;

    let tick_interval = config.tick_interval;
    let auto_connect = config.auto_connect;
    let mut bot = Bot::new(config, session);
    if auto_connect {
        bot.connect();
    }

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_tick = tokio::time::Instant::now();

    println!("{}", CONSOLE_HELP.dimmed());

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = tokio::time::Instant::now();
                bot.tick(now - last_tick).await;
                last_tick = now;
            }
            line = console.next_line() => {
                let Some(line) = line.context("Failed to read console")? else {
                    info!("Console closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(&line) {
                    Some(ConsoleCommand::Quit) => break,
                    Some(command) => apply_console(&mut bot, command).await,
                    None => println!("{}", CONSOLE_HELP.yellow()),
                }
            }
            _ = &mut interrupted => {
                info!("Interrupted");
                break;
            }
        }
    }

    bot.shutdown().await;
    Ok(())
}

async fn apply_console<S: AccountStore>(bot: &mut Bot<S, ConsoleRelay>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Connect => bot.connect(),
        ConsoleCommand::Disconnect => bot.disconnect(),
        ConsoleCommand::Flush => {
            bot.flush().await;
        }
        ConsoleCommand::Forgive => {
            bot.forgive_bets();
        }
        ConsoleCommand::Join(name) => bot.session_mut().report_participant_joined(&name),
        ConsoleCommand::State(state) => bot.session_mut().report_match_state(state),
        ConsoleCommand::Kill { killer, victim } => {
            bot.session_mut().report_kill(killer.as_deref(), &victim)
        }
        ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
        ConsoleCommand::Quit => {}
    }
}

async fn show_top(config: &Config, limit: i64, json: bool) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let accounts = db.top_accounts(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("No accounts registered yet.");
        return Ok(());
    }

    println!("\n{}", "TOP ACCOUNTS".bold());
    println!("{}", "-".repeat(50));
    for (i, account) in accounts.iter().enumerate() {
        let credits = if account.credits >= config.betting.initial_credits {
            account.credits.to_string().green()
        } else {
            account.credits.to_string().red()
        };
        println!(
            "{:>3}. {:<24} {:>10}  bankrupts: {}",
            i + 1,
            account.name,
            credits,
            account.bankrupts
        );
    }
    println!();

    Ok(())
}

async fn restore(config: &Config, name: &str, credits: i64) -> Result<()> {
    if credits < 0 {
        anyhow::bail!("credits must not be negative");
    }

    let mut ledger = LedgerStore::new(Database::new(&config.database_path).await?);
    ledger.load().await;
    if !ledger.persistence_enabled() {
        warn!("Database unavailable, nothing restored");
        return Ok(());
    }

    ledger.restore(name, credits);
    ledger.flush().await;
    println!("{} now has {} credits", name.bold(), credits);
    Ok(())
}
