use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::debug;
use serde::Serialize;

use ladder_kernel::aggregate::{self, DetailMatrix, LeaderboardRow, MatchSummary};
use ladder_kernel::config::EngineConfig;
use ladder_kernel::log::{JsonFileStore, MatchKey};
use ladder_kernel::payload::MatchPayload;
use ladder_kernel::ratings::{RatingStore, Snapshot};

/// Ladder rating engine CLI
#[derive(Parser, Debug)]
#[command(name = "ladder")]
#[command(about = "Elo ladder for two-player, free-for-all and scored matches", long_about = None)]
struct Cli {
    /// Path to the match log JSON (created if missing)
    #[arg(long)]
    log: String,

    /// Path to engine config JSON
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a player
    RegisterUser { name: String },

    /// Register a tournament
    RegisterTournament { name: String },

    /// Submit a match payload
    Submit {
        /// Path to the payload JSON
        payload: String,

        #[arg(long)]
        submitter: String,

        /// Match date (RFC 3339); defaults to now
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Show what a payload would do without committing it
    Preview {
        payload: String,

        #[arg(long, default_value = "preview")]
        submitter: String,

        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Delete a match and refold everything after it
    Delete { key: MatchKey },

    /// Switch winner and loser of a two-player match
    Switch { key: MatchKey },

    /// Rebuild all ratings from the log
    Replay,

    Leaderboard,

    /// Ratings and records inside one tournament
    Standings {
        #[arg(long)]
        tournament: String,
    },

    Matrix {
        #[arg(long)]
        tournament: Option<String>,
    },

    Recent {
        /// Number of matches; defaults to the configured value
        #[arg(short)]
        n: Option<usize>,

        #[arg(long)]
        tournament: Option<String>,
    },

    History { user: String },

    Matches { user: String },

    HeadToHead { a: String, b: String },

    Roster,

    Tournaments,
}

/// Aggregates printed after every mutation
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Refreshed<T: Serialize> {
    result: T,
    leaderboard: Vec<LeaderboardRow>,
    detail_matrix: DetailMatrix,
    recent_matches: Vec<MatchSummary>,
}

fn refreshed<T: Serialize>(result: T, snapshot: &Snapshot, config: &EngineConfig) -> Refreshed<T> {
    let standings = snapshot.standings();
    Refreshed {
        result,
        leaderboard: aggregate::leaderboard(standings),
        detail_matrix: aggregate::detail_matrix(standings, None),
        recent_matches: aggregate::recent_matches(standings, config.recent_matches, None),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_payload(path: &str) -> Result<MatchPayload> {
    let data = fs::read_to_string(path).with_context(|| format!("reading payload {path}"))?;
    let payload = serde_json::from_str(&data).with_context(|| format!("parsing payload {path}"))?;
    Ok(payload)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        serde_json::from_str::<EngineConfig>(&data)?
    } else {
        EngineConfig::default_config()
    };
    debug!("engine config: {config:?}");

    // ----------------------------
    // Open store (full replay)
    // ----------------------------
    let log_store = JsonFileStore::new(&cli.log);
    debug!("match log at {}", log_store.path().display());
    let store = RatingStore::open(log_store, config.clone())?;

    // ----------------------------
    // Run command
    // ----------------------------
    match cli.command {
        Command::RegisterUser { name } => {
            let user = store.register_user(&name, Utc::now())?;
            print(&refreshed(user, &store.snapshot(), &config))?;
        }
        Command::RegisterTournament { name } => {
            store.register_tournament(&name, Utc::now())?;
            print(&aggregate::tournaments(store.snapshot().standings()))?;
        }
        Command::Submit {
            payload,
            submitter,
            date,
        } => {
            let record = read_payload(&payload)?
                .into_record(&submitter, date.unwrap_or_else(Utc::now))?;
            let committed = store.apply_match(record)?;
            print(&refreshed(committed, &store.snapshot(), &config))?;
        }
        Command::Preview {
            payload,
            submitter,
            date,
        } => {
            let record = read_payload(&payload)?
                .into_record(&submitter, date.unwrap_or_else(Utc::now))?;
            print(&store.preview_match(record)?)?;
        }
        Command::Delete { key } => {
            let removed = store.delete_match(&key)?;
            print(&refreshed(removed, &store.snapshot(), &config))?;
        }
        Command::Switch { key } => {
            let committed = store.switch_users(&key)?;
            print(&refreshed(committed, &store.snapshot(), &config))?;
        }
        Command::Replay => {
            let snapshot = store.replay_all()?;
            print(&refreshed(snapshot.log().len(), &snapshot, &config))?;
        }
        Command::Leaderboard => {
            print(&aggregate::leaderboard(store.snapshot().standings()))?;
        }
        Command::Standings { tournament } => {
            print(&aggregate::tournament_leaderboard(
                store.snapshot().standings(),
                &tournament,
            )?)?;
        }
        Command::Matrix { tournament } => {
            let snapshot = store.snapshot();
            print(&aggregate::detail_matrix(snapshot.standings(), tournament.as_deref()))?;
        }
        Command::Recent { n, tournament } => {
            let snapshot = store.snapshot();
            let n = n.unwrap_or(config.recent_matches);
            print(&aggregate::recent_matches(snapshot.standings(), n, tournament.as_deref()))?;
        }
        Command::History { user } => {
            print(&aggregate::rating_history(store.snapshot().standings(), &user)?)?;
        }
        Command::Matches { user } => {
            print(&aggregate::user_matches(store.snapshot().standings(), &user)?)?;
        }
        Command::HeadToHead { a, b } => {
            print(&aggregate::head_to_head(store.snapshot().standings(), &a, &b)?)?;
        }
        Command::Roster => {
            print(&aggregate::roster(store.snapshot().standings()))?;
        }
        Command::Tournaments => {
            print(&aggregate::tournaments(store.snapshot().standings()))?;
        }
    }

    Ok(())
}
