//! CLI definitions for egonet.
//!
//! Uses clap for argument parsing with derive macros.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::tweets::{SAMPLE_LANG, SAMPLE_QUERY};

/// egonet - ego-network and tweet collection
#[derive(Parser, Debug)]
#[command(name = "egonet")]
#[command(version)]
#[command(about = "Collect ego networks and tweets from a rate-limited social API")]
#[command(long_about = r#"
egonet collects social-graph data around a handful of seed ("ego") accounts:
their profiles, friends and followers, list memberships, and optionally the
full relationship graph among everyone found. It also gathers tweets by
keyword search, name search, user timelines, or the live stream.

Every record is tagged with the task id you pass and written to SQLite as
soon as it is collected, so an interrupted run keeps its partial results.

Quick start:
  1. Run: egonet config --init   (then fill in [credentials])
  2. Run: egonet network --task t1 alice,bob --friends
  3. Inspect: egonet stats --task t1
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "EGONET_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// More log output (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect the ego network of one or more users
    Network(NetworkArgs),

    /// Search recent tweets by keyword
    Search(SearchArgs),

    /// Search recent tweets from or to the given users
    SearchNames(SearchNamesArgs),

    /// Collect user timelines
    Timeline(TimelineArgs),

    /// Collect a language sample of recent tweets
    Sample(SampleArgs),

    /// Listen to the live stream for the given users
    Stream(StreamArgs),

    /// Look up user IDs by screen name
    Lookup(LookupArgs),

    /// Show collected counts per task
    Stats(StatsArgs),

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// Identifier attached to every record of this run
    #[arg(long, short = 't')]
    pub task: String,
}

#[derive(Args, Debug)]
pub struct NetworkArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Ego screen names, comma-separated
    #[arg(value_delimiter = ',', required = true)]
    pub egos: Vec<String>,

    /// Collect and hydrate the egos' friends
    #[arg(long)]
    pub friends: bool,

    /// Collect and hydrate the egos' followers
    #[arg(long)]
    pub followers: bool,

    /// Record the lists the egos are members of
    #[arg(long)]
    pub list_memberships: bool,

    /// Record the lists the egos subscribe to
    #[arg(long)]
    pub list_subscriptions: bool,

    /// Build the relationship graph among every collected user
    #[arg(long)]
    pub full_graph: bool,

    /// Skip egos with more followers than this
    #[arg(long, default_value = "100000")]
    pub max_followers: i64,
}

impl NetworkArgs {
    /// Whether any collection phase beyond ego resolution was requested.
    #[must_use]
    pub const fn collects_anything(&self) -> bool {
        self.friends
            || self.followers
            || self.list_memberships
            || self.list_subscriptions
            || self.full_graph
    }
}

/// Bounds shared by the search commands.
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Only tweets from this date onwards (YYYY-MM-DD); defaults to the configured window
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Only tweets before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Only tweets newer than this ID
    #[arg(long)]
    pub since_id: Option<i64>,

    /// Resume after the newest tweet already stored for the task
    #[arg(long, conflicts_with = "since_id")]
    pub resume: bool,

    /// Stop each query after this many tweets
    #[arg(long)]
    pub max_tweets: Option<u64>,

    /// Restrict results to a language code
    #[arg(long)]
    pub lang: Option<String>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Search terms, comma-separated; each is matched as a phrase
    #[arg(value_delimiter = ',', required = true)]
    pub terms: Vec<String>,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug)]
pub struct SearchNamesArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Screen names, comma-separated
    #[arg(value_delimiter = ',', required = true)]
    pub names: Vec<String>,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug)]
pub struct TimelineArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Screen names, comma-separated
    #[arg(value_delimiter = ',', required = true)]
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Query of the sample
    #[arg(long, default_value = SAMPLE_QUERY)]
    pub query: String,

    /// Language of the sample
    #[arg(long, default_value = SAMPLE_LANG)]
    pub lang: String,

    /// Stop after this many tweets
    #[arg(long)]
    pub max_tweets: Option<u64>,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Screen names to track, comma-separated
    #[arg(value_delimiter = ',', required = true)]
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Screen names, comma-separated
    #[arg(value_delimiter = ',', required = true)]
    pub names: Vec<String>,

    /// Check each name individually and report whether it exists
    #[arg(long)]
    pub exists: bool,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Task to report on; lists all tasks when omitted
    #[arg(long, short = 't')]
    pub task: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Write a default configuration file
    #[arg(long)]
    pub init: bool,

    /// Print the configuration file path
    #[arg(long)]
    pub path: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_network_flags() {
        let cli = Cli::try_parse_from([
            "egonet",
            "network",
            "--task",
            "t1",
            "alice,bob",
            "--friends",
            "--full-graph",
            "--max-followers",
            "1000",
        ])
        .unwrap();
        match cli.command {
            Commands::Network(args) => {
                assert_eq!(args.task.task, "t1");
                assert_eq!(args.egos, vec!["alice", "bob"]);
                assert!(args.friends && args.full_graph && !args.followers);
                assert_eq!(args.max_followers, 1000);
                assert!(args.collects_anything());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_search_window() {
        let cli = Cli::try_parse_from([
            "egonet", "-vv", "search", "-t", "t2", "rust,tokio", "--since", "2026-01-02", "--lang", "nl",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.terms.len(), 2);
                assert_eq!(args.window.since, NaiveDate::from_ymd_opt(2026, 1, 2));
                assert_eq!(args.window.lang.as_deref(), Some("nl"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn since_id_conflicts_with_resume() {
        let result = Cli::try_parse_from([
            "egonet", "search", "-t", "t", "x", "--since-id", "5", "--resume",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn sample_defaults() {
        let cli = Cli::try_parse_from(["egonet", "sample", "-t", "t3"]).unwrap();
        match cli.command {
            Commands::Sample(args) => {
                assert_eq!(args.query, SAMPLE_QUERY);
                assert_eq!(args.lang, "nl");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
