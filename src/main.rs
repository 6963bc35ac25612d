//! egonet - ego-network collection CLI
//!
//! Main entry point for the egonet command-line tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use serde::Serialize;
use std::io;
use tracing::{info, warn};

use egonet::logging::{LogConfig, init_logging};
use egonet::profiles::{ids_for_names, user_exists};
use egonet::tweets::CollectionStats;
use egonet::*;

fn main() {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbosity(cli.quiet, cli.verbose));

    let result = match &cli.command {
        Commands::Network(args) => cmd_network(&cli, args),
        Commands::Search(args) => cmd_search(&cli, args),
        Commands::SearchNames(args) => cmd_search_names(&cli, args),
        Commands::Timeline(args) => cmd_timeline(&cli, args),
        Commands::Sample(args) => cmd_sample(&cli, args),
        Commands::Stream(args) => cmd_stream(&cli, args),
        Commands::Lookup(args) => cmd_lookup(&cli, args),
        Commands::Stats(args) => cmd_stats(&cli, args),
        Commands::Config(args) => cmd_config(&cli, args),
        Commands::Completions(args) => cmd_completions(args),
    };

    if let Err(err) = result {
        eprintln!("{}", render_error(&err));
        std::process::exit(1);
    }
}

fn render_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<EgonetError>() {
        Some(e) => {
            let hints: Vec<&str> = e.suggestion().into_iter().collect();
            format_error(&e.to_string(), "", &hints)
        }
        None => format_error(&err.to_string(), &format!("{err:#}"), &[]),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }
    Ok(config)
}

/// Validate credentials and open an authenticated session.
fn connect(config: &Config) -> Result<RateLimitedClient<HttpApi>> {
    config.credentials.validate()?;
    let api = HttpApi::new(&config.api, config.credentials.clone()).map_err(EgonetError::from)?;
    let mut client = RateLimitedClient::new(api, RetryPolicy::from(&config.retry));
    client
        .authenticate()
        .map_err(|e| EgonetError::Authentication(e.to_string()))?;
    client.verify_credentials().map_err(EgonetError::from)?;
    Ok(client)
}

fn open_storage(config: &Config) -> Result<Storage> {
    let path = config.db_path();
    info!(path = %path.display(), "Opening database");
    Storage::open(&path)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_network(cli: &Cli, args: &cli::NetworkArgs) -> Result<()> {
    let config = load_config(cli)?;
    if !args.collects_anything() {
        warn!("No collection flags given; only the egos' profiles will be stored");
    }
    let client = connect(&config)?;
    let storage = open_storage(&config)?;

    let options = NetworkOptions {
        task_id: TaskId::new(&args.task.task),
        collect_friends: args.friends,
        collect_followers: args.followers,
        collect_list_memberships: args.list_memberships,
        collect_list_subscriptions: args.list_subscriptions,
        build_full_relationship_graph: args.full_graph,
        max_followers: args.max_followers,
    };
    let mut builder = EgoNetworkBuilder::new(
        client,
        storage,
        config.throttle.clone(),
        config.retry.store_retries,
    );
    let report = builder.run(&args.egos, &options).map_err(EgonetError::from)?;

    match cli.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_network_report(&report);
            Ok(())
        }
    }
}

fn print_network_report(report: &NetworkReport) {
    println!("{}", format!("Network collected for task {}", report.task_id).bold().cyan());
    println!("{}", "─".repeat(40));
    println!("  {:<20} {}", "Egos:", report.egos.join(", "));
    for excluded in &report.excluded {
        println!(
            "  {:<20} @{} ({:?})",
            "Excluded:",
            excluded.screen_name,
            excluded.reason
        );
    }
    if !report.unresolved.is_empty() {
        println!("  {:<20} {}", "Unresolved:", report.unresolved.join(", ").yellow());
    }
    println!("  {:<20} {:>10}", "Population:", format_count(report.population));
    println!("  {:<20} {:>10}", "Friend edges:", format_count(report.friend_edges));
    println!("  {:<20} {:>10}", "Follower edges:", format_count(report.follower_edges));
    println!("  {:<20} {:>10}", "Lists:", format_count(report.lists));
    if let Some(kind) = report.graph_direction {
        println!("  {:<20} {}", "Graph direction:", kind.plural());
    }
    print_abandoned(&report.abandoned);
}

fn print_abandoned(abandoned: &[String]) {
    if abandoned.is_empty() {
        return;
    }
    println!("{}", "─".repeat(40));
    println!("  {} {}", "⚠".yellow(), format!("{} sub-operations abandoned", abandoned.len()).yellow());
    for item in abandoned {
        println!("    {} {item}", "•".dimmed());
    }
}

/// The search window for a command, defaulting `since` to the configured
/// number of days back.
fn search_window(
    args: &cli::WindowArgs,
    config: &Config,
    storage: &Storage,
    task: &TaskId,
) -> Result<SearchWindow> {
    let days = u64::try_from(config.search.window_days).unwrap_or(7);
    let recent = SearchWindow::recent(Utc::now().date_naive(), days);
    let since_id = if args.resume {
        storage.latest_tweet_id(task)?
    } else {
        args.since_id
    };

    Ok(SearchWindow {
        since: args.since.or(recent.since),
        until: args.until,
        since_id,
        lang: args.lang.clone(),
    })
}

fn tweet_collector(config: &Config, task: &TaskId, max_tweets: Option<u64>) -> TweetCollector {
    TweetCollector::new(
        task.clone(),
        config.retry.store_retries,
        config.throttle.search_page_delay(),
        max_tweets.unwrap_or(config.search.max_tweets),
    )
}

fn print_collection(cli: &Cli, title: &str, stats: &CollectionStats) -> Result<()> {
    if cli.format == OutputFormat::Json {
        return print_json(stats);
    }
    println!("{}", title.bold().cyan());
    println!("{}", "─".repeat(40));
    println!("  {:<20} {:>10}", "Queries:", format_count(stats.queries));
    println!("  {:<20} {:>10}", "Pages:", format_count(stats.pages));
    println!("  {:<20} {:>10}", "Fetched:", format_count(stats.fetched));
    println!("  {:<20} {:>10}", "Saved:", format_count(stats.saved).green());
    if stats.skipped > 0 {
        println!("  {:<20} {:>10}", "Skipped:", format_count(stats.skipped).yellow());
    }
    print_abandoned(&stats.abandoned);
    Ok(())
}

fn cmd_search(cli: &Cli, args: &cli::SearchArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;
    let mut storage = open_storage(&config)?;
    let task = TaskId::new(&args.task.task);

    let window = search_window(&args.window, &config, &storage, &task)?;
    let stats = tweet_collector(&config, &task, args.window.max_tweets)
        .search_terms(&mut client, &mut storage, &args.terms, &window)
        .map_err(EgonetError::from)?;
    print_collection(cli, "Keyword search finished", &stats)
}

fn cmd_search_names(cli: &Cli, args: &cli::SearchNamesArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;
    let mut storage = open_storage(&config)?;
    let task = TaskId::new(&args.task.task);

    let window = search_window(&args.window, &config, &storage, &task)?;
    let stats = tweet_collector(&config, &task, args.window.max_tweets)
        .search_names(&mut client, &mut storage, &args.names, &window)
        .map_err(EgonetError::from)?;
    print_collection(cli, "Name search finished", &stats)
}

fn cmd_timeline(cli: &Cli, args: &cli::TimelineArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;
    let mut storage = open_storage(&config)?;
    let task = TaskId::new(&args.task.task);

    let stats = tweet_collector(&config, &task, None)
        .timeline(&mut client, &mut storage, &args.names)
        .map_err(EgonetError::from)?;
    print_collection(cli, "Timelines collected", &stats)
}

fn cmd_sample(cli: &Cli, args: &cli::SampleArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;
    let mut storage = open_storage(&config)?;
    let task = TaskId::new(&args.task.task);

    let stats = tweet_collector(&config, &task, args.max_tweets)
        .collect_sample(&mut client, &mut storage, &args.query, &args.lang)
        .map_err(EgonetError::from)?;
    print_collection(cli, "Sample collected", &stats)
}

fn cmd_stream(cli: &Cli, args: &cli::StreamArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;
    let mut storage = open_storage(&config)?;
    let task = TaskId::new(&args.task.task);

    let stop = StopHandle::new();
    watch_ctrl_c(stop.clone())?;

    let listener = StreamListener::new(task, config.retry.store_retries, stop);
    let stats = listener
        .listen(&mut client, &mut storage, &args.names)
        .map_err(EgonetError::from)?;

    if cli.format == OutputFormat::Json {
        return print_json(&stats);
    }
    println!("{}", "Stream ended".bold().cyan());
    println!("  {:<20} {:>10}", "Statuses:", format_count(stats.statuses));
    println!("  {:<20} {:>10}", "Saved:", format_count(stats.saved).green());
    println!("  {:<20} {:>10}", "Delivery errors:", format_count(stats.errors));
    Ok(())
}

/// Raise `stop` on Ctrl-C, from a small signal runtime on its own thread.
fn watch_ctrl_c(stop: StopHandle) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler")?;

    std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if stop.is_stopped() {
                        warn!("Second interrupt, exiting without waiting for the stream");
                        std::process::exit(130);
                    }
                    info!("Stop requested, closing stream");
                    stop.stop();
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

#[derive(Serialize)]
struct LookupResult<'a> {
    name: &'a str,
    exists: bool,
}

fn cmd_lookup(cli: &Cli, args: &cli::LookupArgs) -> Result<()> {
    let config = load_config(cli)?;
    let mut client = connect(&config)?;

    if args.exists {
        let mut results = Vec::with_capacity(args.names.len());
        for name in &args.names {
            let exists = user_exists(&mut client, name).map_err(EgonetError::from)?;
            results.push(LookupResult { name, exists });
        }
        if cli.format == OutputFormat::Json {
            return print_json(&results);
        }
        for r in &results {
            let mark = if r.exists { "✓".green() } else { "✗".red() };
            println!("  {mark} @{}", r.name);
        }
        return Ok(());
    }

    let ids = ids_for_names(&mut client, &args.names).map_err(EgonetError::from)?;
    if cli.format == OutputFormat::Json {
        return print_json(&ids);
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

#[derive(Serialize)]
struct TaskSummary {
    task_id: TaskId,
    #[serde(flatten)]
    stats: TaskStats,
}

fn cmd_stats(cli: &Cli, args: &cli::StatsArgs) -> Result<()> {
    let config = load_config(cli)?;
    let storage = open_storage(&config)?;

    let tasks = match &args.task {
        Some(task) => vec![TaskId::new(task)],
        None => storage.task_ids()?,
    };
    let summaries = tasks
        .into_iter()
        .map(|task_id| {
            let stats = storage.task_stats(&task_id)?;
            Ok(TaskSummary { task_id, stats })
        })
        .collect::<Result<Vec<_>>>()?;

    if cli.format == OutputFormat::Json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        println!("{}", "No tasks collected yet.".yellow());
        return Ok(());
    }
    for summary in &summaries {
        let stats = &summary.stats;
        println!("{}", format!("Task {}", summary.task_id).bold().cyan());
        println!("{}", "─".repeat(40));
        println!("  {:<20} {:>10}", "User snapshots:", format_number(stats.users_count));
        println!("  {:<20} {:>10}", "Distinct users:", format_number(stats.distinct_users_count));
        println!("  {:<20} {:>10}", "Friend edges:", format_number(stats.friend_edges_count));
        println!("  {:<20} {:>10}", "Follower edges:", format_number(stats.follower_edges_count));
        println!("  {:<20} {:>10}", "Lists:", format_number(stats.lists_count));
        println!("  {:<20} {:>10}", "Tweets:", format_number(stats.tweets_count));
        if let (Some(first), Some(last)) = (stats.first_tweet_date, stats.last_tweet_date) {
            println!("  First tweet: {}", first.format("%Y-%m-%d").to_string().green());
            println!("  Last tweet:  {}", last.format("%Y-%m-%d").to_string().green());
        }
        println!();
    }
    Ok(())
}

fn cmd_config(cli: &Cli, args: &cli::ConfigArgs) -> Result<()> {
    if args.path {
        match Config::user_config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", "No config directory on this platform.".yellow()),
        }
    }

    if args.init {
        let existing = Config::user_config_path().filter(|p| p.exists());
        if let Some(path) = existing {
            println!("{} Config already exists at {}", "•".dimmed(), path.display());
        } else {
            let path = Config::default().save()?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
    }

    if args.show || !(args.path || args.init) {
        let mut config = load_config(cli)?;
        redact(&mut config.credentials);
        match cli.format {
            OutputFormat::Json => print_json(&config)?,
            OutputFormat::Text => {
                println!("{}", "Current Configuration".bold().cyan());
                println!("  Database: {}", config.db_path().display());
                println!();
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }
    Ok(())
}

fn redact(credentials: &mut egonet::config::Credentials) {
    for value in [
        &mut credentials.consumer_key,
        &mut credentials.consumer_secret,
        &mut credentials.access_token,
        &mut credentials.access_token_secret,
    ] {
        if !value.is_empty() {
            *value = "<redacted>".to_string();
        }
    }
}

fn cmd_completions(args: &cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "egonet", &mut io::stdout());
    Ok(())
}
