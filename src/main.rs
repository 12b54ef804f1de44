use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use corpus_scout::auto::scheduler::{compute_deficits, PlanParams, RoundPlan};
use corpus_scout::auto::state::AutoState;
use corpus_scout::auto::AutoCrawler;
use corpus_scout::core::config::{load_config, CrawlerConfig};
use corpus_scout::pipeline::{Pipeline, PipelineOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Forums,
    Youtube,
    Gdelt,
}

impl SourceArg {
    fn key(self) -> &'static str {
        match self {
            SourceArg::Forums => "forums",
            SourceArg::Youtube => "youtube",
            SourceArg::Gdelt => "gdelt",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum AutoAction {
    #[default]
    Run,
    Status,
    Plan,
    Reset,
}

#[derive(Debug, Parser)]
#[command(
    name = "corpus-scout",
    about = "Keyword-driven multi-source corpus crawler.",
    version
)]
struct Cli {
    /// Optional path to a crawler.json override.
    #[arg(long, value_name = "PATH", global = true)]
    params: Option<PathBuf>,

    /// Run only the selected sources; omitted means all (subject to config).
    #[arg(long, num_args = 1.., value_enum)]
    only: Option<Vec<SourceArg>>,

    /// Within forums, crawl only these site keys (e.g. dcinside mlbpark).
    #[arg(long = "forums-sites", num_args = 1.., value_name = "SITE")]
    forums_sites: Option<Vec<String>>,

    /// Maximum number of fetch attempts in this run.
    #[arg(long)]
    max_fetch: Option<usize>,

    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run or inspect the auto-crawler.
    Autocrawl(AutocrawlArgs),
}

#[derive(Debug, Args)]
struct AutocrawlArgs {
    #[arg(value_enum, default_value = "run")]
    action: AutoAction,

    /// Number of rounds to run.
    #[arg(long, default_value_t = 1)]
    rounds: u32,

    /// Sleep between rounds, seconds.
    #[arg(long = "sleep-sec", default_value_t = 0.0)]
    sleep_sec: f64,

    /// Months to consider for deficits.
    #[arg(long)]
    months_back: Option<usize>,

    /// Target stored docs per source per month.
    #[arg(long = "monthly-target")]
    monthly_target: Option<i64>,

    /// Include forums (overrides config).
    #[arg(long)]
    include_forums: bool,

    /// Exclude forums (overrides config).
    #[arg(long)]
    exclude_forums: bool,

    /// Round fetch cap (overrides config).
    #[arg(long)]
    max_fetch: Option<usize>,

    #[arg(long)]
    max_gdelt_windows: Option<usize>,

    #[arg(long)]
    max_youtube_windows: Option<usize>,

    /// Max video keywords per round (quota-aware).
    #[arg(long)]
    max_youtube_keywords: Option<usize>,

    /// Do not fetch; only show the plan.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing(log_level: &str) {
    let default_level = match log_level {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn resolve_plan_params(config: &CrawlerConfig, args: &AutocrawlArgs) -> PlanParams {
    let auto = &config.autocrawl;
    let include_forums =
        (args.include_forums || auto.include_forums) && !args.exclude_forums;
    PlanParams {
        months_back: args.months_back.unwrap_or(auto.months_back),
        monthly_target_per_source: args
            .monthly_target
            .unwrap_or(auto.monthly_target_per_source),
        round_max_fetch: args.max_fetch.or(auto.round.max_fetch),
        max_gdelt_windows: args
            .max_gdelt_windows
            .unwrap_or(auto.round.max_gdelt_windows),
        max_youtube_windows: args
            .max_youtube_windows
            .unwrap_or(auto.round.max_youtube_windows),
        max_forums_windows: if include_forums {
            auto.round.max_forums_windows
        } else {
            0
        },
        max_youtube_keywords: args
            .max_youtube_keywords
            .unwrap_or(auto.round.max_youtube_keywords),
        include_forums,
    }
}

fn plan_payload(
    config: &CrawlerConfig,
    runner: &AutoCrawler,
    params: &PlanParams,
) -> serde_json::Value {
    let now = chrono::Utc::now();
    let (recent_buckets, deficits) = {
        let state = runner.state.lock().expect("auto state lock");
        compute_deficits(&state, now, params.months_back, params.monthly_target_per_source)
    };
    let plan: RoundPlan = runner.plan(params, now);
    serde_json::json!({
        "recent_buckets": recent_buckets,
        "deficits": deficits,
        "plan": {
            "windows": plan
                .windows
                .iter()
                .map(|(source, windows)| {
                    (
                        source.clone(),
                        windows
                            .iter()
                            .map(|(s, e)| (s.to_rfc3339(), e.to_rfc3339()))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect::<std::collections::BTreeMap<_, _>>(),
            "youtube_keywords": plan.youtube_keywords,
            "include_forums": plan.include_forums,
            "max_fetch": plan.max_fetch,
        },
        "config": {
            "keywords": config.keywords.len(),
            "output_root": config.output.root,
        },
    })
}

async fn autocrawl(config: CrawlerConfig, args: AutocrawlArgs) -> anyhow::Result<i32> {
    let runner = AutoCrawler::new(config.clone());
    runner.apply_quota_defaults();

    match args.action {
        AutoAction::Status => {
            let payload = {
                let mut state = runner.state.lock().expect("auto state lock");
                let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
                let available = state.youtube.available(&today);
                serde_json::json!({
                    "stored_by_source": state.stored_by_source,
                    "counts": state.counts,
                    "youtube_quota": {
                        "daily_quota": state.youtube.daily_quota,
                        "reserve_quota": state.youtube.reserve_quota,
                        "used_today": state.youtube.used_today,
                        "period_start_utc": state.youtube.period_start_utc,
                        "available": available,
                    },
                    "last_updated": state.last_updated,
                })
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        AutoAction::Reset => {
            let mut fresh = AutoState::default();
            fresh.youtube.daily_quota = config.autocrawl.youtube.daily_quota;
            fresh.youtube.reserve_quota = config.autocrawl.youtube.reserve_quota;
            fresh.save(runner.state_path())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "reset": true,
                    "path": runner.state_path(),
                }))?
            );
        }
        AutoAction::Plan => {
            let params = resolve_plan_params(&config, &args);
            let payload = plan_payload(&config, &runner, &params);
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        AutoAction::Run => {
            let params = resolve_plan_params(&config, &args);
            if args.dry_run {
                let payload = plan_payload(&config, &runner, &params);
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(0);
            }
            let rounds = args.rounds.max(1);
            let mut results = Vec::new();
            for round in 0..rounds {
                let totals = runner.run_round(&params).await?;
                info!(
                    "round {}/{} stored={} fetched={} discovered={}",
                    round + 1,
                    rounds,
                    totals.stored,
                    totals.fetched,
                    totals.discovered
                );
                results.push(serde_json::json!({
                    "round": round + 1,
                    "stored": totals.stored,
                    "fetched": totals.fetched,
                    "discovered": totals.discovered,
                }));
                if round + 1 < rounds && args.sleep_sec > 0.0 {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(args.sleep_sec)).await;
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "results": results }))?
            );
        }
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.params.as_deref())?;

    let exit_code = match cli.command {
        Some(Command::Autocrawl(args)) => autocrawl(config, args).await?,
        None => {
            let include_sources: Option<HashSet<String>> = cli
                .only
                .map(|sources| sources.iter().map(|s| s.key().to_string()).collect());
            let forum_sites_filter: Option<HashSet<String>> =
                cli.forums_sites.map(|sites| sites.into_iter().collect());
            let mut pipeline = Pipeline::new(
                config,
                PipelineOptions {
                    include_sources,
                    forum_sites_filter,
                    max_fetch: cli.max_fetch,
                    ..Default::default()
                },
            )?;
            let stats = pipeline.run().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            0
        }
    };
    std::process::exit(exit_code);
}
