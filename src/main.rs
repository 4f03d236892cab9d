//! obsrv - e-commerce price/stock monitoring daemon.
//!
//! Usage:
//!   obsrv serve                      Run the scheduler loop continuously.
//!   obsrv crawl --website <uuid>     Crawl one website immediately.
//!   obsrv baseline --website <uuid>  Run the baseline crawler for one website.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obsrv_core::config::Config;
use obsrv_core::fetch::HttpFetcher;
use obsrv_core::parse::HtmlProductParser;
use obsrv_core::scheduler::Scheduler;
use obsrv_core::store::Store;
use obsrv_core::traits::SystemClock;
use obsrv_core::webhook::{ReqwestTransport, WebhookDeliverer};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "obsrv")]
#[command(about = "Price and stock monitoring daemon")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop continuously, polling on a fixed interval.
    Serve {
        #[arg(long, env = "OBSRV_TICK_INTERVAL_SECS", default_value = "60")]
        tick_interval_secs: u64,
    },
    /// Crawl one website immediately, outside its normal schedule.
    Crawl {
        #[arg(long)]
        website: Uuid,
    },
    /// Run the baseline crawler for one website's approved URLs.
    Baseline {
        #[arg(long)]
        website: Uuid,
        #[arg(long, value_delimiter = ',')]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;
    info!(environment = %config.environment, "obsrv starting");

    let store = Arc::new(Store::open(&config.database_path).context("opening store")?);
    let fetcher: Arc<dyn obsrv_core::traits::Fetcher> = Arc::new(
        HttpFetcher::new(
            &config.user_agent,
            config.default_crawl_timeout_secs,
            config.crawl_rate_limit_per_domain,
            config.crawl_retry_attempts,
            config.crawl_retry_backoff_base_secs,
        )
        .context("building fetcher")?,
    );
    let parser: Arc<dyn obsrv_core::traits::Parser> = Arc::new(HtmlProductParser);
    let deliverer = Arc::new(WebhookDeliverer::new(
        Box::new(ReqwestTransport::new().context("building webhook transport")?),
        config.webhook_timeout_secs,
        config.webhook_user_agent.clone(),
    ));
    let clock = Arc::new(SystemClock);

    match args.command {
        Command::Serve { tick_interval_secs } => {
            let scheduler = Scheduler::new(
                store,
                fetcher,
                parser,
                deliverer,
                clock,
                config.max_concurrent_crawls,
            );
            run_serve_loop(scheduler, tick_interval_secs).await
        }
        Command::Crawl { website } => {
            let scheduler = Scheduler::new(
                store,
                fetcher,
                parser,
                deliverer,
                clock,
                config.max_concurrent_crawls,
            );
            scheduler.run_on_demand(website).await
        }
        Command::Baseline { website, urls } => {
            let now = chrono::Utc::now();
            let result = obsrv_core::baseline::run(&store, &*fetcher, &*parser, website, &urls, now)
                .await
                .context("running baseline crawl")?;
            info!(
                products_created = result.products_created,
                errors = result.errors.len(),
                "baseline crawl complete"
            );
            for (url, error) in &result.errors {
                warn!(url, error, "baseline crawl error");
            }
            Ok(())
        }
    }
}

async fn run_serve_loop(scheduler: Scheduler, tick_interval_secs: u64) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(tick_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = scheduler.run_tick().await {
                    warn!(error = %err, "scheduler tick failed");
                }
                if let Err(err) = scheduler.process_webhook_retries().await {
                    warn!(error = %err, "webhook retry sweep failed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received, stopping scheduler loop");
                return Ok(());
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "obsrv_core=info,obsrv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
