mod api;
mod config;
mod game;
mod network_client;
mod pipeline;
mod proxy;
mod scheduler;
mod session;
mod tasks;
mod user_agent;
mod utils;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use crate::config::BotConfig;
use crate::network_client::{Executor, TokioPacer};
use crate::pipeline::AccountPipeline;
use crate::scheduler::Scheduler;
use crate::session::ContextBuilder;
use crate::utils::AccountSources;

/// Startup failures; anything past startup is handled per account.
#[derive(Debug)]
enum AppError {
    Config(config::ConfigError),
    Io(std::io::Error),
    UrlParse(url::ParseError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Io(err) => write!(f, "IO error: {}", err),
            AppError::UrlParse(err) => write!(f, "URL parsing error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::UrlParse(err) => Some(err),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::UrlParse(err)
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Claims daily rewards, tasks and game rewards for a list of accounts", long_about = None)]
struct Args {
    /// JSON config file; every key is optional.
    #[clap(long, env = "HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    /// Newline-delimited account tokens.
    #[clap(long, env = "HARVESTER_TOKENS", default_value = "data.txt")]
    tokens: PathBuf,

    /// Proxy URIs, paired with tokens by line.
    #[clap(long, env = "HARVESTER_PROXIES", default_value = "proxy.txt")]
    proxies: PathBuf,

    #[clap(long, env = "HARVESTER_USER_AGENTS", default_value = "user_agents_list.txt")]
    user_agents: PathBuf,

    #[clap(long, env = "HARVESTER_USER_AGENT_CACHE", default_value = "user_agents.json")]
    user_agent_cache: PathBuf,

    #[clap(long, env = "HARVESTER_BASE_URL")]
    base_url: Option<String>,

    #[clap(long, env = "HARVESTER_ROUTE_ID")]
    route_id: Option<String>,

    #[clap(long, env = "HARVESTER_MULTIPLIER")]
    multiplier: Option<u32>,

    /// Seconds between passes, before jitter.
    #[clap(long, env = "HARVESTER_BASE_INTERVAL")]
    base_interval: Option<u64>,

    /// Upper bound of the random seconds added to each interval.
    #[clap(long, env = "HARVESTER_JITTER")]
    jitter: Option<u64>,

    /// Run a single pass and exit.
    #[clap(long)]
    once: bool,
}

impl Args {
    fn apply_to(&self, config: &mut BotConfig) {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(route_id) = &self.route_id {
            config.route_id = Some(route_id.clone());
        }
        if let Some(multiplier) = self.multiplier {
            config.multiplier = multiplier;
        }
        if let Some(base_interval) = self.base_interval {
            config.base_interval = base_interval;
        }
        if let Some(jitter) = self.jitter {
            config.jitter_bound = jitter;
        }
    }

    fn sources(&self) -> AccountSources {
        AccountSources {
            tokens: self.tokens.clone(),
            proxies: self.proxies.clone(),
            user_agent_pool: self.user_agents.clone(),
            user_agent_cache: self.user_agent_cache.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // .env is optional; real environment variables win over it
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let mut config = BotConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;
    info!(
        "Target: {} (route: {}), {} tiles, multiplier {}",
        config.base_url,
        config.route_id.as_deref().unwrap_or("none"),
        config.tile_sequence.len(),
        config.multiplier
    );

    let contexts = ContextBuilder::new(config.base_url()?, &config.referer_path)?;
    let executor = Executor::new(config.retry_policy(), Arc::new(TokioPacer));
    let pipeline = AccountPipeline::new(contexts, executor, config.routes(), config.pipeline_settings());
    let mut scheduler = Scheduler::new(pipeline, config.schedule_timing());

    let sources = args.sources();
    if args.once {
        let accounts = utils::load_accounts(&sources)?;
        if accounts.is_empty() {
            warn!("No accounts found in {}", sources.tokens.display());
        }
        scheduler.run_pass(&accounts).await;
        return Ok(());
    }

    scheduler.run_forever(|| utils::load_accounts(&sources)).await;
    Ok(())
}
