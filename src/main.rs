use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use riskpilot::config::{self, OptimizerConfig, RiskConfig};
use riskpilot::data::{CsvPriceSource, PriceCache};
use riskpilot::error::{ServiceResponse, respond};
use riskpilot::risk::{RiskAggregator, RiskRequest};
use riskpilot::simulation::{GbmSimulator, MonteCarloSimulator};
use riskpilot::suggest::{SuggestionRequest, SuggestionService};
use riskpilot::trend::MovingAverageTrend;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "RiskPilot: portfolio allocation suggestions and simulation-based risk assessment",
    after_help = "EXAMPLES:
    # Assess a 60/30/10 split over 10 years
    riskpilot assess --investment 100000 --duration 10 --risk-appetite 40 --stocks 60 --bonds 30 --real-estate 10

    # Suggest an optimized portfolio with a fixed seed
    riskpilot --seed 7 suggest --investment 50000 --duration 5 --risk-tolerance 0.6 --stocks 40 --bonds 30 --real-estate 20 --commodities 10"
)]
struct Args {
    /// Directory holding the CSV price files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Seed for simulations and optimizer restarts (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate the outcome of an allocation and score its risk
    Assess {
        #[arg(long)]
        investment: f64,
        /// Horizon in years (1-30)
        #[arg(long)]
        duration: u32,
        /// 0 (cautious) to 100 (aggressive)
        #[arg(long, default_value_t = 50.0)]
        risk_appetite: f64,
        #[arg(long, default_value_t = 0.0)]
        stocks: f64,
        #[arg(long, default_value_t = 0.0)]
        bonds: f64,
        #[arg(long, default_value_t = 0.0)]
        real_estate: f64,
        #[arg(long, default_value_t = 0.0)]
        commodities: f64,
        /// Simulation paths per asset class
        #[arg(long)]
        paths: Option<usize>,
    },
    /// Optimize the asset-class split and the stock bucket
    Suggest {
        #[arg(long)]
        investment: f64,
        /// Horizon in years (1-30)
        #[arg(long)]
        duration: u32,
        /// 0.01 (cautious) to 1.0 (aggressive)
        #[arg(long)]
        risk_tolerance: f64,
        #[arg(long, default_value_t = 0.0)]
        stocks: f64,
        #[arg(long, default_value_t = 0.0)]
        bonds: f64,
        #[arg(long, default_value_t = 0.0)]
        real_estate: f64,
        #[arg(long, default_value_t = 0.0)]
        commodities: f64,
        /// Random restarts for the stock-level optimizer
        #[arg(long)]
        restarts: Option<usize>,
    },
}

fn print_response<T: Serialize>(response: &ServiceResponse<T>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(response).context("failed to serialize response")?;
    println!("{}", json);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("riskpilot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let prices = PriceCache::new(CsvPriceSource::new(&args.data_dir));
    info!("Using price data from {}", args.data_dir.display());

    let succeeded = match args.command {
        Command::Assess {
            investment,
            duration,
            risk_appetite,
            stocks,
            bonds,
            real_estate,
            commodities,
            paths,
        } => {
            let request = RiskRequest {
                investment_amount: investment,
                duration,
                risk_appetite,
                stocks,
                bonds,
                real_estate,
                commodities,
            };
            let mut monte_carlo = MonteCarloSimulator::default();
            let mut gbm = GbmSimulator::default();
            monte_carlo.seed = args.seed;
            gbm.seed = args.seed;
            if let Some(paths) = paths {
                monte_carlo.paths = paths;
                gbm.paths = paths;
            }

            let trend = MovingAverageTrend::new(&prices);
            let aggregator = RiskAggregator::new(&prices, &trend, &monte_carlo, &gbm, RiskConfig::from_env());
            let response = respond(aggregator.assess(&request))?;
            print_response(&response)?;
            response.is_success()
        }
        Command::Suggest {
            investment,
            duration,
            risk_tolerance,
            stocks,
            bonds,
            real_estate,
            commodities,
            restarts,
        } => {
            let request = SuggestionRequest {
                investment,
                duration,
                risk_tolerance,
                stocks,
                bonds,
                real_estate,
                commodities,
            };
            let mut optimizer = OptimizerConfig::from_env();
            if let Some(restarts) = restarts {
                optimizer.restarts = restarts.max(1);
            }
            let mut rng = match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            let service = SuggestionService::new(&prices, optimizer);
            let response = respond(service.suggest(&request, &mut rng))?;
            print_response(&response)?;
            response.is_success()
        }
    };

    if !succeeded {
        error!("Request could not be completed");
        std::process::exit(1);
    }
    Ok(())
}
