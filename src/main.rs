use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use raftfuzz::compare::Comparison;
use raftfuzz::guider::{Guider, LineCoverageGuider, TlcStateGuider, TraceCoverageGuider};
use raftfuzz::mutator::{CombinedMutator, EmptyMutator};
use raftfuzz::{ClusterConfig, FuzzConfig, FuzzError, Fuzzer};

#[derive(Parser)]
#[command(
    name = "raftfuzz",
    about = "Coverage-guided schedule fuzzer for a simulated Raft cluster"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fuzzing loop with one coverage oracle.
    Fuzz(RunArgs),
    /// Run every (guider, mutator) configuration over the same budget.
    Compare(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of fuzzing episodes.
    #[arg(long, default_value_t = 1000)]
    episodes: usize,

    /// Logical steps per episode.
    #[arg(long, default_value_t = 50)]
    horizon: usize,

    /// Output directory for series, traces, and violations.
    #[arg(long, default_value = "results")]
    save: PathBuf,

    /// Cluster size.
    #[arg(long, default_value_t = 3)]
    replicas: u64,

    /// Client writes injected per episode.
    #[arg(long, default_value_t = 3)]
    requests: usize,

    /// Independent runs per configuration (compare only).
    #[arg(long, default_value_t = 3)]
    runs: usize,

    /// Write a JSON file per episode under {save}/traces.
    #[arg(long)]
    record_traces: bool,

    /// TLC model checker host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TLC model checker port.
    #[arg(long, default_value_t = 2023)]
    port: u16,

    /// Line-coverage endpoint of the system under test.
    #[arg(long, default_value = "127.0.0.1:8080")]
    coverage_addr: String,

    /// Coverage oracle for the fuzz loop.
    #[arg(long, value_enum, default_value = "tlc")]
    guider: GuiderKind,

    /// Base random seed.
    #[arg(long, default_value_t = 2023)]
    seed: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum GuiderKind {
    /// Distinct TLC model states.
    Tlc,
    /// Distinct canonical event traces.
    Trace,
    /// Distinct covered source lines of the SUT.
    Line,
}

impl RunArgs {
    fn config(&self) -> FuzzConfig {
        FuzzConfig {
            iterations: self.episodes,
            steps: self.horizon,
            number_requests: self.requests,
            seed: self.seed,
            record_traces: self.record_traces,
            save_path: self.save.clone(),
            cluster: ClusterConfig {
                replicas: self.replicas,
                ..ClusterConfig::default()
            },
            ..FuzzConfig::default()
        }
    }

    fn tlc_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Fuzz(args) => fuzz(args).await?,
        Command::Compare(args) => compare(args).await?,
    }
    Ok(())
}

async fn fuzz(args: RunArgs) -> Result<(), FuzzError> {
    let config = args.config();
    let tlc = args.tlc_addr();
    let guider: Box<dyn Guider> = match args.guider {
        GuiderKind::Tlc => Box::new(TlcStateGuider::new(&tlc)),
        GuiderKind::Trace => Box::new(TraceCoverageGuider::new(&tlc)),
        GuiderKind::Line => Box::new(LineCoverageGuider::new(&args.coverage_addr)),
    };
    let mutator = Box::new(CombinedMutator::standard(
        config.cluster.replicas,
        config.steps,
        config.max_messages,
    ));

    let mut fuzzer = Fuzzer::new(config, guider, mutator)?;
    fuzzer.run().await?;
    let path = fuzzer.write_coverage_series()?;
    info!(path = %path.display(), "coverage series written");
    Ok(())
}

async fn compare(args: RunArgs) -> Result<(), FuzzError> {
    let config = args.config();
    let tlc = args.tlc_addr();
    let replicas = config.cluster.replicas;
    let horizon = config.steps;
    let max_messages = config.max_messages;
    let combined = || Box::new(CombinedMutator::standard(replicas, horizon, max_messages));

    Comparison::new(config, args.runs)?
        .experiment(
            "random",
            Box::new(TlcStateGuider::new(&tlc)),
            Box::new(EmptyMutator),
        )
        .experiment("tlc", Box::new(TlcStateGuider::new(&tlc)), combined())
        .experiment("trace", Box::new(TraceCoverageGuider::new(&tlc)), combined())
        .experiment(
            "line",
            Box::new(LineCoverageGuider::new(&args.coverage_addr)),
            combined(),
        )
        .run()
        .await
}
