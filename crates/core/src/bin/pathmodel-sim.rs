//! Run a congestion controller against a simulated bottleneck and log what it
//! does, round by round.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pathmodel::congestion::BbrConfig;
use pathmodel::simulation::{PathProfile, SimulatedPath};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "pathmodel-sim")]
#[command(about = "Drive the BBR controller over a simulated network path")]
struct Args {
    /// Path preset: lan, datacenter, continental, intercontinental, high-latency
    #[arg(long, default_value = "continental")]
    preset: String,

    /// Override the preset's round-trip propagation delay, in milliseconds
    #[arg(long)]
    rtt_ms: Option<u64>,

    /// Override the preset's bottleneck bandwidth, in bytes per second
    #[arg(long)]
    bandwidth: Option<u64>,

    /// Override the preset's random loss probability (0.0 - 1.0)
    #[arg(long)]
    loss: Option<f64>,

    /// Override the preset's return-path jitter, as a fraction of the RTT
    #[arg(long)]
    jitter: Option<f64>,

    /// Override the preset's bottleneck queue capacity, in datagrams
    #[arg(long)]
    queue_limit: Option<usize>,

    /// Stop after this many round trips
    #[arg(long, default_value = "50")]
    rounds: usize,

    /// Run for a fixed simulated time instead of a number of rounds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Seed for every random decision in the run
    #[arg(long, env = "PATHMODEL_SEED", default_value = "0")]
    seed: u64,

    /// Controller configuration (TOML); missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Datagram payload size in bytes; defaults to the configured MSS
    #[arg(long)]
    payload_len: Option<usize>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

impl Args {
    fn profile(&self) -> anyhow::Result<PathProfile> {
        let mut profile = PathProfile::preset(&self.preset)
            .ok_or_else(|| anyhow::anyhow!("unknown path preset `{}`", self.preset))?;
        if let Some(rtt_ms) = self.rtt_ms {
            profile.rtt = Duration::from_millis(rtt_ms);
        }
        if let Some(bandwidth) = self.bandwidth {
            profile.bandwidth = bandwidth;
        }
        if let Some(loss) = self.loss {
            anyhow::ensure!((0.0..=1.0).contains(&loss), "--loss must be within [0, 1]");
            profile.loss_rate = loss;
        }
        if let Some(jitter) = self.jitter {
            anyhow::ensure!(jitter >= 0.0, "--jitter must not be negative");
            profile.jitter = jitter;
        }
        if let Some(queue_limit) = self.queue_limit {
            profile.queue_limit = queue_limit;
        }
        Ok(profile)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    pathmodel::tracing::set_logger(args.log_level.or(Some(LevelFilter::INFO)));

    let config = match &args.config {
        Some(path) => BbrConfig::load(path)?,
        None => BbrConfig::default(),
    };
    let profile = args.profile()?;
    tracing::info!(
        rtt_ms = profile.rtt_ms(),
        bandwidth = profile.bandwidth,
        loss = profile.loss_rate,
        queue_limit = profile.queue_limit,
        bdp_bytes = profile.bdp_bytes(),
        seed = args.seed,
        "Starting simulation"
    );

    let mut path = SimulatedPath::new(profile, config, args.seed);
    if let Some(payload_len) = args.payload_len {
        path = path.with_payload_len(payload_len);
    }

    match args.duration_ms {
        Some(duration_ms) => path.run_for(Duration::from_millis(duration_ms)),
        None => {
            path.run_rounds(args.rounds);
        }
    }

    for snapshot in path.rounds() {
        tracing::info!(round = snapshot.round, at_ms = snapshot.at_ms, "{}", snapshot.stats);
    }
    tracing::info!("Finished: {}", path.report());
    Ok(())
}
