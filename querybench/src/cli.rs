use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{benchmark, observability, worker};

/// Correlated query benchmark over a message channel.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Worker(WorkerCommand),
    Version(VersionCommand),
}

/// dispatch queries to the configured worker and report the results
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// number of queries per round, overrides the configuration
    #[argh(option, short = 'n')]
    count: Option<usize>,

    /// number of rounds, overrides the configuration
    #[argh(option, short = 'r')]
    rounds: Option<usize>,

    /// print every query and reply
    #[argh(switch, short = 'v')]
    verbose: bool,
}

/// serve the loopback worker
///
/// The worker echoes every query back after a random delay, so replies arrive out of order.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "worker")]
struct WorkerCommand {}

/// print the querybench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Command::Run(ref run) = args.command {
        if let Some(count) = run.count {
            config.batch.count = count;
        }
        if let Some(rounds) = run.rounds {
            config.rounds = rounds;
        }
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand { verbose, .. }) => {
                benchmark::run(&config, verbose).await.map(drop)
            }
            Command::Worker(WorkerCommand {}) => worker::run(config.worker).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}
