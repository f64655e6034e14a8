//! Configuration for querybench.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `QB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `QB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `QB__REMOTE__TYPE=tcp` selects the transport
//! - `QB__REMOTE__ADDR=127.0.0.1:5555` sets the worker address
//! - `QB__BATCH__COUNT=1000` sets the number of queries per round
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! remote:
//!   type: tcp
//!   addr: 127.0.0.1:5555
//!
//! batch:
//!   count: 1000
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use querybench_protocol::{Codec, DispatchOptions, Error};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "QB__";

/// The worker the benchmark sends its queries to.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Remote {
    /// Length-delimited frames over a plain TCP connection (type `"tcp"`).
    ///
    /// This is the transport spoken by `querybench worker`.
    ///
    /// ```yaml
    /// remote:
    ///   type: tcp
    ///   addr: 127.0.0.1:5555
    /// ```
    Tcp {
        /// `host:port` of the worker.
        addr: String,
    },

    /// A ZeroMQ `DEALER` socket connected to a `ROUTER` (type `"zmq"`).
    ///
    /// Only available when built with the `zmq` feature.
    ///
    /// ```yaml
    /// remote:
    ///   type: zmq
    ///   addr: tcp://127.0.0.1:5555
    /// ```
    Zmq {
        /// ZeroMQ endpoint, e.g. `tcp://127.0.0.1:5555`.
        addr: String,
    },
}

impl Remote {
    /// The address of the worker.
    pub fn addr(&self) -> &str {
        match self {
            Remote::Tcp { addr } | Remote::Zmq { addr } => addr,
        }
    }
}

impl Default for Remote {
    fn default() -> Self {
        Remote::Tcp {
            addr: "127.0.0.1:5555".into(),
        }
    }
}

/// The queries sent in each round.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Batch {
    /// Number of queries dispatched per round.
    ///
    /// # Default
    ///
    /// `100`
    ///
    /// # Environment Variable
    ///
    /// `QB__BATCH__COUNT`
    pub count: usize,

    /// Table the generated queries select from.
    ///
    /// # Default
    ///
    /// `"person"`
    pub table: String,

    /// Number of rows in the table. Query offsets are drawn uniformly below this bound.
    ///
    /// # Default
    ///
    /// `500000`
    pub total_rows: u64,

    /// Number of rows each query selects.
    ///
    /// # Default
    ///
    /// `100`
    pub page_size: u64,

    /// Seed for the query generator. A random seed is used if unset.
    pub seed: Option<u64>,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            count: 100,
            table: "person".into(),
            total_rows: 500_000,
            page_size: 100,
            seed: None,
        }
    }
}

/// Limits on how long the benchmark waits for replies.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Timeouts {
    /// Maximum time to collect all replies of one round.
    ///
    /// Unset by default, so a round waits as long as replies keep arriving.
    ///
    /// # Environment Variable
    ///
    /// `QB__TIMEOUTS__DEADLINE`
    #[serde(with = "humantime_serde")]
    pub deadline: Option<Duration>,

    /// Maximum time between two consecutive replies.
    ///
    /// # Default
    ///
    /// `30s`
    ///
    /// # Environment Variable
    ///
    /// `QB__TIMEOUTS__IDLE`
    #[serde(with = "humantime_serde")]
    pub idle: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deadline: None,
            idle: Some(Duration::from_secs(30)),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO querybench::worker: worker listening
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, leaving stdout to the benchmark report.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// `RUST_LOG` overrides this if set. A bare level replaces it, anything else is used as a
    /// filter directive verbatim.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `QB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Environment Variable
    ///
    /// `QB__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `QB__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Configuration of the loopback worker served by `querybench worker`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Worker {
    /// Address to accept client connections on.
    ///
    /// # Default
    ///
    /// `0.0.0.0:5555`
    ///
    /// # Environment Variable
    ///
    /// `QB__WORKER__LISTEN_ADDR`
    pub listen_addr: SocketAddr,

    /// Maximum number of requests processed at the same time.
    ///
    /// # Default
    ///
    /// `75`
    pub concurrency: usize,

    /// Lower bound of the simulated processing time per request.
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    /// Upper bound of the simulated processing time per request.
    ///
    /// # Default
    ///
    /// `5ms`
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Wire format of requests and replies.
    pub codec: Codec,
}

impl Default for Worker {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
            concurrency: 75,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_millis(5),
            codec: Codec::default(),
        }
    }
}

/// Main configuration struct for querybench.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The worker to benchmark.
    pub remote: Remote,

    /// Identity announced to the worker.
    ///
    /// A random `client_<token>` identity is generated if unset.
    ///
    /// # Environment Variable
    ///
    /// `QB__IDENTITY`
    pub identity: Option<String>,

    /// Wire format of requests and replies.
    ///
    /// # Default
    ///
    /// `msgpack`
    pub codec: Codec,

    /// The queries sent in each round.
    pub batch: Batch,

    /// Number of times the batch is dispatched and collected.
    ///
    /// # Default
    ///
    /// `1`
    pub rounds: usize,

    /// Limits on waiting for replies.
    pub timeouts: Timeouts,

    /// Logging configuration.
    pub logging: Logging,

    /// Runtime configuration.
    pub runtime: Runtime,

    /// Loopback worker configuration.
    pub worker: Worker,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: Remote::default(),
            identity: None,
            codec: Codec::default(),
            batch: Batch::default(),
            rounds: 1,
            timeouts: Timeouts::default(),
            logging: Logging::default(),
            runtime: Runtime::default(),
            worker: Worker::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `QB__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Rejects values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: &str| Err(Error::Configuration(message.into()));

        if self.remote.addr().is_empty() {
            return invalid("remote address must not be empty");
        }
        if self.batch.count == 0 {
            return invalid("batch count must be at least 1");
        }
        if self.batch.table.is_empty() {
            return invalid("batch table must not be empty");
        }
        if self.batch.total_rows == 0 {
            return invalid("batch total_rows must be at least 1");
        }
        if self.batch.page_size == 0 {
            return invalid("batch page_size must be at least 1");
        }
        if self.rounds == 0 {
            return invalid("rounds must be at least 1");
        }
        if self.runtime.worker_threads == 0 {
            return invalid("runtime worker_threads must be at least 1");
        }
        if self.worker.concurrency == 0 {
            return invalid("worker concurrency must be at least 1");
        }
        if self.worker.min_delay > self.worker.max_delay {
            return invalid("worker min_delay must not exceed max_delay");
        }

        Ok(())
    }

    /// Options for the dispatcher derived from this configuration.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            codec: self.codec,
            deadline: self.timeouts.deadline,
            idle_timeout: self.timeouts.idle,
        }
    }
}
