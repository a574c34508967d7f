use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, ValueEnum};
use ferroshard::{Level, MIN_COUNTER_SHARDS, MemoryStoreConfig};

/// Which generator the load driver exercises.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Strictly increasing numbers from a single document.
    Serial,
    /// Unique, unordered numbers spread over `--shards` documents.
    Coder,
    /// Time-bucketed counter spread over `--shards` documents per bucket.
    Counter,
}

/// Runtime configuration for the `ferroshard` load driver.
///
/// Every worker thread builds its own generator over one shared in-memory
/// store and issues `--ops` calls against the same `(collection, id)`. The
/// run reports throughput, retries exhausted and the final state of the
/// shard-set. All values are parsed from CLI arguments or environment
/// variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferroshard",
    version,
    about = "Drive concurrent load through ferroshard generators"
)]
pub struct CliArgs {
    /// Generator to exercise.
    ///
    /// Environment variable: `FERROSHARD_GENERATOR`
    #[arg(long, env = "FERROSHARD_GENERATOR", value_enum, default_value_t = GeneratorKind::Coder)]
    pub generator: GeneratorKind,

    /// Number of worker threads calling the generator concurrently.
    ///
    /// Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `FERROSHARD_THREADS`
    #[arg(long, env = "FERROSHARD_THREADS", default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Calls issued by each worker thread.
    ///
    /// Environment variable: `FERROSHARD_OPS`
    #[arg(long, env = "FERROSHARD_OPS", default_value_t = 1_000)]
    pub ops: usize,

    /// Shard documents per shard-set. Ignored by `serial`.
    ///
    /// Counters never use fewer than 10.
    ///
    /// Environment variable: `FERROSHARD_SHARDS`
    #[arg(long, env = "FERROSHARD_SHARDS", default_value_t = 100)]
    pub shards: u32,

    /// Top-level collection holding the shard-set container.
    ///
    /// Environment variable: `FERROSHARD_COLLECTION`
    #[arg(long, env = "FERROSHARD_COLLECTION", default_value_t = String::from("load"))]
    pub collection: String,

    /// Shard-set id within the collection.
    ///
    /// Environment variable: `FERROSHARD_ID`
    #[arg(long, env = "FERROSHARD_ID", default_value_t = String::from("ferroshard"))]
    pub id: String,

    /// Comma-separated counter levels (`total,year,month,day,hour`). `total`
    /// is always kept. Defaults to every level.
    ///
    /// Environment variable: `FERROSHARD_LEVELS`
    #[arg(long, env = "FERROSHARD_LEVELS", value_delimiter = ',')]
    pub levels: Vec<String>,

    /// Documents a single commit or batch delete may touch.
    ///
    /// Environment variable: `FERROSHARD_MAX_BATCH_SIZE`
    #[arg(long, env = "FERROSHARD_MAX_BATCH_SIZE", default_value_t = 500)]
    pub max_batch_size: usize,

    /// Transaction attempts before a call fails with contention.
    ///
    /// Environment variable: `FERROSHARD_MAX_ATTEMPTS`
    #[arg(long, env = "FERROSHARD_MAX_ATTEMPTS", default_value_t = 100)]
    pub max_attempts: usize,

    /// Deadline for the whole run in seconds. `0` disables it.
    ///
    /// Environment variable: `FERROSHARD_TIMEOUT_SECS`
    #[arg(long, env = "FERROSHARD_TIMEOUT_SECS", default_value_t = 0)]
    pub timeout_secs: u64,

    /// Print every shard document as JSON once the run finishes.
    #[arg(long, default_value_t = false)]
    pub dump: bool,

    /// Keep the shard-set instead of deleting it at the end of the run.
    #[arg(long, default_value_t = false)]
    pub keep: bool,

    /// Emit logs as JSON lines instead of human-readable text.
    ///
    /// Environment variable: `FERROSHARD_JSON_LOGS`
    #[arg(long, env = "FERROSHARD_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub generator: GeneratorKind,
    pub threads: usize,
    pub ops: usize,
    pub shards: u32,
    pub collection: String,
    pub id: String,
    pub levels: Vec<Level>,
    pub store: MemoryStoreConfig,
    pub timeout: Option<Duration>,
    pub dump: bool,
    pub keep: bool,
}

impl LoadConfig {
    /// Total calls across all workers.
    pub fn total_ops(&self) -> usize {
        self.threads.saturating_mul(self.ops)
    }
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.threads == 0 {
            bail!("FERROSHARD_THREADS must be greater than 0");
        }
        if args.ops == 0 {
            bail!("FERROSHARD_OPS must be greater than 0");
        }
        if args.shards == 0 {
            bail!("FERROSHARD_SHARDS must be greater than 0");
        }
        if args.collection.is_empty() || args.id.is_empty() {
            bail!("FERROSHARD_COLLECTION and FERROSHARD_ID must not be empty");
        }
        // In-transaction deletes keep one slot free for the container.
        if args.max_batch_size < 2 {
            bail!(
                "FERROSHARD_MAX_BATCH_SIZE ({}) must be at least 2",
                args.max_batch_size
            );
        }
        if args.max_attempts == 0 {
            bail!("FERROSHARD_MAX_ATTEMPTS must be greater than 0");
        }
        if args.generator == GeneratorKind::Counter && args.shards < MIN_COUNTER_SHARDS {
            bail!(
                "FERROSHARD_SHARDS ({}) is below the counter minimum of {}",
                args.shards,
                MIN_COUNTER_SHARDS
            );
        }
        if args.generator != GeneratorKind::Counter && !args.levels.is_empty() {
            bail!("FERROSHARD_LEVELS only applies to the counter generator");
        }

        let levels = if args.levels.is_empty() {
            Level::ALL.to_vec()
        } else {
            args.levels
                .iter()
                .map(|raw| {
                    raw.trim()
                        .parse::<Level>()
                        .map_err(|e| anyhow!("FERROSHARD_LEVELS: {e}"))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let timeout = (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));

        Ok(Self {
            generator: args.generator,
            threads: args.threads,
            ops: args.ops,
            shards: args.shards,
            collection: args.collection,
            id: args.id,
            levels,
            store: MemoryStoreConfig {
                max_batch_size: args.max_batch_size,
                max_attempts: args.max_attempts,
            },
            timeout,
            dump: args.dump,
            keep: args.keep,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<LoadConfig> {
        let mut argv = vec!["ferroshard", "--threads", "4"];
        argv.extend_from_slice(extra);
        LoadConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_validate() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.generator, GeneratorKind::Coder);
        assert_eq!(config.total_ops(), 4_000);
        assert_eq!(config.levels, Level::ALL);
        assert_eq!(config.store.max_batch_size, 500);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn counter_levels_parse_case_insensitively() {
        let config = parse(&["--generator", "counter", "--levels", "Total,DAY"]).unwrap();
        assert_eq!(config.levels, [Level::Total, Level::Day]);
    }

    #[test]
    fn rejects_unknown_level() {
        let err = parse(&["--generator", "counter", "--levels", "week"]).unwrap_err();
        assert!(err.to_string().contains("FERROSHARD_LEVELS"));
    }

    #[test]
    fn rejects_levels_for_other_generators() {
        assert!(parse(&["--generator", "serial", "--levels", "day"]).is_err());
    }

    #[test]
    fn rejects_zero_values() {
        assert!(parse(&["--ops", "0"]).is_err());
        assert!(parse(&["--shards", "0"]).is_err());
        assert!(parse(&["--max-attempts", "0"]).is_err());
        assert!(parse(&["--max-batch-size", "1"]).is_err());
        let args = CliArgs::try_parse_from(["ferroshard", "--threads", "0"]).unwrap();
        assert!(LoadConfig::try_from(args).is_err());
    }

    #[test]
    fn rejects_small_counter_shard_sets() {
        assert!(parse(&["--generator", "counter", "--shards", "9"]).is_err());
        assert!(parse(&["--generator", "counter", "--shards", "10"]).is_ok());
    }

    #[test]
    fn timeout_sets_deadline() {
        let config = parse(&["--timeout-secs", "30"]).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
    }
}
