use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use leastload::PoolConfig;

/// Runtime configuration for the `leastload-sim` binary.
///
/// Pool shape and workload are fixed for the whole run. All values are parsed
/// from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leastload-sim",
    version,
    about = "Drive a least-loaded dispatcher with concurrent requesters"
)]
pub struct CliArgs {
    /// Number of worker tasks in the pool.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 3)]
    pub num_workers: usize,

    /// Capacity of each worker's inbound queue.
    ///
    /// When the least-loaded worker's queue is full the balancer blocks until
    /// it drains, and every requester waits behind it.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 3)]
    pub queue_capacity: usize,

    /// Capacity of the shared request channel feeding the balancer.
    ///
    /// Environment variable: `REQUEST_BUFFER`
    #[arg(long, env = "REQUEST_BUFFER", default_value_t = 1)]
    pub request_buffer: usize,

    /// Number of concurrent requesters.
    ///
    /// Environment variable: `NUM_REQUESTERS`
    #[arg(long, env = "NUM_REQUESTERS", default_value_t = 3)]
    pub num_requesters: usize,

    /// Requests each requester submits before exiting.
    ///
    /// Environment variable: `REQUESTS_PER_REQUESTER`
    #[arg(long, env = "REQUESTS_PER_REQUESTER", default_value_t = 5)]
    pub requests_per_requester: usize,

    /// Payloads are drawn uniformly from `0..max_payload`.
    ///
    /// Environment variable: `MAX_PAYLOAD`
    #[arg(long, env = "MAX_PAYLOAD", default_value_t = 90)]
    pub max_payload: u32,

    /// Upper bound of a random pause before each request, in milliseconds.
    /// `0` submits back to back.
    ///
    /// Environment variable: `THINK_TIME_MS`
    #[arg(long, env = "THINK_TIME_MS", default_value_t = 0)]
    pub think_time_ms: u64,

    /// Give up waiting for a reply after this many milliseconds. Unset waits
    /// forever.
    ///
    /// Environment variable: `REPLY_TIMEOUT_MS`
    #[arg(long, env = "REPLY_TIMEOUT_MS")]
    pub reply_timeout_ms: Option<u64>,

    /// Seconds to wait for each worker to stop once the run is over.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

/// What each requester does.
#[derive(Debug, Clone)]
pub struct Workload {
    pub requests: usize,
    pub max_payload: u32,
    pub think_time: Duration,
    pub reply_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub pool: PoolConfig,
    pub num_requesters: usize,
    pub workload: Workload,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let pool = PoolConfig::new(args.num_workers, args.queue_capacity)
            .with_request_buffer(args.request_buffer);
        pool.validate()?;

        if args.num_requesters == 0 {
            bail!("NUM_REQUESTERS must be greater than 0");
        }

        if args.max_payload == 0 {
            bail!("MAX_PAYLOAD must be greater than 0");
        }

        if args.reply_timeout_ms == Some(0) {
            bail!("REPLY_TIMEOUT_MS must be greater than 0 when set");
        }

        Ok(Self {
            pool,
            num_requesters: args.num_requesters,
            workload: Workload {
                requests: args.requests_per_requester,
                max_payload: args.max_payload,
                think_time: Duration::from_millis(args.think_time_ms),
                reply_timeout: args.reply_timeout_ms.map(Duration::from_millis),
            },
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<SimConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("leastload-sim").chain(args.iter().copied()))?;
        SimConfig::try_from(args)
    }

    #[test]
    fn defaults_match_the_classic_three_by_three() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.pool, PoolConfig::new(3, 3));
        assert_eq!(config.num_requesters, 3);
        assert_eq!(config.workload.requests, 5);
        assert_eq!(config.workload.max_payload, 90);
        assert_eq!(config.workload.reply_timeout, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--num-workers",
            "8",
            "--request-buffer",
            "4",
            "--reply-timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(config.pool.num_workers, 8);
        assert_eq!(config.pool.request_buffer, 4);
        assert_eq!(
            config.workload.reply_timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(parse(&["--num-workers", "0"]).is_err());
        assert!(parse(&["--num-requesters", "0"]).is_err());
        assert!(parse(&["--max-payload", "0"]).is_err());
        assert!(parse(&["--reply-timeout-ms", "0"]).is_err());
    }
}
