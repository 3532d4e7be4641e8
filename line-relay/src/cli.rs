use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::relay::RelaySettings;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "LINE_RELAY_LISTEN", default_value = "0.0.0.0:6667")]
    pub listen: SocketAddr,

    /// Lines buffered per client before further lines are dropped for that client.
    #[arg(
        long,
        env = "LINE_RELAY_QUEUE_CAPACITY",
        default_value_t = 64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub queue_capacity: u64,

    /// Milliseconds to wait for client tasks to finish after Ctrl-C.
    #[arg(long, env = "LINE_RELAY_DRAIN_TIMEOUT_MS", default_value_t = 5000)]
    pub drain_timeout_ms: u64,
}

impl Cli {
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            queue_capacity: usize::try_from(self.queue_capacity).unwrap_or(usize::MAX),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_port() {
        let cli = Cli::try_parse_from(["line-relay"]).expect("defaults parse");
        assert_eq!(cli.listen, "0.0.0.0:6667".parse().unwrap());
        assert_eq!(cli.settings().queue_capacity, 64);
        assert_eq!(cli.settings().drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        assert!(Cli::try_parse_from(["line-relay", "--queue-capacity", "0"]).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "line-relay",
            "--listen",
            "127.0.0.1:0",
            "--drain-timeout-ms",
            "250",
        ])
        .expect("flags parse");
        assert_eq!(cli.listen.port(), 0);
        assert_eq!(cli.settings().drain_timeout, Duration::from_millis(250));
    }
}
