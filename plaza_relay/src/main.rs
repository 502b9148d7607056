// CLI entry point for the Plaza relay.
//
// Starts a standalone relay that game clients connect to and blocks until
// the process is killed. Every flag can also come from the environment.
//
// Usage:
//   relay [OPTIONS]
//     --host <HOST>                 Bind address (default: 127.0.0.1)
//     --port <PORT>                 Listen port (default: 7878)
//     --liveness-ms <MS>            Connectivity poll interval (default: 500)
//     --grace-ms <MS>               Delay before announcing a departure (default: 500)
//     --handshake-timeout-ms <MS>   Time allowed for `hello` (default: 5000)
//     --write-timeout-ms <MS>       Longest a blocked write may take (default: 5000)
//
// Logging goes through `tracing`; set `RUST_LOG` to adjust
// (default `plaza_relay=info`).

use std::time::Duration;

use clap::Parser;
use plaza_relay::{RelayConfig, RelayTimings, SocketLimits, start_relay};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Avatar state relay for Plaza multiplayer sessions")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "PLAZA_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free one).
    #[arg(long, env = "PLAZA_PORT", default_value_t = 7878)]
    port: u16,

    /// How often each connection's status is polled, in milliseconds.
    #[arg(long, env = "PLAZA_LIVENESS_MS", default_value_t = 500)]
    liveness_ms: u64,

    /// Delay before other players are told someone left, in milliseconds.
    #[arg(long, env = "PLAZA_GRACE_MS", default_value_t = 500)]
    grace_ms: u64,

    /// How long a new connection may take to identify itself, in milliseconds.
    #[arg(long, env = "PLAZA_HANDSHAKE_TIMEOUT_MS", default_value_t = 5000)]
    handshake_timeout_ms: u64,

    /// How long one write to a client may block before it is dropped, in
    /// milliseconds.
    #[arg(
        long,
        env = "PLAZA_WRITE_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    write_timeout_ms: u64,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            timings: RelayTimings {
                liveness_interval: Duration::from_millis(args.liveness_ms),
                disconnect_grace: Duration::from_millis(args.grace_ms),
            },
            limits: SocketLimits {
                handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
                write_timeout: Duration::from_millis(args.write_timeout_ms),
            },
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plaza_relay=info")),
        )
        .init();

    let config = RelayConfig::from(Args::parse());

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!("Relay listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM; the relay thread never returns
    // on its own.
    handle.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_relay_config() {
        let config = RelayConfig::from(Args::parse_from(["relay"]));
        let defaults = RelayConfig::default();
        assert_eq!(config.host, defaults.host);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.timings, defaults.timings);
        assert_eq!(config.limits, defaults.limits);
    }

    #[test]
    fn flags_override_defaults() {
        let config = RelayConfig::from(Args::parse_from([
            "relay",
            "--port",
            "9000",
            "--grace-ms",
            "1000",
            "--liveness-ms",
            "250",
            "--write-timeout-ms",
            "750",
        ]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.timings.disconnect_grace, Duration::from_secs(1));
        assert_eq!(config.timings.liveness_interval, Duration::from_millis(250));
        assert_eq!(config.limits.write_timeout, Duration::from_millis(750));
        assert_eq!(config.limits.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_write_timeout_is_rejected() {
        assert!(Args::try_parse_from(["relay", "--write-timeout-ms", "0"]).is_err());
    }
}
