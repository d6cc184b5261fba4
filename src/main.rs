use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;

use dns_racer::config::{DNS_PORT, resolver_groups};
use dns_racer::logging::init_logging;
use dns_racer::proxy::{self, ProxyConfig};

#[derive(Parser)]
#[command(name = "dns-racer")]
#[command(about = "DNS proxy racing tiered upstream resolvers", long_about = None)]
struct Args {
    /// Normal priority resolver groups, each a comma separated fallback list
    /// (e.g. 1.1.1.1,8.8.8.8). Defaults to 1.1.1.1 and 8.8.8.8
    #[arg(value_name = "GROUP")]
    resolvers: Vec<String>,

    /// Low priority resolver group, answers only when no normal one can
    #[arg(short, long, value_name = "GROUP")]
    low: Vec<String>,

    /// Local port to listen on
    #[arg(short, long, default_value_t = DNS_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Upstream query timeout in seconds
    #[arg(short, long, default_value = "10", value_name = "SECS",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Seconds between stats log lines, 0 to disable
    #[arg(long, default_value = "60", value_name = "SECS")]
    stats_interval: u64,

    /// Log received queries, chosen answers and upstream health changes
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let resolvers = match resolver_groups(&args.resolvers, &args.low) {
        Ok(groups) => groups,
        Err(e) => {
            error!(error = %e, "Invalid resolver configuration");
            return ExitCode::FAILURE;
        }
    };

    let config = ProxyConfig {
        bind_addr: SocketAddr::new(args.bind, args.port),
        resolvers,
        upstream_timeout: Duration::from_secs(args.timeout),
        stats_interval: (args.stats_interval > 0).then(|| Duration::from_secs(args.stats_interval)),
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(proxy::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "DNS proxy failed");
            ExitCode::FAILURE
        }
    }
}
