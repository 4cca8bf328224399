use std::path::PathBuf;

use clap::Parser;

/// Runs a local Replix cluster over the in-memory transport.
#[derive(Debug, Parser)]
#[command(name = "replix-node", version, about)]
pub struct Args {
    /// Node configuration file. Repeat once per node.
    #[arg(short, long = "config", required = true)]
    pub configs: Vec<PathBuf>,

    /// Directory for the per-node log file.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Start these nodes inactive, regardless of their config.
    #[arg(long = "inactive")]
    pub inactive: Vec<String>,

    /// Transfers to submit once the cluster is up, as `client:receiver:amount`.
    #[arg(long = "transfer", value_parser = parse_transfer)]
    pub transfers: Vec<TransferArg>,

    /// Grace period for draining work on shutdown, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArg {
    pub client: String,
    pub receiver: String,
    pub amount: u64,
}

fn parse_transfer(raw: &str) -> Result<TransferArg, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [client, receiver, amount] if !client.is_empty() && !receiver.is_empty() => {
            let amount = amount
                .parse::<u64>()
                .map_err(|e| format!("invalid amount '{}': {}", amount, e))?;
            Ok(TransferArg {
                client: client.to_string(),
                receiver: receiver.to_string(),
                amount,
            })
        }
        _ => Err(format!("expected client:receiver:amount, got '{}'", raw)),
    }
}
