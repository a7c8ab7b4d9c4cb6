//! 🚀 spw-cli — the front door of spillway.
//!
//! 🎬 *[narrator voice]* "It all started with a pipe into stdin..."
//! 📦 Loads config, sets up logging, reads NDJSON lines from stdin, and lets the
//! buffer do the heavy lifting. Like a manager. 🦆
//!
//! Usage: `some-producer | spw-cli [spw.toml]`

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🚀 main() — where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing
/// 2. Find the config file (optional; env vars alone are fine)
/// 3. Pump stdin through the pipeline
/// 4. Explain what went wrong, if anything did
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 logs go to stderr; stdin is busy being the data
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let path_arg = std::env::args().nth(1).unwrap_or_else(|| "spw.toml".to_string());
    let config_file = std::path::Path::new(&path_arg);
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
            try an absolute one. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = spw::app_config::load_config(config_file).context(
        "💀 In spw-cli, main, we couldn't load the config. Take a look at the file and the SPW_* variables.",
    )?;

    let result = spw::run(app_config, BufReader::new(tokio::io::stdin())).await;

    match result {
        Ok(summary) => {
            info!(
                "✅ stdin drained: {} accepted, {} rejected",
                summary.accepted, summary.rejected
            );
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // 🧅 peel the onion, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the sink isn't reachable. \
                    Double-check that Elasticsearch or the REST proxy is actually running. \
                    If you're using Docker, `docker ps` is a good first question to ask. ☕"
                );
            }

            std::process::exit(1);
        }
    }
}
