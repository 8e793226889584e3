use futures::future::join_all;
use tracing::{debug, info, warn};

use neko_resolv::config::Config;
use neko_resolv::Resolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Usage: neko-resolv <config.toml> <a|mx> <name>...
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        let program = args.first().map_or("neko-resolv", String::as_str);
        return Err(anyhow::anyhow!("usage: {} <config.toml> <a|mx> <name>...", program));
    }

    let config = Config::load(&args[1])?;

    // Initialize tracing
    let default_filter = if config.log.verbose { "neko_resolv=debug" } else { "neko_resolv=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!("🐱 neko-resolv v{} starting...", env!("CARGO_PKG_VERSION"));

    let resolver = Resolver::new(config.resolver.clone())?;
    for addr in config.nameserver_addrs()? {
        resolver.add_nameserver(addr);
    }
    if resolver.nameservers().is_empty() {
        warn!("No nameservers configured; every network lookup will fail");
    }

    if let Some(path) = &config.overrides.mx_file {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read MX overrides '{}': {}", path, e))?;
        resolver.load_mx_overrides(&text);
    }

    let names = &args[3..];
    let results: Vec<serde_json::Value> = match args[2].to_ascii_lowercase().as_str() {
        "a" => {
            let lookups: Vec<_> = names.iter().map(|n| resolver.resolve_a(n)).collect();
            join_all(lookups.iter().map(|l| l.wait()))
                .await
                .into_iter()
                .zip(names)
                .map(|(outcome, name)| match outcome {
                    Ok(addrs) => serde_json::json!({ "name": name, "addresses": addrs.to_vec() }),
                    Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
                })
                .collect()
        }
        "mx" => {
            let lookups: Vec<_> = names.iter().map(|n| resolver.resolve_mx(n)).collect();
            join_all(lookups.iter().map(|l| l.wait()))
                .await
                .into_iter()
                .zip(names)
                .map(|(outcome, name)| match outcome {
                    Ok(exchanges) => serde_json::json!({ "name": name, "exchanges": exchanges.to_vec() }),
                    Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
                })
                .collect()
        }
        other => return Err(anyhow::anyhow!("unknown record type '{}', expected a or mx", other)),
    };

    debug!("Resolver stats: {}", resolver.stats());
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
