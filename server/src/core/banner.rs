//! Startup banner

use super::config::AppConfig;
use super::constants::APP_NAME;

/// Print the startup banner with the ingest endpoint and backends
pub fn print_banner(config: &AppConfig, document_store: &str, metrics_sink: &str) {
    // Label width: "Document store:" is 15 chars, pad to 17 for alignment
    const W: usize = 17;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();

    if config.http.enabled {
        println!(
            "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m http://{}:{}/api/v1/spans/{{data_id}}",
            "Span ingest:", config.http.host, config.http.port
        );
    } else {
        println!(
            "  \x1b[90m➜  {:<W$} disabled, set --http-enabled true to enable\x1b[0m",
            "Span ingest:"
        );
    }

    let ids: Vec<&str> = config
        .data_sources
        .iter()
        .map(|s| s.data_id.as_str())
        .collect();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Data sources:",
        if ids.is_empty() {
            "none".to_string()
        } else {
            ids.join(", ")
        }
    );
    println!(
        "  \x1b[90m➜  {:<W$} {}\x1b[0m",
        "Cache:", config.cache.backend
    );
    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Document store:", document_store);
    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Metrics sink:", metrics_sink);
    println!();
}
