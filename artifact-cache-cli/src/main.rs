use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "artifact-cache-cli")]
#[command(about = "Artifact cache operator tool", long_about = None)]
#[command(version)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value = "8700")]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entries and disk usage per category
    Status,
    /// Hit rates, evictions and tier statistics
    Stats,
    /// Text performance report
    Report,
    /// Remove expired entries from both tiers
    ClearExpired,
    /// Remove every entry, or every entry of one category
    Clear {
        /// data, chart or analysis
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Server and cache health
    Health,
}

struct CacheClient {
    base_url: String,
    client: reqwest::Client,
}

impl CacheClient {
    fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            client: reqwest::Client::new(),
        }
    }

    async fn execute(&self, command: &Command) -> Result<String> {
        let start = Instant::now();

        let response = match command {
            Command::Status => self.cmd_status().await?,
            Command::Stats => self.cmd_stats().await?,
            Command::Report => self.cmd_report().await?,
            Command::ClearExpired => self.cmd_clear_expired().await?,
            Command::Clear { category } => self.cmd_clear(category.as_deref()).await?,
            Command::Health => self.cmd_health().await?,
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?;
        Self::into_json(res).await
    }

    async fn into_json(res: reqwest::Response) -> Result<Value> {
        let status = res.status();
        let body = res.json::<Value>().await?;
        if status.is_client_error() || status.is_server_error() {
            return Err(anyhow::anyhow!(
                "{} {}",
                status,
                body["error"].as_str().unwrap_or("request failed")
            ));
        }
        Ok(body)
    }

    async fn cmd_status(&self) -> Result<String> {
        let res = self.get_json("/cache/stats").await?;

        let mut output = Vec::new();
        output.push("# Cache Status".bold().to_string());
        output.push(format!(
            "enabled: {}",
            if res["enabled"].as_bool().unwrap_or(false) {
                "yes".green()
            } else {
                "no".red()
            }
        ));
        output.push(format!(
            "disk size: {} / {}",
            format_size(res["disk"]["total_bytes"].as_u64().unwrap_or(0)),
            format_size(res["disk"]["max_bytes"].as_u64().unwrap_or(0))
        ));
        output.push(String::new());
        output.push("# Entries (memory / disk)".bold().to_string());

        let mut total_memory = 0;
        let mut total_disk = 0;
        for category in CATEGORIES {
            let stats = &res["categories"][category];
            let memory = stats["memory_entries"].as_u64().unwrap_or(0);
            let disk = stats["disk_entries"].as_u64().unwrap_or(0);
            total_memory += memory;
            total_disk += disk;
            output.push(format!(
                "{:<9} {:>6} / {:<6} {}",
                category,
                memory,
                disk,
                format_size(stats["bytes_stored"].as_u64().unwrap_or(0)).dimmed()
            ));
        }
        output.push(format!("{:<9} {:>6} / {:<6}", "total", total_memory, total_disk));

        Ok(output.join("\n"))
    }

    async fn cmd_stats(&self) -> Result<String> {
        let res = self.get_json("/cache/stats").await?;

        let mut output = Vec::new();
        output.push("# Categories".bold().to_string());
        for category in CATEGORIES {
            let stats = &res["categories"][category];
            output.push(format!(
                "{:<9} hits={} misses={} evictions={} expirations={} hit_rate={:.1}%",
                category,
                stats["hits"],
                stats["misses"],
                stats["evictions"],
                stats["expirations"],
                stats["hit_rate"].as_f64().unwrap_or(0.0)
            ));
        }
        output.push(String::new());
        output.push("# Totals".bold().to_string());
        output.push(format!(
            "hit_ratio: {:.2}%",
            res["hit_ratio"].as_f64().unwrap_or(0.0) * 100.0
        ));
        output.push(format!(
            "time_saved: {:.2}s",
            res["time_saved_ms"].as_f64().unwrap_or(0.0) / 1000.0
        ));
        output.push(format!("in_flight: {}", res["in_flight"]));
        output.push(String::new());
        output.push("# Memory".bold().to_string());
        output.push(format!(
            "entries: {} / {}",
            res["memory"]["entries"], res["memory"]["max_entries"]
        ));
        output.push(format!("lru_evictions: {}", res["memory"]["lru_evictions"]));
        output.push(String::new());
        output.push("# Disk".bold().to_string());
        output.push(format!("entries: {}", res["disk"]["entries"]));
        output.push(format!(
            "utilization: {:.1}%",
            res["disk"]["utilization"].as_f64().unwrap_or(0.0)
        ));
        output.push(format!("size_evictions: {}", res["disk"]["size_evictions"]));
        output.push(format!("corrupt_entries: {}", res["disk"]["corrupt_entries"]));

        Ok(output.join("\n"))
    }

    async fn cmd_report(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/performance/report", self.base_url))
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?
            .error_for_status()?;
        Ok(res.text().await?)
    }

    async fn cmd_clear_expired(&self) -> Result<String> {
        let res = self
            .client
            .post(format!("{}/cache/clear", self.base_url))
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?;
        let body = Self::into_json(res).await?;

        Ok(format!(
            "{} removed {} expired entries (memory={}, disk={})",
            "OK".green(),
            body["removed"],
            body["memory"],
            body["disk"]
        ))
    }

    async fn cmd_clear(&self, category: Option<&str>) -> Result<String> {
        let mut request = self.client.delete(format!("{}/cache/all", self.base_url));
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }
        let res = request
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?;
        let body = Self::into_json(res).await?;

        Ok(format!(
            "{} cleared {} ({} entries: memory={}, disk={})",
            "OK".green(),
            category.unwrap_or("all categories"),
            body["removed"],
            body["memory"],
            body["disk"]
        ))
    }

    async fn cmd_health(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?
            .json::<Value>()
            .await?;

        let cache = &res["cache"];
        let mut output = Vec::new();
        if res["status"] == "healthy" {
            output.push("healthy".green().to_string());
        } else {
            output.push("degraded".red().to_string());
        }
        output.push(format!("version: {}", res["version"].as_str().unwrap_or("?")));
        output.push(format!("cache: {}", cache["status"].as_str().unwrap_or("?")));
        output.push(format!("disk reachable: {}", cache["disk_reachable"]));
        output.push(format!("disk within cap: {}", cache["disk_within_cap"]));
        if let Some(err) = cache["disk_error"].as_str() {
            output.push(format!("disk error: {}", err.red()));
        }

        Ok(output.join("\n"))
    }
}

const CATEGORIES: [&str; 3] = ["data", "chart", "analysis"];

/// Render a byte count with a binary unit
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // User-facing output goes through tracing on stdout
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_level(false)
        .without_time()
        .init();

    let args = Args::parse();
    let client = CacheClient::new(&args.host, args.port);

    match client.execute(&args.command).await {
        Ok(output) => {
            info!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "{}", format!("Error: {:#}", e).red());
            std::process::exit(1);
        }
    }
}
