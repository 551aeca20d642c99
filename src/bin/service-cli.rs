use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "service-cli")]
#[command(about = "Management CLI for the backend service", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SERVICE_URL", default_value = "http://localhost:3000")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version, uptime and shutdown state
    Status,
    /// Registered cron jobs, intervals and timeouts
    Jobs,
    /// Background queue counters
    Queue,
    /// Connected realtime clients
    Gateway,
    /// Readiness probe
    Ready,
    /// Liveness probe
    Live,
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Status => "/admin/status",
            Commands::Jobs => "/admin/jobs",
            Commands::Queue => "/admin/queue",
            Commands::Gateway => "/admin/gateway",
            Commands::Ready => "/health/ready",
            Commands::Live => "/health/live",
        }
    }

    fn is_admin(&self) -> bool {
        self.path().starts_with("/admin")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if cli.command.is_admin() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers)
        .send()
        .await?;
    let ok = print_response(res).await?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{}", text),
        Err(_) => {}
    }
    Ok(status.is_success())
}
