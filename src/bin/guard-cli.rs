use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for clinic-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8440")]
    url: String,

    /// Admin API key.
    #[arg(short, long, env = "CLINIC_GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status and state sizes
    Status,
    /// List active blocks
    Blocks,
    /// Lift the block on an identifier (audited)
    Unblock { identifier: String },
    /// Recompute every audit hash and chain link
    VerifyAudit,
    /// Show the newest audit entries
    AuditTail {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Blocks => client.get(format!("{}/admin/blocks", base)),
        Commands::Unblock { identifier } => client.delete(format!("{}/admin/blocks/{}", base, identifier)),
        Commands::VerifyAudit => client.get(format!("{}/admin/audit/verify", base)),
        Commands::AuditTail { limit } => client
            .get(format!("{}/admin/audit/entries", base))
            .query(&[("limit", limit)]),
    };

    let res = request.headers(headers).send().await?;
    let intact = print_response(res).await?;

    // Non-zero exit for scripts when the chain is broken.
    if matches!(cli.command, Commands::VerifyAudit) && intact == Some(false) {
        std::process::exit(2);
    }
    Ok(())
}

/// Print the JSON body; returns the `intact` flag when present.
async fn print_response(res: reqwest::Response) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(json.get("intact").and_then(Value::as_bool))
}
