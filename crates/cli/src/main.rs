//! Operational CLI for a running eligibility engine.
//!
//! Talks to the REST API; set `ELIG_API_URL` (default `http://localhost:3000`)
//! and `API_KEY` for commands that hit authenticated routes.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "elig")]
#[command(about = "Eligibility document engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the server is alive
    Health,
    /// Probe coverage for an insurance card
    Check {
        /// 13-digit insurance card number
        card_number: String,
        /// Service date, YYYY-MM-DD
        date: String,
        /// Actor name for audit attribution
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Actor role for audit attribution
        #[arg(long, default_value = "operator")]
        role: String,
    },
    /// Aggregate gateway-call statistics
    Stats {
        /// Range start, RFC 3339
        #[arg(long)]
        from: Option<String>,
        /// Range end, RFC 3339
        #[arg(long)]
        to: Option<String>,
    },
    /// CSV export of the audit ledger
    Export {
        /// Filter by action (eligibility_check, document_create, ...)
        #[arg(long)]
        action: Option<String>,
        /// Filter by outcome (success, failed)
        #[arg(long)]
        status: Option<String>,
        /// Sort key (timestamp, latency)
        #[arg(long, default_value = "timestamp")]
        sort: String,
        /// Sort order (asc, desc)
        #[arg(long, default_value = "asc")]
        order: String,
    },
}

fn base_url() -> String {
    std::env::var("ELIG_API_URL").unwrap_or_else(|_| "http://localhost:3000".into())
}

fn api_key() -> anyhow::Result<String> {
    std::env::var("API_KEY").map_err(|_| anyhow::anyhow!("API_KEY not set in environment"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::blocking::Client::new();
    let base = base_url();

    match cli.command {
        Commands::Health => {
            let body: serde_json::Value = client.get(format!("{base}/health")).send()?.json()?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Check {
            card_number,
            date,
            actor,
            role,
        } => {
            let response = client
                .post(format!("{base}/eligibility/check"))
                .header("x-api-key", api_key()?)
                .json(&serde_json::json!({
                    "card_number": card_number,
                    "service_date": date,
                    "actor_name": actor,
                    "actor_role": role,
                }))
                .send()?;
            let status = response.status();
            let body: serde_json::Value = response.json()?;
            if !status.is_success() {
                anyhow::bail!("check failed ({status}): {body}");
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Stats { from, to } => {
            let mut request = client.get(format!("{base}/audit/stats"));
            if let Some(from) = from {
                request = request.query(&[("from", from)]);
            }
            if let Some(to) = to {
                request = request.query(&[("to", to)]);
            }
            let body: serde_json::Value = request.send()?.json()?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Export {
            action,
            status,
            sort,
            order,
        } => {
            let mut request = client
                .get(format!("{base}/audit/export"))
                .query(&[("sort", sort), ("order", order)]);
            if let Some(action) = action {
                request = request.query(&[("action", action)]);
            }
            if let Some(status) = status {
                request = request.query(&[("status", status)]);
            }
            let csv = request.send()?.text()?;
            print!("{csv}");
        }
    }

    Ok(())
}
