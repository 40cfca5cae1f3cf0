use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use caching_proxy::cache::SqliteCacheStore;

#[derive(Parser)]
#[command(name = "cache-admin")]
#[command(about = "Inspect the proxy cache and manage its blacklist", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "./db.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached URLs
    List,
    /// Show the stored response for a URL
    Show { url: String },
    /// Refuse future requests for a cached URL
    Blacklist { url: String },
    /// Allow a blacklisted URL again
    Unblacklist { url: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let store = SqliteCacheStore::new(cli.database);

    match cli.command {
        Commands::List => {
            let rows = store.list().await?;
            if rows.is_empty() {
                println!("cache is empty");
            }
            for row in rows {
                println!(
                    "{:<7} {:>3} {:>9}B {}{}",
                    row.method,
                    row.status_code,
                    row.body_len,
                    row.url,
                    if row.blacklist { "  [blacklisted]" } else { "" }
                );
            }
        }
        Commands::Show { url } => match store.find(&url).await? {
            Some(record) => {
                let headers: Value = serde_json::from_str(&record.response_headers)
                    .unwrap_or_else(|_| Value::String(record.response_headers.clone()));
                let shown = json!({
                    "url": record.url,
                    "method": record.method,
                    "status_code": record.status_code,
                    "blacklist": record.blacklist,
                    "request_headers": record.request_headers.lines().collect::<Vec<_>>(),
                    "response_headers": headers,
                    "response_body": String::from_utf8_lossy(&record.response_body),
                });
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
            None => {
                eprintln!("Error: {url} is not cached");
                std::process::exit(1);
            }
        },
        Commands::Blacklist { url } => set_flag(&store, &url, true).await?,
        Commands::Unblacklist { url } => set_flag(&store, &url, false).await?,
    }

    Ok(())
}

async fn set_flag(
    store: &SqliteCacheStore,
    url: &str,
    blacklisted: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let changed = store.set_blacklisted(url, blacklisted).await?;
    if changed == 0 {
        eprintln!("Error: {url} is not cached (0 rows updated)");
        std::process::exit(1);
    }
    let state = if blacklisted { "blacklisted" } else { "allowed" };
    println!("{url}: {state} ({changed} row(s))");
    Ok(())
}
