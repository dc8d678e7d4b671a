use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "edge-cli")]
#[command(about = "Inspect a running edge proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8001")]
    url: String,

    /// Route prefix the edge forwards under.
    #[arg(short, long, default_value = "/api")]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate health: edge, backend and child process
    Health,
    /// Static info served by the edge itself
    Root,
    /// GET any path through the edge
    Get { path: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let target = match &cli.command {
        Commands::Health => format!("{}{}/health", base, cli.prefix.trim_end_matches('/')),
        Commands::Root => format!("{}/", base),
        Commands::Get { path } => format!("{}/{}", base, path.trim_start_matches('/')),
    };

    let res = client.get(target).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: edge returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
