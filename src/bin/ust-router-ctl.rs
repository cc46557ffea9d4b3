use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "ust-router-ctl")]
#[command(about = "Management CLI for the UstRouter admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:9345")]
    url: String,

    /// Admin API username.
    #[arg(long)]
    user: Option<String>,

    /// Admin API password.
    #[arg(long, env = "UST_ROUTER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the admin API answers
    Ping,
    /// Show program version
    Version,
    /// Show server and ingestion state
    Status,
    /// Print the ingestion status dump
    Dump,
    /// Ask the agent to shut down gracefully
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let (method, path) = match cli.command {
        Commands::Ping => (reqwest::Method::GET, "/ping.json"),
        Commands::Version => (reqwest::Method::GET, "/version.json"),
        Commands::Status => (reqwest::Method::GET, "/server.json"),
        Commands::Dump => (reqwest::Method::GET, "/status.txt"),
        Commands::Shutdown => (reqwest::Method::POST, "/shutdown.json"),
    };

    let mut request = client.request(method, format!("{}{}", cli.url.trim_end_matches('/'), path));
    if let Some(user) = &cli.user {
        request = request.basic_auth(user, cli.password.as_deref());
    }
    let res = request.send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let is_json = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        let json: Value = res.json().await?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        print!("{}", res.text().await?);
    }
    Ok(())
}
