use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "ssr-cli")]
#[command(about = "Management CLI for the SSR gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SSR_GATEWAY_URL", default_value = "http://localhost:3000")]
    url: String,

    /// API prefix configured on the server
    #[arg(long, default_value = "/api")]
    api_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is answering
    Health,
    /// Render a page
    Render {
        /// Path to render, e.g. /products/42
        path: String,
        /// Ask for the {html, state} JSON envelope
        #[arg(long)]
        json: bool,
        /// JSON object passed as render context
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let prefix = cli.api_prefix.trim_end_matches('/');
            let res = client.get(format!("{base}{prefix}/health")).send().await?;
            print_json(res).await?;
        }
        Commands::Render { path, json, body } => {
            let mut headers = HeaderMap::new();
            if json {
                headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
            }

            let url = format!("{base}/{}", path.trim_start_matches('/'));
            let request = match body {
                Some(body) => {
                    // Reject malformed JSON locally.
                    let _: Value = serde_json::from_str(&body)?;
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    client.post(url).headers(headers).body(body)
                }
                None => client.get(url).headers(headers),
            };
            let res = request.send().await?;

            if json {
                print_json(res).await?;
            } else {
                print_text(res).await?;
            }
        }
    }

    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        return print_error(res).await;
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn print_text(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if !res.status().is_success() {
        return print_error(res).await;
    }
    println!("{}", res.text().await?);
    Ok(())
}

/// Show the failed response body and turn the status into `main`'s error.
async fn print_error(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Ok(text) = res.text().await {
        eprintln!("Response: {}", text);
    }
    Err(format!("server returned status {status}").into())
}
