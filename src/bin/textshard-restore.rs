use clap::Parser;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};

#[derive(Parser, Debug)]
#[command(name = "textshard-restore")]
#[command(about = "Import a JSONL dump into a textshard primary", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short = 'P', long, default_value_t = 7700)]
    port: u16,

    /// Input file (JSONL, one document per line)
    #[arg(short, long)]
    input: String,

    /// Documents per ingestion batch
    #[arg(long, default_value_t = 500)]
    batch_size: usize,

    /// Bearer token (overrides TEXTSHARD_API_TOKEN)
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let base_url = format!("http://{}:{}", args.host, args.port);
    let token = args
        .token
        .clone()
        .or_else(|| std::env::var("TEXTSHARD_API_TOKEN").ok());

    let file = File::open(&args.input)?;
    let reader = BufReader::new(file);
    let client = reqwest::Client::new();

    let mut batch: Vec<Value> = Vec::with_capacity(args.batch_size);
    let mut restored: u64 = 0;
    let mut skipped: u64 = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = match serde_json::from_str(&line) {
            Ok(doc) => doc,
            Err(err) => {
                eprintln!("line {}: skipping invalid JSON ({})", line_no + 1, err);
                skipped += 1;
                continue;
            }
        };
        if doc.get("id").is_none() || doc.get("content").is_none() {
            eprintln!("line {}: skipping document without id/content", line_no + 1);
            skipped += 1;
            continue;
        }
        batch.push(doc);

        if batch.len() >= args.batch_size {
            restored += flush(&client, &base_url, token.as_deref(), &mut batch).await?;
            eprintln!("Restored {} documents...", restored);
        }
    }
    if !batch.is_empty() {
        restored += flush(&client, &base_url, token.as_deref(), &mut batch).await?;
    }

    eprintln!("Done: {} documents queued, {} lines skipped", restored, skipped);
    Ok(())
}

async fn flush(
    client: &reqwest::Client,
    base_url: &str,
    token: Option<&str>,
    batch: &mut Vec<Value>,
) -> Result<u64, Box<dyn std::error::Error>> {
    let count = batch.len() as u64;
    let body = serde_json::json!({ "documents": std::mem::take(batch) });
    let mut request = client.post(format!("{}/index", base_url)).json(&body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(format!("index failed: {}", response.status()).into());
    }
    Ok(count)
}
