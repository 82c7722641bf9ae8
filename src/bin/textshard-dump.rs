use clap::Parser;
use serde_json::Value;
use std::fs::File;
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(name = "textshard-dump")]
#[command(about = "Export a textshard primary to JSONL", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short = 'P', long, default_value_t = 7700)]
    port: u16,

    /// Output file (if not specified, writes to stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Page size per request
    #[arg(long, default_value_t = 500)]
    page_size: usize,

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

    let client = reqwest::Client::new();

    let mut output: Box<dyn Write> = if let Some(output_file) = &args.output {
        Box::new(File::create(output_file)?)
    } else {
        Box::new(io::stdout())
    };

    let mut cursor: i64 = -1;
    let mut exported: u64 = 0;
    loop {
        let url = format!(
            "{}/export?cursor={}&limit={}",
            base_url, cursor, args.page_size
        );
        let mut request = client.get(&url);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(format!("export failed: {}", response.status()).into());
        }

        let page: Value = response.json().await?;
        let rows = page["rows"].as_array().ok_or("invalid export response")?;
        for row in rows {
            let line = serde_json::json!({
                "id": row["id"],
                "content": row["content"],
            });
            writeln!(output, "{}", line)?;
            exported += 1;
        }

        match page["next_cursor"].as_i64() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    output.flush()?;
    eprintln!("Exported {} documents", exported);
    Ok(())
}
