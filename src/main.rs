use std::io::{self, Read};

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "batch-llm-translator",
    version,
    about = "Translate batches of strings with concurrent LLM tool calls"
)]
struct Cli {
    /// Run the HTTP server instead of translating stdin
    #[arg(long = "server")]
    server: bool,

    /// Server listen address (overrides settings [server].addr)
    #[arg(long = "addr")]
    addr: Option<String>,

    /// Target language (default: en)
    #[arg(short = 'l', long = "lang", default_value = "en")]
    lang: String,

    /// Provider or provider:model (e.g. gemini:gemini-1.5-flash)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Number of concurrent chunks per job
    #[arg(long = "fan-out")]
    fan_out: Option<usize>,

    /// Translate paragraphs separated by blank lines instead of single lines
    #[arg(long = "paragraphs")]
    paragraphs: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    batch_llm_translator::logging::init(cli.verbose)?;

    let config = batch_llm_translator::Config {
        lang: cli.lang,
        model: cli.model,
        key: cli.key,
        settings_path: cli.read_settings,
        fan_out: cli.fan_out,
        paragraphs: cli.paragraphs,
        addr: cli.addr,
    };

    if cli.server {
        return batch_llm_translator::serve(config).await;
    }

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let output = batch_llm_translator::run(config, Some(input)).await?;
    println!("{}", output);
    Ok(())
}
