use clap::Parser;
use eyre::Result;
use tlog_sequencer::cli::{self, Options};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let options = Options::parse();
    options.init_logging()?;
    cli::run(options).await
}
