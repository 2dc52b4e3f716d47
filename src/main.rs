use clap::Parser;
use peercall::config::{Cli, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::try_from(Cli::parse())?;
    peercall::logger::init(&config.log);
    peercall::run(config).await?;
    Ok(())
}
