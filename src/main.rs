use botbus::config::{self, Config};
use botbus::server;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::args().nth(1) {
        Some(path) => config::parse(path).await?,
        None => Config::default(),
    };

    let mut logger = flexi_logger::Logger::try_with_str(config.log.level.as_filter())?;
    if let Some(directory) = &config.log.directory {
        logger = logger.log_to_file(flexi_logger::FileSpec::default().directory(directory));
    }
    let _logger = logger.start()?;

    server::serve(config).await?;

    Ok(())
}
