//! Configuration loading

use std::path::Path;

use anyhow::Result;
use pagedb_common::config::Config;
use tracing_subscriber::EnvFilter;

/// Load configuration from file, falling back to defaults when it is absent
pub async fn load(path: &str, data_dir: Option<&str>) -> Result<Config> {
    let path = Path::new(path);

    let mut config = if path.exists() {
        Config::load(path).await.map_err(|e| anyhow::anyhow!(e))?
    } else {
        // Use default configuration
        Config::default()
    };

    if let Some(dir) = data_dir {
        config.storage.data_dir = dir.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pagedb={}", config.logging.level).parse()?)
        .add_directive(format!("pagedb_storage={}", config.logging.level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
