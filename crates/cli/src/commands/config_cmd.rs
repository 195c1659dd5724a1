//! `mindloop config`: configuration commands.

use mindloop_config::AppConfig;

use super::load_config;

pub fn default() {
    print!("{}", AppConfig::default_toml());
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    print!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    config
}
