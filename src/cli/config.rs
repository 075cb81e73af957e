// src/cli/config.rs — Show the effective configuration

use crate::infra::config::Config;
use crate::infra::paths;

/// Print the merged configuration as TOML, with the API key masked.
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("# Config: {} (loaded)", config_path.display());
    } else {
        println!("# Config: (using defaults)");
    }
    println!(
        "# Database: {}",
        config.storage.resolved_db_path().display()
    );
    println!();
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.gateway.api_key.is_some() {
        shown.gateway.api_key = Some("********".into());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_masks_api_key() {
        let mut config = Config::default();
        config.gateway.api_key = Some("super-secret".into());
        let text = render(&config).unwrap();
        assert!(!text.contains("super-secret"));
        assert!(text.contains("********"));
        assert!(text.contains("[aggregation]"));
    }
}
