//! `writingway init` — Write a starter configuration.

use std::path::{Path, PathBuf};

use writingway_config::AppConfig;

pub async fn run(config: Option<&Path>, print: bool) -> Result<(), Box<dyn std::error::Error>> {
    let contents = AppConfig::default_toml();
    if print {
        print!("{contents}");
        return Ok(());
    }

    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if write_if_missing(&path, &contents)? {
        println!("✅ Wrote {}", path.display());
        println!("   Set OPENROUTER_API_KEY (or edit the file) before chatting.");
    } else {
        println!("ℹ️  {} already exists, leaving it untouched.", path.display());
    }
    Ok(())
}

/// Returns false when `path` already exists.
fn write_if_missing(path: &PathBuf, contents: &str) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(true)
}
