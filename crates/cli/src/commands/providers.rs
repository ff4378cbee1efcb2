//! `writingway providers` — List the provider catalogue.

use std::path::Path;

use writingway_config::AppConfig;

use super::project::load_config;

const BUILTIN: &[&str] = &["anthropic", "gemini", "lmstudio", "ollama", "openai", "openrouter"];

pub async fn run(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;

    println!("🤖 Writingway Providers");
    println!("=======================");
    println!();
    println!(
        "  {:<12} {:<10} {:<32} {:<9} Endpoint",
        "Provider", "Vendor", "Default model", "Key"
    );
    for id in catalogue(&config) {
        match config.resolve_provider(&id, None) {
            Ok(p) => {
                let marker = if id == config.default_provider { "*" } else { " " };
                let key = if p.api_key.is_some() { "set" } else { "missing" };
                println!(
                    "{marker} {:<12} {:<10} {:<32} {:<9} {}",
                    p.id,
                    p.vendor.to_string(),
                    p.model,
                    key,
                    p.endpoint
                );
            }
            Err(e) => println!("  {id:<12} ⚠️  {e}"),
        }
    }
    println!();
    println!("  * default provider");
    if !config.fallback_providers.is_empty() {
        println!("  Fallbacks: {}", config.fallback_providers.join(" → "));
    }

    Ok(())
}

/// Configured ids plus the built-in ones, deduplicated and sorted.
fn catalogue(config: &AppConfig) -> Vec<String> {
    let mut ids = config.provider_ids();
    for id in BUILTIN {
        if !ids.iter().any(|i| i == id) {
            ids.push((*id).to_string());
        }
    }
    ids.sort();
    ids
}
