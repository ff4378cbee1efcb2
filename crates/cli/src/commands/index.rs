//! `writingway index` — Ingest files and report what was chunked.

use std::path::{Path, PathBuf};

use writingway_workshop::Workshop;

use super::project::{discover, load_config};

pub async fn run(config: Option<&Path>, paths: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let workshop = Workshop::from_config(config)?;

    println!("📚 Indexing");
    println!();
    let mut files = 0;
    for root in paths {
        let sources = discover(root).map_err(|e| format!("Cannot read {}: {e}", root.display()))?;
        for source in sources {
            let text = std::fs::read_to_string(&source.path)
                .map_err(|e| format!("Cannot read {}: {e}", source.path.display()))?;
            workshop.notify_text_changed(&source.id, &text).await?;
            let chunks = workshop.indexer().snapshot().chunk_ids_for(&source.id).len();
            println!("  {:<48} {chunks:>4} chunk(s)", source.id);
            files += 1;
        }
    }

    let snapshot = workshop.indexer().snapshot();
    println!();
    println!(
        "  {files} file(s), {} chunk(s), model {} ({} dims)",
        snapshot.len(),
        snapshot.model(),
        snapshot.dimensions()
    );
    Ok(())
}
