//! `writingway search` — Show what retrieval would feed the model.

use std::path::Path;

use writingway_workshop::Workshop;

use super::project::{ingest, load_config};

pub async fn run(
    config: Option<&Path>,
    project: &Path,
    query: &str,
    k: Option<usize>,
    floor: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let floor = floor.unwrap_or(config.retrieval.similarity_floor);
    let workshop = Workshop::from_config(config)?;

    let (files, chunks) = ingest(&workshop, project).await?;
    println!("🔎 Searching {files} file(s), {chunks} chunk(s)");
    println!();

    let result = workshop.retrieval().query(query, k, floor).await?;
    if result.is_empty() {
        println!("  No passages scored above {floor}.");
        return Ok(());
    }

    for scored in &result.chunks {
        let chunk = &scored.chunk;
        println!(
            "  {:.3}  {}  {} [{}..{}]",
            scored.score,
            chunk.id.short(),
            chunk.source,
            chunk.start,
            chunk.end
        );
        println!("         {}", preview(&chunk.text, 96));
    }
    println!();
    println!(
        "  {} of {} candidate(s) kept",
        result.len(),
        result.candidates
    );
    Ok(())
}

/// First line of `text`, cut to `max` characters.
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_skips_blank_lines_and_truncates() {
        assert_eq!(preview("\n\n  Alice waits.\nBob arrives.", 96), "Alice waits.");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("", 3), "");
    }
}
