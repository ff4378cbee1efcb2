//! Shared helpers: config loading and project file discovery.

use std::path::{Path, PathBuf};

use writingway_config::AppConfig;
use writingway_workshop::Workshop;

const EXTENSIONS: &[&str] = &["md", "txt"];

/// One file of the project, indexed as one source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub id: String,
    pub path: PathBuf,
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => AppConfig::load_from(p),
        None => AppConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Every `.md`/`.txt` file under `root` (or `root` itself), sorted by id.
/// Hidden files and directories are skipped.
pub fn discover(root: &Path) -> std::io::Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    if root.is_file() {
        let id = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        files.push(SourceFile {
            id,
            path: root.to_path_buf(),
        });
        return Ok(files);
    }

    walk(root, root, &mut files)?;
    files.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SourceFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if has_text_extension(&path) {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(SourceFile { id, path });
        }
    }
    Ok(())
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Feed every file under `root` to the workshop. Returns (files, chunks).
pub async fn ingest(
    workshop: &Workshop,
    root: &Path,
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let files = discover(root).map_err(|e| format!("Cannot read {}: {e}", root.display()))?;
    for file in &files {
        let text = std::fs::read_to_string(&file.path)
            .map_err(|e| format!("Cannot read {}: {e}", file.path.display()))?;
        workshop.notify_text_changed(&file.id, &text).await?;
    }
    Ok((files.len(), workshop.indexer().snapshot().len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("act1")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("act1/scene1.md"), "Alice meets Bob in the forest.").unwrap();
        std::fs::write(dir.path().join("act1/scene2.txt"), "Bob betrays Alice at the castle.").unwrap();
        std::fs::write(dir.path().join("cover.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join(".git/notes.md"), "hidden").unwrap();
        std::fs::write(dir.path().join("World.MD"), "The kingdom of Vell.").unwrap();
        dir
    }

    #[test]
    fn discovers_text_files_only() {
        let dir = project();
        let ids: Vec<String> = discover(dir.path()).unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["World.MD", "act1/scene1.md", "act1/scene2.txt"]);
    }

    #[test]
    fn single_file_is_its_own_source() {
        let dir = project();
        let files = discover(&dir.path().join("act1/scene1.md")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "scene1.md");
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[tokio::test]
    async fn ingest_indexes_every_file() {
        let dir = project();
        let workshop = Workshop::from_config(AppConfig::default()).unwrap();
        let (files, chunks) = ingest(&workshop, dir.path()).await.unwrap();
        assert_eq!(files, 3);
        assert_eq!(chunks, 3);
    }
}
