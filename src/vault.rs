//! Vault access seam.
//!
//! The orchestrator and tools never touch the host application directly;
//! they go through the [`Vault`] trait so the core runs against a plain
//! directory in tests. [`FsVault`] is the file-system implementation.
//!
//! Resolution policy shared by every fuzzy lookup: an exact path match wins
//! unconditionally, otherwise the first case-insensitive substring match in
//! enumeration order is used. With several candidates the winner is not
//! stable across vault mutations; callers must not rely on a specific match.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

/// One entry in the vault listing, path relative to the vault root with
/// forward slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub path: String,
    pub is_dir: bool,
}

/// Creation/modification times of a note.
#[derive(Debug, Clone, Copy)]
pub struct NoteTimes {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// File-system capabilities the chat core needs from the host vault.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Absolute root of the vault on disk.
    fn root(&self) -> &Path;

    /// Path of the note currently open in the host, if any.
    fn active_note(&self) -> Option<String>;

    async fn read(&self, path: &str) -> io::Result<String>;
    async fn write(&self, path: &str, content: &str) -> io::Result<()>;
    async fn create_dir_all(&self, path: &str) -> io::Result<()>;
    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    async fn exists(&self, path: &str) -> bool;

    /// Full vault listing in enumeration order (sorted walk).
    async fn entries(&self) -> Vec<VaultEntry>;

    async fn times(&self, path: &str) -> io::Result<NoteTimes>;
}

/// Vault rooted at a directory on disk.
pub struct FsVault {
    root: PathBuf,
    active_note: RwLock<Option<String>>,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active_note: RwLock::new(None),
        }
    }

    /// Record which note the host currently has open.
    pub fn set_active_note(&self, path: Option<String>) {
        if let Ok(mut active) = self.active_note.write() {
            *active = path;
        }
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Vault for FsVault {
    fn root(&self) -> &Path {
        &self.root
    }

    fn active_note(&self) -> Option<String> {
        self.active_note.read().ok().and_then(|a| a.clone())
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.absolute(path)).await
    }

    async fn write(&self, path: &str, content: &str) -> io::Result<()> {
        let full = self.absolute(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, content).await
    }

    async fn create_dir_all(&self, path: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(self.absolute(path)).await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        tokio::fs::rename(self.absolute(from), self.absolute(to)).await
    }

    async fn exists(&self, path: &str) -> bool {
        self.absolute(path).exists()
    }

    async fn entries(&self) -> Vec<VaultEntry> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            // Depth 0 is the root itself, which may legitimately be hidden.
            .filter_entry(|e| {
                e.depth() == 0 || !is_hidden(e.file_name().to_string_lossy().as_ref())
            })
            .filter_map(|e| e.ok())
        {
            if entry.path() == self.root {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            entries.push(VaultEntry {
                path: relative.to_string_lossy().replace('\\', "/"),
                is_dir: entry.file_type().is_dir(),
            });
        }
        entries
    }

    async fn times(&self, path: &str) -> io::Result<NoteTimes> {
        let meta = tokio::fs::metadata(self.absolute(path)).await?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        // Creation time is unavailable on some file systems.
        let created: DateTime<Utc> = meta.created().map(Into::into).unwrap_or(modified);
        Ok(NoteTimes { created, modified })
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "."
}

/// Strip `..`/`.` segments, collapse duplicate slashes, and trim
/// leading/trailing slashes.
pub fn sanitize_path(input: &str) -> String {
    input
        .replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a vault-relative directory and a file name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Resolve a folder by fuzzy match. Empty query resolves to the vault root.
pub async fn resolve_folder(vault: &dyn Vault, query: &str) -> Option<String> {
    let query = sanitize_path(query);
    if query.is_empty() {
        return Some(String::new());
    }
    let entries = vault.entries().await;
    first_match(entries.iter().filter(|e| e.is_dir), &query)
}

/// Resolve a note by fuzzy match over `.md` files. The query may omit the
/// extension.
pub async fn resolve_note(vault: &dyn Vault, query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let with_ext = if query.to_lowercase().ends_with(".md") {
        query.to_string()
    } else {
        format!("{query}.md")
    };

    let entries = vault.entries().await;
    let notes: Vec<&VaultEntry> = entries
        .iter()
        .filter(|e| !e.is_dir && e.path.to_lowercase().ends_with(".md"))
        .collect();

    // Exact path takes priority over any substring match.
    for note in &notes {
        if note.path == with_ext || note.path == query {
            return Some(note.path.clone());
        }
    }
    first_match(notes.into_iter(), query)
}

fn first_match<'a>(
    entries: impl Iterator<Item = &'a VaultEntry>,
    query: &str,
) -> Option<String> {
    let lowered = query.to_lowercase();
    for entry in entries {
        if entry.path == query {
            return Some(entry.path.clone());
        }
        if entry.path.to_lowercase().contains(&lowered) {
            return Some(entry.path.clone());
        }
    }
    None
}

/// Find a free path for `stem.ext` inside `dir`, appending a numeric
/// suffix ` (k)` on collision. A stem already carrying a suffix continues
/// counting from it.
pub async fn disambiguate(vault: &dyn Vault, dir: &str, stem: &str, ext: &str) -> String {
    let candidate = join_path(dir, &format!("{stem}.{ext}"));
    if !vault.exists(&candidate).await {
        return candidate;
    }

    let (base, mut counter) = match split_suffix(stem) {
        Some((base, k)) => (base, k + 1),
        None => (stem.to_string(), 1),
    };

    loop {
        let candidate = join_path(dir, &format!("{base} ({counter}).{ext}"));
        if !vault.exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

/// Split a trailing ` (k)` suffix off a file stem.
fn split_suffix(stem: &str) -> Option<(String, u32)> {
    let open = stem.rfind(" (")?;
    let inner = &stem[open + 2..];
    let digits = inner.strip_suffix(')')?;
    let counter: u32 = digits.parse().ok()?;
    Some((stem[..open].to_string(), counter))
}

/// Render the vault folder structure for the system prompt, bounded so a
/// large vault cannot blow up the prompt.
pub async fn folder_tree(vault: &dyn Vault, max_entries: usize) -> String {
    let entries = vault.entries().await;
    let mut lines = Vec::new();
    for entry in entries.iter().take(max_entries) {
        let depth = entry.path.matches('/').count();
        let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
        let marker = if entry.is_dir { "/" } else { "" };
        lines.push(format!("{}{}{}", "  ".repeat(depth), name, marker));
    }
    if entries.len() > max_entries {
        lines.push(format!("… ({} more entries)", entries.len() - max_entries));
    }
    lines.join("\n")
}
