//! Vault structure tools: directories, listings, search, date filtering.

use chrono::Local;
use serde_json::{Value, json};

use super::dates::parse_date_range;
use crate::vault::{Vault, join_path, resolve_folder, resolve_note, sanitize_path};

/// Depth below the listed directory included in the tree.
const LIST_MAX_DEPTH: usize = 3;

pub(super) struct VaultOps<'a> {
    pub vault: &'a dyn Vault,
}

impl VaultOps<'_> {
    pub async fn create_directory(&self, args: &Value) -> Result<Value, String> {
        let name = sanitize_path(args["name"].as_str().unwrap_or_default());
        if name.is_empty() {
            return Err("directory name is empty after sanitization".into());
        }

        let parent = match args["dir_path"].as_str() {
            Some(query) if !query.trim().is_empty() => resolve_folder(self.vault, query)
                .await
                .ok_or_else(|| format!("no folder matching '{query}'"))?,
            _ => String::new(),
        };

        let mut path = join_path(&parent, &name);
        let mut counter = 1u32;
        while self.vault.exists(&path).await {
            path = join_path(&parent, &format!("{name} ({counter})"));
            counter += 1;
        }

        self.vault
            .create_dir_all(&path)
            .await
            .map_err(|e| format!("failed to create {path}: {e}"))?;

        Ok(json!({ "path": path, "message": format!("Directory created at {path}") }))
    }

    pub async fn list_files(&self, args: &Value) -> Result<Value, String> {
        let query = args["dir_path"].as_str().unwrap_or_default();
        let dir = resolve_folder(self.vault, query)
            .await
            .ok_or_else(|| format!("no folder matching '{query}'"))?;
        let limit = args["limit"].as_i64().unwrap_or(50).max(1) as usize;

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let base_depth = if dir.is_empty() {
            0
        } else {
            dir.matches('/').count() + 1
        };

        let entries = self.vault.entries().await;
        let mut lines = Vec::new();
        let mut total = 0usize;
        for entry in &entries {
            if !prefix.is_empty() && !entry.path.starts_with(&prefix) {
                continue;
            }
            let depth = entry.path.matches('/').count() - base_depth;
            if depth >= LIST_MAX_DEPTH {
                continue;
            }
            total += 1;
            if lines.len() < limit {
                let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
                let marker = if entry.is_dir { "/" } else { "" };
                lines.push(format!("{}{name}{marker}", "  ".repeat(depth)));
            }
        }

        Ok(json!({
            "path": dir,
            "tree": lines.join("\n"),
            "truncated": total > lines.len(),
        }))
    }

    pub async fn vault_search(&self, args: &Value) -> Result<Value, String> {
        let name = args["name"].as_str().unwrap_or_default();
        let is_note = args["is_note"].as_bool().unwrap_or(true);

        let found = if is_note {
            resolve_note(self.vault, name).await
        } else {
            resolve_folder(self.vault, name).await
        };

        match found {
            Some(path) => Ok(json!({ "path": path })),
            None => Err(format!(
                "no {} matching '{name}'",
                if is_note { "note" } else { "folder" }
            )),
        }
    }

    pub async fn filter_notes(&self, args: &Value) -> Result<Value, String> {
        let field = args["field"].as_str().unwrap_or_default();
        if field != "created" && field != "modified" {
            return Err(format!("field must be 'created' or 'modified', got '{field}'"));
        }
        let window = parse_date_range(&args["date_range"], Local::now())?;
        let limit = args["limit"].as_i64().unwrap_or(20).max(1) as usize;
        let descending = args["sort_order"].as_str().unwrap_or("desc") != "asc";

        let entries = self.vault.entries().await;
        let mut matched: Vec<(String, i64)> = Vec::new();
        for entry in entries {
            if entry.is_dir || !entry.path.to_lowercase().ends_with(".md") {
                continue;
            }
            let Ok(times) = self.vault.times(&entry.path).await else {
                continue;
            };
            let stamp = if field == "created" {
                times.created.timestamp_millis()
            } else {
                times.modified.timestamp_millis()
            };
            if stamp >= window.start_ms && stamp <= window.end_ms {
                matched.push((entry.path, stamp));
            }
        }

        matched.sort_by_key(|(_, stamp)| *stamp);
        if descending {
            matched.reverse();
        }
        matched.truncate(limit);

        let notes: Vec<String> = matched.into_iter().map(|(path, _)| path).collect();
        Ok(json!({ "count": notes.len(), "notes": notes }))
    }
}
