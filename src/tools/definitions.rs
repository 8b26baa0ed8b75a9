//! Tool catalog: the fixed set of vault operations the model can invoke.

use serde_json::json;

use super::schema::{ArgKind, ArgSpec, ToolSpec};

/// All tool declarations, in the order they are presented to the model.
pub fn all() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "create_note",
            description: "Create a new note in the vault. Provide content directly, or set \
                          use_llm with a topic to have the note body written for you. The \
                          note name is disambiguated automatically on collision.",
            args: vec![
                (
                    "topic",
                    ArgSpec::optional(ArgKind::String, "What the note should be about"),
                ),
                (
                    "name",
                    ArgSpec::optional(ArgKind::String, "File name for the note (without extension)"),
                ),
                (
                    "tags",
                    ArgSpec::optional(ArgKind::StringArray, "Tags to add as front matter"),
                ),
                (
                    "context",
                    ArgSpec::optional(ArgKind::String, "Extra context for generated content"),
                ),
                (
                    "dir_path",
                    ArgSpec::optional(ArgKind::String, "Target folder, fuzzy-matched against existing folders"),
                ),
                (
                    "content",
                    ArgSpec::optional(ArgKind::String, "Explicit note body"),
                ),
                (
                    "use_llm",
                    ArgSpec::with_default(ArgKind::Boolean, json!(false), "Generate the body from the topic"),
                ),
            ],
        },
        ToolSpec {
            name: "edit_note",
            description: "Edit an existing note. Target the currently active note or a note by \
                          fuzzy name match (exactly one must resolve). Returns a line diff of \
                          the change, not the full content.",
            args: vec![
                (
                    "file_name",
                    ArgSpec::optional(ArgKind::String, "Note to edit, fuzzy-matched"),
                ),
                (
                    "active_note",
                    ArgSpec::with_default(ArgKind::Boolean, json!(false), "Edit the currently open note"),
                ),
                (
                    "new_content",
                    ArgSpec::optional(ArgKind::String, "Replacement content, or instructions when use_llm is set"),
                ),
                (
                    "use_llm",
                    ArgSpec::with_default(ArgKind::Boolean, json!(false), "Rewrite via the model, preserving unrelated material"),
                ),
                (
                    "tags",
                    ArgSpec::optional(ArgKind::StringArray, "Tags to set as front matter"),
                ),
                (
                    "context",
                    ArgSpec::optional(ArgKind::String, "Extra context for the rewrite"),
                ),
            ],
        },
        ToolSpec {
            name: "read_note",
            description: "Read a note's content. Target the currently active note or a note by \
                          fuzzy name match. Inline base64 images are stripped and, when \
                          captioning is enabled, replaced with generated captions.",
            args: vec![
                (
                    "file_name",
                    ArgSpec::optional(ArgKind::String, "Note to read, fuzzy-matched"),
                ),
                (
                    "active_note",
                    ArgSpec::with_default(ArgKind::Boolean, json!(false), "Read the currently open note"),
                ),
            ],
        },
        ToolSpec {
            name: "create_directory",
            description: "Create a folder in the vault. The path is sanitized and the name is \
                          disambiguated on collision.",
            args: vec![
                (
                    "name",
                    ArgSpec::required(ArgKind::String, "Folder name to create"),
                ),
                (
                    "dir_path",
                    ArgSpec::optional(ArgKind::String, "Parent folder, fuzzy-matched"),
                ),
            ],
        },
        ToolSpec {
            name: "list_files",
            description: "List files and folders under a directory as a bounded tree.",
            args: vec![
                (
                    "dir_path",
                    ArgSpec::required(ArgKind::String, "Directory to list, fuzzy-matched; empty for the vault root"),
                ),
                (
                    "limit",
                    ArgSpec::with_default(ArgKind::Integer, json!(50), "Maximum entries to return"),
                ),
            ],
        },
        ToolSpec {
            name: "vault_search",
            description: "Find a note or folder by name. Exact path match wins; otherwise the \
                          first case-insensitive substring match is returned.",
            args: vec![
                (
                    "name",
                    ArgSpec::required(ArgKind::String, "Name or partial path to find"),
                ),
                (
                    "is_note",
                    ArgSpec::required(ArgKind::Boolean, "True to search notes, false for folders"),
                ),
            ],
        },
        ToolSpec {
            name: "filter_notes",
            description: "List notes whose creation or modification time falls in a date range, \
                          sorted by that time.",
            args: vec![
                (
                    "field",
                    ArgSpec::required(ArgKind::String, "Which timestamp to filter on: 'created' or 'modified'"),
                ),
                (
                    "date_range",
                    ArgSpec::required(
                        ArgKind::Any,
                        "Either a relative shorthand like '7d' (units s/m/h/d/w, window ends \
                         now) or an object {start, end} where each bound is epoch milliseconds, \
                         an ISO datetime, or YYYY-MM-DD",
                    ),
                ),
                (
                    "limit",
                    ArgSpec::with_default(ArgKind::Integer, json!(20), "Maximum notes to return"),
                ),
                (
                    "sort_order",
                    ArgSpec::with_default(ArgKind::String, json!("desc"), "'asc' or 'desc'"),
                ),
            ],
        },
        ToolSpec {
            name: "web_search",
            description: "Search the web and return an answer with source citations.",
            args: vec![(
                "query",
                ArgSpec::required(ArgKind::String, "Search query"),
            )],
        },
    ]
}
