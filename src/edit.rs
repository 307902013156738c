//! Edit applier — spec §4.I.
//!
//! Ported from `_apply_workspace_edit` / `_apply_text_edits` in
//! `rename.py`: resource operations run in list order, text edits within one
//! document run in reverse document order so earlier edits never get
//! shifted by later ones still to be applied.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::DaemonError;
use crate::types::{Position, Range};
use crate::uri::uri_to_path;

#[derive(Debug, Clone)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    fn from_value(v: &Value) -> Option<TextEdit> {
        let range = v.get("range")?;
        let start = range.get("start")?;
        let end = range.get("end")?;
        Some(TextEdit {
            range: Range {
                start: Position {
                    line: start.get("line")?.as_u64()? as u32,
                    character: start.get("character")?.as_u64()? as u32,
                },
                end: Position {
                    line: end.get("line")?.as_u64()? as u32,
                    character: end.get("character")?.as_u64()? as u32,
                },
            },
            new_text: v.get("newText")?.as_str()?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum DocumentChange {
    TextDocumentEdit { uri: String, edits: Vec<TextEdit> },
    CreateFile { uri: String },
    RenameFile { old_uri: String, new_uri: String },
    DeleteFile { uri: String },
}

impl DocumentChange {
    fn from_value(v: &Value) -> Option<DocumentChange> {
        match v.get("kind").and_then(|k| k.as_str()) {
            Some("create") => Some(DocumentChange::CreateFile {
                uri: v.get("uri")?.as_str()?.to_string(),
            }),
            Some("rename") => Some(DocumentChange::RenameFile {
                old_uri: v.get("oldUri")?.as_str()?.to_string(),
                new_uri: v.get("newUri")?.as_str()?.to_string(),
            }),
            Some("delete") => Some(DocumentChange::DeleteFile {
                uri: v.get("uri")?.as_str()?.to_string(),
            }),
            _ => {
                let uri = v.get("textDocument")?.get("uri")?.as_str()?.to_string();
                let edits = v
                    .get("edits")?
                    .as_array()?
                    .iter()
                    .filter_map(TextEdit::from_value)
                    .collect();
                Some(DocumentChange::TextDocumentEdit { uri, edits })
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceEdit {
    pub changes: Option<HashMap<String, Vec<TextEdit>>>,
    pub document_changes: Option<Vec<DocumentChange>>,
}

impl WorkspaceEdit {
    pub fn from_value(v: &Value) -> Self {
        let changes = v.get("changes").and_then(|c| c.as_object()).map(|obj| {
            obj.iter()
                .map(|(uri, edits)| {
                    let edits = edits
                        .as_array()
                        .map(|a| a.iter().filter_map(TextEdit::from_value).collect())
                        .unwrap_or_default();
                    (uri.clone(), edits)
                })
                .collect()
        });

        let document_changes = v.get("documentChanges").and_then(|dc| dc.as_array()).map(|arr| {
            arr.iter().filter_map(DocumentChange::from_value).collect()
        });

        WorkspaceEdit { changes, document_changes }
    }
}

/// Apply `edit` against files under `workspace_root`, returning the
/// workspace-relative paths touched, in the order operations ran.
pub async fn apply_workspace_edit(edit: &WorkspaceEdit, workspace_root: &Path) -> Result<Vec<String>, DaemonError> {
    let mut touched = Vec::new();

    if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            let path = uri_to_path(uri)?;
            apply_text_edits(&path, edits).await?;
            touched.push(relative_path(&path, workspace_root));
        }
    }

    if let Some(document_changes) = &edit.document_changes {
        for change in document_changes {
            match change {
                DocumentChange::CreateFile { uri } => {
                    let path = uri_to_path(uri)?;
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(DaemonError::Io)?;
                    }
                    tokio::fs::File::create(&path).await.map_err(DaemonError::Io)?;
                    touched.push(relative_path(&path, workspace_root));
                }
                DocumentChange::RenameFile { old_uri, new_uri } => {
                    let old_path = uri_to_path(old_uri)?;
                    let new_path = uri_to_path(new_uri)?;
                    if let Some(parent) = new_path.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(DaemonError::Io)?;
                    }
                    tokio::fs::rename(&old_path, &new_path).await.map_err(DaemonError::Io)?;
                    touched.push(relative_path(&new_path, workspace_root));
                }
                DocumentChange::DeleteFile { uri } => {
                    let path = uri_to_path(uri)?;
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(DaemonError::Io(e)),
                    }
                    touched.push(relative_path(&path, workspace_root));
                }
                DocumentChange::TextDocumentEdit { uri, edits } => {
                    let path = uri_to_path(uri)?;
                    apply_text_edits(&path, edits).await?;
                    touched.push(relative_path(&path, workspace_root));
                }
            }
        }
    }

    Ok(touched)
}

fn relative_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned()
}

/// Apply `edits` to the file at `path`, in reverse document order, then
/// write the result back — §4.I.
pub async fn apply_text_edits(path: &Path, edits: &[TextEdit]) -> Result<(), DaemonError> {
    let content = tokio::fs::read_to_string(path).await.map_err(DaemonError::Io)?;
    let mut lines = split_keepends(&content);

    if let Some(last) = lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }

    let mut sorted_edits = edits.to_vec();
    sorted_edits.sort_by(|a, b| {
        let key_a = (a.range.start.line, a.range.start.character);
        let key_b = (b.range.start.line, b.range.start.character);
        key_b.cmp(&key_a)
    });

    for edit in &sorted_edits {
        let start_line = edit.range.start.line as usize;
        let start_char = edit.range.start.character as usize;
        let end_line = edit.range.end.line as usize;
        let end_char = edit.range.end.character as usize;

        if start_line >= lines.len() {
            lines.resize(start_line + 1, String::new());
        }

        if start_line == end_line {
            let line = lines.get(start_line).cloned().unwrap_or_default();
            lines[start_line] = splice_single_line(&line, start_char, end_char, &edit.new_text);
        } else {
            let first_line = lines
                .get(start_line)
                .map(|l| prefix_chars(l, start_char))
                .unwrap_or_default();
            let last_line = lines
                .get(end_line)
                .map(|l| suffix_chars(l, end_char))
                .unwrap_or_default();
            let combined = format!("{first_line}{}{last_line}", edit.new_text);
            let splice_end = (end_line + 1).min(lines.len());
            lines.splice(start_line..splice_end, std::iter::once(combined));
        }
    }

    let mut result = lines.concat();
    if result.ends_with("\n\n") && !content.ends_with("\n\n") {
        result.pop();
    }

    tokio::fs::write(path, result).await.map_err(DaemonError::Io)
}

/// Mirrors Python's `str.splitlines(keepends=True)` for the line endings
/// LSP servers actually emit (`\n`, `\r\n`, bare `\r`).
fn split_keepends(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if c == '\n' {
            lines.push(std::mem::take(&mut current));
        } else if c == '\r' {
            if chars.peek() == Some(&'\n') {
                current.push(chars.next().unwrap());
            }
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn splice_single_line(line: &str, start_char: usize, end_char: usize, new_text: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let start = start_char.min(chars.len());
    let end = end_char.min(chars.len());
    let prefix: String = chars[..start].iter().collect();
    let suffix: String = chars[end..].iter().collect();
    format!("{prefix}{new_text}{suffix}")
}

fn prefix_chars(line: &str, n: usize) -> String {
    line.chars().take(n).collect()
}

fn suffix_chars(line: &str, n: usize) -> String {
    let chars: Vec<char> = line.chars().collect();
    let start = n.min(chars.len());
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn edit(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextEdit {
        TextEdit {
            range: Range { start: pos(sl, sc), end: pos(el, ec) },
            new_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn single_line_replace() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "hello world\n").await.unwrap();

        apply_text_edits(&file, &[edit(0, 6, 0, 11, "rust")]).await.unwrap();

        let result = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(result, "hello rust\n");
    }

    #[tokio::test]
    async fn multi_line_replace_joins_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "one\ntwo\nthree\n").await.unwrap();

        apply_text_edits(&file, &[edit(0, 1, 1, 2, "-X-")]).await.unwrap();

        let result = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(result, "o-X-o\nthree\n");
    }

    #[tokio::test]
    async fn multiple_edits_apply_in_reverse_document_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "aaa\nbbb\nccc\n").await.unwrap();

        apply_text_edits(
            &file,
            &[edit(0, 0, 0, 3, "AAA"), edit(2, 0, 2, 3, "CCC")],
        )
        .await
        .unwrap();

        let result = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(result, "AAA\nbbb\nCCC\n");
    }

    #[tokio::test]
    async fn edit_past_eof_pads_with_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "one\n").await.unwrap();

        apply_text_edits(&file, &[edit(3, 0, 3, 0, "extra\n")]).await.unwrap();

        let result = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(result, "one\n\n\nextra\n");
    }

    #[tokio::test]
    async fn does_not_introduce_extra_trailing_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "one\ntwo").await.unwrap();

        apply_text_edits(&file, &[edit(1, 3, 1, 3, "\n")]).await.unwrap();

        let result = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(result, "one\ntwo\n");
    }

    #[test]
    fn workspace_edit_parses_changes_map() {
        let value = serde_json::json!({
            "changes": {
                "file:///tmp/a.rs": [
                    {"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}, "newText": "x"}
                ]
            }
        });
        let edit = WorkspaceEdit::from_value(&value);
        assert!(edit.changes.is_some());
        assert_eq!(edit.changes.unwrap().len(), 1);
    }
}
