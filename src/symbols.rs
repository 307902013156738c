//! Symbol index ops — spec §4.G.
//!
//! Flattens the hierarchical `DocumentSymbol` tree (or the legacy
//! `SymbolInformation[]` form) into flat [`SymbolRecord`]s carrying a dotted
//! container path, then normalizes names and containers so callers never
//! see language-specific decoration.

use serde_json::Value;

use crate::error::DaemonError;
use crate::rpc::LspClient;
use crate::types::{SymbolKind, SymbolRecord};
use crate::uri::uri_to_path;

/// Request `textDocument/documentSymbol` and flatten the result, whichever
/// of the two wire shapes the server returns.
pub async fn collect_document_symbols(
    client: &LspClient,
    uri: &str,
    workspace_root: &std::path::Path,
    timeout: std::time::Duration,
) -> Result<Vec<SymbolRecord>, DaemonError> {
    let result = client
        .send_request(
            "textDocument/documentSymbol",
            serde_json::json!({ "textDocument": { "uri": uri } }),
            timeout,
        )
        .await?;

    let rel_path = uri_to_path(uri)
        .ok()
        .and_then(|p| p.strip_prefix(workspace_root).ok().map(|p| p.to_string_lossy().into_owned()))
        .unwrap_or_else(|| uri.to_string());

    let records = match result {
        Value::Array(items) if is_hierarchical(&items) => {
            let mut out = Vec::new();
            for item in &items {
                flatten_document_symbol(item, &rel_path, None, &mut out);
            }
            out
        }
        Value::Array(items) => items
            .iter()
            .filter_map(|item| symbol_information_to_record(item, &rel_path))
            .collect(),
        _ => Vec::new(),
    };

    Ok(records.into_iter().map(normalize).collect())
}

fn is_hierarchical(items: &[Value]) -> bool {
    items
        .first()
        .map(|v| v.get("children").is_some() || v.get("selectionRange").is_some())
        .unwrap_or(true)
}

fn flatten_document_symbol(
    node: &Value,
    rel_path: &str,
    container: Option<&str>,
    out: &mut Vec<SymbolRecord>,
) {
    let Some(name) = node.get("name").and_then(|n| n.as_str()) else {
        return;
    };
    let kind = node
        .get("kind")
        .and_then(|k| k.as_u64())
        .map(SymbolKind::from_lsp_int)
        .unwrap_or(SymbolKind::Variable);

    let selection = node.get("selectionRange").or_else(|| node.get("range"));
    let (line, column) = selection
        .and_then(|r| r.get("start"))
        .map(|s| {
            (
                s.get("line").and_then(|l| l.as_u64()).unwrap_or(0) as u32 + 1,
                s.get("character").and_then(|c| c.as_u64()).unwrap_or(0) as u32,
            )
        })
        .unwrap_or((1, 0));

    let range = node.get("range");
    let range_start_line = range
        .and_then(|r| r.get("start"))
        .and_then(|s| s.get("line"))
        .and_then(|l| l.as_u64())
        .map(|l| l as u32 + 1);
    let range_end_line = range
        .and_then(|r| r.get("end"))
        .and_then(|s| s.get("line"))
        .and_then(|l| l.as_u64())
        .map(|l| l as u32 + 1);

    out.push(SymbolRecord {
        name: name.to_string(),
        kind,
        path: rel_path.to_string(),
        line,
        column,
        container: container.map(|c| c.to_string()),
        range_start_line,
        range_end_line,
        detail: node.get("detail").and_then(|d| d.as_str()).map(str::to_string),
        documentation: None,
    });

    let dotted_container = match container {
        Some(c) => format!("{c}.{name}"),
        None => name.to_string(),
    };

    if let Some(children) = node.get("children").and_then(|c| c.as_array()) {
        for child in children {
            flatten_document_symbol(child, rel_path, Some(&dotted_container), out);
        }
    }
}

/// Legacy flat `SymbolInformation` form — `containerName` is reported
/// directly by the server rather than derived from tree position.
fn symbol_information_to_record(node: &Value, rel_path: &str) -> Option<SymbolRecord> {
    let name = node.get("name")?.as_str()?.to_string();
    let kind = node
        .get("kind")
        .and_then(|k| k.as_u64())
        .map(SymbolKind::from_lsp_int)
        .unwrap_or(SymbolKind::Variable);
    let location = node.get("location")?;
    let start = location.get("range")?.get("start")?;
    let line = start.get("line")?.as_u64()? as u32 + 1;
    let column = start.get("character")?.as_u64()? as u32;
    let end_line = location
        .get("range")
        .and_then(|r| r.get("end"))
        .and_then(|e| e.get("line"))
        .and_then(|l| l.as_u64())
        .map(|l| l as u32 + 1);

    Some(SymbolRecord {
        name,
        kind,
        path: rel_path.to_string(),
        line,
        column,
        container: node.get("containerName").and_then(|c| c.as_str()).map(str::to_string),
        range_start_line: Some(line),
        range_end_line: end_line,
        detail: None,
        documentation: None,
    })
}

fn normalize(mut record: SymbolRecord) -> SymbolRecord {
    record.name = normalize_name(&record.name);
    record.container = record.container.as_deref().map(normalize_container);
    record
}

/// Strip language-specific decoration so the bare identifier can be
/// compared across servers — §4.G.
pub fn normalize_name(raw: &str) -> String {
    // Mirrors `^(\w+)\([^)]*\)$`: a non-empty run of word characters, then
    // one parenthesized group with no nested `)`, consuming the whole
    // string. A prefix with non-word characters (e.g. `my-func(x)`) falls
    // through unchanged, same as the anchored regex failing to match.
    if let Some(paren) = raw.find('(') {
        let prefix = &raw[..paren];
        let inner = &raw[paren + 1..];
        let prefix_is_word = !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if prefix_is_word && raw.ends_with(')') && !inner[..inner.len() - 1].contains(')') {
            return prefix.to_string();
        }
    }
    if let Some(idx) = raw.rfind(").") {
        return raw[idx + 2..].to_string();
    }
    if let Some(idx) = raw.rfind(':') {
        if !raw[..idx].contains(['(', ')']) {
            return raw[idx + 1..].to_string();
        }
    }
    if let Some(idx) = raw.rfind('.') {
        return raw[idx + 1..].to_string();
    }
    raw.to_string()
}

/// Canonicalize the enclosing-scope string — §4.G.
pub fn normalize_container(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("(*").and_then(|s| s.strip_suffix(')')) {
        return rest.to_string();
    }
    if let Some(rest) = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        return rest.to_string();
    }
    if let Some(rest) = trimmed.strip_prefix("impl ") {
        if let Some((_, ty)) = rest.split_once(" for ") {
            return ty.trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_strips_call_parens() {
        assert_eq!(normalize_name("fn(args)"), "fn");
    }

    #[test]
    fn normalize_name_strips_go_pointer_receiver() {
        assert_eq!(normalize_name("(*Repo).Save"), "Save");
    }

    #[test]
    fn normalize_name_strips_go_value_receiver() {
        assert_eq!(normalize_name("(Repo).Save"), "Save");
    }

    #[test]
    fn normalize_name_strips_receiver_colon_form() {
        assert_eq!(normalize_name("Receiver:method"), "method");
    }

    #[test]
    fn normalize_name_strips_qualified_dotted_form() {
        assert_eq!(normalize_name("Qualified.name"), "name");
    }

    #[test]
    fn normalize_name_leaves_non_word_prefix_unchanged() {
        assert_eq!(normalize_name("my-func(x)"), "my-func(x)");
    }

    #[test]
    fn normalize_name_leaves_nested_parens_unchanged() {
        assert_eq!(normalize_name("fn(a)b)"), "fn(a)b)");
    }

    #[test]
    fn normalize_container_strips_go_pointer_receiver() {
        assert_eq!(normalize_container("(*T)"), "T");
    }

    #[test]
    fn normalize_container_strips_rust_impl_trait_for() {
        assert_eq!(normalize_container("impl Trait for T"), "T");
    }

    #[test]
    fn normalize_container_strips_rust_impl() {
        assert_eq!(normalize_container("impl T"), "T");
    }

    #[test]
    fn normalize_container_passthrough() {
        assert_eq!(normalize_container("some::module"), "some::module");
    }

    #[test]
    fn flatten_builds_dotted_container_paths() {
        let tree = serde_json::json!([{
            "name": "Outer",
            "kind": 5,
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 10, "character": 0}},
            "selectionRange": {"start": {"line": 0, "character": 6}, "end": {"line": 0, "character": 11}},
            "children": [{
                "name": "inner",
                "kind": 12,
                "range": {"start": {"line": 1, "character": 4}, "end": {"line": 2, "character": 4}},
                "selectionRange": {"start": {"line": 1, "character": 8}, "end": {"line": 1, "character": 13}},
                "children": []
            }]
        }]);
        let mut out = Vec::new();
        flatten_document_symbol(&tree[0], "src/lib.rs", None, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].container, None);
        assert_eq!(out[1].container.as_deref(), Some("Outer"));
        assert_eq!(out[1].line, 2);
    }
}
