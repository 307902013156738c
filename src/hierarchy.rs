//! Call / type hierarchy walkers — spec §4.J.
//!
//! Grounded on `calls.py`'s `_expand_outgoing_calls` / `_expand_incoming_calls`
//! (DFS to `maxDepth` with a `(uri, selectionLine)` visited set) and
//! `_bfs_call_path` (shortest path via BFS over outgoing edges). Type
//! hierarchy reuses the same prepare-then-walk shape the spec calls for,
//! since the original only implements call hierarchy.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::DaemonError;
use crate::rpc::LspClient;
use crate::types::SymbolKind;
use crate::uri::{path_to_uri, uri_to_path};

const EXCLUDED_DIRS: [&str; 9] = [
    ".venv",
    "venv",
    "node_modules",
    "vendor",
    ".git",
    "__pycache__",
    "target",
    "build",
    "dist",
];

/// A prepared `CallHierarchyItem`/`TypeHierarchyItem` — both wire shapes
/// carry the same `{uri, name, kind, detail, selectionRange}` fields, so one
/// type serves both. `raw` is echoed back verbatim in follow-up requests
/// (some servers round-trip an opaque `data` field here).
#[derive(Debug, Clone)]
pub struct HierarchyItem {
    pub name: String,
    pub kind: SymbolKind,
    pub detail: Option<String>,
    pub uri: String,
    pub selection_line: u32,
    pub selection_character: u32,
    pub raw: Value,
}

fn parse_hierarchy_item(v: &Value) -> Option<HierarchyItem> {
    let uri = v.get("uri")?.as_str()?.to_string();
    let name = v.get("name")?.as_str()?.to_string();
    let kind = v
        .get("kind")
        .and_then(|k| k.as_u64())
        .map(SymbolKind::from_lsp_int)
        .unwrap_or(SymbolKind::Function);
    let detail = v.get("detail").and_then(|d| d.as_str()).map(str::to_string);
    let start = v.get("selectionRange")?.get("start")?;
    let selection_line = start.get("line")?.as_u64()? as u32;
    let selection_character = start.get("character")?.as_u64()? as u32;
    Some(HierarchyItem {
        name,
        kind,
        detail,
        uri,
        selection_line,
        selection_character,
        raw: v.clone(),
    })
}

fn visited_key(item: &HierarchyItem) -> (String, u32) {
    (item.uri.clone(), item.selection_line)
}

fn is_path_in_workspace(uri: &str, workspace_root: &Path) -> bool {
    let Ok(file_path) = uri_to_path(uri) else {
        return false;
    };
    match file_path.strip_prefix(workspace_root) {
        Ok(rel) => !rel
            .components()
            .any(|c| EXCLUDED_DIRS.contains(&c.as_os_str().to_str().unwrap_or(""))),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSite {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallNode {
    pub name: String,
    pub kind: Option<String>,
    pub detail: Option<String>,
    pub path: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub from_ranges: Vec<CallSite>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub call_sites: Vec<CallSite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<CallNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub called_by: Option<Vec<CallNode>>,
}

fn format_item(item: &HierarchyItem, workspace_root: &Path) -> Result<CallNode, DaemonError> {
    let file_path = uri_to_path(&item.uri)?;
    let rel_path = file_path
        .strip_prefix(workspace_root)
        .unwrap_or(&file_path)
        .to_string_lossy()
        .into_owned();
    Ok(CallNode {
        name: item.name.clone(),
        kind: Some(item.kind.as_str().to_string()),
        detail: item.detail.clone(),
        path: rel_path,
        line: item.selection_line + 1,
        column: item.selection_character,
        from_ranges: Vec::new(),
        call_sites: Vec::new(),
        calls: None,
        called_by: None,
    })
}

fn relative_display(path: &Path, workspace_root: &Path) -> String {
    path.strip_prefix(workspace_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn no_callable_symbol(path: &Path, workspace_root: &Path, line: u32, column: u32, symbol_name: &str) -> DaemonError {
    let rel = relative_display(path, workspace_root);
    DaemonError::NotFound(format!(
        "No callable symbol found at {rel}:{line}:{column} for '{symbol_name}'. \
         The symbol may not be a function/method, or the position may be incorrect."
    ))
}

pub async fn prepare_call_hierarchy(
    client: &LspClient,
    server_name: &str,
    uri: &str,
    line: u32,
    column: u32,
    timeout: Duration,
) -> Result<Option<HierarchyItem>, DaemonError> {
    prepare(client, server_name, "textDocument/prepareCallHierarchy", uri, line, column, timeout).await
}

pub async fn prepare_type_hierarchy(
    client: &LspClient,
    server_name: &str,
    uri: &str,
    line: u32,
    column: u32,
    timeout: Duration,
) -> Result<Option<HierarchyItem>, DaemonError> {
    prepare(client, server_name, "textDocument/prepareTypeHierarchy", uri, line, column, timeout).await
}

async fn prepare(
    client: &LspClient,
    server_name: &str,
    method: &str,
    uri: &str,
    line: u32,
    column: u32,
    timeout: Duration,
) -> Result<Option<HierarchyItem>, DaemonError> {
    let result = client
        .send_request(
            method,
            json!({
                "textDocument": { "uri": uri },
                "position": { "line": line.saturating_sub(1), "character": column },
            }),
            timeout,
        )
        .await;

    let value = match result {
        Ok(v) => v,
        Err(DaemonError::LspResponse { code, .. }) if DaemonError::is_method_not_found_code(code) => {
            return Err(DaemonError::MethodNotSupported {
                method: method.to_string(),
                server: server_name.to_string(),
            });
        }
        Err(e) => return Err(e),
    };

    match value.as_array().and_then(|a| a.first()) {
        Some(first) => Ok(parse_hierarchy_item(first)),
        None => Ok(None),
    }
}

/// Outgoing calls from a `(path, line, column)`, expanded DFS to `max_depth`.
#[allow(clippy::too_many_arguments)]
pub async fn outgoing_calls_tree(
    client: &LspClient,
    server_name: &str,
    workspace_root: &Path,
    path: &Path,
    line: u32,
    column: u32,
    symbol_name: &str,
    max_depth: u32,
    include_non_workspace: bool,
    timeout: Duration,
) -> Result<CallNode, DaemonError> {
    let uri = path_to_uri(path);
    let item = prepare_call_hierarchy(client, server_name, &uri, line, column, timeout)
        .await?
        .ok_or_else(|| no_callable_symbol(path, workspace_root, line, column, symbol_name))?;

    let mut node = format_item(&item, workspace_root)?;
    let mut visited = HashSet::new();
    node.calls = Some(
        expand_outgoing(client, server_name, workspace_root, &item, max_depth, &mut visited, include_non_workspace, true, timeout)
            .await?,
    );
    Ok(node)
}

/// Callers of a `(path, line, column)`, expanded DFS to `max_depth`.
#[allow(clippy::too_many_arguments)]
pub async fn incoming_calls_tree(
    client: &LspClient,
    server_name: &str,
    workspace_root: &Path,
    path: &Path,
    line: u32,
    column: u32,
    symbol_name: &str,
    max_depth: u32,
    include_non_workspace: bool,
    timeout: Duration,
) -> Result<CallNode, DaemonError> {
    let uri = path_to_uri(path);
    let item = prepare_call_hierarchy(client, server_name, &uri, line, column, timeout)
        .await?
        .ok_or_else(|| no_callable_symbol(path, workspace_root, line, column, symbol_name))?;

    let mut node = format_item(&item, workspace_root)?;
    let mut visited = HashSet::new();
    node.called_by = Some(
        expand_incoming(client, server_name, workspace_root, &item, max_depth, &mut visited, include_non_workspace, true, timeout)
            .await?,
    );
    Ok(node)
}

#[allow(clippy::too_many_arguments)]
fn expand_outgoing<'a>(
    client: &'a LspClient,
    server_name: &'a str,
    workspace_root: &'a Path,
    item: &'a HierarchyItem,
    depth: u32,
    visited: &'a mut HashSet<(String, u32)>,
    include_non_workspace: bool,
    is_root: bool,
    timeout: Duration,
) -> Pin<Box<dyn Future<Output = Result<Vec<CallNode>, DaemonError>> + Send + 'a>> {
    Box::pin(async move {
        if depth == 0 {
            return Ok(Vec::new());
        }
        let key = visited_key(item);
        if visited.contains(&key) {
            return Ok(Vec::new());
        }
        visited.insert(key);

        let result = client
            .send_request("callHierarchy/outgoingCalls", json!({ "item": item.raw }), timeout)
            .await;
        let calls = match result {
            Ok(v) => v,
            Err(DaemonError::LspResponse { code, .. }) if DaemonError::is_method_not_found_code(code) => {
                if is_root {
                    return Err(DaemonError::MethodNotSupported {
                        method: "callHierarchy/outgoingCalls".to_string(),
                        server: server_name.to_string(),
                    });
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let Some(entries) = calls.as_array() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for call in entries {
            let Some(to_item) = call.get("to").and_then(parse_hierarchy_item) else {
                continue;
            };
            if !include_non_workspace && !is_path_in_workspace(&to_item.uri, workspace_root) {
                continue;
            }
            let mut node = format_item(&to_item, workspace_root)?;
            node.from_ranges = parse_ranges(call.get("fromRanges"));
            node.calls = Some(
                expand_outgoing(client, server_name, workspace_root, &to_item, depth - 1, visited, include_non_workspace, false, timeout)
                    .await?,
            );
            out.push(node);
        }
        Ok(out)
    })
}

#[allow(clippy::too_many_arguments)]
fn expand_incoming<'a>(
    client: &'a LspClient,
    server_name: &'a str,
    workspace_root: &'a Path,
    item: &'a HierarchyItem,
    depth: u32,
    visited: &'a mut HashSet<(String, u32)>,
    include_non_workspace: bool,
    is_root: bool,
    timeout: Duration,
) -> Pin<Box<dyn Future<Output = Result<Vec<CallNode>, DaemonError>> + Send + 'a>> {
    Box::pin(async move {
        if depth == 0 {
            return Ok(Vec::new());
        }
        let key = visited_key(item);
        if visited.contains(&key) {
            return Ok(Vec::new());
        }
        visited.insert(key);

        let result = client
            .send_request("callHierarchy/incomingCalls", json!({ "item": item.raw }), timeout)
            .await;
        let calls = match result {
            Ok(v) => v,
            Err(DaemonError::LspResponse { code, .. }) if DaemonError::is_method_not_found_code(code) => {
                if is_root {
                    return Err(DaemonError::MethodNotSupported {
                        method: "callHierarchy/incomingCalls".to_string(),
                        server: server_name.to_string(),
                    });
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let Some(entries) = calls.as_array() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for call in entries {
            let Some(from_item) = call.get("from").and_then(parse_hierarchy_item) else {
                continue;
            };
            if !include_non_workspace && !is_path_in_workspace(&from_item.uri, workspace_root) {
                continue;
            }
            let mut node = format_item(&from_item, workspace_root)?;
            node.call_sites = parse_ranges(call.get("fromRanges"));
            node.called_by = Some(
                expand_incoming(client, server_name, workspace_root, &from_item, depth - 1, visited, include_non_workspace, false, timeout)
                    .await?,
            );
            out.push(node);
        }
        Ok(out)
    })
}

fn parse_ranges(v: Option<&Value>) -> Vec<CallSite> {
    v.and_then(|r| r.as_array())
        .map(|ranges| {
            ranges
                .iter()
                .filter_map(|r| {
                    let start = r.get("start")?;
                    Some(CallSite {
                        line: start.get("line")?.as_u64()? as u32 + 1,
                        column: start.get("character")?.as_u64()? as u32,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Shortest path (inclusive of endpoints) from `from` to `to` via BFS over
/// outgoing call edges, or `None` if no path exists within `max_depth`.
#[allow(clippy::too_many_arguments)]
pub async fn path_between(
    client: &LspClient,
    server_name: &str,
    workspace_root: &Path,
    from_path: &Path,
    from_line: u32,
    from_column: u32,
    from_symbol: &str,
    to_path: &Path,
    to_line: u32,
    to_column: u32,
    to_symbol: &str,
    max_depth: u32,
    include_non_workspace: bool,
    timeout: Duration,
) -> Result<Option<Vec<CallNode>>, DaemonError> {
    let from_uri = path_to_uri(from_path);
    let to_uri = path_to_uri(to_path);

    let from_item = prepare_call_hierarchy(client, server_name, &from_uri, from_line, from_column, timeout)
        .await?
        .ok_or_else(|| no_callable_symbol(from_path, workspace_root, from_line, from_column, from_symbol))?;
    let to_item = prepare_call_hierarchy(client, server_name, &to_uri, to_line, to_column, timeout)
        .await?
        .ok_or_else(|| no_callable_symbol(to_path, workspace_root, to_line, to_column, to_symbol))?;

    let target_key = visited_key(&to_item);

    let mut queue: VecDeque<(HierarchyItem, Vec<HierarchyItem>, u32)> = VecDeque::new();
    let mut visited: HashSet<(String, u32)> = HashSet::new();
    visited.insert(visited_key(&from_item));
    queue.push_back((from_item.clone(), vec![from_item], 0));

    while let Some((current, path_so_far, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }

        let result = client
            .send_request("callHierarchy/outgoingCalls", json!({ "item": current.raw }), timeout)
            .await;
        let Ok(calls) = result else { continue };
        let Some(entries) = calls.as_array() else { continue };

        for call in entries {
            let Some(to_candidate) = call.get("to").and_then(parse_hierarchy_item) else {
                continue;
            };
            if !include_non_workspace && !is_path_in_workspace(&to_candidate.uri, workspace_root) {
                continue;
            }
            let key = visited_key(&to_candidate);

            if key == target_key {
                let mut full_path = path_so_far.clone();
                full_path.push(to_candidate);
                let nodes: Result<Vec<CallNode>, DaemonError> =
                    full_path.iter().map(|item| format_item(item, workspace_root)).collect();
                return Ok(Some(nodes?));
            }

            if !visited.contains(&key) {
                visited.insert(key);
                let mut extended = path_so_far.clone();
                extended.push(to_candidate.clone());
                queue.push_back((to_candidate, extended, depth + 1));
            }
        }
    }

    Ok(None)
}

pub enum TypeDirection {
    Supertypes,
    Subtypes,
}

impl TypeDirection {
    fn method(&self) -> &'static str {
        match self {
            TypeDirection::Supertypes => "typeHierarchy/supertypes",
            TypeDirection::Subtypes => "typeHierarchy/subtypes",
        }
    }
}

/// `supertypes`/`subtypes` — one hop from the symbol at `(path, line,
/// column)`. Unlike call hierarchy this isn't walked recursively: the
/// external interface reports immediate locations only, and
/// `subtypes.py` returns an empty list rather than an error when the
/// symbol has no prepared type-hierarchy item (it may simply not be a
/// type).
#[allow(clippy::too_many_arguments)]
pub async fn type_hierarchy_immediate(
    client: &LspClient,
    server_name: &str,
    workspace_root: &Path,
    path: &Path,
    line: u32,
    column: u32,
    direction: TypeDirection,
    timeout: Duration,
) -> Result<Vec<CallNode>, DaemonError> {
    let uri = path_to_uri(path);
    let Some(item) = prepare_type_hierarchy(client, server_name, &uri, line, column, timeout).await? else {
        return Ok(Vec::new());
    };

    let result = client
        .send_request(direction.method(), json!({ "item": item.raw }), timeout)
        .await;
    let entries = match result {
        Ok(v) => v,
        Err(DaemonError::LspResponse { code, .. }) if DaemonError::is_method_not_found_code(code) => {
            return Err(DaemonError::MethodNotSupported {
                method: direction.method().to_string(),
                server: server_name.to_string(),
            });
        }
        Err(e) => return Err(e),
    };

    let Some(items) = entries.as_array() else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .filter_map(parse_hierarchy_item)
        .map(|child| format_item(&child, workspace_root))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_path_in_workspace_excludes_vendor_dirs() {
        let root = Path::new("/tmp/proj");
        assert!(is_path_in_workspace(&path_to_uri(Path::new("/tmp/proj/src/lib.rs")), root));
        assert!(!is_path_in_workspace(&path_to_uri(Path::new("/tmp/proj/node_modules/x.js")), root));
        assert!(!is_path_in_workspace(&path_to_uri(Path::new("/other/lib.rs")), root));
    }

    #[test]
    fn parse_hierarchy_item_reads_selection_range() {
        let value = json!({
            "name": "run",
            "kind": 12,
            "uri": "file:///tmp/a.rs",
            "selectionRange": {"start": {"line": 4, "character": 3}, "end": {"line": 4, "character": 6}},
        });
        let item = parse_hierarchy_item(&value).unwrap();
        assert_eq!(item.name, "run");
        assert_eq!(item.selection_line, 4);
        assert_eq!(item.selection_character, 3);
    }
}
