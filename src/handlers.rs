//! RPC handler entry points — spec §6 EXTERNAL INTERFACES.
//!
//! Each `handle_*` takes the already-parsed `params: Value` for one method
//! and returns the `result` half of the RPC envelope; [`dispatch`] is the
//! single entry point the inbound transport (`ipc.rs`) calls after decoding
//! a `{method, params}` line. Grounded throughout on the `leta`/`lspcmd`
//! Python handlers of the same name — each function below names its source
//! file in a doc comment.
//!
//! `base.py` (the shared `HandlerContext` helpers every Python handler
//! imports from) is absent from the retrieved source tree, so a handful of
//! helpers here — `is_excluded`, `BINARY_EXTENSIONS`, `hover_doc`,
//! `format_locations`, and the relative/absolute path rule in `resolve_path`
//! — have no original to port and are reconstructed from how the handlers
//! that call them use the result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::cache::{CacheKey, Caches};
use crate::edit::{apply_workspace_edit, WorkspaceEdit};
use crate::error::DaemonError;
use crate::hierarchy::{self, TypeDirection};
use crate::resolver::{self, ResolveOutcome};
use crate::rpc::client::default_timeout;
use crate::rpc::LspClient;
use crate::session::Session;
use crate::symbols::collect_document_symbols;
use crate::types::SymbolRecord;
use crate::uri::{path_to_uri, uri_to_path};
use crate::workspace::Workspace;

/// Directories `files`/`grep`/`calls` never descend into unless the caller
/// explicitly lifts one via `includePatterns` — verbatim from
/// `calls.py::_is_path_in_workspace`'s exclude set (§4.J), reused here since
/// `base.py::DEFAULT_EXCLUDE_DIRS` has no surviving source.
const DEFAULT_EXCLUDE_DIRS: [&str; 9] = [
    ".venv", "venv", "node_modules", "vendor", ".git", "__pycache__", "target", "build", "dist",
];

/// Extensions `files` reports as present but doesn't attempt to read as
/// text. No original `BINARY_EXTENSIONS` source survives; this is a
/// reasonable, unexciting list of common binary formats.
const BINARY_EXTENSIONS: [&str; 14] = [
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "pdf", "zip", "gz", "tar", "so", "dylib", "dll", "wasm",
];

/// Shared app handle the inbound transport constructs once at startup.
pub struct AppContext {
    pub session: Arc<Session>,
    pub caches: Arc<Caches>,
    pub started_at: Instant,
    pub shutdown: Arc<Notify>,
}

/// Route one decoded `{method, params}` line to its handler.
pub async fn dispatch(ctx: &AppContext, method: &str, params: Value) -> Result<Value, DaemonError> {
    match method {
        "files" => handle_files(&ctx.session, &ctx.caches, params).await,
        "grep" => handle_grep(&ctx.session, &ctx.caches, params).await,
        "resolveSymbol" => handle_resolve_symbol(&ctx.session, &ctx.caches, params).await,
        "declaration" => handle_declaration(&ctx.session, params).await,
        "references" => handle_references(&ctx.session, params).await,
        "supertypes" => handle_supertypes(&ctx.session, params).await,
        "subtypes" => handle_subtypes(&ctx.session, params).await,
        "calls" => handle_calls(&ctx.session, params).await,
        "rename" => handle_rename(&ctx.session, params).await,
        "restartWorkspace" => handle_restart_workspace(&ctx.session, params).await,
        "removeWorkspace" => handle_remove_workspace(&ctx.session, params).await,
        "describeSession" => handle_describe_session(&ctx.session, &ctx.caches, ctx.started_at).await,
        "rawLspRequest" => handle_raw_lsp_request(&ctx.session, params).await,
        "shutdown" => handle_shutdown(&ctx.shutdown).await,
        other => Err(DaemonError::InvalidInput(format!("unknown method: {other}"))),
    }
}

// ---------------------------------------------------------------------
// Shared path/glob helpers
// ---------------------------------------------------------------------

fn canonical(raw: &str) -> Result<PathBuf, DaemonError> {
    PathBuf::from(raw)
        .canonicalize()
        .map_err(|e| DaemonError::InvalidInput(format!("invalid workspaceRoot '{raw}': {e}")))
}

/// Absolute paths pass through; relative ones are joined onto the workspace
/// root. No original pins this down explicitly; every handler that accepts
/// a bare `path` param is only ever exercised with workspace-relative
/// values, so this is the natural reading.
fn resolve_path(workspace_root: &Path, raw: &str) -> PathBuf {
    let candidate = PathBuf::from(raw);
    if candidate.is_absolute() {
        candidate
    } else {
        workspace_root.join(candidate)
    }
}

fn relative_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned()
}

/// Reuses the resolver's glob-matching rules (§4.H step 2) for exclude-list
/// filtering — `is_excluded` in the original just calls the same matcher.
fn is_excluded(rel_path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| resolver::matches_path(rel_path, p))
}

fn walk_files(scan_root: &Path, excluded_dirs: &HashSet<String>) -> Vec<PathBuf> {
    let excluded_dirs = excluded_dirs.clone();
    ignore::WalkBuilder::new(scan_root)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .filter_entry(move |entry| match entry.file_type() {
            Some(ft) if ft.is_dir() => {
                let name = entry.file_name().to_string_lossy();
                !excluded_dirs.contains(name.as_ref())
            }
            _ => true,
        })
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect()
}

fn count_lines(content: &str) -> u64 {
    let newlines = content.matches('\n').count() as u64;
    if !content.is_empty() && !content.ends_with('\n') {
        newlines + 1
    } else {
        newlines
    }
}

/// `textDocument/documentSymbol`, cached by `(path, size, mtimeNanos)` —
/// grounded on `ctx.get_file_symbols_cached` plus the caller's close-after
/// loop in `files.py` (`if str(file_path) in workspace.open_documents:
/// await workspace.close_document(file_path)`), which closes the document
/// unconditionally once symbols are collected, regardless of whether this
/// call or some other in-flight one opened it — matched here rather than
/// only closing what this call itself opened.
async fn file_symbols_cached(
    workspace: &Workspace,
    caches: &Caches,
    path: &Path,
) -> Result<Vec<SymbolRecord>, DaemonError> {
    let metadata = tokio::fs::metadata(path).await.map_err(DaemonError::Io)?;
    let mtime_nanos = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0);
    let key = CacheKey {
        path: path.to_string_lossy().into_owned(),
        size: metadata.len(),
        mtime_nanos,
    };

    if let Some(cached) = caches.document_symbols.lock().await.get(&key) {
        return Ok(cached.clone());
    }

    workspace.ensure_document_open(path).await?;

    let guard = workspace.client().await?;
    let client = guard.as_ref().unwrap();
    let uri = path_to_uri(path);
    let symbols = collect_document_symbols(client, &uri, &workspace.root, default_timeout()).await;

    if workspace.documents.is_open(path).await {
        workspace.documents.close(client, path).await?;
    }
    drop(guard);

    let symbols = symbols?;
    let bytes = symbols.len() * std::mem::size_of::<SymbolRecord>();
    caches.document_symbols.lock().await.insert(key, symbols.clone(), bytes);
    Ok(symbols)
}

// ---------------------------------------------------------------------
// files
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesParams {
    pub workspace_root: String,
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

/// `files.py` — scans `subpath` (or the whole workspace), reports
/// `{path, lines, bytes, symbols}` per file. `includePatterns` lifts
/// entries out of the default exclude-dirs set rather than adding to it.
pub async fn handle_files(session: &Session, caches: &Caches, params: Value) -> Result<Value, DaemonError> {
    let p: FilesParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    let scan_root = match &p.subpath {
        Some(sub) => {
            let candidate = resolve_path(&workspace_root, sub);
            if !candidate.exists() {
                return Err(DaemonError::InvalidInput(format!("Path does not exist: {sub}")));
            }
            if !candidate.is_dir() {
                return Err(DaemonError::InvalidInput(format!("Path is not a directory: {sub}")));
            }
            candidate
        }
        None => workspace_root.clone(),
    };

    let lifted: HashSet<String> = p.include_patterns.iter().cloned().collect();
    let active_excludes: HashSet<String> = DEFAULT_EXCLUDE_DIRS
        .iter()
        .map(|s| s.to_string())
        .filter(|d| !lifted.contains(d))
        .collect();

    let mut files = walk_files(&scan_root, &active_excludes);
    if !p.exclude_patterns.is_empty() {
        files.retain(|f| !is_excluded(&relative_path(f, &workspace_root), &p.exclude_patterns));
    }
    files.sort();

    let mut by_language: std::collections::HashMap<String, Vec<PathBuf>> = std::collections::HashMap::new();
    for file in &files {
        if let Some(lang) = session.configs().language_for_file(file) {
            by_language.entry(lang).or_default().push(file.clone());
        }
    }

    let mut symbol_counts: std::collections::HashMap<PathBuf, std::collections::HashMap<String, u64>> =
        std::collections::HashMap::new();
    for (lang_id, lang_files) in &by_language {
        let workspace = match session.get_or_create_workspace_for_language(&workspace_root, lang_id).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(language = %lang_id, error = %e, "could not start workspace for files");
                continue;
            }
        };
        if workspace.wait_for_service_ready(default_timeout()).await.is_err() {
            continue;
        }
        for file in lang_files {
            match file_symbols_cached(&workspace, caches, file).await {
                Ok(symbols) => {
                    let mut counts = std::collections::HashMap::new();
                    for sym in &symbols {
                        *counts.entry(sym.kind.as_str().to_lowercase()).or_insert(0u64) += 1;
                    }
                    symbol_counts.insert(file.clone(), counts);
                }
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "could not get symbols for file");
                }
            }
        }
    }

    let mut entries = serde_json::Map::new();
    let mut total_bytes: u64 = 0;
    let mut total_files: u64 = 0;
    let mut total_lines: u64 = 0;

    for file in &files {
        let rel_path = relative_path(file, &workspace_root);
        let size = tokio::fs::metadata(file).await.map(|m| m.len()).unwrap_or(0);

        let is_binary = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);

        let lines = if is_binary {
            0
        } else {
            tokio::fs::read_to_string(file).await.map(|c| count_lines(&c)).unwrap_or(0)
        };

        let symbols = symbol_counts.get(file).cloned().unwrap_or_default();

        entries.insert(
            rel_path.clone(),
            json!({ "path": rel_path, "lines": lines, "bytes": size, "symbols": symbols }),
        );
        total_bytes += size;
        total_files += 1;
        total_lines += lines;
    }

    Ok(json!({
        "files": Value::Object(entries),
        "totals": { "files": total_files, "bytes": total_bytes, "lines": total_lines },
    }))
}

// ---------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepParams {
    pub workspace_root: String,
    pub pattern: String,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_docs: bool,
}

/// `textDocument/hover`, rendered to plain text and cached by the same
/// `(path, size, mtimeNanos)` key `file_symbols_cached` uses. No original
/// `get_symbol_documentation` survives; hover is the only LSP request that
/// can answer "what's the doc comment for this symbol".
async fn hover_doc(
    workspace: &Workspace,
    caches: &Caches,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Option<String>, DaemonError> {
    let metadata = tokio::fs::metadata(path).await.map_err(DaemonError::Io)?;
    let mtime_nanos = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0);
    let key = CacheKey {
        path: format!("{}:{line}:{column}", path.to_string_lossy()),
        size: metadata.len(),
        mtime_nanos,
    };

    if let Some(cached) = caches.hover.lock().await.get(&key) {
        return Ok(Some(cached.clone()));
    }

    let already_open = workspace.documents.is_open(path).await;
    workspace.ensure_document_open(path).await?;

    let guard = workspace.client().await?;
    let client = guard.as_ref().unwrap();
    let result = client
        .send_request(
            "textDocument/hover",
            json!({
                "textDocument": { "uri": path_to_uri(path) },
                "position": { "line": line.saturating_sub(1), "character": column },
            }),
            default_timeout(),
        )
        .await;

    if !already_open {
        workspace.documents.close(client, path).await?;
    }
    drop(guard);

    let value = result?;
    let text = extract_hover_text(&value);
    if let Some(text) = &text {
        caches.hover.lock().await.insert(key, text.clone(), text.len());
    }
    Ok(text)
}

/// `hover.contents` wire shape is `string | MarkupContent | MarkedString[]` —
/// LSP 3.17 §3.17.3. Flatten whichever arrives to plain text.
fn extract_hover_text(hover: &Value) -> Option<String> {
    let contents = hover.get("contents")?;
    match contents {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => contents.get("value").and_then(|v| v.as_str()).map(str::to_string),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => item.get("value").and_then(|v| v.as_str()).map(str::to_string),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        }
        _ => None,
    }
}

async fn collect_workspace_symbols(
    session: &Session,
    caches: &Caches,
    workspace_root: &Path,
    paths: &[PathBuf],
) -> Vec<SymbolRecord> {
    let files = if paths.is_empty() {
        walk_files(workspace_root, &DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect())
    } else {
        paths.to_vec()
    };

    let mut by_language: std::collections::HashMap<String, Vec<PathBuf>> = std::collections::HashMap::new();
    for file in &files {
        if let Some(lang) = session.configs().language_for_file(file) {
            by_language.entry(lang).or_default().push(file.clone());
        }
    }

    let mut all = Vec::new();
    for (lang_id, lang_files) in by_language {
        let Ok(workspace) = session.get_or_create_workspace_for_language(workspace_root, &lang_id).await else {
            continue;
        };
        if workspace.wait_for_service_ready(default_timeout()).await.is_err() {
            continue;
        }
        for file in lang_files {
            match file_symbols_cached(&workspace, caches, &file).await {
                Ok(symbols) => all.extend(symbols),
                Err(e) => tracing::debug!(file = %file.display(), error = %e, "could not get symbols for file"),
            }
        }
    }
    all
}

/// `grep.py` — regex over symbol names, optionally scoped to `paths`,
/// filtered by `kinds`/`excludePatterns`, with hover docs attached when
/// `includeDocs` is set.
pub async fn handle_grep(session: &Session, caches: &Caches, params: Value) -> Result<Value, DaemonError> {
    let p: GrepParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    let flags = if p.case_sensitive { "" } else { "(?i)" };
    let regex = regex::Regex::new(&format!("{flags}{}", p.pattern))
        .map_err(|e| DaemonError::InvalidInput(format!("Invalid regex pattern '{}': {e}", p.pattern)))?;

    let resolved_paths: Vec<PathBuf> = p.paths.iter().map(|raw| resolve_path(&workspace_root, raw)).collect();
    let mut symbols = collect_workspace_symbols(session, caches, &workspace_root, &resolved_paths).await;

    if !p.exclude_patterns.is_empty() {
        symbols.retain(|s| !is_excluded(&s.path, &p.exclude_patterns));
    }
    symbols.retain(|s| regex.is_match(&s.name));

    if !p.kinds.is_empty() {
        let kinds_lower: HashSet<String> = p.kinds.iter().map(|k| k.to_lowercase()).collect();
        symbols.retain(|s| kinds_lower.contains(&s.kind.as_str().to_lowercase()));
    }

    let mut results: Vec<Value> = Vec::with_capacity(symbols.len());
    for sym in &symbols {
        let mut entry = json!({
            "name": sym.name,
            "kind": sym.kind.as_str(),
            "path": sym.path,
            "line": sym.line,
            "column": sym.column,
            "container": sym.container,
        });

        if p.include_docs {
            let file_path = resolve_path(&workspace_root, &sym.path);
            if let Some(lang) = session.configs().language_for_file(&file_path) {
                if let Ok(workspace) = session.get_or_create_workspace_for_language(&workspace_root, &lang).await {
                    if let Ok(doc) = hover_doc(&workspace, caches, &file_path, sym.line, sym.column).await {
                        entry["documentation"] = json!(doc);
                    }
                }
            }
        }
        results.push(entry);
    }

    let warning = if results.is_empty() && p.pattern.contains("\\|") {
        Some("No results. Note: use '|' for alternation, not '\\|' (e.g., 'foo|bar' not 'foo\\|bar')")
    } else {
        None
    };

    Ok(json!({ "symbols": results, "warning": warning }))
}

// ---------------------------------------------------------------------
// resolveSymbol
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveSymbolParams {
    pub workspace_root: String,
    pub symbol_path: String,
}

/// `resolve_symbol.py` — resolves against the whole workspace-wide symbol
/// list via [`resolver::resolve`] (§4.H).
pub async fn handle_resolve_symbol(session: &Session, caches: &Caches, params: Value) -> Result<Value, DaemonError> {
    let p: ResolveSymbolParams =
        serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    let all_symbols = collect_workspace_symbols(session, caches, &workspace_root, &[]).await;

    match resolver::resolve(&p.symbol_path, &all_symbols)? {
        ResolveOutcome::Found(sym) => Ok(json!({
            "path": sym.path,
            "line": sym.line,
            "column": sym.column,
            "kind": sym.kind.as_str(),
            "container": sym.container,
            "detail": sym.detail,
        })),
        ResolveOutcome::Ambiguous { matches, total } => Ok(json!({
            "error": format!("Ambiguous reference '{}': {} candidates", p.symbol_path, total),
            "matches": matches.iter().map(|m| json!({
                "path": m.symbol.path,
                "line": m.symbol.line,
                "column": m.symbol.column,
                "kind": m.symbol.kind.as_str(),
                "ref": m.reference,
            })).collect::<Vec<_>>(),
            "totalMatches": total,
        })),
        ResolveOutcome::NotFound(msg) => Ok(json!({ "error": msg, "matches": [], "totalMatches": 0 })),
    }
}

// ---------------------------------------------------------------------
// declaration / references / supertypes / subtypes — shared location plumbing
// ---------------------------------------------------------------------

/// Look up the workspace for `path`'s language and open the document,
/// returning `(workspace, document uri, canonical workspace root)` —
/// shared first step of every position-based handler.
async fn prepare_document(
    session: &Session,
    workspace_root: &str,
    path: &str,
) -> Result<(Arc<Workspace>, String, PathBuf), DaemonError> {
    let workspace_root = canonical(workspace_root)?;
    let file_path = resolve_path(&workspace_root, path);
    let workspace = session.get_or_create_workspace(&file_path, &workspace_root).await?;
    workspace.wait_for_service_ready(default_timeout()).await?;
    workspace.ensure_document_open(&file_path).await?;
    Ok((workspace, path_to_uri(&file_path), workspace_root))
}

/// Send `method` against `workspace`'s client, converting a `-32601`
/// response into [`DaemonError::MethodNotSupported`] the way every walker
/// in `hierarchy.rs` and the original `calls.py` does at its root call.
async fn send_with_not_supported(workspace: &Workspace, method: &str, params: Value) -> Result<Value, DaemonError> {
    let guard = workspace.client().await?;
    let client = guard.as_ref().unwrap();
    let result = client.send_request(method, params, default_timeout()).await;
    match result {
        Ok(v) => Ok(v),
        Err(DaemonError::LspResponse { code, .. }) if DaemonError::is_method_not_found_code(code) => {
            Err(DaemonError::MethodNotSupported {
                method: method.to_string(),
                server: workspace.language_id.clone(),
            })
        }
        Err(e) => Err(e),
    }
}

async fn context_lines(file_path: &Path, line: u32, n: u32) -> Result<Vec<String>, DaemonError> {
    let content = tokio::fs::read_to_string(file_path).await.map_err(DaemonError::Io)?;
    let all: Vec<&str> = content.lines().collect();
    let idx = line.saturating_sub(1) as usize;
    let start = idx.saturating_sub(n as usize);
    let end = (idx + n as usize + 1).min(all.len());
    Ok(all.get(start..end).unwrap_or(&[]).iter().map(|s| s.to_string()).collect())
}

/// LSP `Location | Location[] | LocationLink[] | null` → `{path, line,
/// column}` records, workspace-relative, optionally carrying `context`
/// surrounding lines. No original `format_locations` survives; this is the
/// natural shape given `declaration.py`/`references.py`/`subtypes.py` only
/// ever read `path`/`line`/`column` back off its result.
async fn format_locations(result: &Value, workspace_root: &Path, context: Option<u32>) -> Vec<Value> {
    let raw = match result {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(normalize_location_link).collect(),
        single => vec![normalize_location_link(single)],
    };

    let mut out = Vec::new();
    for loc in raw {
        let Some(uri) = loc.get("uri").and_then(|u| u.as_str()) else { continue };
        let Some(start) = loc.get("range").and_then(|r| r.get("start")) else { continue };
        let Ok(file_path) = uri_to_path(uri) else { continue };
        let line = start.get("line").and_then(|l| l.as_u64()).unwrap_or(0) as u32 + 1;
        let column = start.get("character").and_then(|c| c.as_u64()).unwrap_or(0) as u32;

        let mut entry = json!({
            "path": relative_path(&file_path, workspace_root),
            "line": line,
            "column": column,
        });
        if let Some(n) = context {
            if let Ok(lines) = context_lines(&file_path, line, n).await {
                entry["context"] = json!(lines);
            }
        }
        out.push(entry);
    }
    out
}

/// `LocationLink` uses `targetUri`/`targetSelectionRange` instead of
/// `uri`/`range`; normalize both shapes to the latter.
fn normalize_location_link(item: &Value) -> Value {
    if item.get("targetUri").is_some() {
        json!({
            "uri": item.get("targetUri").cloned().unwrap_or(Value::Null),
            "range": item
                .get("targetSelectionRange")
                .or_else(|| item.get("targetRange"))
                .cloned()
                .unwrap_or(Value::Null),
        })
    } else {
        item.clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationParams {
    pub workspace_root: String,
    pub path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub context: Option<u32>,
}

/// `declaration.py` — `textDocument/declaration`.
pub async fn handle_declaration(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: LocationParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let (workspace, uri, workspace_root) = prepare_document(session, &p.workspace_root, &p.path).await?;
    let result = send_with_not_supported(
        &workspace,
        "textDocument/declaration",
        json!({ "textDocument": { "uri": uri }, "position": { "line": p.line.saturating_sub(1), "character": p.column } }),
    )
    .await?;
    Ok(json!({ "locations": format_locations(&result, &workspace_root, p.context).await }))
}

/// `references.py` — `textDocument/references`. `includeDeclaration` is
/// always `true` here, matching the original unconditionally; it is
/// distinct from the RPC-level `context` (surrounding source lines) param.
pub async fn handle_references(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: LocationParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let (workspace, uri, workspace_root) = prepare_document(session, &p.workspace_root, &p.path).await?;
    let result = send_with_not_supported(
        &workspace,
        "textDocument/references",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": p.line.saturating_sub(1), "character": p.column },
            "context": { "includeDeclaration": true },
        }),
    )
    .await?;
    Ok(json!({ "locations": format_locations(&result, &workspace_root, p.context).await }))
}

async fn handle_type_hierarchy(session: &Session, params: Value, direction: TypeDirection) -> Result<Value, DaemonError> {
    let p: LocationParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let (workspace, _uri, workspace_root) = prepare_document(session, &p.workspace_root, &p.path).await?;
    let file_path = resolve_path(&workspace_root, &p.path);

    let nodes = {
        let guard = workspace.client().await?;
        let client = guard.as_ref().unwrap();
        hierarchy::type_hierarchy_immediate(
            client,
            &workspace.language_id,
            &workspace_root,
            &file_path,
            p.line,
            p.column,
            direction,
            default_timeout(),
        )
        .await?
    };

    let mut locations = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let mut entry = json!({
            "path": node.path,
            "line": node.line,
            "column": node.column,
            "name": node.name,
            "kind": node.kind,
        });
        if let Some(n) = p.context {
            if let Ok(lines) = context_lines(&workspace_root.join(&node.path), node.line, n).await {
                entry["context"] = json!(lines);
            }
        }
        locations.push(entry);
    }
    Ok(json!({ "locations": locations }))
}

/// `subtypes.py`'s `supertypes` counterpart — one hop up the type hierarchy.
pub async fn handle_supertypes(session: &Session, params: Value) -> Result<Value, DaemonError> {
    handle_type_hierarchy(session, params, TypeDirection::Supertypes).await
}

/// `subtypes.py` — one hop down the type hierarchy; an absent
/// `prepareTypeHierarchy` result yields `{locations: []}`, not an error.
pub async fn handle_subtypes(session: &Session, params: Value) -> Result<Value, DaemonError> {
    handle_type_hierarchy(session, params, TypeDirection::Subtypes).await
}

// ---------------------------------------------------------------------
// calls
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsParams {
    pub workspace_root: String,
    pub mode: String,
    #[serde(default)]
    pub from_path: Option<String>,
    #[serde(default)]
    pub from_line: Option<u32>,
    #[serde(default)]
    pub from_column: Option<u32>,
    #[serde(default)]
    pub from_symbol: Option<String>,
    #[serde(default)]
    pub to_path: Option<String>,
    #[serde(default)]
    pub to_line: Option<u32>,
    #[serde(default)]
    pub to_column: Option<u32>,
    #[serde(default)]
    pub to_symbol: Option<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub include_non_workspace: bool,
}

fn default_max_depth() -> u32 {
    3
}

struct Endpoint {
    path: PathBuf,
    line: u32,
    column: u32,
    symbol: String,
}

fn require_endpoint(
    workspace_root: &Path,
    path: Option<String>,
    line: Option<u32>,
    column: Option<u32>,
    symbol: Option<String>,
    prefix: &str,
) -> Result<Endpoint, DaemonError> {
    let path = path.ok_or_else(|| DaemonError::InvalidInput(format!("{prefix}Path is required")))?;
    let line = line.ok_or_else(|| DaemonError::InvalidInput(format!("{prefix}Line is required")))?;
    Ok(Endpoint {
        path: resolve_path(workspace_root, &path),
        line,
        column: column.unwrap_or(0),
        symbol: symbol.unwrap_or_default(),
    })
}

/// `calls.py` — `outgoing`/`incoming` call hierarchy trees or a BFS
/// `pathBetween` the two endpoints (§4.J).
pub async fn handle_calls(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: CallsParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    match p.mode.as_str() {
        "outgoing" => {
            let from = require_endpoint(&workspace_root, p.from_path, p.from_line, p.from_column, p.from_symbol, "from")?;
            let workspace = session.get_or_create_workspace(&from.path, &workspace_root).await?;
            workspace.wait_for_service_ready(default_timeout()).await?;
            let guard = workspace.client().await?;
            let client = guard.as_ref().unwrap();
            match hierarchy::outgoing_calls_tree(
                client,
                &workspace.language_id,
                &workspace_root,
                &from.path,
                from.line,
                from.column,
                &from.symbol,
                p.max_depth,
                p.include_non_workspace,
                default_timeout(),
            )
            .await
            {
                Ok(root) => Ok(json!({ "root": root })),
                Err(DaemonError::NotFound(msg)) => Ok(json!({ "error": msg })),
                Err(e) => Err(e),
            }
        }
        "incoming" => {
            let to = require_endpoint(&workspace_root, p.to_path, p.to_line, p.to_column, p.to_symbol, "to")?;
            let workspace = session.get_or_create_workspace(&to.path, &workspace_root).await?;
            workspace.wait_for_service_ready(default_timeout()).await?;
            let guard = workspace.client().await?;
            let client = guard.as_ref().unwrap();
            match hierarchy::incoming_calls_tree(
                client,
                &workspace.language_id,
                &workspace_root,
                &to.path,
                to.line,
                to.column,
                &to.symbol,
                p.max_depth,
                p.include_non_workspace,
                default_timeout(),
            )
            .await
            {
                Ok(root) => Ok(json!({ "root": root })),
                Err(DaemonError::NotFound(msg)) => Ok(json!({ "error": msg })),
                Err(e) => Err(e),
            }
        }
        "pathBetween" => {
            let from = require_endpoint(&workspace_root, p.from_path, p.from_line, p.from_column, p.from_symbol, "from")?;
            let to = require_endpoint(&workspace_root, p.to_path, p.to_line, p.to_column, p.to_symbol, "to")?;
            let workspace = session.get_or_create_workspace(&from.path, &workspace_root).await?;
            workspace.wait_for_service_ready(default_timeout()).await?;
            let guard = workspace.client().await?;
            let client = guard.as_ref().unwrap();
            let result = hierarchy::path_between(
                client,
                &workspace.language_id,
                &workspace_root,
                &from.path,
                from.line,
                from.column,
                &from.symbol,
                &to.path,
                to.line,
                to.column,
                &to.symbol,
                p.max_depth,
                p.include_non_workspace,
                default_timeout(),
            )
            .await;
            match result {
                Ok(Some(path)) => Ok(json!({ "path": path })),
                Ok(None) => Ok(json!({
                    "message": format!(
                        "No call path found from '{}' to '{}' within depth {}",
                        from.symbol, to.symbol, p.max_depth
                    )
                })),
                Err(DaemonError::NotFound(msg)) => Ok(json!({ "error": msg })),
                Err(e) => Err(e),
            }
        }
        other => Err(DaemonError::InvalidInput(format!("unknown calls mode: {other}"))),
    }
}

// ---------------------------------------------------------------------
// rename
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    pub workspace_root: String,
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub new_name: String,
}

/// `rename.py` — `textDocument/rename`, applied locally via
/// [`apply_workspace_edit`] (§4.I) rather than `workspace/applyEdit`.
pub async fn handle_rename(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: RenameParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let (workspace, uri, workspace_root) = prepare_document(session, &p.workspace_root, &p.path).await?;

    let result = send_with_not_supported(
        &workspace,
        "textDocument/rename",
        json!({
            "textDocument": { "uri": uri },
            "position": { "line": p.line.saturating_sub(1), "character": p.column },
            "newName": p.new_name,
        }),
    )
    .await?;

    if result.is_null() {
        return Err(DaemonError::NotFound(format!(
            "Rename produced no edits at {}:{}:{}",
            p.path, p.line, p.column
        )));
    }

    let edit = WorkspaceEdit::from_value(&result);
    let touched = apply_workspace_edit(&edit, &workspace_root).await?;
    Ok(json!({ "filesChanged": touched }))
}

// ---------------------------------------------------------------------
// restartWorkspace / removeWorkspace
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRootParams {
    pub workspace_root: String,
}

async fn discover_languages(session: &Session, workspace_root: &Path) -> Vec<String> {
    let excludes: HashSet<String> = DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect();
    let files = walk_files(workspace_root, &excludes);
    let mut seen = HashSet::new();
    let mut languages = Vec::new();
    for file in files {
        if let Some(lang) = session.configs().language_for_file(&file) {
            if seen.insert(lang.clone()) {
                languages.push(lang);
            }
        }
    }
    languages
}

/// `restart_workspace.py` — restarts every language already running at
/// `workspaceRoot`, or (if none is running yet) discovers and starts every
/// language present under the root.
pub async fn handle_restart_workspace(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: WorkspaceRootParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    let existing: Vec<Arc<Workspace>> = session
        .all_workspaces()
        .await
        .into_iter()
        .filter(|ws| ws.root == workspace_root)
        .collect();

    if !existing.is_empty() {
        let mut restarted = Vec::new();
        for ws in existing {
            ws.restart().await?;
            restarted.push(ws.language_id.clone());
        }
        return Ok(json!({ "restarted": restarted }));
    }

    let languages = discover_languages(session, &workspace_root).await;
    if languages.is_empty() {
        return Err(DaemonError::NotFound(format!(
            "No supported source files found in {}",
            workspace_root.display()
        )));
    }

    let mut restarted = Vec::new();
    for lang_id in languages {
        if session
            .get_or_create_workspace_for_language(&workspace_root, &lang_id)
            .await
            .is_ok()
        {
            restarted.push(lang_id);
        }
    }
    Ok(json!({ "restarted": restarted }))
}

/// Stops and drops every workspace registered at `workspaceRoot`, across
/// all languages.
pub async fn handle_remove_workspace(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: WorkspaceRootParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;

    let existing: Vec<Arc<Workspace>> = session
        .all_workspaces()
        .await
        .into_iter()
        .filter(|ws| ws.root == workspace_root)
        .collect();

    if existing.is_empty() {
        return Err(DaemonError::NotFound(format!("no workspace at {}", workspace_root.display())));
    }

    for ws in existing {
        session.remove_workspace(&workspace_root, &ws.language_id).await?;
    }
    Ok(json!({}))
}

// ---------------------------------------------------------------------
// describeSession / rawLspRequest / shutdown
// ---------------------------------------------------------------------

/// `describe_session.py` — a snapshot of every live workspace plus cache
/// occupancy, for operators and tests.
pub async fn handle_describe_session(session: &Session, caches: &Caches, started_at: Instant) -> Result<Value, DaemonError> {
    let mut workspaces = Vec::new();
    for ws in session.all_workspaces().await {
        workspaces.push(json!({
            "root": ws.root.to_string_lossy(),
            "language": ws.language_id,
            "state": format!("{:?}", ws.state().await),
            "openDocuments": ws
                .documents
                .open_paths()
                .await
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        }));
    }

    Ok(json!({
        "daemonPid": std::process::id(),
        "caches": caches.describe().await,
        "workspaces": workspaces,
        "uptimeSecs": started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLspRequestParams {
    pub workspace_root: String,
    pub language: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `raw_lsp_request.py` — an escape hatch straight to the child server;
/// errors pass through unmodified per §7's propagation policy.
pub async fn handle_raw_lsp_request(session: &Session, params: Value) -> Result<Value, DaemonError> {
    let p: RawLspRequestParams = serde_json::from_value(params).map_err(|e| DaemonError::InvalidInput(e.to_string()))?;
    let workspace_root = canonical(&p.workspace_root)?;
    let workspace = session.get_or_create_workspace_for_language(&workspace_root, &p.language).await?;
    workspace.wait_for_service_ready(default_timeout()).await?;

    let guard = workspace.client().await?;
    let client: &LspClient = guard.as_ref().unwrap();
    client.send_request(&p.method, p.params, default_timeout()).await
}

/// `shutdown.py` — wakes the inbound transport's shutdown watcher; the
/// caller's connection still receives this response before the daemon
/// actually exits.
pub async fn handle_shutdown(shutdown: &Notify) -> Result<Value, DaemonError> {
    shutdown.notify_waiters();
    Ok(json!({ "status": "shuttingDown" }))
}
