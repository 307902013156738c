//! Symbol reference resolver — spec §4.H.
//!
//! Ported from the exact branch order in `resolve_symbol.py`
//! (`_name_matches`, `_normalize_container`, `_get_effective_container`,
//! `_generate_unambiguous_ref`, `_ref_resolves_uniquely`): the matching
//! rules here are deliberately broad so `MyClass.method`, `(*MyClass).method`,
//! and plain `method` with `containerName=MyClass` all resolve to the same
//! symbol regardless of which form a given server reports.

use std::path::Path;

use crate::error::DaemonError;
use crate::symbols::{normalize_container, normalize_name};
use crate::types::SymbolRecord;

pub struct ParsedRef {
    pub path_glob: Option<String>,
    pub line: Option<u32>,
    pub dotted: String,
}

/// Parse `[pathGlob[:line]:]dotted` — exactly zero, one, or two colons at
/// the top level select which prefixes are present.
pub fn parse_ref(raw: &str) -> Result<ParsedRef, DaemonError> {
    let colon_count = raw.matches(':').count();
    match colon_count {
        0 => Ok(ParsedRef {
            path_glob: None,
            line: None,
            dotted: raw.to_string(),
        }),
        1 => {
            let (path_glob, dotted) = raw.split_once(':').unwrap();
            Ok(ParsedRef {
                path_glob: Some(path_glob.to_string()),
                line: None,
                dotted: dotted.to_string(),
            })
        }
        _ => {
            let mut parts = raw.splitn(3, ':');
            let path_glob = parts.next().unwrap().to_string();
            let line_str = parts.next().unwrap();
            let dotted = parts.next().unwrap_or("").to_string();
            let line = line_str
                .parse::<u32>()
                .map_err(|_| DaemonError::InvalidInput(format!("Invalid line number: '{line_str}'")))?;
            Ok(ParsedRef {
                path_glob: Some(path_glob),
                line: Some(line),
                dotted,
            })
        }
    }
}

/// Match `rel_path` against `glob` per §4.H step 2: the glob directly,
/// `**/{glob}`, `{glob}/**`, the file's basename (glob with no `/`), or the
/// glob as a path component.
pub fn matches_path(rel_path: &str, glob: &str) -> bool {
    if glob_is_match(glob, rel_path) {
        return true;
    }
    if glob_is_match(&format!("**/{glob}"), rel_path) {
        return true;
    }
    if glob_is_match(&format!("{glob}/**"), rel_path) {
        return true;
    }
    if !glob.contains('/') {
        let basename = Path::new(rel_path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("");
        if glob_is_match(glob, basename) {
            return true;
        }
        if Path::new(rel_path).components().any(|c| c.as_os_str() == glob) {
            return true;
        }
    }
    false
}

fn glob_is_match(pattern: &str, candidate: &str) -> bool {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

fn module_name_of(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

/// Container derived from the server's `containerName` when present,
/// otherwise parsed out of a Go-style receiver name — §4.H step 6.
fn effective_container(sym: &SymbolRecord) -> String {
    if let Some(c) = sym.container.as_deref() {
        if !c.is_empty() {
            return normalize_container(c);
        }
    }
    let name = &sym.name;
    let rest = name.strip_prefix("(*").or_else(|| name.strip_prefix('('));
    if let Some(rest) = rest {
        if let Some(idx) = rest.find(").") {
            return rest[..idx].to_string();
        }
    }
    String::new()
}

/// Apply the name/container matching rules for one `dotted` reference
/// (without path/line filters, which the caller applies first) — the core
/// of §4.H steps 5-6, shared between top-level resolution and the
/// disambiguation-ref uniqueness check.
fn name_container_matches(dotted: &str, candidates: &[SymbolRecord]) -> Vec<SymbolRecord> {
    let parts: Vec<&str> = dotted.split('.').collect();
    let target_name = *parts.last().unwrap_or(&"");

    if parts.len() == 1 {
        return candidates
            .iter()
            .filter(|s| {
                s.name == target_name
                    || normalize_name(&s.name) == target_name
                    || s.name.ends_with(&format!(").{target_name}"))
            })
            .cloned()
            .collect();
    }

    let container_str = parts[..parts.len() - 1].join(".");
    let go_style = format!("(*{container_str}).{target_name}");
    let go_style_value = format!("({container_str}).{target_name}");

    candidates
        .iter()
        .filter(|s| {
            if s.name == go_style || s.name == go_style_value {
                return true;
            }
            if s.name != target_name && normalize_name(&s.name) != target_name {
                return false;
            }

            let sym_container = s.container.clone().unwrap_or_default();
            let sym_container_normalized = normalize_container(&sym_container);
            let module_name = module_name_of(&s.path);
            let full_container = if sym_container_normalized.is_empty() {
                module_name.clone()
            } else {
                format!("{module_name}.{sym_container_normalized}")
            };

            sym_container_normalized == container_str
                || sym_container == container_str
                || full_container == container_str
                || full_container.ends_with(&format!(".{container_str}"))
                || (parts.len() == 2 && parts[0] == module_name)
        })
        .cloned()
        .collect()
}

/// The kinds narrowed to when the tiebreak applies — spec §4.H step 7.
fn kind_preference_tiebreak(matches: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    if matches.len() <= 1 {
        return matches;
    }
    let type_like: Vec<SymbolRecord> = matches.iter().filter(|s| s.kind.is_type_like()).cloned().collect();
    if type_like.len() == 1 {
        type_like
    } else {
        matches
    }
}

#[derive(Debug, Clone)]
pub struct AmbiguousMatch {
    pub symbol: SymbolRecord,
    pub reference: String,
}

pub enum ResolveOutcome {
    Found(SymbolRecord),
    Ambiguous { matches: Vec<AmbiguousMatch>, total: usize },
    NotFound(String),
}

/// Resolve `symbol_path` against the workspace-wide symbol list — §4.H.
pub fn resolve(symbol_path: &str, all_symbols: &[SymbolRecord]) -> Result<ResolveOutcome, DaemonError> {
    let parsed = parse_ref(symbol_path)?;

    let mut candidates: Vec<SymbolRecord> = all_symbols.to_vec();
    if let Some(glob) = &parsed.path_glob {
        candidates.retain(|s| matches_path(&s.path, glob));
    }
    if let Some(line) = parsed.line {
        candidates.retain(|s| s.line == line);
    }

    let parts: Vec<&str> = parsed.dotted.split('.').collect();
    let target_name = *parts.last().unwrap_or(&"");

    let mut matches = name_container_matches(&parsed.dotted, &candidates);

    if matches.is_empty() {
        let mut detail = Vec::new();
        if let Some(glob) = &parsed.path_glob {
            detail.push(format!("in files matching '{glob}'"));
        }
        if let Some(line) = parsed.line {
            detail.push(format!("on line {line}"));
        }
        let suffix = if detail.is_empty() { String::new() } else { format!(" {}", detail.join(" ")) };
        return Ok(ResolveOutcome::NotFound(format!(
            "Symbol '{}' not found{}",
            parsed.dotted, suffix
        )));
    }

    matches = kind_preference_tiebreak(matches);

    if matches.len() == 1 {
        return Ok(ResolveOutcome::Found(matches.into_iter().next().unwrap()));
    }

    let total = matches.len();
    let ambiguous = matches
        .iter()
        .take(10)
        .map(|sym| AmbiguousMatch {
            symbol: sym.clone(),
            reference: generate_unambiguous_ref(sym, &matches, target_name),
        })
        .collect();

    Ok(ResolveOutcome::Ambiguous { matches: ambiguous, total })
}

/// Shortest of `container.name`, `filename:name`, `filename:container.name`,
/// `filename:line:name` that resolves uniquely to `sym` under the same
/// algorithm, in that priority order — §4.H step 8.
fn generate_unambiguous_ref(sym: &SymbolRecord, all_matches: &[SymbolRecord], target_name: &str) -> String {
    let filename = Path::new(&sym.path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(&sym.path)
        .to_string();
    let normalized_name = normalize_name(target_name);
    let sym_container = effective_container(sym);

    if !sym_container.is_empty() {
        let candidate = format!("{sym_container}.{normalized_name}");
        if ref_resolves_uniquely(&candidate, sym, all_matches) {
            return candidate;
        }
    }

    let candidate = format!("{filename}:{normalized_name}");
    if ref_resolves_uniquely(&candidate, sym, all_matches) {
        return candidate;
    }

    if !sym_container.is_empty() {
        let candidate = format!("{filename}:{sym_container}.{normalized_name}");
        if ref_resolves_uniquely(&candidate, sym, all_matches) {
            return candidate;
        }
    }

    format!("{filename}:{}:{normalized_name}", sym.line)
}

fn symbol_key(s: &SymbolRecord) -> (String, u32, u32, String) {
    s.dedup_key()
}

/// Re-resolve `candidate_ref` against `all_matches` (the ambiguous set, not
/// the whole workspace) and check it lands on exactly `target` — the refs
/// this function is asked about are always generated above, so they are
/// always well-formed (a failed `parse_ref` can't actually happen here).
fn ref_resolves_uniquely(candidate_ref: &str, target: &SymbolRecord, all_matches: &[SymbolRecord]) -> bool {
    let parsed = match parse_ref(candidate_ref) {
        Ok(p) => p,
        Err(_) => return false,
    };

    let mut candidates: Vec<SymbolRecord> = all_matches.to_vec();

    if let Some(glob) = &parsed.path_glob {
        candidates.retain(|s| {
            Path::new(&s.path).file_name().and_then(|f| f.to_str()) == Some(glob.as_str())
        });
    }

    if let Some(line) = parsed.line {
        candidates.retain(|s| s.line == line);
        return candidates.len() == 1 && symbol_key(&candidates[0]) == symbol_key(target);
    }

    let matching = name_container_matches_with_effective(&parsed.dotted, &candidates);
    matching.len() == 1 && symbol_key(&matching[0]) == symbol_key(target)
}

/// Same as [`name_container_matches`] but additionally accepts a match when
/// the symbol's Go-receiver-derived *effective* container equals the
/// expected container — used only by the uniqueness check, mirroring
/// `_ref_resolves_uniquely`'s extra `s_effective_container` branch.
fn name_container_matches_with_effective(dotted: &str, candidates: &[SymbolRecord]) -> Vec<SymbolRecord> {
    let parts: Vec<&str> = dotted.split('.').collect();
    if parts.len() == 1 {
        return name_container_matches(dotted, candidates);
    }
    let target_name = *parts.last().unwrap_or(&"");
    let container_str = parts[..parts.len() - 1].join(".");

    candidates
        .iter()
        .filter(|s| {
            if normalize_name(&s.name) != target_name {
                return false;
            }
            let sym_container = s.container.clone().unwrap_or_default();
            let sym_container_normalized = normalize_container(&sym_container);
            let module_name = module_name_of(&s.path);
            let full_container = if sym_container_normalized.is_empty() {
                module_name.clone()
            } else {
                format!("{module_name}.{sym_container_normalized}")
            };
            let eff = effective_container(s);

            sym_container_normalized == container_str
                || sym_container == container_str
                || eff == container_str
                || full_container == container_str
                || full_container.ends_with(&format!(".{container_str}"))
                || (parts.len() == 2 && parts[0] == module_name)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn sym(name: &str, path: &str, line: u32, container: Option<&str>, kind: SymbolKind) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            kind,
            path: path.to_string(),
            line,
            column: 0,
            container: container.map(str::to_string),
            range_start_line: Some(line),
            range_end_line: Some(line),
            detail: None,
            documentation: None,
        }
    }

    #[test]
    fn parse_ref_with_no_colon() {
        let parsed = parse_ref("Foo.bar").unwrap();
        assert!(parsed.path_glob.is_none());
        assert!(parsed.line.is_none());
        assert_eq!(parsed.dotted, "Foo.bar");
    }

    #[test]
    fn parse_ref_with_one_colon() {
        let parsed = parse_ref("src/*.rs:Foo.bar").unwrap();
        assert_eq!(parsed.path_glob.as_deref(), Some("src/*.rs"));
        assert!(parsed.line.is_none());
        assert_eq!(parsed.dotted, "Foo.bar");
    }

    #[test]
    fn parse_ref_with_two_colons() {
        let parsed = parse_ref("main.rs:42:bar").unwrap();
        assert_eq!(parsed.path_glob.as_deref(), Some("main.rs"));
        assert_eq!(parsed.line, Some(42));
        assert_eq!(parsed.dotted, "bar");
    }

    #[test]
    fn parse_ref_rejects_invalid_line() {
        assert!(parse_ref("main.rs:notanumber:bar").is_err());
    }

    #[test]
    fn resolves_unique_function() {
        let symbols = vec![sym("handle_request", "src/lib.rs", 10, None, SymbolKind::Function)];
        match resolve("handle_request", &symbols).unwrap() {
            ResolveOutcome::Found(s) => assert_eq!(s.name, "handle_request"),
            _ => panic!("expected a unique match"),
        }
    }

    #[test]
    fn resolves_go_style_receiver_by_dotted_name() {
        let symbols = vec![sym("(*Repo).Save", "store.go", 20, None, SymbolKind::Method)];
        match resolve("Repo.Save", &symbols).unwrap() {
            ResolveOutcome::Found(s) => assert_eq!(s.name, "(*Repo).Save"),
            _ => panic!("expected a unique match"),
        }
    }

    #[test]
    fn resolves_via_container_name_field() {
        let symbols = vec![sym("method", "a.py", 5, Some("MyClass"), SymbolKind::Method)];
        match resolve("MyClass.method", &symbols).unwrap() {
            ResolveOutcome::Found(s) => assert_eq!(s.container.as_deref(), Some("MyClass")),
            _ => panic!("expected a unique match"),
        }
    }

    #[test]
    fn not_found_reports_symbol_name() {
        let symbols = vec![sym("foo", "a.py", 1, None, SymbolKind::Function)];
        match resolve("bar", &symbols).unwrap() {
            ResolveOutcome::NotFound(msg) => assert!(msg.contains("bar")),
            _ => panic!("expected not found"),
        }
    }

    #[test]
    fn ambiguous_when_two_same_named_functions() {
        let symbols = vec![
            sym("run", "a.py", 1, None, SymbolKind::Function),
            sym("run", "b.py", 9, None, SymbolKind::Function),
        ];
        match resolve("run", &symbols).unwrap() {
            ResolveOutcome::Ambiguous { matches, total } => {
                assert_eq!(total, 2);
                assert_eq!(matches.len(), 2);
                for m in &matches {
                    assert!(m.reference.starts_with("a.py") || m.reference.starts_with("b.py"));
                }
            }
            _ => panic!("expected ambiguity"),
        }
    }

    #[test]
    fn kind_tiebreak_narrows_to_sole_type_match() {
        let symbols = vec![
            sym("Widget", "a.py", 1, None, SymbolKind::Class),
            sym("Widget", "a.py", 40, Some("make"), SymbolKind::Variable),
        ];
        match resolve("Widget", &symbols).unwrap() {
            ResolveOutcome::Found(s) => assert_eq!(s.kind, SymbolKind::Class),
            other => panic!("expected the Class kind to win the tiebreak, got ambiguity: {}", matches!(other, ResolveOutcome::Ambiguous { .. })),
        }
    }

    #[test]
    fn path_glob_filters_by_basename() {
        let symbols = vec![
            sym("run", "pkg/a.py", 1, None, SymbolKind::Function),
            sym("run", "pkg/b.py", 9, None, SymbolKind::Function),
        ];
        match resolve("a.py:run", &symbols).unwrap() {
            ResolveOutcome::Found(s) => assert_eq!(s.path, "pkg/a.py"),
            _ => panic!("expected path glob to disambiguate"),
        }
    }

    #[test]
    fn matches_path_basename_without_slash() {
        assert!(matches_path("src/nested/mod.rs", "mod.rs"));
        assert!(!matches_path("src/nested/mod.rs", "other.rs"));
    }

    #[test]
    fn matches_path_component() {
        assert!(matches_path("src/nested/mod.rs", "nested"));
    }
}
