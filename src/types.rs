//! Language-neutral data model — spec §3.

use serde::{Deserialize, Serialize};

/// Zero-based `(line, character)` pair, as LSP reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open `[start, end)` range over positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// The closed 26-variant `SymbolKind` set mirrored from LSP 3.17 §3.18.13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Key,
    Null,
    EnumMember,
    Struct,
    Event,
    Operator,
    TypeParameter,
}

impl SymbolKind {
    /// Decode the LSP wire integer (1-based, §3.18.13).
    pub fn from_lsp_int(n: u64) -> Self {
        use SymbolKind::*;
        match n {
            1 => File,
            2 => Module,
            3 => Namespace,
            4 => Package,
            5 => Class,
            6 => Method,
            7 => Property,
            8 => Field,
            9 => Constructor,
            10 => Enum,
            11 => Interface,
            12 => Function,
            13 => Variable,
            14 => Constant,
            15 => String,
            16 => Number,
            17 => Boolean,
            18 => Array,
            19 => Object,
            20 => Key,
            21 => Null,
            22 => EnumMember,
            23 => Struct,
            24 => Event,
            25 => Operator,
            26 => TypeParameter,
            _ => Variable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use SymbolKind::*;
        match self {
            File => "File",
            Module => "Module",
            Namespace => "Namespace",
            Package => "Package",
            Class => "Class",
            Method => "Method",
            Property => "Property",
            Field => "Field",
            Constructor => "Constructor",
            Enum => "Enum",
            Interface => "Interface",
            Function => "Function",
            Variable => "Variable",
            Constant => "Constant",
            String => "String",
            Number => "Number",
            Boolean => "Boolean",
            Array => "Array",
            Object => "Object",
            Key => "Key",
            Null => "Null",
            EnumMember => "EnumMember",
            Struct => "Struct",
            Event => "Event",
            Operator => "Operator",
            TypeParameter => "TypeParameter",
        }
    }

    /// The kinds narrowed to for the resolver's tie-break (§4.H step 7).
    pub fn is_type_like(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Module
                | SymbolKind::Namespace
                | SymbolKind::Package
        )
    }
}

/// Normalized, language-agnostic description of a definition — spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRecord {
    /// Raw name as reported by the server (e.g. `(*Repo).Save`).
    pub name: String,
    pub kind: SymbolKind,
    /// Workspace-relative path.
    pub path: String,
    /// One-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
    /// Raw container string as reported by the server, if any.
    pub container: Option<String>,
    pub range_start_line: Option<u32>,
    pub range_end_line: Option<u32>,
    pub detail: Option<String>,
    pub documentation: Option<String>,
}

impl SymbolRecord {
    /// `(path, line, column, name)` identity used to collapse duplicates.
    pub fn dedup_key(&self) -> (String, u32, u32, String) {
        (
            self.path.clone(),
            self.line,
            self.column,
            self.name.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_kind_roundtrips_known_values() {
        for n in 1..=26u64 {
            let kind = SymbolKind::from_lsp_int(n);
            assert!(!kind.as_str().is_empty());
        }
    }

    #[test]
    fn unknown_kind_falls_back_to_variable() {
        assert!(matches!(SymbolKind::from_lsp_int(0), SymbolKind::Variable));
        assert!(matches!(
            SymbolKind::from_lsp_int(999),
            SymbolKind::Variable
        ));
    }

    #[test]
    fn type_like_kinds_match_resolver_tiebreak_set() {
        assert!(SymbolKind::Class.is_type_like());
        assert!(SymbolKind::Struct.is_type_like());
        assert!(SymbolKind::Interface.is_type_like());
        assert!(SymbolKind::Enum.is_type_like());
        assert!(SymbolKind::Module.is_type_like());
        assert!(SymbolKind::Namespace.is_type_like());
        assert!(SymbolKind::Package.is_type_like());
        assert!(!SymbolKind::Function.is_type_like());
        assert!(!SymbolKind::Variable.is_type_like());
    }
}
