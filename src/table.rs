// Copyright (c) 2016-2020 Fabian Schuiki

//! The table of active macro definitions.

use indexmap::IndexMap;

use crate::expand::ExpandContext;
use crate::token::Token;

/// Produces the body tokens of a builtin macro from the current expansion
/// context. Used by `__LINE__` and friends, which are computed at expansion
/// time rather than carrying a static body.
pub type BuiltinFn = fn(&ExpandContext) -> Vec<Token>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    Object,
    Function,
}

/// A macro definition. Object-like macros have an empty parameter list;
/// function-like macros expand only when invoked with parentheses. A
/// variadic macro captures trailing arguments as `__VA_ARGS__`.
#[derive(Clone)]
pub struct Macro {
    pub name: String,
    pub kind: MacroKind,
    pub params: Vec<String>,
    pub variadic: bool,
    pub body: Vec<Token>,
    pub builtin: Option<BuiltinFn>,
}

impl Macro {
    pub fn object(name: impl Into<String>, body: Vec<Token>) -> Macro {
        Macro {
            name: name.into(),
            kind: MacroKind::Object,
            params: Vec::new(),
            variadic: false,
            body,
            builtin: None,
        }
    }

    pub fn function(
        name: impl Into<String>,
        params: Vec<String>,
        variadic: bool,
        body: Vec<Token>,
    ) -> Macro {
        Macro {
            name: name.into(),
            kind: MacroKind::Function,
            params,
            variadic,
            body,
            builtin: None,
        }
    }

    pub fn builtin(name: impl Into<String>, f: BuiltinFn) -> Macro {
        Macro {
            name: name.into(),
            kind: MacroKind::Object,
            params: Vec::new(),
            variadic: false,
            body: Vec::new(),
            builtin: Some(f),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("body", &self.body)
            .field("builtin", &self.builtin.is_some())
            .finish()
    }
}

/// Ordered map from name to macro definition. At most one live definition
/// per name; redefinition replaces. Iteration follows insertion order, which
/// is observable only in debugging output.
#[derive(Debug, Default)]
pub struct MacroTable {
    map: IndexMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> MacroTable {
        MacroTable {
            map: IndexMap::new(),
        }
    }

    /// Insert a definition, replacing any existing entry with the same name.
    pub fn insert(&mut self, makro: Macro) {
        self.map.insert(makro.name.clone(), makro);
    }

    /// Remove a definition. Removing an unknown name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<Macro> {
        self.map.shift_remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&Macro> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.map.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    #[test]
    fn insert_lookup_remove() {
        let mut table = MacroTable::new();
        table.insert(Macro::object("X", vec![Token::number("1")]));
        assert!(table.contains("X"));
        assert_eq!(table.lookup("X").unwrap().body[0].text, "1");
        table.remove("X");
        assert!(table.lookup("X").is_none());
        // Removing again is a no-op.
        assert!(table.remove("X").is_none());
    }

    #[test]
    fn redefinition_replaces() {
        let mut table = MacroTable::new();
        table.insert(Macro::object("X", vec![Token::number("1")]));
        table.insert(Macro::object("X", vec![Token::number("2")]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("X").unwrap().body[0].text, "2");
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut table = MacroTable::new();
        table.insert(Macro::object("foo", vec![]));
        assert!(table.lookup("FOO").is_none());
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut table = MacroTable::new();
        for name in ["C", "A", "B"] {
            table.insert(Macro::object(name, vec![]));
        }
        let names: Vec<_> = table.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[test]
    fn clear_empties_the_table() {
        let mut table = MacroTable::new();
        table.insert(Macro::object("X", vec![]));
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }
}
