//! Lexical scope tracking for the rewriter.
//!
//! Persisted slots need stable, unique names across bars, so declarations in
//! nested blocks get a scope-qualified name (`x__if1`, `acc__for2`). Scope
//! IDs are assigned in source order by a single counter, which makes slot
//! names deterministic for a given script text. Loop counters and function
//! parameters are transient locals, not slots.

use std::collections::HashMap;

use crate::domain::script::compiled::Slot;
use crate::domain::value::SlotKind;

/// Built-in market data series available to every script.
pub const BUILTIN_SERIES: &[&str] = &[
    "open",
    "high",
    "low",
    "close",
    "volume",
    "hl2",
    "hlc3",
    "ohlc4",
    "time",
    "close_time",
];

pub fn builtin_slot(name: &str) -> Option<Slot> {
    if BUILTIN_SERIES.contains(&name) {
        Some(Slot::new(SlotKind::Data, name))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTag {
    Root,
    If,
    Else,
    For,
    While,
    Fn,
}

impl ScopeTag {
    fn label(self) -> &'static str {
        match self {
            ScopeTag::Root => "",
            ScopeTag::If => "if",
            ScopeTag::Else => "els",
            ScopeTag::For => "for",
            ScopeTag::While => "whl",
            ScopeTag::Fn => "fn",
        }
    }
}

/// What a name resolves to at a given point in the script.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Slot(Slot),
    Local(String),
}

#[derive(Debug)]
struct Scope {
    tag: ScopeTag,
    id: u32,
    bindings: HashMap<String, Resolved>,
}

#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    next_id: u32,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope {
                tag: ScopeTag::Root,
                id: 0,
                bindings: HashMap::new(),
            }],
            next_id: 1,
        }
    }

    pub fn push(&mut self, tag: ScopeTag) {
        let id = self.next_id;
        self.next_id += 1;
        self.scopes.push(Scope {
            tag,
            id,
            bindings: HashMap::new(),
        });
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1);
        self.scopes.pop();
    }

    fn qualified(&self, name: &str) -> String {
        let scope = self.scopes.last().unwrap();
        if scope.tag == ScopeTag::Root {
            name.to_string()
        } else {
            format!("{}__{}{}", name, scope.tag.label(), scope.id)
        }
    }

    /// Declare a persisted slot in the innermost scope. Shadows any outer
    /// binding of the same surface name.
    pub fn declare(&mut self, name: &str, kind: SlotKind) -> Slot {
        let slot = Slot::new(kind, self.qualified(name));
        self.scopes
            .last_mut()
            .unwrap()
            .bindings
            .insert(name.to_string(), Resolved::Slot(slot.clone()));
        slot
    }

    /// Declare a transient local (loop counter, function parameter).
    pub fn declare_local(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .unwrap()
            .bindings
            .insert(name.to_string(), Resolved::Local(name.to_string()));
    }

    /// Resolve a name, innermost scope first, then built-ins. An unknown
    /// name is implicitly declared as a root-scope `let` slot.
    pub fn resolve(&mut self, name: &str) -> Resolved {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.bindings.get(name) {
                return binding.clone();
            }
        }
        if let Some(slot) = builtin_slot(name) {
            return Resolved::Slot(slot);
        }
        let slot = Slot::new(SlotKind::Let, name);
        self.scopes[0]
            .bindings
            .insert(name.to_string(), Resolved::Slot(slot.clone()));
        Resolved::Slot(slot)
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_declarations_keep_plain_names() {
        let mut scopes = ScopeStack::new();
        let slot = scopes.declare("val", SlotKind::Let);
        assert_eq!(slot.name, "val");
        assert_eq!(slot.kind, SlotKind::Let);
    }

    #[test]
    fn nested_declarations_are_qualified() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", SlotKind::Var);
        scopes.push(ScopeTag::If);
        let inner = scopes.declare("x", SlotKind::Let);
        assert_eq!(inner.name, "x__if1");
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", SlotKind::Var);
        scopes.push(ScopeTag::If);
        scopes.declare("x", SlotKind::Let);
        match scopes.resolve("x") {
            Resolved::Slot(slot) => assert_eq!(slot.name, "x__if1"),
            other => panic!("unexpected resolution: {:?}", other),
        }
        scopes.pop();
        match scopes.resolve("x") {
            Resolved::Slot(slot) => assert_eq!(slot.name, "x"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn scope_ids_follow_source_order() {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeTag::If);
        let a = scopes.declare("a", SlotKind::Let);
        scopes.pop();
        scopes.push(ScopeTag::For);
        let b = scopes.declare("b", SlotKind::Let);
        scopes.pop();
        assert_eq!(a.name, "a__if1");
        assert_eq!(b.name, "b__for2");
    }

    #[test]
    fn builtins_resolve_to_data_slots() {
        let mut scopes = ScopeStack::new();
        match scopes.resolve("close") {
            Resolved::Slot(slot) => assert_eq!(slot.kind, SlotKind::Data),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn unknown_names_become_root_lets() {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeTag::While);
        match scopes.resolve("mystery") {
            Resolved::Slot(slot) => {
                assert_eq!(slot.kind, SlotKind::Let);
                assert_eq!(slot.name, "mystery");
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
        scopes.pop();
        // Implicit declaration landed in the root scope.
        assert_eq!(scopes.resolve("mystery"), Resolved::Slot(Slot::new(SlotKind::Let, "mystery")));
    }

    #[test]
    fn locals_shadow_slots() {
        let mut scopes = ScopeStack::new();
        scopes.declare("i", SlotKind::Var);
        scopes.push(ScopeTag::For);
        scopes.declare_local("i");
        assert_eq!(scopes.resolve("i"), Resolved::Local("i".to_string()));
        scopes.pop();
    }
}
