//! Arena of every submitted snippet and the declaration keys they are filed
//! under. Snippets are never removed; their status records what happened.

use kulla_compiler::{Declared, DepName, Diag, Kind, ParsedUnit, SubKind};
use kulla_engine::Target;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Id shown to users: `3`, `s1` for startup snippets, `e2` for rejected ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnippetId(String);

impl SnippetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declaration identity. Same-signature redefinitions keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(usize);

impl KeyId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Nonexistent,
    Valid,
    /// Declared and usable, but some bodies cannot run yet.
    RecoverableDefined,
    /// Waiting for a name its declaration needs.
    RecoverableNotDefined,
    Dropped,
    Overwritten,
    Rejected,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Status::Valid | Status::RecoverableDefined | Status::RecoverableNotDefined
        )
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Status::Valid | Status::RecoverableDefined)
    }
}

/// Where new ids are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdSpace {
    #[default]
    Main,
    Startup,
}

/// A declaration's lookup name within its kind: `x`, `f(int)`, `A`,
/// `java.util.*`, `static java.lang.Math.max`.
pub(crate) type LookupName = (Kind, String);

#[derive(Debug, Clone)]
pub struct Snippet {
    pub(crate) id: SnippetId,
    pub(crate) key: KeyId,
    pub(crate) seq: usize,
    pub(crate) space: IdSpace,
    pub(crate) sub_kind: SubKind,
    pub(crate) source: String,
    pub(crate) status: Status,
    pub(crate) lookup: Option<String>,
    pub(crate) signature: String,
    pub(crate) declared: Declared,
    pub(crate) type_name: Option<String>,
    pub(crate) diagnostics: Vec<Diag>,
    pub(crate) unresolved: Vec<String>,
    pub(crate) decl_refs: BTreeSet<DepName>,
    pub(crate) body_refs: BTreeSet<DepName>,
    pub(crate) unit: Option<ParsedUnit>,
    /// Definition currently loaded in the executor for this snippet.
    pub(crate) runtime: Option<Target>,
}

impl Snippet {
    pub fn id(&self) -> &SnippetId {
        &self.id
    }

    pub fn key(&self) -> KeyId {
        self.key
    }

    pub fn kind(&self) -> Kind {
        self.sub_kind.kind()
    }

    pub fn sub_kind(&self) -> SubKind {
        self.sub_kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_startup(&self) -> bool {
        self.space == IdSpace::Startup
    }

    /// Declared name: variable, method or type name, or the full import.
    /// Expressions reading or assigning a variable report that variable.
    pub fn name(&self) -> Option<String> {
        match &self.declared {
            Declared::Var { name, .. } => Some(name.clone()),
            Declared::Method(info) => Some(info.name.clone()),
            Declared::Type(info) => Some(info.simple_name().to_string()),
            Declared::Import(info) => Some(info.full_name()),
            Declared::None => self
                .unit
                .as_ref()
                .and_then(|u| u.unit.name())
                .or_else(|| self.lookup.clone()),
        }
    }

    pub fn declared(&self) -> &Declared {
        &self.declared
    }

    /// Lookup name of a declaration, or the variable an expression reads or
    /// assigns.
    pub fn lookup(&self) -> Option<&str> {
        self.lookup.as_deref()
    }

    /// Canonical signature of the declaration.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Type of a variable or expression, as shown to users.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub(crate) fn lookup_name(&self) -> Option<LookupName> {
        if !self.kind().is_persistent() {
            return None;
        }
        self.lookup.clone().map(|lookup| (self.kind(), lookup))
    }

    pub(crate) fn is_live_declaration(&self) -> bool {
        self.status.is_active() && self.kind().is_persistent()
    }

    /// Names other snippets see when this one changes.
    pub(crate) fn provides(&self) -> Vec<DepName> {
        match &self.declared {
            Declared::Var { name, .. } => vec![DepName::Var(name.clone())],
            Declared::Method(info) => vec![DepName::Method(info.name.clone())],
            Declared::Type(info) => vec![DepName::Type(info.simple_name().to_string())],
            Declared::Import(info) if info.on_demand => Vec::new(),
            Declared::Import(info) => {
                let member = kulla_compiler::types::simple_name(&info.target).to_string();
                if info.is_static {
                    vec![
                        DepName::Var(member.clone()),
                        DepName::Method(member.clone()),
                        DepName::Type(member),
                    ]
                } else {
                    vec![DepName::Type(member)]
                }
            }
            Declared::None => Vec::new(),
        }
    }

    pub(crate) fn is_on_demand_import(&self) -> bool {
        matches!(&self.declared, Declared::Import(info) if info.on_demand)
    }

    pub(crate) fn refs(&self) -> impl Iterator<Item = &DepName> {
        self.decl_refs.iter().chain(self.body_refs.iter())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    snippets: Vec<Snippet>,
    by_id: HashMap<SnippetId, usize>,
    keys: usize,
    /// Active snippet filed under each lookup name.
    current: HashMap<LookupName, usize>,
    /// Most recent snippet of each lookup name, whatever became of it.
    latest: HashMap<LookupName, usize>,
    main_ids: usize,
    startup_ids: usize,
    rejected_ids: usize,
}

impl Registry {
    /// Id the next accepted snippet of `space` will get.
    pub(crate) fn peek_id(&self, space: IdSpace) -> SnippetId {
        match space {
            IdSpace::Main => SnippetId(format!("{}", self.main_ids + 1)),
            IdSpace::Startup => SnippetId(format!("s{}", self.startup_ids + 1)),
        }
    }

    pub(crate) fn allocate_id(&mut self, space: IdSpace, rejected: bool) -> SnippetId {
        if rejected {
            self.rejected_ids += 1;
            return SnippetId(format!("e{}", self.rejected_ids));
        }
        let id = self.peek_id(space);
        match space {
            IdSpace::Main => self.main_ids += 1,
            IdSpace::Startup => self.startup_ids += 1,
        }
        id
    }

    pub(crate) fn new_key(&mut self) -> KeyId {
        self.keys += 1;
        KeyId(self.keys)
    }

    pub(crate) fn insert(&mut self, mut snippet: Snippet) -> usize {
        let idx = self.snippets.len();
        snippet.seq = idx;
        self.by_id.insert(snippet.id.clone(), idx);
        if let Some(name) = snippet.lookup_name() {
            self.latest.insert(name, idx);
        }
        self.snippets.push(snippet);
        idx
    }

    pub(crate) fn get(&self, idx: usize) -> &Snippet {
        &self.snippets[idx]
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut Snippet {
        &mut self.snippets[idx]
    }

    pub(crate) fn index_of(&self, id: &SnippetId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Snippet> {
        self.snippets.iter()
    }

    /// Active persistent snippets in creation order.
    pub(crate) fn live(&self) -> impl Iterator<Item = usize> + '_ {
        self.snippets
            .iter()
            .filter(|s| s.is_live_declaration())
            .map(|s| s.seq)
    }

    pub(crate) fn current(&self, name: &LookupName) -> Option<usize> {
        self.current.get(name).copied()
    }

    pub(crate) fn latest(&self, name: &LookupName) -> Option<usize> {
        self.latest.get(name).copied()
    }

    pub(crate) fn set_current(&mut self, name: LookupName, idx: usize) {
        self.current.insert(name, idx);
    }

    pub(crate) fn clear_current(&mut self, name: &LookupName, idx: usize) {
        if self.current.get(name) == Some(&idx) {
            self.current.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IdSpace, Registry, Status};

    #[test]
    fn id_spaces_count_independently() {
        let mut registry = Registry::default();
        assert_eq!(registry.peek_id(IdSpace::Main).as_str(), "1");
        assert_eq!(registry.allocate_id(IdSpace::Startup, false).as_str(), "s1");
        assert_eq!(registry.allocate_id(IdSpace::Main, true).as_str(), "e1");
        assert_eq!(registry.allocate_id(IdSpace::Main, false).as_str(), "1");
        assert_eq!(registry.allocate_id(IdSpace::Main, false).as_str(), "2");
        assert_eq!(registry.allocate_id(IdSpace::Startup, false).as_str(), "s2");
    }

    #[test]
    fn keys_are_fresh() {
        let mut registry = Registry::default();
        let first = registry.new_key();
        let second = registry.new_key();
        assert_ne!(first, second);
    }

    #[test]
    fn status_predicates() {
        assert!(Status::RecoverableNotDefined.is_active());
        assert!(!Status::RecoverableNotDefined.is_defined());
        assert!(Status::RecoverableDefined.is_defined());
        assert!(!Status::Overwritten.is_active());
        assert!(!Status::Rejected.is_active());
    }
}
