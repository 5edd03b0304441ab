use kulla_compiler::DepName;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Reverse index from a top-level name to the snippets that use it.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    dependents: HashMap<DepName, BTreeSet<usize>>,
}

impl DependencyGraph {
    pub(crate) fn link<'a>(&mut self, snippet: usize, refs: impl IntoIterator<Item = &'a DepName>) {
        for name in refs {
            self.dependents
                .entry(name.clone())
                .or_default()
                .insert(snippet);
        }
    }

    pub(crate) fn unlink<'a>(&mut self, snippet: usize, refs: impl IntoIterator<Item = &'a DepName>) {
        for name in refs {
            if let Some(set) = self.dependents.get_mut(name) {
                set.remove(&snippet);
                if set.is_empty() {
                    self.dependents.remove(name);
                }
            }
        }
    }

    pub(crate) fn dependents(&self, name: &DepName) -> impl Iterator<Item = usize> + '_ {
        self.dependents
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Snippets reached from `seeds` through the dependents relation.
    /// `provides` names what a reached snippet declares, which in turn
    /// reaches its own dependents; `include` filters what is collected.
    pub(crate) fn affected(
        &self,
        seeds: impl IntoIterator<Item = DepName>,
        mut provides: impl FnMut(usize) -> Vec<DepName>,
        mut include: impl FnMut(usize) -> bool,
    ) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut seen: HashSet<DepName> = HashSet::new();
        let mut work: Vec<DepName> = seeds.into_iter().collect();
        while let Some(name) = work.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for snippet in self.dependents(&name) {
                if include(snippet) && found.insert(snippet) {
                    work.extend(provides(snippet));
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::DependencyGraph;
    use kulla_compiler::DepName;
    use std::collections::BTreeSet;

    fn ty(name: &str) -> DepName {
        DepName::Type(name.to_string())
    }

    #[test]
    fn affected_follows_chains() {
        // 1: class B extends A, 2: class C extends B, 3: int x
        let mut graph = DependencyGraph::default();
        graph.link(1, &[ty("A")]);
        graph.link(2, &[ty("B")]);
        graph.link(3, &[DepName::Var("y".to_string())]);
        let provides = |idx: usize| match idx {
            1 => vec![ty("B")],
            2 => vec![ty("C")],
            _ => Vec::new(),
        };
        let found = graph.affected([ty("A")], provides, |_| true);
        assert_eq!(found, BTreeSet::from([1, 2]));
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = DependencyGraph::default();
        graph.link(1, &[ty("B")]);
        graph.link(2, &[ty("A")]);
        let provides = |idx: usize| if idx == 1 { vec![ty("A")] } else { vec![ty("B")] };
        let found = graph.affected([ty("A")], provides, |_| true);
        assert_eq!(found, BTreeSet::from([1, 2]));
    }

    #[test]
    fn unlink_forgets_dependents() {
        let mut graph = DependencyGraph::default();
        let x = DepName::Var("x".to_string());
        graph.link(4, [&x]);
        graph.unlink(4, [&x]);
        assert_eq!(graph.dependents(&x).count(), 0);
        let found = graph.affected([x], |_| Vec::new(), |idx| idx != 4);
        assert!(found.is_empty());
    }
}
