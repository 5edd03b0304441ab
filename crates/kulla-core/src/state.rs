use crate::analysis::SourceCodeAnalysis;
use crate::event::{EventBatch, SnippetEvent};
use crate::graph::DependencyGraph;
use crate::index::{ClassIndex, IndexSnapshot};
use crate::registry::{IdSpace, KeyId, LookupName, Registry, Snippet, SnippetId, Status};
use kulla_compiler::ir::Code;
use kulla_compiler::{
    CheckMode, Completeness, Declared, DepName, Diag, ImportInfo, Kind, MethodInfo, ParsedUnit,
    Scope, Span, SubKind, Type, UnitAnalysis, Unresolved, UserType, analyze_completion, check_unit,
    parse_snippet,
};
use kulla_engine::{
    ExecError, ExecutionControl, OutputSink, RunOutcome, StopHandle, Target, ThreadedExecutor,
    stderr_sink, stdout_sink,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, debug_span, trace};

/// How long resolution waits for a pending class-path rescan.
const CLASS_PATH_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum KullaError {
    #[error("the state engine has terminated")]
    Closed,
    #[error("no snippet with id {0}")]
    UnknownSnippet(SnippetId),
    #[error("snippet {0} is not an active declaration")]
    NotDroppable(SnippetId),
    #[error(transparent)]
    Executor(#[from] ExecError),
    #[error("failed to start the class index: {0}")]
    Index(#[source] io::Error),
}

/// What the checker sees of the session: the defined declarations plus the
/// class-path index.
pub(crate) struct SessionScope {
    vars: HashMap<String, Type>,
    methods: HashMap<String, Vec<MethodInfo>>,
    types: HashMap<String, UserType>,
    imports: Vec<ImportInfo>,
    index: Arc<IndexSnapshot>,
}

impl SessionScope {
    fn new(index: Arc<IndexSnapshot>) -> Self {
        Self {
            vars: HashMap::new(),
            methods: HashMap::new(),
            types: HashMap::new(),
            imports: Vec::new(),
            index,
        }
    }

    fn add(&mut self, declared: &Declared, key: KeyId) {
        match declared {
            Declared::Var { name, ty } => {
                self.vars.insert(name.clone(), ty.clone());
            }
            Declared::Method(info) => self
                .methods
                .entry(info.name.clone())
                .or_default()
                .push(info.clone()),
            Declared::Type(info) => {
                self.types.insert(
                    info.simple_name().to_string(),
                    UserType {
                        info: info.clone(),
                        identity: key.to_string(),
                    },
                );
            }
            Declared::Import(info) => self.imports.push(info.clone()),
            Declared::None => {}
        }
    }

    pub(crate) fn vars(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.vars.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    pub(crate) fn all_methods(&self) -> impl Iterator<Item = &MethodInfo> {
        self.methods.values().flatten()
    }

    pub(crate) fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub(crate) fn index(&self) -> &IndexSnapshot {
        &self.index
    }
}

impl Scope for SessionScope {
    fn var(&self, name: &str) -> Option<Type> {
        self.vars.get(name).cloned()
    }

    fn methods(&self, name: &str) -> Vec<MethodInfo> {
        self.methods.get(name).cloned().unwrap_or_default()
    }

    fn user_type(&self, name: &str) -> Option<UserType> {
        self.types.get(name).cloned()
    }

    fn imports(&self) -> Vec<ImportInfo> {
        self.imports.clone()
    }

    fn has_external_type(&self, name: &str) -> bool {
        self.index.has_external_type(name)
    }

    fn has_external_package(&self, name: &str) -> bool {
        self.index.has_package(name)
    }
}

/// Outcome of re-resolving one snippet during a cascade.
struct Resolved {
    status: Status,
    analysis: UnitAnalysis,
}

/// Executor work queued while statuses settle.
enum Effect {
    Install(usize, Code),
    Corral(usize, Target),
    Reset(usize, String, Type),
    Remove(Target),
}

/// Builds a [`Kulla`] session.
#[derive(Default)]
pub struct KullaBuilder {
    out: Option<OutputSink>,
    err: Option<OutputSink>,
    class_path: Vec<PathBuf>,
    executor: Option<Box<dyn ExecutionControl>>,
}

impl KullaBuilder {
    /// Destination of `System.out`; stdout by default.
    pub fn out(mut self, sink: OutputSink) -> Self {
        self.out = Some(sink);
        self
    }

    /// Destination of `System.err`; stderr by default.
    pub fn err(mut self, sink: OutputSink) -> Self {
        self.err = Some(sink);
        self
    }

    pub fn class_path(mut self, entries: impl IntoIterator<Item = PathBuf>) -> Self {
        self.class_path.extend(entries);
        self
    }

    /// Runs user code on `executor` instead of a fresh executor thread.
    pub fn executor(mut self, executor: Box<dyn ExecutionControl>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Kulla, KullaError> {
        let exec = match self.executor {
            Some(exec) => exec,
            None => Box::new(ThreadedExecutor::spawn(
                self.out.unwrap_or_else(stdout_sink),
                self.err.unwrap_or_else(stderr_sink),
            )?),
        };
        let index = ClassIndex::spawn(self.class_path.clone()).map_err(KullaError::Index)?;
        Ok(Kulla {
            registry: Registry::default(),
            graph: DependencyGraph::default(),
            exec,
            index,
            class_path: self.class_path,
        })
    }
}

/// A snippet evaluation session.
///
/// Each call to [`Kulla::eval`] or [`Kulla::drop`] returns the status changes
/// it caused: the submitted or dropped snippet first, then the snippet it
/// overwrote, then every dependent whose status or signature changed, in
/// creation order.
pub struct Kulla {
    registry: Registry,
    graph: DependencyGraph,
    exec: Box<dyn ExecutionControl>,
    index: ClassIndex,
    class_path: Vec<PathBuf>,
}

impl Kulla {
    pub fn builder() -> KullaBuilder {
        KullaBuilder::default()
    }

    pub fn new() -> Result<Self, KullaError> {
        Self::builder().build()
    }

    /// Evaluates every snippet in `source` in order.
    pub fn eval(&mut self, source: &str) -> Result<Vec<SnippetEvent>, KullaError> {
        self.eval_in(source, IdSpace::Main)
    }

    /// Like [`Kulla::eval`], with ids from the startup space (`s1`, `s2`).
    pub fn eval_startup(&mut self, source: &str) -> Result<Vec<SnippetEvent>, KullaError> {
        self.eval_in(source, IdSpace::Startup)
    }

    fn eval_in(&mut self, source: &str, space: IdSpace) -> Result<Vec<SnippetEvent>, KullaError> {
        self.ensure_open()?;
        let mut events = Vec::new();
        for text in split_snippets(source) {
            match parse_snippet(&text) {
                Ok(units) => {
                    for unit in units {
                        events.extend(self.eval_unit(unit, space)?);
                        if self.is_closed() {
                            return Ok(events);
                        }
                    }
                }
                Err(diags) => events.push(self.reject_unparsed(text, diags)),
            }
        }
        Ok(events)
    }

    /// Drops an active declaration; its dependents are re-resolved without it.
    pub fn drop(&mut self, id: &SnippetId) -> Result<Vec<SnippetEvent>, KullaError> {
        self.ensure_open()?;
        let idx = self
            .registry
            .index_of(id)
            .ok_or_else(|| KullaError::UnknownSnippet(id.clone()))?;
        if !self.registry.get(idx).is_live_declaration() {
            return Err(KullaError::NotDroppable(id.clone()));
        }
        let _span = debug_span!("drop", id = %id).entered();
        let previous = self.registry.get(idx).status;
        let seeds = self.registry.get(idx).provides();
        let wide = self.registry.get(idx).is_on_demand_import();
        self.retire(idx, Status::Dropped);
        let mut effects = Vec::new();
        if let Some(target) = self.registry.get_mut(idx).runtime.take() {
            effects.push(Effect::Remove(target));
        }
        let hidden = BTreeSet::from([idx]);
        // Without the import any remaining snippet may lose a type name.
        let extra: Vec<usize> = if wide { self.registry.live().collect() } else { Vec::new() };
        let candidates = self.affected(seeds, extra, &hidden);
        let index = self.resolution_index();
        let defined = self.settle(&candidates, &hidden, None, &index);
        let resolved = self.final_pass(&candidates, &defined, &hidden, None, &index);

        let mut batch = EventBatch::default();
        let mut root = SnippetEvent::new(id.clone(), previous, Status::Dropped);
        root.is_signature_change = true;
        batch.root(root);
        let cascade = self.apply_cascade(resolved, &mut effects);
        self.run_effects(effects)?;
        for (seq, event) in self.fill_values(cascade)? {
            batch.cascaded(seq, event);
        }
        let events = batch.finish();
        debug!(events = events.len(), "dropped");
        Ok(events)
    }

    fn eval_unit(&mut self, unit: ParsedUnit, space: IdSpace) -> Result<Vec<SnippetEvent>, KullaError> {
        let provisional = self.registry.peek_id(space);
        let index = self.resolution_index();
        let no_one = BTreeSet::new();
        let scope = self.scope_over(&no_one, &BTreeMap::new(), &index);
        let mut analysis = check_unit(&unit, &scope, CheckMode::Fresh, provisional.as_str());
        // A method is checked without the declaration it replaces.
        if analysis.sub_kind == SubKind::Method {
            let replaced = analysis
                .lookup
                .clone()
                .and_then(|lookup| self.registry.current(&(Kind::Method, lookup)));
            if let Some(old) = replaced {
                let scope = self.scope_over(&BTreeSet::from([old]), &BTreeMap::new(), &index);
                analysis = check_unit(&unit, &scope, CheckMode::Fresh, provisional.as_str());
            }
        }
        if is_rejected(&analysis) {
            return Ok(vec![self.reject(unit, analysis, space)]);
        }
        if analysis.sub_kind == SubKind::TempVarExpression {
            analysis = into_temp_var(analysis, format!("${provisional}"), &scope);
        }
        if analysis.sub_kind.kind().is_persistent() {
            self.declare(unit, analysis, space, &index)
        } else {
            self.execute(unit, analysis, space)
        }
    }

    fn reject_unparsed(&mut self, source: String, diags: Vec<Diag>) -> SnippetEvent {
        let id = self.registry.allocate_id(IdSpace::Main, true);
        let key = self.registry.new_key();
        debug!(id = %id, "snippet does not parse");
        self.registry.insert(Snippet {
            id: id.clone(),
            key,
            seq: 0,
            space: IdSpace::Main,
            sub_kind: SubKind::Unknown,
            source,
            status: Status::Rejected,
            lookup: None,
            signature: String::new(),
            declared: Declared::None,
            type_name: None,
            diagnostics: diags,
            unresolved: Vec::new(),
            decl_refs: BTreeSet::new(),
            body_refs: BTreeSet::new(),
            unit: None,
            runtime: None,
        });
        SnippetEvent::new(id, Status::Nonexistent, Status::Rejected)
    }

    fn reject(&mut self, unit: ParsedUnit, analysis: UnitAnalysis, space: IdSpace) -> SnippetEvent {
        let id = self.registry.allocate_id(space, true);
        let key = self.registry.new_key();
        let mut diagnostics = analysis.error_diags();
        diagnostics.extend(analysis.warnings.iter().cloned());
        debug!(id = %id, errors = diagnostics.len(), "snippet rejected");
        self.registry.insert(Snippet {
            id: id.clone(),
            key,
            seq: 0,
            space,
            sub_kind: analysis.sub_kind,
            source: unit.source.clone(),
            status: Status::Rejected,
            lookup: analysis.lookup.clone(),
            signature: analysis.signature.clone(),
            declared: analysis.declared.clone(),
            type_name: analysis.type_name.clone(),
            diagnostics,
            unresolved: unresolved_displays(&analysis),
            decl_refs: BTreeSet::new(),
            body_refs: BTreeSet::new(),
            unit: Some(unit),
            runtime: None,
        });
        SnippetEvent::new(id, Status::Nonexistent, Status::Rejected)
    }

    /// Runs an expression or statement.
    fn execute(
        &mut self,
        unit: ParsedUnit,
        analysis: UnitAnalysis,
        space: IdSpace,
    ) -> Result<Vec<SnippetEvent>, KullaError> {
        let id = self.registry.allocate_id(space, false);
        let key = self.registry.new_key();
        let _span = debug_span!("execute", id = %id, sub_kind = ?analysis.sub_kind).entered();
        self.registry.insert(Snippet {
            id: id.clone(),
            key,
            seq: 0,
            space,
            sub_kind: analysis.sub_kind,
            source: unit.source.clone(),
            status: Status::Valid,
            lookup: analysis.target_var.clone(),
            signature: analysis.signature.clone(),
            declared: Declared::None,
            type_name: analysis.type_name.clone(),
            diagnostics: analysis.warnings.clone(),
            unresolved: Vec::new(),
            decl_refs: BTreeSet::new(),
            body_refs: BTreeSet::new(),
            unit: Some(unit),
            runtime: None,
        });
        let outcome = self.exec.run(analysis.code, None)?;
        let mut event = SnippetEvent::new(id, Status::Nonexistent, Status::Valid);
        event.is_signature_change = true;
        event.value = outcome.value;
        event.exception = outcome.exception;
        Ok(vec![event])
    }

    /// Files a declaration under its lookup name and re-resolves everything
    /// that depends on that name.
    fn declare(
        &mut self,
        unit: ParsedUnit,
        analysis: UnitAnalysis,
        space: IdSpace,
        index: &Arc<IndexSnapshot>,
    ) -> Result<Vec<SnippetEvent>, KullaError> {
        let kind = analysis.sub_kind.kind();
        let name: LookupName = (kind, analysis.lookup.clone().unwrap_or_default());
        let old = self.registry.current(&name);
        let latest = self.registry.latest(&name);
        let previous_status = match (old, latest) {
            (Some(old), _) => self.registry.get(old).status,
            (None, Some(latest)) if self.registry.get(latest).status == Status::Rejected => {
                Status::Rejected
            }
            _ => Status::Nonexistent,
        };
        // The identity a same-signature declaration takes over.
        let inherit = old
            .or(latest.filter(|&l| self.registry.get(l).status == Status::Dropped))
            .map(|idx| {
                let snippet = self.registry.get(idx);
                (snippet.key, snippet.signature.clone())
            });

        let id = self.registry.allocate_id(space, false);
        let key = self.registry.new_key();
        let _span = debug_span!("declare", id = %id, lookup = %name.1).entered();
        let fresh_code = analysis.code.clone();
        let root = self.registry.insert(Snippet {
            id: id.clone(),
            key,
            seq: 0,
            space,
            sub_kind: analysis.sub_kind,
            source: unit.source.clone(),
            status: Status::Nonexistent,
            lookup: Some(name.1.clone()),
            signature: analysis.signature.clone(),
            declared: analysis.declared.clone(),
            type_name: analysis.type_name.clone(),
            diagnostics: Vec::new(),
            unresolved: Vec::new(),
            decl_refs: analysis.decl_refs.clone(),
            body_refs: analysis.body_refs.clone(),
            unit: Some(unit),
            runtime: None,
        });

        let mut batch = EventBatch::default();
        let mut hidden = BTreeSet::new();
        let mut seeds = self.registry.get(root).provides();
        let mut old_runtime = None;
        if let Some(old) = old {
            let was = self.registry.get(old).status;
            seeds.extend(self.registry.get(old).provides());
            self.retire(old, Status::Overwritten);
            old_runtime = self.registry.get_mut(old).runtime.take();
            hidden.insert(old);
            batch.overwritten(SnippetEvent::new(
                self.registry.get(old).id.clone(),
                was,
                Status::Overwritten,
            ));
        }
        self.registry.set_current(name, root);

        // A new on-demand import may satisfy any unresolved type name.
        let extra: Vec<usize> = if self.registry.get(root).is_on_demand_import() {
            self.registry
                .live()
                .filter(|&idx| !self.registry.get(idx).unresolved.is_empty())
                .collect()
        } else {
            Vec::new()
        };
        let mut exclude = hidden.clone();
        exclude.insert(root);
        let mut candidates = self.affected(seeds, extra, &exclude);
        candidates.insert(root);
        let defined = self.settle(&candidates, &hidden, Some(root), index);
        let signature_change =
            self.settle_identity(root, &defined, &candidates, &hidden, inherit, old.is_some(), index);
        let mut resolved = self.final_pass(&candidates, &defined, &hidden, Some(root), index);

        let Some(root_resolved) = resolved.remove(&root) else {
            return Ok(batch.finish());
        };
        let status = root_resolved.status;
        let mut effects = Vec::new();
        let final_code = root_resolved.analysis.code.clone();
        self.update_snippet(root, root_resolved);
        let refs: Vec<DepName> = self.registry.get(root).refs().cloned().collect();
        self.graph.link(root, refs.iter());
        self.registry.get_mut(root).status = status;

        // Declarations load before anything runs.
        let root_target = match kind {
            Kind::Method | Kind::TypeDecl if status.is_defined() => {
                let target = target_of(&final_code);
                if let (Some(old_target), Some(new_target)) = (&old_runtime, &target) {
                    if old_target != new_target {
                        effects.push(Effect::Remove(old_target.clone()));
                    }
                }
                effects.push(Effect::Install(root, final_code));
                target
            }
            Kind::Method | Kind::TypeDecl | Kind::Var if !status.is_defined() => {
                if let Some(old_target) = old_runtime.clone() {
                    effects.push(Effect::Corral(root, old_target.clone()));
                }
                old_runtime.clone()
            }
            _ => None,
        };
        self.registry.get_mut(root).runtime = root_target;

        let cascade = self.apply_cascade(resolved, &mut effects);
        self.run_effects(effects)?;

        let mut event = SnippetEvent::new(id.clone(), previous_status, status);
        event.is_signature_change = signature_change;
        if kind == Kind::Var && status.is_defined() {
            let outcome = self.run_var(root, fresh_code)?;
            event.value = outcome.value;
            event.exception = outcome.exception;
        }
        batch.root(event);
        for (seq, event) in self.fill_values(cascade)? {
            batch.cascaded(seq, event);
        }
        let events = batch.finish();
        debug!(status = ?status, events = events.len(), "declared");
        Ok(events)
    }

    fn run_var(&mut self, idx: usize, code: Code) -> Result<RunOutcome, KullaError> {
        let snippet = self.registry.get(idx);
        let Declared::Var { name, .. } = &snippet.declared else {
            return Ok(RunOutcome::default());
        };
        let name = name.clone();
        let bind = (snippet.sub_kind == SubKind::TempVarExpression).then(|| name.clone());
        let outcome = self.exec.run(code, bind)?;
        self.registry.get_mut(idx).runtime = Some(Target::Var(name));
        Ok(outcome)
    }

    /// Ends the life of an active snippet.
    fn retire(&mut self, idx: usize, status: Status) {
        let snippet = self.registry.get(idx);
        let refs: Vec<DepName> = snippet.refs().cloned().collect();
        let name = snippet.lookup_name();
        self.graph.unlink(idx, refs.iter());
        if let Some(name) = name {
            self.registry.clear_current(&name, idx);
        }
        trace!(id = %self.registry.get(idx).id, ?status, "retired");
        self.registry.get_mut(idx).status = status;
    }

    /// Live declarations reached from `seeds`, plus `extra`.
    fn affected(
        &self,
        mut seeds: Vec<DepName>,
        extra: Vec<usize>,
        exclude: &BTreeSet<usize>,
    ) -> BTreeSet<usize> {
        let registry = &self.registry;
        let include = |idx: usize| !exclude.contains(&idx) && registry.get(idx).is_live_declaration();
        let extra: Vec<usize> = extra.into_iter().filter(|&idx| include(idx)).collect();
        for &idx in &extra {
            seeds.extend(registry.get(idx).provides());
        }
        let mut found = self
            .graph
            .affected(seeds, |idx| registry.get(idx).provides(), include);
        found.extend(extra);
        found
    }

    /// Greatest fixpoint: every candidate starts out assumed defined, and
    /// those whose declaration does not resolve against the others are
    /// removed until the rest is stable.
    fn settle(
        &self,
        candidates: &BTreeSet<usize>,
        hidden: &BTreeSet<usize>,
        root: Option<usize>,
        index: &Arc<IndexSnapshot>,
    ) -> BTreeSet<usize> {
        let mut excluded = hidden.clone();
        excluded.extend(candidates.iter().copied());
        let mut defined = candidates.clone();
        let mut working: BTreeMap<usize, Declared> = candidates
            .iter()
            .map(|&idx| (idx, self.registry.get(idx).declared.clone()))
            .collect();
        let mut rounds = 0;
        loop {
            rounds += 1;
            let assumed: BTreeMap<usize, Declared> = working
                .iter()
                .filter(|(idx, _)| defined.contains(idx))
                .map(|(idx, declared)| (*idx, declared.clone()))
                .collect();
            let scope = self.scope_over(&excluded, &assumed, index);
            let mut failed = Vec::new();
            for &idx in &defined {
                match self.analyze(idx, &scope, mode_for(idx, root)) {
                    Some(analysis) => {
                        if analysis.has_decl_problems() {
                            failed.push(idx);
                        }
                        working.insert(idx, analysis.declared);
                    }
                    None => failed.push(idx),
                }
            }
            if failed.is_empty() {
                trace!(rounds, defined = defined.len(), "settled");
                return defined;
            }
            for idx in failed {
                defined.remove(&idx);
            }
        }
    }

    /// Decides whether the root keeps the identity of the declaration it
    /// takes over. Returns whether the event counts as a signature change.
    #[allow(clippy::too_many_arguments)]
    fn settle_identity(
        &mut self,
        root: usize,
        defined: &BTreeSet<usize>,
        candidates: &BTreeSet<usize>,
        hidden: &BTreeSet<usize>,
        inherit: Option<(KeyId, String)>,
        replaces_active: bool,
        index: &Arc<IndexSnapshot>,
    ) -> bool {
        let scope = self.defined_scope(defined, candidates, hidden, index);
        let signature = self
            .analyze(root, &scope, CheckMode::Fresh)
            .map(|analysis| analysis.signature)
            .unwrap_or_default();
        match inherit {
            Some((key, previous)) if previous == signature => {
                self.registry.get_mut(root).key = key;
                // Redeclaring a dropped snippet still counts as an addition.
                !replaces_active
            }
            _ => true,
        }
    }

    fn defined_scope(
        &self,
        defined: &BTreeSet<usize>,
        candidates: &BTreeSet<usize>,
        hidden: &BTreeSet<usize>,
        index: &Arc<IndexSnapshot>,
    ) -> SessionScope {
        let mut excluded = hidden.clone();
        excluded.extend(candidates.iter().copied());
        let assumed: BTreeMap<usize, Declared> = defined
            .iter()
            .map(|&idx| (idx, self.registry.get(idx).declared.clone()))
            .collect();
        self.scope_over(&excluded, &assumed, index)
    }

    /// Checks every candidate against the settled scope.
    fn final_pass(
        &self,
        candidates: &BTreeSet<usize>,
        defined: &BTreeSet<usize>,
        hidden: &BTreeSet<usize>,
        root: Option<usize>,
        index: &Arc<IndexSnapshot>,
    ) -> BTreeMap<usize, Resolved> {
        // Declared forms from the settled round feed the final scope.
        let mut excluded = hidden.clone();
        excluded.extend(candidates.iter().copied());
        let mut assumed = BTreeMap::new();
        {
            let rough = self.defined_scope(defined, candidates, hidden, index);
            for &idx in defined {
                if let Some(analysis) = self.analyze(idx, &rough, mode_for(idx, root)) {
                    assumed.insert(idx, analysis.declared);
                }
            }
        }
        let scope = self.scope_over(&excluded, &assumed, index);
        let mut out = BTreeMap::new();
        for &idx in candidates {
            let Some(analysis) = self.analyze(idx, &scope, mode_for(idx, root)) else {
                continue;
            };
            let kind = self.registry.get(idx).kind();
            let status = status_after(kind, defined.contains(&idx), &analysis);
            out.insert(idx, Resolved { status, analysis });
        }
        out
    }

    /// Stores cascade results, queues executor work and returns the events
    /// of snippets whose status or signature changed.
    fn apply_cascade(
        &mut self,
        resolved: BTreeMap<usize, Resolved>,
        effects: &mut Vec<Effect>,
    ) -> Vec<(usize, SnippetEvent)> {
        let mut events = Vec::new();
        for (idx, result) in resolved {
            let snippet = self.registry.get(idx);
            let previous = snippet.status;
            let kind = snippet.kind();
            let signature_change = snippet.signature != result.analysis.signature;
            let status = result.status;
            let runtime = snippet.runtime.clone();
            let code = result.analysis.code.clone();
            let old_refs: Vec<DepName> = snippet.refs().cloned().collect();
            self.graph.unlink(idx, old_refs.iter());
            self.update_snippet(idx, result);
            let new_refs: Vec<DepName> = self.registry.get(idx).refs().cloned().collect();
            self.graph.link(idx, new_refs.iter());
            self.registry.get_mut(idx).status = status;

            match kind {
                Kind::Method | Kind::TypeDecl => {
                    let reload = previous != status
                        || signature_change
                        || previous == Status::RecoverableDefined
                        || status == Status::RecoverableDefined;
                    if status.is_defined() && reload {
                        self.registry.get_mut(idx).runtime = target_of(&code);
                        effects.push(Effect::Install(idx, code));
                    } else if !status.is_defined() && previous.is_defined() {
                        if let Some(target) = runtime {
                            effects.push(Effect::Corral(idx, target));
                        }
                    }
                }
                Kind::Var => {
                    let declared = self.registry.get(idx).declared.clone();
                    if let Declared::Var { name, ty } = declared {
                        if status.is_defined() && (!previous.is_defined() || signature_change) {
                            self.registry.get_mut(idx).runtime = Some(Target::Var(name.clone()));
                            effects.push(Effect::Reset(idx, name, ty));
                        } else if !status.is_defined() && previous.is_defined() {
                            effects.push(Effect::Corral(idx, Target::Var(name)));
                        }
                    }
                }
                _ => {}
            }

            if previous != status || signature_change {
                let mut event = SnippetEvent::new(self.registry.get(idx).id.clone(), previous, status);
                event.is_signature_change = signature_change;
                events.push((idx, event));
            }
        }
        events
    }

    fn run_effects(&mut self, effects: Vec<Effect>) -> Result<(), KullaError> {
        for effect in effects {
            match effect {
                Effect::Install(idx, code) => {
                    trace!(id = %self.registry.get(idx).id, "install");
                    self.exec.install(code)?;
                }
                Effect::Corral(idx, target) => {
                    let id = self.registry.get(idx).id.to_string();
                    trace!(%id, ?target, "corral");
                    self.exec.corral(target, &id)?;
                }
                Effect::Reset(idx, name, ty) => {
                    trace!(id = %self.registry.get(idx).id, %name, "reset variable");
                    self.exec.reset_var(&name, &ty)?;
                }
                Effect::Remove(target) => {
                    trace!(?target, "remove");
                    self.exec.remove(target)?;
                }
            }
        }
        Ok(())
    }

    /// Attaches the current value to events of variables that were reset.
    fn fill_values(
        &mut self,
        events: Vec<(usize, SnippetEvent)>,
    ) -> Result<Vec<(usize, SnippetEvent)>, KullaError> {
        let mut out = Vec::with_capacity(events.len());
        for (idx, mut event) in events {
            let snippet = self.registry.get(idx);
            if snippet.kind() == Kind::Var && event.status.is_defined() {
                if let Declared::Var { name, .. } = &snippet.declared {
                    let name = name.clone();
                    event.value = self.exec.var_value(&name)?;
                }
            }
            out.push((self.registry.get(idx).seq, event));
        }
        Ok(out)
    }

    fn update_snippet(&mut self, idx: usize, resolved: Resolved) {
        let mut analysis = resolved.analysis;
        let snippet = self.registry.get_mut(idx);
        // A variable initializer has run by now; only its declaration counts.
        if snippet.kind() == Kind::Var {
            analysis.body_errors.clear();
            analysis.body_unresolved.clear();
        }
        let unresolved = unresolved_displays(&analysis);
        let mut diagnostics = analysis.warnings;
        diagnostics.extend(analysis.decl_errors);
        diagnostics.extend(analysis.body_errors);
        diagnostics.sort_by_key(|d| d.span.start);
        snippet.diagnostics = diagnostics;
        snippet.unresolved = unresolved;
        snippet.signature = analysis.signature;
        snippet.declared = analysis.declared;
        if analysis.type_name.is_some() {
            snippet.type_name = analysis.type_name;
        }
        snippet.decl_refs = analysis.decl_refs;
        snippet.body_refs = analysis.body_refs;
    }

    fn analyze(&self, idx: usize, scope: &SessionScope, mode: CheckMode) -> Option<UnitAnalysis> {
        let snippet = self.registry.get(idx);
        if snippet.sub_kind == SubKind::TempVarExpression {
            return temp_var_analysis(snippet, scope);
        }
        let unit = snippet.unit.as_ref()?;
        Some(check_unit(unit, scope, mode, snippet.id.as_str()))
    }

    /// Scope of the defined live snippets outside `excluded`, plus the
    /// `assumed` declarations.
    fn scope_over(
        &self,
        excluded: &BTreeSet<usize>,
        assumed: &BTreeMap<usize, Declared>,
        index: &Arc<IndexSnapshot>,
    ) -> SessionScope {
        let mut scope = SessionScope::new(index.clone());
        let order: BTreeSet<usize> = self
            .registry
            .live()
            .chain(assumed.keys().copied())
            .collect();
        for idx in order {
            let snippet = self.registry.get(idx);
            if let Some(declared) = assumed.get(&idx) {
                scope.add(declared, snippet.key);
            } else if !excluded.contains(&idx) && snippet.status.is_defined() {
                scope.add(&snippet.declared, snippet.key);
            }
        }
        scope
    }

    fn resolution_index(&self) -> Arc<IndexSnapshot> {
        if !self.index.is_up_to_date() {
            self.index.wait_up_to_date(CLASS_PATH_WAIT);
        }
        self.index.snapshot().0
    }

    /// Scope of the session as it stands, for analysis queries.
    pub(crate) fn current_scope(&self) -> SessionScope {
        let (index, _) = self.index.snapshot();
        self.scope_over(&BTreeSet::new(), &BTreeMap::new(), &index)
    }

    pub(crate) fn index_up_to_date(&self) -> bool {
        self.index.is_up_to_date()
    }

    fn ensure_open(&self) -> Result<(), KullaError> {
        if self.is_closed() {
            Err(KullaError::Closed)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, id: &SnippetId) -> Result<&Snippet, KullaError> {
        self.snippet(id)
            .ok_or_else(|| KullaError::UnknownSnippet(id.clone()))
    }

    pub fn snippet(&self, id: &SnippetId) -> Option<&Snippet> {
        self.registry.index_of(id).map(|idx| self.registry.get(idx))
    }

    /// Every snippet ever submitted, in creation order.
    pub fn snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.registry.iter()
    }

    fn active_of(&self, kind: Kind) -> Vec<&Snippet> {
        self.registry
            .iter()
            .filter(|s| s.status.is_active() && s.kind() == kind)
            .collect()
    }

    pub fn vars(&self) -> Vec<&Snippet> {
        self.active_of(Kind::Var)
    }

    pub fn methods(&self) -> Vec<&Snippet> {
        self.active_of(Kind::Method)
    }

    pub fn types(&self) -> Vec<&Snippet> {
        self.active_of(Kind::TypeDecl)
    }

    pub fn imports(&self) -> Vec<&Snippet> {
        self.active_of(Kind::Import)
    }

    pub fn status(&self, id: &SnippetId) -> Result<Status, KullaError> {
        Ok(self.lookup(id)?.status)
    }

    /// Errors and warnings of a snippet, with byte offsets into its source.
    pub fn diagnostics(&self, id: &SnippetId) -> Result<Vec<Diag>, KullaError> {
        Ok(self.lookup(id)?.diagnostics.clone())
    }

    /// Names a recoverable snippet is waiting for: `variable x`,
    /// `method g(int)`, `class A`.
    pub fn unresolved_dependencies(&self, id: &SnippetId) -> Result<Vec<String>, KullaError> {
        Ok(self.lookup(id)?.unresolved.clone())
    }

    /// Current value of a defined variable.
    pub fn var_value(&mut self, id: &SnippetId) -> Result<Option<String>, KullaError> {
        self.ensure_open()?;
        let snippet = self.lookup(id)?;
        let name = match (&snippet.declared, snippet.status.is_defined()) {
            (Declared::Var { name, .. }, true) => name.clone(),
            _ => return Ok(None),
        };
        Ok(self.exec.var_value(&name)?)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.exec.stop_handle()
    }

    /// Stops running user code, if any.
    pub fn stop(&self) {
        debug!("stop requested");
        self.exec.stop_handle().stop();
    }

    /// True once user code called `System.exit` or the executor died.
    pub fn is_closed(&self) -> bool {
        self.exec.is_closed()
    }

    /// Adds a class-path directory and schedules an index rebuild.
    pub fn add_to_classpath(&mut self, path: impl Into<PathBuf>) {
        self.class_path.push(path.into());
        self.index.rebuild(self.class_path.clone());
    }

    pub fn class_path(&self) -> &[PathBuf] {
        &self.class_path
    }

    pub fn source_code_analysis(&self) -> SourceCodeAnalysis<'_> {
        SourceCodeAnalysis::new(self)
    }
}

/// Splits input into complete snippets. Trailing incomplete input becomes
/// one last snippet so that the parser reports it.
fn split_snippets(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = source.to_string();
    loop {
        let info = analyze_completion(&rest);
        match info.completeness {
            Completeness::Empty => break,
            c if c.is_complete() && info.remaining.len() < rest.len() => {
                out.push(info.source);
                rest = info.remaining;
            }
            _ => {
                out.push(rest.trim().to_string());
                break;
            }
        }
    }
    out
}

fn is_rejected(analysis: &UnitAnalysis) -> bool {
    if !analysis.decl_errors.is_empty() || !analysis.body_errors.is_empty() {
        return true;
    }
    let corrallable = matches!(analysis.sub_kind.kind(), Kind::Method | Kind::TypeDecl);
    !corrallable && analysis.decl_unresolved.is_empty() && !analysis.body_unresolved.is_empty()
}

fn status_after(kind: Kind, settled: bool, analysis: &UnitAnalysis) -> Status {
    if !settled || analysis.has_decl_problems() {
        Status::RecoverableNotDefined
    } else if matches!(kind, Kind::Method | Kind::TypeDecl) && analysis.has_body_problems() {
        Status::RecoverableDefined
    } else {
        Status::Valid
    }
}

fn mode_for(idx: usize, root: Option<usize>) -> CheckMode {
    if Some(idx) == root {
        CheckMode::Fresh
    } else {
        CheckMode::Recheck
    }
}

fn unresolved_displays(analysis: &UnitAnalysis) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for unresolved in analysis.decl_unresolved.iter().chain(&analysis.body_unresolved) {
        if !out.contains(&unresolved.display) {
            out.push(unresolved.display.clone());
        }
    }
    out
}

fn target_of(code: &Code) -> Option<Target> {
    match code {
        Code::Method(method) => Some(Target::Method(method.sig.clone())),
        Code::Class(class) => Some(Target::Class(class.name.clone())),
        Code::Var { name, .. } => Some(Target::Var(name.clone())),
        _ => None,
    }
}

/// User class named by a type, looking through arrays.
fn user_class(ty: &Type) -> Option<&str> {
    match ty {
        Type::Class(name) if !name.contains('.') => Some(name),
        Type::Array(elem) => user_class(elem),
        _ => None,
    }
}

/// Type rendered with user-type identities, as used in signatures.
fn type_identity(scope: &dyn Scope, ty: &Type) -> String {
    match ty {
        Type::Class(name) if !name.contains('.') => match scope.user_type(name) {
            Some(user) => format!("{name}#{}", user.identity),
            None => name.to_string(),
        },
        Type::Array(elem) => format!("{}[]", type_identity(scope, elem)),
        other => other.qualified(),
    }
}

/// Turns a value-producing expression into the declaration of the
/// temporary variable that holds its value.
fn into_temp_var(mut analysis: UnitAnalysis, name: String, scope: &dyn Scope) -> UnitAnalysis {
    let ty = match &analysis.code {
        Code::Expr { ty: Type::Null, .. } => Type::object(),
        Code::Expr { ty, .. } => ty.clone(),
        _ => Type::object(),
    };
    analysis.decl_refs = user_class(&ty)
        .map(|class| DepName::Type(class.to_string()))
        .into_iter()
        .collect();
    analysis.body_refs = BTreeSet::new();
    analysis.signature = format!("var {}", type_identity(scope, &ty));
    analysis.type_name = Some(ty.to_string());
    analysis.lookup = Some(name.clone());
    analysis.declared = Declared::Var { name, ty };
    analysis
}

/// Re-resolution of a temporary variable looks at its type only; the
/// expression already ran.
fn temp_var_analysis(snippet: &Snippet, scope: &dyn Scope) -> Option<UnitAnalysis> {
    let Declared::Var { name, ty } = &snippet.declared else {
        return None;
    };
    let mut decl_refs = BTreeSet::new();
    let mut decl_unresolved = Vec::new();
    if let Some(class) = user_class(ty) {
        let dep = DepName::Type(class.to_string());
        decl_refs.insert(dep.clone());
        if scope.user_type(class).is_none() {
            decl_unresolved.push(Unresolved {
                dep,
                display: format!("class {class}"),
                span: Span::new(0, snippet.source.len()),
            });
        }
    }
    Some(UnitAnalysis {
        sub_kind: SubKind::TempVarExpression,
        declared: snippet.declared.clone(),
        lookup: Some(name.clone()),
        signature: format!("var {}", type_identity(scope, ty)),
        type_name: snippet.type_name.clone(),
        decl_errors: Vec::new(),
        body_errors: Vec::new(),
        decl_unresolved,
        body_unresolved: Vec::new(),
        warnings: Vec::new(),
        decl_refs,
        body_refs: BTreeSet::new(),
        target_var: None,
        code: Code::Var {
            name: name.clone(),
            ty: ty.clone(),
            init: None,
            frame_size: 0,
            origin: snippet.id.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{is_rejected, split_snippets, type_identity};
    use kulla_compiler::{CheckMode, EmptyScope, Type, check_unit, parse_snippet};

    fn analyze(source: &str) -> kulla_compiler::UnitAnalysis {
        let unit = parse_snippet(source)
            .expect("snippet should parse")
            .into_iter()
            .next()
            .expect("one unit");
        check_unit(&unit, &EmptyScope, CheckMode::Fresh, "1")
    }

    #[test]
    fn splits_input_into_snippets() {
        let parts = split_snippets("int x = 1; int y = 2;");
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("x"));
        assert!(parts[1].contains("y"));
        assert!(split_snippets("  // nothing\n").is_empty());
    }

    #[test]
    fn unresolved_bodies_reject_only_executables() {
        assert!(!is_rejected(&analyze("int f() { return missing; }")));
        assert!(is_rejected(&analyze("int y = missing;")));
        assert!(is_rejected(&analyze("missing + 1")));
        assert!(!is_rejected(&analyze("Missing m;")));
        assert!(is_rejected(&analyze("int f() { return \"s\"; }")));
    }

    #[test]
    fn identities_leave_platform_types_qualified() {
        assert_eq!(type_identity(&EmptyScope, &Type::string()), "java.lang.String");
        assert_eq!(type_identity(&EmptyScope, &Type::array_of(Type::class("A"))), "A[]");
    }
}
