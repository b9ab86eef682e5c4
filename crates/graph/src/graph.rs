use crate::resolve::{callee_name, dir_of, import_segments, module_name};
use crate::types::{
    CallEdge, Capture, CaptureKind, FileNode, FunctionNode, GraphStats, ImportEdge, OwnedEdge,
    ReplaceStats, SourceRange,
};
use codechat_chunker::Language;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference stored by name because its target was not a known node when
/// the owning file was parsed. Resolved at traversal time.
#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
    pub(crate) caller: NodeIndex,
    pub(crate) callee: String,
    pub(crate) line: usize,
    pub(crate) seq: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingImport {
    pub(crate) target: String,
    pub(crate) line: usize,
    pub(crate) seq: usize,
}

/// Everything one file's parse produced
#[derive(Debug)]
pub(crate) struct FileEntry {
    pub(crate) language: Language,
    pub(crate) captures: Vec<Capture>,
    pub(crate) functions: Vec<NodeIndex>,
    pub(crate) pending_calls: Vec<PendingCall>,
    pub(crate) pending_imports: Vec<PendingImport>,
}

pub(crate) struct GraphState {
    pub(crate) files: StableDiGraph<FileNode, ImportEdge>,
    pub(crate) functions: StableDiGraph<FunctionNode, CallEdge>,
    pub(crate) file_index: HashMap<String, NodeIndex>,
    /// module name -> file paths, in insertion order
    module_index: HashMap<String, Vec<String>>,
    /// simple function name -> nodes, in insertion order
    pub(crate) name_index: HashMap<String, Vec<NodeIndex>>,
    /// import segment -> files holding a pending import with that segment
    pub(crate) pending_import_index: HashMap<String, BTreeSet<String>>,
    pub(crate) entries: HashMap<String, FileEntry>,
    mutations: u64,
}

/// Two-level dependency graph: file import edges and function call edges.
///
/// Each file owns the nodes and edges its parse produced. `replace_file`
/// swaps a file's owned subgraph in one write-locked step; parsing happens
/// before the lock is taken, so readers only wait for the in-memory swap.
pub struct DependencyGraph {
    state: RwLock<GraphState>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState {
                files: StableDiGraph::new(),
                functions: StableDiGraph::new(),
                file_index: HashMap::new(),
                module_index: HashMap::new(),
                name_index: HashMap::new(),
                pending_import_index: HashMap::new(),
                entries: HashMap::new(),
                mutations: 0,
            }),
        }
    }

    /// Atomically replace everything owned by `path` with the given captures
    pub fn replace_file(&self, path: &str, language: Language, captures: Vec<Capture>) -> ReplaceStats {
        let stats = self.write().replace_file(path, language, captures);
        if !stats.unchanged {
            log::debug!(
                "graph: replaced {path} ({} functions, {} calls, {} imports, {} pending)",
                stats.functions,
                stats.call_edges,
                stats.import_edges,
                stats.pending
            );
        }
        stats
    }

    /// Drop the file node and its owned subgraph. Import edges other files
    /// held into it fall back to pending references.
    pub fn remove_file(&self, path: &str) -> bool {
        let removed = self.write().remove_file(path);
        if removed {
            log::debug!("graph: removed {path}");
        }
        removed
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.read().file_index.contains_key(path)
    }

    /// Paths of all files with an owned subgraph
    pub fn files(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.read().entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Qualified names of the functions `path` defines, in source order
    pub fn functions_in(&self, path: &str) -> Vec<String> {
        let state = self.read();
        state.entries.get(path).map_or_else(Vec::new, |entry| {
            entry
                .functions
                .iter()
                .filter_map(|&ix| state.functions.node_weight(ix))
                .map(|node| node.qualified_name.clone())
                .collect()
        })
    }

    /// All edges owned by `path`, resolved or pending, by name
    pub fn owned_edges(&self, path: &str) -> Vec<OwnedEdge> {
        let state = self.read();
        let Some(entry) = state.entries.get(path) else {
            return Vec::new();
        };
        let mut edges = Vec::new();

        for &ix in &entry.functions {
            let Some(caller) = state.functions.node_weight(ix) else {
                continue;
            };
            for edge in state.functions.edges_directed(ix, Direction::Outgoing) {
                if let Some(target) = state.functions.node_weight(edge.target()) {
                    edges.push(OwnedEdge::Call {
                        caller: caller.qualified_name.clone(),
                        callee: target.name.clone(),
                        line: edge.weight().line,
                    });
                }
            }
        }
        for pending in &entry.pending_calls {
            if let Some(caller) = state.functions.node_weight(pending.caller) {
                edges.push(OwnedEdge::Call {
                    caller: caller.qualified_name.clone(),
                    callee: pending.callee.clone(),
                    line: pending.line,
                });
            }
        }
        if let Some(&file_ix) = state.file_index.get(path) {
            for edge in state.files.edges_directed(file_ix, Direction::Outgoing) {
                edges.push(OwnedEdge::Import {
                    target: edge.weight().target.clone(),
                    line: edge.weight().line,
                });
            }
        }
        for pending in &entry.pending_imports {
            edges.push(OwnedEdge::Import {
                target: pending.target.clone(),
                line: pending.line,
            });
        }

        edges.sort();
        edges
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.read();
        GraphStats {
            files: state.files.node_count(),
            functions: state.functions.node_count(),
            import_edges: state.files.edge_count(),
            call_edges: state.functions.edge_count(),
            pending_refs: state
                .entries
                .values()
                .map(|e| e.pending_calls.len() + e.pending_imports.len())
                .sum(),
        }
    }

    /// Number of applied mutations; unchanged replaces do not count
    pub fn mutation_count(&self) -> u64 {
        self.read().mutations
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphState {
    fn replace_file(&mut self, path: &str, language: Language, captures: Vec<Capture>) -> ReplaceStats {
        if let Some(entry) = self.entries.get(path) {
            if entry.language == language && entry.captures == captures {
                return ReplaceStats {
                    unchanged: true,
                    ..ReplaceStats::default()
                };
            }
        }

        self.clear_owned(path);
        let file_ix = self.ensure_file(path, language);
        let mut stats = ReplaceStats::default();
        let mut entry = FileEntry {
            language,
            captures: Vec::new(),
            functions: Vec::new(),
            pending_calls: Vec::new(),
            pending_imports: Vec::new(),
        };

        let scopes = self.insert_definitions(path, &captures, &mut entry);
        stats.functions = entry.functions.len();

        for (seq, capture) in captures.iter().enumerate() {
            let line = capture.range.start_line;
            match capture.kind {
                CaptureKind::Definition => {}
                CaptureKind::Call => {
                    let Some(caller) = innermost_scope(&scopes, &capture.range) else {
                        continue;
                    };
                    let Some(callee) = callee_name(&capture.name) else {
                        continue;
                    };
                    let local = entry.functions.iter().copied().find(|&ix| {
                        self.functions
                            .node_weight(ix)
                            .is_some_and(|node| node.name == callee)
                    });
                    match local {
                        Some(target) => {
                            let edge = CallEdge {
                                owner: path.to_string(),
                                line,
                                seq,
                            };
                            self.functions.add_edge(caller, target, edge);
                            stats.call_edges += 1;
                        }
                        None => {
                            entry.pending_calls.push(PendingCall {
                                caller,
                                callee,
                                line,
                                seq,
                            });
                            stats.pending += 1;
                        }
                    }
                }
                CaptureKind::Import => match self.resolve_import(&capture.name, path) {
                    Some(target) => {
                        let edge = ImportEdge {
                            owner: path.to_string(),
                            target: capture.name.clone(),
                            line,
                            seq,
                        };
                        self.files.add_edge(file_ix, target, edge);
                        stats.import_edges += 1;
                    }
                    None => {
                        entry.pending_imports.push(PendingImport {
                            target: capture.name.clone(),
                            line,
                            seq,
                        });
                        stats.pending += 1;
                    }
                },
            }
        }

        for pending in &entry.pending_imports {
            self.index_pending_import(path, &pending.target);
        }
        entry.captures = captures;
        self.entries.insert(path.to_string(), entry);
        self.mutations += 1;
        stats
    }

    /// Adds function nodes for every definition; returns their scopes.
    /// Qualified names follow definition nesting: `Outer.inner`.
    fn insert_definitions(
        &mut self,
        path: &str,
        captures: &[Capture],
        entry: &mut FileEntry,
    ) -> Vec<(SourceRange, NodeIndex)> {
        let mut defs: Vec<&Capture> = captures
            .iter()
            .filter(|c| c.kind == CaptureKind::Definition)
            .collect();
        defs.sort_by(|a, b| {
            a.range
                .start_byte
                .cmp(&b.range.start_byte)
                .then(b.range.end_byte.cmp(&a.range.end_byte))
        });

        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut scopes = Vec::with_capacity(defs.len());
        for def in defs {
            while stack
                .last()
                .is_some_and(|(end, _)| *end <= def.range.start_byte)
            {
                stack.pop();
            }
            let qualified_name = match stack.last() {
                Some((_, parent)) => format!("{parent}.{}", def.name),
                None => def.name.clone(),
            };
            let ix = self.functions.add_node(FunctionNode {
                path: path.to_string(),
                name: def.name.clone(),
                qualified_name: qualified_name.clone(),
                line: def.range.start_line,
            });
            self.name_index.entry(def.name.clone()).or_default().push(ix);
            entry.functions.push(ix);
            stack.push((def.range.end_byte, qualified_name));
            scopes.push((def.range, ix));
        }
        scopes
    }

    /// Remove the file's owned functions, call edges and outgoing imports.
    /// The file node itself and edges other files own stay in place.
    fn clear_owned(&mut self, path: &str) {
        let Some(entry) = self.entries.remove(path) else {
            return;
        };
        for pending in &entry.pending_imports {
            for segment in import_segments(&pending.target) {
                if let Some(owners) = self.pending_import_index.get_mut(&segment) {
                    owners.remove(path);
                    if owners.is_empty() {
                        self.pending_import_index.remove(&segment);
                    }
                }
            }
        }
        for ix in entry.functions {
            if let Some(node) = self.functions.remove_node(ix) {
                if let Some(list) = self.name_index.get_mut(&node.name) {
                    list.retain(|&other| other != ix);
                    if list.is_empty() {
                        self.name_index.remove(&node.name);
                    }
                }
            }
        }
        if let Some(&file_ix) = self.file_index.get(path) {
            let outgoing: Vec<_> = self
                .files
                .edges_directed(file_ix, Direction::Outgoing)
                .map(|edge| edge.id())
                .collect();
            for id in outgoing {
                self.files.remove_edge(id);
            }
        }
    }

    fn remove_file(&mut self, path: &str) -> bool {
        let had_entry = self.entries.contains_key(path);
        self.clear_owned(path);
        let Some(file_ix) = self.file_index.remove(path) else {
            if had_entry {
                self.mutations += 1;
            }
            return had_entry;
        };

        let demoted: Vec<(String, PendingImport)> = self
            .files
            .edges_directed(file_ix, Direction::Incoming)
            .map(|edge| {
                let weight = edge.weight();
                (
                    weight.owner.clone(),
                    PendingImport {
                        target: weight.target.clone(),
                        line: weight.line,
                        seq: weight.seq,
                    },
                )
            })
            .collect();
        for (owner, pending) in demoted {
            let target = pending.target.clone();
            let Some(entry) = self.entries.get_mut(&owner) else {
                continue;
            };
            entry.pending_imports.push(pending);
            entry.pending_imports.sort_by_key(|p| p.seq);
            self.index_pending_import(&owner, &target);
        }

        self.files.remove_node(file_ix);
        if let Some(module) = module_name(path) {
            if let Some(paths) = self.module_index.get_mut(&module) {
                paths.retain(|p| p != path);
                if paths.is_empty() {
                    self.module_index.remove(&module);
                }
            }
        }
        self.mutations += 1;
        true
    }

    fn index_pending_import(&mut self, owner: &str, target: &str) {
        for segment in import_segments(target) {
            self.pending_import_index
                .entry(segment)
                .or_default()
                .insert(owner.to_string());
        }
    }

    /// Files whose pending imports resolve to `path`. Only owners holding a
    /// pending import that names the file's module are checked.
    pub(crate) fn pending_importers(&self, path: &str) -> Vec<&str> {
        let Some(&file_ix) = self.file_index.get(path) else {
            return Vec::new();
        };
        let Some(owners) = module_name(path).and_then(|m| self.pending_import_index.get(&m)) else {
            return Vec::new();
        };
        owners
            .iter()
            .filter(|owner| owner.as_str() != path)
            .filter(|owner| {
                self.entries.get(owner.as_str()).is_some_and(|entry| {
                    entry
                        .pending_imports
                        .iter()
                        .any(|p| self.resolve_import(&p.target, owner) == Some(file_ix))
                })
            })
            .map(String::as_str)
            .collect()
    }

    fn ensure_file(&mut self, path: &str, language: Language) -> NodeIndex {
        if let Some(&ix) = self.file_index.get(path) {
            if let Some(node) = self.files.node_weight_mut(ix) {
                node.language = language;
            }
            return ix;
        }
        let ix = self.files.add_node(FileNode {
            path: path.to_string(),
            language,
        });
        self.file_index.insert(path.to_string(), ix);
        if let Some(module) = module_name(path) {
            self.module_index.entry(module).or_default().push(path.to_string());
        }
        ix
    }

    /// File an import target names, matching path segments against module
    /// names from most to least specific. Never resolves to the importer.
    pub(crate) fn resolve_import(&self, raw: &str, importer: &str) -> Option<NodeIndex> {
        let importer_dir = dir_of(importer);
        for segment in import_segments(raw).iter().rev() {
            let Some(paths) = self.module_index.get(segment) else {
                continue;
            };
            let mut candidates = paths.iter().filter(|p| p.as_str() != importer);
            let first = candidates.clone().next();
            let best = candidates
                .find(|p| dir_of(p) == importer_dir)
                .or(first);
            if let Some(path) = best {
                return self.file_index.get(path.as_str()).copied();
            }
        }
        None
    }

    /// Resolve a callee name from a function in `caller_path`: same file,
    /// then files the caller's file imports, then same directory, then the
    /// first match anywhere.
    pub(crate) fn resolve_call(&self, callee: &str, caller_path: &str) -> Option<NodeIndex> {
        let candidates = self.name_index.get(callee)?;
        let path_of = |ix: &NodeIndex| self.functions.node_weight(*ix).map(|n| n.path.as_str());

        if let Some(ix) = candidates.iter().find(|ix| path_of(*ix) == Some(caller_path)) {
            return Some(*ix);
        }

        let imported: Vec<&str> = self
            .imported_files(caller_path)
            .into_iter()
            .filter_map(|ix| self.files.node_weight(ix).map(|n| n.path.as_str()))
            .collect();
        if let Some(ix) = candidates
            .iter()
            .find(|ix| path_of(*ix).is_some_and(|p| imported.contains(&p)))
        {
            return Some(*ix);
        }

        let caller_dir = dir_of(caller_path);
        if let Some(ix) = candidates
            .iter()
            .find(|ix| path_of(*ix).is_some_and(|p| dir_of(p) == caller_dir))
        {
            return Some(*ix);
        }

        candidates.first().copied()
    }

    /// Outgoing import targets of `path` as `(seq, file node, line)`, concrete
    /// and lazily resolved, in parse order
    pub(crate) fn import_targets(&self, path: &str) -> Vec<(usize, NodeIndex, usize)> {
        let Some(&file_ix) = self.file_index.get(path) else {
            return Vec::new();
        };
        let mut targets: Vec<(usize, NodeIndex, usize)> = self
            .files
            .edges_directed(file_ix, Direction::Outgoing)
            .map(|edge| (edge.weight().seq, edge.target(), edge.weight().line))
            .collect();
        if let Some(entry) = self.entries.get(path) {
            for pending in &entry.pending_imports {
                if let Some(target) = self.resolve_import(&pending.target, path) {
                    targets.push((pending.seq, target, pending.line));
                }
            }
        }
        targets.sort_by_key(|(seq, _, _)| *seq);
        targets
    }

    pub(crate) fn imported_files(&self, path: &str) -> Vec<NodeIndex> {
        self.import_targets(path)
            .into_iter()
            .map(|(_, target, _)| target)
            .collect()
    }

    /// Callees of a function node as `(seq, function node, line)` in parse order
    pub(crate) fn callees(&self, ix: NodeIndex) -> Vec<(usize, NodeIndex, usize)> {
        let Some(node) = self.functions.node_weight(ix) else {
            return Vec::new();
        };
        let mut callees: Vec<(usize, NodeIndex, usize)> = self
            .functions
            .edges_directed(ix, Direction::Outgoing)
            .map(|edge| (edge.weight().seq, edge.target(), edge.weight().line))
            .collect();
        if let Some(entry) = self.entries.get(&node.path) {
            for pending in entry.pending_calls.iter().filter(|p| p.caller == ix) {
                if let Some(target) = self.resolve_call(&pending.callee, &node.path) {
                    callees.push((pending.seq, target, pending.line));
                }
            }
        }
        callees.sort_by_key(|(seq, _, _)| *seq);
        callees
    }
}

/// Innermost definition whose range contains `range`
fn innermost_scope(scopes: &[(SourceRange, NodeIndex)], range: &SourceRange) -> Option<NodeIndex> {
    scopes
        .iter()
        .filter(|(scope, _)| {
            scope.start_byte <= range.start_byte && range.start_byte < scope.end_byte
        })
        .max_by(|(a, _), (b, _)| {
            a.start_byte
                .cmp(&b.start_byte)
                .then(b.end_byte.cmp(&a.end_byte))
        })
        .map(|(_, ix)| *ix)
}
