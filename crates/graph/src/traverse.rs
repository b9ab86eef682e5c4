use crate::graph::{DependencyGraph, GraphState};
use crate::resolve::callee_name;
use crate::types::{Traversal, TraversalStart, TraversalStep};
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashSet, VecDeque};

impl DependencyGraph {
    /// Breadth-first walk along call edges (function start) or import edges
    /// (file start). Each node is visited at most once; depth 1 yields direct
    /// callees. Hitting `max_nodes` (start included) returns a truncated
    /// partial result. An unknown start yields an empty result.
    pub fn traverse(&self, start: &TraversalStart, max_depth: usize, max_nodes: usize) -> Traversal {
        let state = self.read();
        match start {
            TraversalStart::File(path) => {
                let Some(&ix) = state.file_index.get(path.as_str()) else {
                    return Traversal::default();
                };
                bfs(
                    ix,
                    max_depth,
                    max_nodes,
                    |node| {
                        let path = state.files.node_weight(node).map(|n| n.path.as_str());
                        path.map(|p| state.import_targets(p)).unwrap_or_default()
                    },
                    |node| {
                        let path = state
                            .files
                            .node_weight(node)
                            .map(|n| n.path.clone())
                            .unwrap_or_default();
                        (path.clone(), path)
                    },
                )
            }
            TraversalStart::Function { name, path } => {
                let Some(ix) = state.find_function(name, path.as_deref()) else {
                    return Traversal::default();
                };
                bfs(
                    ix,
                    max_depth,
                    max_nodes,
                    |node| state.callees(node),
                    |node| {
                        state
                            .functions
                            .node_weight(node)
                            .map(|n| (n.qualified_name.clone(), n.path.clone()))
                            .unwrap_or_default()
                    },
                )
            }
        }
    }

    /// Files one hop away from `path`: what it imports, what imports it, and
    /// the files of functions its functions call.
    pub fn neighbors(&self, path: &str) -> Vec<String> {
        let state = self.read();
        let Some(&file_ix) = state.file_index.get(path) else {
            return Vec::new();
        };
        let mut seen: HashSet<NodeIndex> = HashSet::from([file_ix]);
        let mut out = Vec::new();
        let mut push = |ix: NodeIndex, seen: &mut HashSet<NodeIndex>| {
            if seen.insert(ix) {
                if let Some(node) = state.files.node_weight(ix) {
                    out.push(node.path.clone());
                }
            }
        };

        for target in state.imported_files(path) {
            push(target, &mut seen);
        }
        for edge in state.files.edges_directed(file_ix, Direction::Incoming) {
            push(edge.source(), &mut seen);
        }
        for owner in state.pending_importers(path) {
            if let Some(&ix) = state.file_index.get(owner) {
                push(ix, &mut seen);
            }
        }
        if let Some(entry) = state.entries.get(path) {
            for &function in &entry.functions {
                for (_, callee, _) in state.callees(function) {
                    let callee_file = state
                        .functions
                        .node_weight(callee)
                        .and_then(|n| state.file_index.get(n.path.as_str()).copied());
                    if let Some(ix) = callee_file {
                        push(ix, &mut seen);
                    }
                }
            }
        }
        out
    }
}

impl GraphState {
    /// Function by simple or qualified name (`Type.method` or `Type::method`),
    /// optionally restricted to one file; first inserted wins otherwise.
    fn find_function(&self, name: &str, path: Option<&str>) -> Option<NodeIndex> {
        let wanted = name.replace("::", ".");
        let simple = callee_name(name)?;
        let candidates = self.name_index.get(&simple)?;
        candidates.iter().copied().find(|&ix| {
            self.functions.node_weight(ix).is_some_and(|node| {
                (node.name == wanted || node.qualified_name == wanted)
                    && path.map_or(true, |p| node.path == p)
            })
        })
    }
}

fn bfs(
    start: NodeIndex,
    max_depth: usize,
    max_nodes: usize,
    expand: impl Fn(NodeIndex) -> Vec<(usize, NodeIndex, usize)>,
    label: impl Fn(NodeIndex) -> (String, String),
) -> Traversal {
    let mut result = Traversal::default();
    let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
    let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);
    let cap = max_nodes.max(1);

    'walk: while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let (caller, _) = label(node);
        for (_, next, line) in expand(node) {
            if visited.contains(&next) {
                continue;
            }
            if visited.len() >= cap {
                result.truncated = true;
                break 'walk;
            }
            visited.insert(next);
            let (callee, file) = label(next);
            result.steps.push(TraversalStep {
                caller: caller.clone(),
                callee,
                file,
                line,
                depth: depth + 1,
            });
            queue.push_back((next, depth + 1));
        }
    }

    result.visited = visited.len();
    result
}
