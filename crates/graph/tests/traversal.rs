use codechat_chunker::Language;
use codechat_graph::{DependencyGraph, StructuralParser, TraversalStart, TreeSitterParser};
use pretty_assertions::assert_eq;

const A: (&str, &str) = ("a.py", "from b import g\n\ndef f():\n    g()\n");
const B: (&str, &str) = ("b.py", "from c import h\n\ndef g():\n    h()\n");
const C: (&str, &str) = ("c.py", "def h():\n    return 1\n");

fn index(graph: &DependencyGraph, files: &[(&str, &str)]) {
    let parser = TreeSitterParser::new();
    for (path, source) in files {
        let captures = parser.parse(path, source, Language::Python).unwrap();
        graph.replace_file(path, Language::Python, captures);
    }
}

fn chain(graph: &DependencyGraph) -> Vec<(String, String, String, usize)> {
    graph
        .traverse(&TraversalStart::function("f"), 2, 100)
        .steps
        .into_iter()
        .map(|s| (s.caller, s.callee, s.file, s.depth))
        .collect()
}

#[test]
fn depth_two_walks_the_call_chain_across_files() {
    let graph = DependencyGraph::new();
    index(&graph, &[A, B, C]);

    assert_eq!(
        chain(&graph),
        vec![
            ("f".to_string(), "g".to_string(), "b.py".to_string(), 1),
            ("g".to_string(), "h".to_string(), "c.py".to_string(), 2),
        ]
    );
}

#[test]
fn indexing_order_does_not_change_the_result() {
    let forward = DependencyGraph::new();
    index(&forward, &[A, B, C]);
    let reverse = DependencyGraph::new();
    index(&reverse, &[C, B, A]);

    assert_eq!(chain(&forward), chain(&reverse));
    assert_eq!(forward.owned_edges("a.py"), reverse.owned_edges("a.py"));
}

#[test]
fn depth_one_stops_at_direct_callees() {
    let graph = DependencyGraph::new();
    index(&graph, &[A, B, C]);

    let traversal = graph.traverse(&TraversalStart::function("f"), 1, 100);
    assert_eq!(traversal.steps.len(), 1);
    assert_eq!(traversal.steps[0].callee, "g");
}

#[test]
fn removing_a_file_cuts_the_chain_until_it_returns() {
    let graph = DependencyGraph::new();
    index(&graph, &[A, B, C]);

    assert!(graph.remove_file("c.py"));
    let steps = graph.traverse(&TraversalStart::function("f"), 2, 100).steps;
    assert_eq!(steps.len(), 1);

    index(&graph, &[C]);
    assert_eq!(chain(&graph).len(), 2);
}

#[test]
fn file_traversal_follows_imports() {
    let graph = DependencyGraph::new();
    index(&graph, &[A, B, C]);

    let files: Vec<String> = graph
        .traverse(&TraversalStart::file("a.py"), 3, 100)
        .steps
        .into_iter()
        .map(|s| s.file)
        .collect();
    assert_eq!(files, vec!["b.py".to_string(), "c.py".to_string()]);
}
