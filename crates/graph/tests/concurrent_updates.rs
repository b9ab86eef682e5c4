use codechat_chunker::Language;
use codechat_graph::{Capture, DependencyGraph, OwnedEdge, SourceRange};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

/// Captures for a file with `functions` top-level functions, each calling the
/// next one and the shared `util` helper.
fn captures(path: &str, functions: usize) -> Vec<Capture> {
    let prefix = path.trim_end_matches(".py");
    let mut out = vec![Capture::import("util", SourceRange::new(0, 10, 1, 1))];
    for i in 0..functions {
        let start_line = 3 + i * 4;
        let start_byte = 20 + i * 100;
        out.push(Capture::definition(
            format!("{prefix}_{i}"),
            SourceRange::new(start_byte, start_byte + 90, start_line, start_line + 3),
        ));
        out.push(Capture::call(
            "helper",
            SourceRange::new(start_byte + 10, start_byte + 20, start_line + 1, start_line + 1),
        ));
        if i + 1 < functions {
            out.push(Capture::call(
                format!("{prefix}_{}", i + 1),
                SourceRange::new(start_byte + 30, start_byte + 40, start_line + 2, start_line + 2),
            ));
        }
    }
    out
}

fn file_view(graph: &DependencyGraph, path: &str) -> (Vec<String>, Vec<OwnedEdge>) {
    let mut edges = graph.owned_edges(path);
    edges.sort();
    (graph.functions_in(path), edges)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn disjoint_files_updated_concurrently_match_sequential(
        left in proptest::collection::vec(0usize..5, 1..6),
        right in proptest::collection::vec(0usize..5, 1..6),
    ) {
        let shared = Arc::new(DependencyGraph::new());
        shared.replace_file(
            "util.py",
            Language::Python,
            vec![Capture::definition("helper", SourceRange::new(0, 30, 1, 2))],
        );

        let spawn = |graph: Arc<DependencyGraph>, path: &'static str, sizes: Vec<usize>| {
            thread::spawn(move || {
                for size in sizes {
                    graph.replace_file(path, Language::Python, captures(path, size));
                }
            })
        };
        let a = spawn(Arc::clone(&shared), "left.py", left.clone());
        let b = spawn(Arc::clone(&shared), "right.py", right.clone());
        a.join().unwrap();
        b.join().unwrap();

        let sequential = DependencyGraph::new();
        sequential.replace_file(
            "util.py",
            Language::Python,
            vec![Capture::definition("helper", SourceRange::new(0, 30, 1, 2))],
        );
        let last_left = *left.last().unwrap();
        let last_right = *right.last().unwrap();
        sequential.replace_file("left.py", Language::Python, captures("left.py", last_left));
        sequential.replace_file("right.py", Language::Python, captures("right.py", last_right));

        for path in ["left.py", "right.py", "util.py"] {
            prop_assert_eq!(file_view(&shared, path), file_view(&sequential, path));
        }
        prop_assert_eq!(shared.stats(), sequential.stats());
    }
}
