use crate::error::{GraphError, Result};
use crate::resolve::callee_name;
use crate::types::{Capture, SourceRange};
use codechat_chunker::Language;
use tree_sitter::{Node, Parser};

/// Turns source text into a normalized capture list. Failures are per-file.
pub trait StructuralParser: Send + Sync {
    fn parse(&self, path: &str, source: &str, language: Language) -> Result<Vec<Capture>>;
}

/// Tree-sitter adapter for Rust, Python, JavaScript and TypeScript. Other
/// languages produce no captures.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub const fn new() -> Self {
        Self
    }
}

impl StructuralParser for TreeSitterParser {
    fn parse(&self, path: &str, source: &str, language: Language) -> Result<Vec<Capture>> {
        if !language.supports_ast() {
            return Ok(Vec::new());
        }
        let ts_lang = language
            .tree_sitter_language()
            .map_err(|e| GraphError::parse(path, e.to_string()))?;

        let mut parser = Parser::new();
        parser
            .set_language(&ts_lang)
            .map_err(|e| GraphError::parse(path, format!("Failed to set language: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| GraphError::parse(path, "parser produced no tree"))?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            return Err(GraphError::parse(path, format!("syntax error near line {line}")));
        }

        let mut captures = Vec::new();
        collect(root, source.as_bytes(), language, &mut captures);
        Ok(captures)
    }
}

fn collect(node: Node, source: &[u8], language: Language, out: &mut Vec<Capture>) {
    match language {
        Language::Rust => capture_rust(node, source, out),
        Language::Python => capture_python(node, source, out),
        Language::JavaScript | Language::TypeScript => capture_js(node, source, out),
        _ => return,
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, source, language, out);
    }
}

fn capture_rust(node: Node, source: &[u8], out: &mut Vec<Capture>) {
    match node.kind() {
        "function_item" | "trait_item" => push_named_definition(node, "name", source, out),
        "impl_item" => {
            if let Some(ty) = node.child_by_field_name("type").and_then(|t| text(t, source)) {
                let name = ty.split('<').next().unwrap_or(ty).trim();
                out.push(Capture::definition(name, range(node)));
            }
        }
        "mod_item" => {
            let Some(name) = node.child_by_field_name("name").and_then(|n| text(n, source)) else {
                return;
            };
            if node.child_by_field_name("body").is_some() {
                out.push(Capture::definition(name, range(node)));
            } else {
                out.push(Capture::import(name, range(node)));
            }
        }
        "use_declaration" => {
            if let Some(arg) = node.child_by_field_name("argument").and_then(|a| text(a, source)) {
                out.push(Capture::import(arg, range(node)));
            }
        }
        "call_expression" => push_call(node, source, out),
        _ => {}
    }
}

fn capture_python(node: Node, source: &[u8], out: &mut Vec<Capture>) {
    match node.kind() {
        "function_definition" | "class_definition" => {
            push_named_definition(node, "name", source, out);
        }
        "call" => push_call(node, source, out),
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                let module = match child.kind() {
                    "dotted_name" => text(child, source),
                    "aliased_import" => child
                        .child_by_field_name("name")
                        .and_then(|n| text(n, source)),
                    _ => None,
                };
                if let Some(module) = module {
                    out.push(Capture::import(module, range(node)));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node
                .child_by_field_name("module_name")
                .and_then(|m| text(m, source))
            {
                out.push(Capture::import(module, range(node)));
            }
        }
        _ => {}
    }
}

fn capture_js(node: Node, source: &[u8], out: &mut Vec<Capture>) {
    match node.kind() {
        "function_declaration"
        | "generator_function_declaration"
        | "class_declaration"
        | "method_definition" => push_named_definition(node, "name", source, out),
        "variable_declarator" => {
            let is_function = node.child_by_field_name("value").is_some_and(|v| {
                matches!(
                    v.kind(),
                    "arrow_function" | "function_expression" | "function"
                )
            });
            if is_function {
                push_named_definition(node, "name", source, out);
            }
        }
        "import_statement" => {
            if let Some(src) = node.child_by_field_name("source").and_then(|s| text(s, source)) {
                out.push(Capture::import(src, range(node)));
            }
        }
        "call_expression" => {
            let function = node.child_by_field_name("function");
            if function.and_then(|f| text(f, source)) == Some("require") {
                let module = node
                    .child_by_field_name("arguments")
                    .and_then(|args| args.named_child(0))
                    .filter(|arg| arg.kind() == "string")
                    .and_then(|arg| text(arg, source));
                if let Some(module) = module {
                    out.push(Capture::import(module, range(node)));
                }
                return;
            }
            push_call(node, source, out);
        }
        _ => {}
    }
}

fn push_named_definition(node: Node, field: &str, source: &[u8], out: &mut Vec<Capture>) {
    if let Some(name) = node.child_by_field_name(field).and_then(|n| text(n, source)) {
        out.push(Capture::definition(name, range(node)));
    }
}

fn push_call(node: Node, source: &[u8], out: &mut Vec<Capture>) {
    let callee = node
        .child_by_field_name("function")
        .and_then(|f| text(f, source))
        .and_then(callee_name);
    if let Some(callee) = callee {
        out.push(Capture::call(callee, range(node)));
    }
}

fn text<'a>(node: Node, source: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(source).ok().filter(|t| !t.is_empty())
}

fn range(node: Node) -> SourceRange {
    SourceRange::new(
        node.start_byte(),
        node.end_byte(),
        node.start_position().row + 1,
        node.end_position().row + 1,
    )
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error_line)
}
