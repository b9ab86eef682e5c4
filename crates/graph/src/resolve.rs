//! Name-based resolution helpers. Resolution is a nearest-scope heuristic:
//! it prefers the same file, then imported files, then the same directory,
//! then the first match anywhere. Duplicate names may resolve imprecisely.

const SKIPPED_SEGMENTS: &[&str] = &["crate", "self", "super", "*", "index", "mod", "__init__"];
const MODULE_FILE_STEMS: &[&str] = &["mod", "__init__", "index"];

/// Path segments of an import target, most specific last.
///
/// `crate::b::g` → `[b, g]`, `./lib/util` → `[lib, util]`, `.pkg.mod` → `[pkg, mod]`.
pub(crate) fn import_segments(raw: &str) -> Vec<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let head = trimmed.split('{').next().unwrap_or(trimmed);
    let head = head.split(" as ").next().unwrap_or(head);

    head.split([':', '.', '/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && !SKIPPED_SEGMENTS.contains(s))
        .map(ToString::to_string)
        .collect()
}

/// Module name a file answers to: its stem, or its directory for
/// `mod.rs` / `__init__.py` / `index.js` style files.
pub(crate) fn module_name(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    if MODULE_FILE_STEMS.contains(&stem) {
        let dir = dir_of(path);
        let parent = dir.rsplit('/').next().filter(|s| !s.is_empty());
        return parent.map(ToString::to_string).or_else(|| Some(stem.to_string()));
    }
    (!stem.is_empty()).then(|| stem.to_string())
}

pub(crate) fn dir_of(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Last identifier segment of a callee expression: `self.foo` → `foo`,
/// `a::b::<T>` → `b`, `obj.method` → `method`.
pub(crate) fn callee_name(raw: &str) -> Option<String> {
    let head = raw.split(['<', '(']).next().unwrap_or(raw);
    head.split([':', '.'])
        .map(|s| s.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$')))
        .filter(|s| !s.is_empty())
        .last()
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn import_segments_across_languages() {
        assert_eq!(import_segments("crate::b::g"), vec!["b", "g"]);
        assert_eq!(import_segments("super::util::{a, b}"), vec!["util"]);
        assert_eq!(import_segments("\"./lib/util\""), vec!["lib", "util"]);
        assert_eq!(import_segments("'../shared/index'"), vec!["shared"]);
        assert_eq!(import_segments(".pkg.mod"), vec!["pkg"]);
        assert_eq!(import_segments("numpy as np"), vec!["numpy"]);
    }

    #[test]
    fn module_names_follow_package_files() {
        assert_eq!(module_name("src/b.rs").as_deref(), Some("b"));
        assert_eq!(module_name("src/net/mod.rs").as_deref(), Some("net"));
        assert_eq!(module_name("pkg/__init__.py").as_deref(), Some("pkg"));
        assert_eq!(module_name("web/app.test.ts").as_deref(), Some("app"));
    }

    #[test]
    fn callee_names_take_last_segment() {
        assert_eq!(callee_name("self.foo").as_deref(), Some("foo"));
        assert_eq!(callee_name("a::b::<T>").as_deref(), Some("b"));
        assert_eq!(callee_name("console.log").as_deref(), Some("log"));
        assert_eq!(callee_name("g").as_deref(), Some("g"));
        assert_eq!(callee_name("()"), None);
    }
}
