//! Dotted field path helpers used by partial reads and writes.

use serde_json::{Map, Value};

use super::{DomainError, DomainResult};

/// True if `path` is selected by `paths`: an exact match, a selected parent,
/// or a selected child.
pub fn has_path(paths: &[String], path: &str) -> bool {
    paths.iter().any(|p| {
        p == path
            || path.starts_with(&format!("{}.", p))
            || p.starts_with(&format!("{}.", path))
    })
}

pub fn contains_exact(paths: &[String], path: &str) -> bool {
    paths.iter().any(|p| p == path)
}

/// True if any of `candidates` is selected by `paths`.
pub fn has_any(paths: &[String], candidates: &[&str]) -> bool {
    candidates.iter().any(|c| has_path(paths, c))
}

/// Paths below `prefix`, with the prefix stripped.
pub fn sub_paths(paths: &[String], prefix: &str) -> Vec<String> {
    let dotted = format!("{}.", prefix);
    paths
        .iter()
        .filter_map(|p| p.strip_prefix(&dotted).map(str::to_string))
        .collect()
}

/// Merges `extra` into `paths`, skipping duplicates.
pub fn add_paths(mut paths: Vec<String>, extra: &[&str]) -> Vec<String> {
    for p in extra {
        if !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }
    paths
}

/// Rejects paths that are not selected by any of `allowed`.
pub fn validate_paths(paths: &[String], allowed: &[&str]) -> DomainResult<()> {
    for p in paths {
        let known = allowed
            .iter()
            .any(|a| a == p || p.starts_with(&format!("{}.", a)) || a.starts_with(&format!("{}.", p)));
        if !known {
            return Err(DomainError::InvalidArgument(format!(
                "invalid field path `{}`",
                p
            )));
        }
    }
    Ok(())
}

/// Keeps only the selected paths of a JSON object. An empty mask keeps
/// everything.
pub fn filter_json(value: &Value, paths: &[String]) -> Value {
    if paths.is_empty() {
        return value.clone();
    }
    let mut out = Value::Object(Map::new());
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        copy_path(value, &mut out, &segments);
    }
    out
}

fn copy_path(src: &Value, dst: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let (Value::Object(src_map), Value::Object(dst_map)) = (src, dst) else {
        return;
    };
    let Some(child) = src_map.get(*first) else {
        return;
    };
    if rest.is_empty() || !child.is_object() {
        dst_map.insert(first.to_string(), child.clone());
        return;
    }
    let entry = dst_map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    copy_path(child, entry, rest);
}
