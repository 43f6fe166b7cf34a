//! Strict unified-diff application for scanner remediations.
//!
//! A remediation diff must apply exactly: any context or removal line that
//! disagrees with the current file content is a patch conflict, never a fuzzy
//! match. Conflicts are per-vulnerability errors; auto-fix continues with the
//! remaining candidates.

use crate::errors::AppError;

#[derive(Debug, PartialEq)]
enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

/// Extract the target path from the `+++ b/...` header.
pub fn target_path(diff: &str) -> Option<String> {
    diff.lines().find_map(|line| {
        let rest = line.strip_prefix("+++ ")?;
        let path = rest.strip_prefix("b/").unwrap_or(rest);
        if path == "/dev/null" {
            None
        } else {
            Some(path.split('\t').next().unwrap_or(path).to_string())
        }
    })
}

/// Apply a unified diff to file content, returning the patched content.
pub fn apply(original: &str, diff: &str) -> Result<String, AppError> {
    let hunks = parse_hunks(diff)?;
    if hunks.is_empty() {
        return Err(AppError::PatchConflict("diff contains no hunks".to_string()));
    }

    let had_trailing_newline = original.ends_with('\n');
    let old_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0usize; // index into old_lines

    for hunk in &hunks {
        // Hunk starts are 1-based; a start of 0 means insertion at the top.
        let hunk_index = hunk.old_start.saturating_sub(1);
        if hunk_index < cursor || hunk_index > old_lines.len() {
            return Err(AppError::PatchConflict(format!(
                "hunk at line {} overlaps or exceeds file length {}",
                hunk.old_start,
                old_lines.len()
            )));
        }
        out.extend(old_lines[cursor..hunk_index].iter().map(|s| s.to_string()));
        cursor = hunk_index;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(expected) => {
                    let actual = old_lines.get(cursor).ok_or_else(|| {
                        AppError::PatchConflict("context extends past end of file".to_string())
                    })?;
                    if actual != expected {
                        return Err(AppError::PatchConflict(format!(
                            "context mismatch at line {}: expected {expected:?}, found {actual:?}",
                            cursor + 1
                        )));
                    }
                    out.push(expected.clone());
                    cursor += 1;
                }
                HunkLine::Remove(expected) => {
                    let actual = old_lines.get(cursor).ok_or_else(|| {
                        AppError::PatchConflict("removal extends past end of file".to_string())
                    })?;
                    if actual != expected {
                        return Err(AppError::PatchConflict(format!(
                            "removal mismatch at line {}: expected {expected:?}, found {actual:?}",
                            cursor + 1
                        )));
                    }
                    cursor += 1;
                }
                HunkLine::Add(content) => out.push(content.clone()),
            }
        }
    }

    out.extend(old_lines[cursor..].iter().map(|s| s.to_string()));

    let mut patched = out.join("\n");
    if had_trailing_newline && !patched.is_empty() {
        patched.push('\n');
    }
    Ok(patched)
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, AppError> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for line in diff.lines() {
        if let Some(header) = line.strip_prefix("@@") {
            let old_start = parse_hunk_header(header).ok_or_else(|| {
                AppError::PatchConflict(format!("malformed hunk header: {line:?}"))
            })?;
            hunks.push(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }
        if line.starts_with("--- ")
            || line.starts_with("+++ ")
            || line.starts_with("diff ")
            || line.starts_with("index ")
            || line.starts_with('\\')
        {
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            continue; // preamble text before the first hunk
        };
        if let Some(content) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(content.to_string()));
        } else if let Some(content) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(content.to_string()));
        } else if let Some(content) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(content.to_string()));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(AppError::PatchConflict(format!(
                "unexpected diff line: {line:?}"
            )));
        }
    }

    Ok(hunks)
}

/// Parse `-l[,c] +l[,c] @@` and return the old start line.
fn parse_hunk_header(header: &str) -> Option<usize> {
    let header = header.trim_start();
    let old = header.split_whitespace().next()?.strip_prefix('-')?;
    let start = old.split(',').next()?;
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_DIFF: &str = "\
--- a/package.json
+++ b/package.json
@@ -1,4 +1,4 @@
 {
   \"dependencies\": {
-    \"lodash\": \"4.17.20\"
+    \"lodash\": \"4.17.21\"
   }
";

    const ORIGINAL: &str = "{\n  \"dependencies\": {\n    \"lodash\": \"4.17.20\"\n  }\n}\n";

    #[test]
    fn applies_clean_diff() {
        let patched = apply(ORIGINAL, UPGRADE_DIFF).unwrap();
        assert!(patched.contains("\"lodash\": \"4.17.21\""));
        assert!(!patched.contains("4.17.20"));
        assert!(patched.ends_with("}\n"));
    }

    #[test]
    fn context_mismatch_is_conflict() {
        let drifted = ORIGINAL.replace("dependencies", "devDependencies");
        let err = apply(&drifted, UPGRADE_DIFF).unwrap_err();
        assert!(matches!(err, AppError::PatchConflict(_)));
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn removal_mismatch_is_conflict() {
        let drifted = ORIGINAL.replace("4.17.20", "3.0.0");
        let err = apply(&drifted, UPGRADE_DIFF).unwrap_err();
        assert!(matches!(err, AppError::PatchConflict(_)));
    }

    #[test]
    fn empty_diff_is_conflict() {
        let err = apply(ORIGINAL, "").unwrap_err();
        assert!(matches!(err, AppError::PatchConflict(_)));
    }

    #[test]
    fn hunk_past_end_of_file_is_conflict() {
        let diff = "@@ -50,1 +50,1 @@\n-gone\n+here\n";
        let err = apply("one\ntwo\n", diff).unwrap_err();
        assert!(matches!(err, AppError::PatchConflict(_)));
    }

    #[test]
    fn pure_insertion_applies() {
        let diff = "@@ -1,2 +1,3 @@\n line1\n+inserted\n line2\n";
        let patched = apply("line1\nline2\n", diff).unwrap();
        assert_eq!(patched, "line1\ninserted\nline2\n");
    }

    #[test]
    fn target_path_from_header() {
        assert_eq!(target_path(UPGRADE_DIFF).as_deref(), Some("package.json"));
        assert_eq!(target_path("+++ b/a/b.rs\n"), Some("a/b.rs".to_string()));
        assert_eq!(target_path("no headers here"), None);
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        let original = "a\nb\nc\nd\ne\nf\n";
        let diff = "\
@@ -1,2 +1,2 @@
-a
+A
 b
@@ -5,2 +5,2 @@
 e
-f
+F
";
        let patched = apply(original, diff).unwrap();
        assert_eq!(patched, "A\nb\nc\nd\ne\nF\n");
    }
}
