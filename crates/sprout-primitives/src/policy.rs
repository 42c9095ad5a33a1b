// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Match a glob pattern against a path.
///
/// Supported syntax: `*` (any run within one path segment), `?` (one
/// character within a segment), `**` (any run across segments).  Patterns
/// are anchored at both ends.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() * 2);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches zero directories
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            c if "\\.+()[]{}|^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex).map(|re| re.is_match(path)).unwrap_or(false)
}

/// Path constraints from an agent spec, consulted by the registry before
/// dispatch.  `None` means unconstrained in that direction.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    pub allowed_read_paths: Option<Vec<String>>,
    pub allowed_write_paths: Option<Vec<String>>,
}

impl PathPolicy {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn new(read: Option<Vec<String>>, write: Option<Vec<String>>) -> Self {
        Self { allowed_read_paths: read, allowed_write_paths: write }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed_read_paths.is_none() && self.allowed_write_paths.is_none()
    }

    pub fn allows_read(&self, path: &str) -> bool {
        match &self.allowed_read_paths {
            None => true,
            Some(globs) => globs.iter().any(|g| glob_match(g, path)),
        }
    }

    pub fn allows_write(&self, path: &str) -> bool {
        match &self.allowed_write_paths {
            None => true,
            Some(globs) => globs.iter().any(|g| glob_match(g, path)),
        }
    }

    /// Pre-dispatch check: returns the access-denied message when `args`
    /// touch a path outside the policy, `Ok(())` otherwise.
    pub fn check(&self, primitive: &str, args: &Value) -> Result<(), String> {
        if self.is_unrestricted() {
            return Ok(());
        }
        match primitive {
            "read_file" | "grep" | "glob" => {
                let path = args
                    .get("path")
                    .and_then(|v| v.as_str())
                    .unwrap_or(".");
                if !self.allows_read(path) {
                    return Err(format!("access denied: read of {path:?} is outside allowed_read_paths"));
                }
            }
            "write_file" | "edit_file" => {
                if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                    if !self.allows_write(path) {
                        return Err(format!(
                            "access denied: write of {path:?} is outside allowed_write_paths"
                        ));
                    }
                }
            }
            "apply_patch" => {
                if let Some(patch) = args.get("patch").and_then(|v| v.as_str()) {
                    for path in patch_target_paths(patch) {
                        if !self.allows_write(&path) {
                            return Err(format!(
                                "access denied: patch touches {path:?} outside allowed_write_paths"
                            ));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Paths a V4A patch would create, modify, move to, or delete.
fn patch_target_paths(patch: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in patch.lines() {
        for prefix in ["*** Add File: ", "*** Delete File: ", "*** Update File: ", "*** Move to: "]
        {
            if let Some(rest) = line.strip_prefix(prefix) {
                paths.push(rest.trim().to_string());
            }
        }
    }
    paths
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // ── glob_match ────────────────────────────────────────────────────────────

    #[test]
    fn star_stays_within_a_segment() {
        assert!(glob_match("/tmp/*.txt", "/tmp/a.txt"));
        assert!(!glob_match("/tmp/*.txt", "/tmp/sub/a.txt"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(glob_match("/tmp/**", "/tmp/a/b/c.txt"));
        assert!(glob_match("/tmp/**/*.rs", "/tmp/src/deep/mod.rs"));
    }

    #[test]
    fn double_star_slash_matches_zero_dirs() {
        assert!(glob_match("/tmp/**/*.rs", "/tmp/main.rs"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("file?.txt", "file1.txt"));
        assert!(!glob_match("file?.txt", "file12.txt"));
    }

    #[test]
    fn regex_metachars_are_literal() {
        assert!(glob_match("a+b.txt", "a+b.txt"));
        assert!(!glob_match("a+b.txt", "aab.txt"));
    }

    #[test]
    fn match_is_anchored() {
        assert!(!glob_match("*.txt", "dir/a.txt"));
        assert!(!glob_match("/tmp/a", "/tmp/ab"));
    }

    // ── PathPolicy ────────────────────────────────────────────────────────────

    fn policy() -> PathPolicy {
        PathPolicy::new(
            Some(vec!["/data/**".into()]),
            Some(vec!["/data/out/**".into()]),
        )
    }

    #[test]
    fn unrestricted_allows_everything() {
        let p = PathPolicy::unrestricted();
        assert!(p.check("write_file", &json!({"path": "/etc/passwd"})).is_ok());
    }

    #[test]
    fn read_outside_globs_is_denied() {
        let p = policy();
        let err = p.check("read_file", &json!({"path": "/etc/passwd"})).unwrap_err();
        assert!(err.contains("access denied"));
        assert!(p.check("read_file", &json!({"path": "/data/in.txt"})).is_ok());
    }

    #[test]
    fn write_uses_write_globs() {
        let p = policy();
        // Readable but not writable.
        assert!(p.check("write_file", &json!({"path": "/data/in.txt"})).is_err());
        assert!(p.check("write_file", &json!({"path": "/data/out/result.txt"})).is_ok());
    }

    #[test]
    fn patch_paths_are_all_checked() {
        let p = policy();
        let patch = "*** Begin Patch\n*** Add File: /data/out/new.txt\n+hi\n*** End Patch";
        assert!(p.check("apply_patch", &json!({"patch": patch})).is_ok());
        let bad = "*** Begin Patch\n*** Add File: /etc/evil\n+hi\n*** End Patch";
        assert!(p.check("apply_patch", &json!({"patch": bad})).is_err());
    }

    #[test]
    fn move_target_is_checked() {
        let p = policy();
        let patch = "*** Begin Patch\n*** Update File: /data/out/a.txt\n*** Move to: /etc/b.txt\n*** End Patch";
        assert!(p.check("apply_patch", &json!({"patch": patch})).is_err());
    }

    #[test]
    fn exec_is_not_path_checked() {
        let p = policy();
        assert!(p.check("exec", &json!({"command": "rm -rf /"})).is_ok());
    }
}
