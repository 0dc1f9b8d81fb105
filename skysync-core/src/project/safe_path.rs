use std::path::{Path, PathBuf};

pub const PROJECT_EXTENSION: &str = "skyproj";

const MAX_STEM_CHARS: usize = 100;

/// A path inside `dir` derived from `title` that does not exist yet.
///
/// The title is reduced to a portable file stem; on collision ` (1)`,
/// ` (2)`, ... is appended.
pub fn safe_project_path(dir: &Path, title: &str) -> PathBuf {
    let stem = sanitize_stem(title);

    let candidate = dir.join(format!("{}.{}", stem, PROJECT_EXTENSION));
    if !candidate.exists() {
        return candidate;
    }

    let mut n: u32 = 1;
    loop {
        let candidate = dir.join(format!("{} ({}).{}", stem, n, PROJECT_EXTENSION));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn sanitize_stem(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_STEM_CHARS)
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
