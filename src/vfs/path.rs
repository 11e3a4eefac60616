//! Virtual path arithmetic.
//!
//! All paths handled by the daemon are POSIX style virtual paths rooted at
//! `/`. Clients send whatever their platform produces, so normalization
//! accepts both slash styles and resolves `.` and `..` lexically. `..` can
//! never climb above the root.

/// Collapse `input`, interpreted relative to the virtual directory `cwd`,
/// into a canonical absolute virtual path.
///
/// The result always starts with `/`, contains no `.`/`..`/empty segments
/// and carries no trailing slash (except for the root itself). This is a
/// total function: every input normalizes to some valid path.
pub fn normalize(cwd: &str, input: &str) -> String {
    let input = input.replace('\\', "/");
    let joined = if input.starts_with('/') {
        input
    } else {
        format!("{}/{}", cwd, input)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// The virtual directory containing `path`. The parent of `/` is `/`.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// The last segment of `path`; empty only for the root.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a normalized directory and a single child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn absolute_input_ignores_cwd() {
        assert_eq!(normalize("/deep/down", "/top"), "/top");
    }

    #[test]
    fn relative_input_joins_cwd() {
        assert_eq!(normalize("/incoming", "file.rar"), "/incoming/file.rar");
    }

    #[test]
    fn dots_collapse() {
        assert_eq!(normalize("/a/b", "./c/../d"), "/a/b/d");
        assert_eq!(normalize("/", "."), "/");
    }

    #[test]
    fn dotdot_never_escapes_root() {
        assert_eq!(normalize("/", "../../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize("/a", "../../.."), "/");
    }

    #[test]
    fn backslashes_become_slashes() {
        assert_eq!(normalize("/", "dir\\sub\\x"), "/dir/sub/x");
    }

    #[test]
    fn empty_segments_drop() {
        assert_eq!(normalize("/a", "b//c///d"), "/a/b/c/d");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(normalize("/", "/releases/"), "/releases");
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        for (cwd, input) in [
            ("/x/y", "../z"),
            ("/", "a/b/./c/.."),
            ("/deep", "\\mixed/style\\p"),
        ] {
            let once = normalize(cwd, input);
            assert_eq!(normalize(&once, "."), once);
            assert_eq!(normalize("/", &once), once);
        }
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(base_name("/a/b/c"), "c");
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }
}
