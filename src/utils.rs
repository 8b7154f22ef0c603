/// Path processing utility functions.

/// Clean and normalize a request path:
/// 1. Ensure the path starts with /
/// 2. Collapse duplicate slashes and resolve . and .. segments
pub fn fix_and_clean_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    clean_path(&path)
}

fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Split a cleaned request path into (mount name, object key).
/// The key is empty when the path addresses the mount root, in which
/// case a bucket listing is served instead of an object.
pub fn split_mount(path: &str) -> (String, String) {
    let cleaned = fix_and_clean_path(path);
    let trimmed = cleaned.trim_start_matches('/');

    match trimmed.split_once('/') {
        Some((mount, key)) => (mount.to_string(), key.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Percent-encode an object key for use in an href, keeping the /
/// separators between segments intact.
pub fn encode_key_for_href(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Minimal HTML escaping for text nodes and attribute values.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_and_clean_path() {
        assert_eq!(fix_and_clean_path(""), "/");
        assert_eq!(fix_and_clean_path("."), "/");
        assert_eq!(fix_and_clean_path(".."), "/");
        assert_eq!(fix_and_clean_path("../.."), "/");
        assert_eq!(fix_and_clean_path("a/b/c"), "/a/b/c");
        assert_eq!(fix_and_clean_path("/a/b/c"), "/a/b/c");
        assert_eq!(fix_and_clean_path("/a//b///c"), "/a/b/c");
        assert_eq!(fix_and_clean_path("/a/./b/../c"), "/a/c");
    }

    #[test]
    fn test_split_mount() {
        assert_eq!(split_mount("/data/file.txt"), ("data".into(), "file.txt".into()));
        assert_eq!(split_mount("/data/dir/file.txt"), ("data".into(), "dir/file.txt".into()));
        assert_eq!(split_mount("/data"), ("data".into(), "".into()));
        assert_eq!(split_mount("/data/"), ("data".into(), "".into()));
        assert_eq!(split_mount("/"), ("".into(), "".into()));
        // .. cannot escape above the mount root
        assert_eq!(split_mount("/data/../other/x"), ("other".into(), "x".into()));
    }

    #[test]
    fn test_encode_key_for_href() {
        assert_eq!(encode_key_for_href("a/b c.txt"), "a/b%20c.txt");
        assert_eq!(encode_key_for_href("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("a<b>&\"'"), "a&lt;b&gt;&amp;&quot;&#39;");
    }
}
