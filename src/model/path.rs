//! Element paths (`a::b::C`).

pub const SEPARATOR: &str = "::";

/// Split a path into its segments. `Root` and the empty path have none.
pub fn segments(path: &str) -> Vec<&str> {
    if path.is_empty() || path == "Root" {
        return Vec::new();
    }
    path.split(SEPARATOR).collect()
}

pub fn simple_name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// Package part of a path; empty for top-level names.
pub fn package_of(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(i) => &path[..i],
        None => "",
    }
}

pub fn join(package: &str, name: &str) -> String {
    if package.is_empty() || package == "Root" {
        name.to_string()
    } else {
        format!("{package}{SEPARATOR}{name}")
    }
}

pub fn is_qualified(path: &str) -> bool {
    path.contains(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(segments("a::b::C"), vec!["a", "b", "C"]);
        assert!(segments("Root").is_empty());
        assert_eq!(simple_name("a::b::C"), "C");
        assert_eq!(simple_name("C"), "C");
        assert_eq!(package_of("a::b::C"), "a::b");
        assert_eq!(package_of("C"), "");
        assert_eq!(join("a::b", "C"), "a::b::C");
        assert_eq!(join("", "C"), "C");
        assert!(is_qualified("a::C"));
    }
}
