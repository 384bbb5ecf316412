//! Helpers for the backslash-separated, case-insensitive paths used inside
//! device images.

/// Split an image path into its non-empty components. Both `\` and `/`
/// separate.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['\\', '/']).filter(|c| !c.is_empty())
}

/// Canonical lookup key: lower-case, `\`-joined, no leading or trailing separators.
pub fn lookup_key(path: &str) -> String {
    components(path)
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("\\")
}

pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches(['\\', '/']);
    if base.is_empty() {
        name.to_owned()
    } else {
        format!("{base}\\{name}")
    }
}

pub fn file_name(path: &str) -> &str {
    components(path).last().unwrap_or("")
}

/// Case-insensitive wildcard match supporting `*` and `?`.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut n, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Partition names are fixed-width, NUL-padded on some disk formats.
pub fn partition_label(name: &str) -> &str {
    name.split('\0').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_key_normalizes() {
        assert_eq!(lookup_key(r"\Windows/System32\\Foo.DLL"), r"windows\system32\foo.dll");
        assert_eq!(lookup_key(""), "");
    }

    #[test]
    fn join_handles_empty_base() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join(r"Windows\", "a"), r"Windows\a");
    }

    #[test]
    fn file_name_is_last_component() {
        assert_eq!(file_name(r"a\b\c.mum"), "c.mum");
        assert_eq!(file_name("c.mum"), "c.mum");
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches_pattern("Foo.MUM", "*.mum"));
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("a1c", "a?c"));
        assert!(!matches_pattern("foo.cat", "*.mum"));
        assert!(matches_pattern("x.manifest.mum", "*.mum"));
        assert!(!matches_pattern("", "?"));
    }

    #[test]
    fn partition_label_stops_at_nul() {
        assert_eq!(partition_label("Data\0\0\0"), "Data");
        assert_eq!(partition_label("MainOS"), "MainOS");
    }
}
