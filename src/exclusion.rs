use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Normalized set of lowercase file extensions to skip, e.g. `.tmp`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExclusionSet {
    extensions: BTreeSet<String>,
}

impl ExclusionSet {
    /// Build a set from raw entries, normalizing each one
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = entries
            .into_iter()
            .filter_map(|entry| normalize(entry.as_ref()))
            .collect();

        Self { extensions }
    }

    /// Parse comma or newline separated text such as ".tmp, .log"
    pub fn parse(text: &str) -> Self {
        Self::new(text.split([',', '\n']))
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: &ExclusionSet) {
        self.extensions.extend(other.extensions.iter().cloned());
    }

    /// Check whether an extension (with or without leading dot, any case) is excluded
    pub fn contains(&self, extension: &str) -> bool {
        match normalize(extension) {
            Some(ext) => self.extensions.contains(&ext),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.extensions.iter().cloned().collect()
    }
}

impl From<Vec<String>> for ExclusionSet {
    fn from(entries: Vec<String>) -> Self {
        Self::new(entries)
    }
}

impl From<ExclusionSet> for Vec<String> {
    fn from(set: ExclusionSet) -> Self {
        set.extensions.into_iter().collect()
    }
}

impl fmt::Display for ExclusionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(", "))
    }
}

fn normalize(entry: &str) -> Option<String> {
    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    if lower.starts_with('.') {
        Some(lower)
    }
    else {
        Some(format!(".{}", lower))
    }
}

/// Extract the lowercased extension of a file name, including the dot.
/// Leading dots of a dotfile do not start an extension.
pub fn extension_of(file_name: &str) -> Option<String> {
    let name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    let stem_start = name.len() - name.trim_start_matches('.').len();
    let body = &name[stem_start..];

    body.rfind('.').map(|idx| body[idx..].to_lowercase())
}

/// Decide whether a file is kept given the exclusion set
pub fn should_include(file_name: &str, exclusions: &ExclusionSet) -> bool {
    match extension_of(file_name) {
        Some(ext) => !exclusions.extensions.contains(&ext),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_whitespace_and_dot() {
        let set = ExclusionSet::new([" .TMP ", "log", "", "  "]);
        assert_eq!(set.to_vec(), vec![".log", ".tmp"]);
    }

    #[test]
    fn test_parse_comma_and_newline() {
        let set = ExclusionSet::parse(".tmp, .log\n.cache\n");
        assert_eq!(set.len(), 3);
        assert!(set.contains(".cache"));
        assert!(set.contains("LOG"));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a.txt"), Some(".txt".to_string()));
        assert_eq!(extension_of("Archive.TAR.GZ"), Some(".gz".to_string()));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of(".cache.tmp"), Some(".tmp".to_string()));
        assert_eq!(extension_of("dir/sub/file.Log"), Some(".log".to_string()));
    }

    #[test]
    fn test_should_include_case_insensitive() {
        let set = ExclusionSet::parse(".tmp");
        assert!(!should_include("b.tmp", &set));
        assert!(!should_include("B.TMP", &set));
        assert!(should_include("a.txt", &set));
    }

    #[test]
    fn test_files_without_extension_never_excluded() {
        let set = ExclusionSet::parse(".tmp, .bashrc");
        assert!(should_include("Makefile", &set));
        assert!(should_include(".bashrc", &set));
    }

    #[test]
    fn test_empty_set_includes_everything() {
        let set = ExclusionSet::default();
        assert!(set.is_empty());
        assert!(should_include("x.tmp", &set));
    }

    #[test]
    fn test_serde_as_list() {
        let set = ExclusionSet::parse(".tmp,.log");
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"[".log",".tmp"]"#);

        let back: ExclusionSet = serde_json::from_str(r#"["TMP", ".Log"]"#).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_display() {
        let set = ExclusionSet::parse(".tmp,.cache");
        assert_eq!(set.to_string(), ".cache, .tmp");
    }

    #[test]
    fn test_extend() {
        let mut set = ExclusionSet::parse(".tmp");
        set.extend(&ExclusionSet::parse(".log,.tmp"));
        assert_eq!(set.len(), 2);
    }
}
