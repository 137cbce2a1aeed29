//! Include/exclude path filtering using the `globset` crate.
//!
//! Patterns match the basename of a candidate path. Excludes win over
//! includes; an empty include set accepts everything.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::Result;

/// A compiled include/exclude filter.
pub struct PathFilter {
    includes: GlobSet,
    excludes: GlobSet,
    has_includes: bool,
}

impl PathFilter {
    pub fn new(includes: &[String], excludes: &[String], case_insensitive: bool) -> Result<Self> {
        Ok(PathFilter {
            includes: build_globset(includes, case_insensitive)?,
            excludes: build_globset(excludes, case_insensitive)?,
            has_includes: !includes.is_empty(),
        })
    }

    /// Returns true if the path survives the filter.
    pub fn matches(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        if self.excludes.is_match(name) {
            return false;
        }
        if !self.has_includes {
            return true;
        }
        self.includes.is_match(name)
    }
}

fn build_globset(patterns: &[String], case_insensitive: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(includes: &[&str], excludes: &[&str]) -> PathFilter {
        let inc: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
        let exc: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
        PathFilter::new(&inc, &exc, false).unwrap()
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let f = filter(&[], &[]);
        assert!(f.matches("src/lib.rs"));
        assert!(f.matches("README"));
    }

    #[test]
    fn includes_restrict_to_matches() {
        let f = filter(&["*.rs"], &[]);
        assert!(f.matches("src/lib.rs"));
        assert!(!f.matches("notes.md"));
    }

    #[test]
    fn excludes_win_over_includes() {
        let f = filter(&["*.rs"], &["lib.rs"]);
        assert!(!f.matches("src/lib.rs"));
        assert!(f.matches("src/main.rs"));
    }

    #[test]
    fn matches_basename_not_full_path() {
        let f = filter(&["*.c"], &[]);
        assert!(f.matches("deep/nested/dir/x.c"));
        assert!(!f.matches("x.c/readme.txt"));
    }

    #[test]
    fn case_insensitive_globs() {
        let inc = vec!["*.RS".to_string()];
        let f = PathFilter::new(&inc, &[], true).unwrap();
        assert!(f.matches("lib.rs"));
    }

    #[test]
    fn malformed_pattern_is_an_error() {
        let inc = vec!["a[".to_string()];
        assert!(PathFilter::new(&inc, &[], false).is_err());
    }
}
