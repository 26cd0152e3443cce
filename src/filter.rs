use fanwatch_driver::PathFilter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::cli::Args;

/// Exclusion predicate assembled from the command line
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    prefixes: Vec<PathBuf>,
    skip_dirs: HashSet<String>,
}

impl ExcludeFilter {
    pub fn new(prefixes: Vec<PathBuf>, skip_dirs: HashSet<String>) -> Self {
        ExcludeFilter { prefixes, skip_dirs }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::new(args.exclude.clone(), args.skip_dirs())
    }
}

impl PathFilter for ExcludeFilter {
    fn is_excluded(&self, path: &Path) -> bool {
        if self.prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }

        path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            should_skip(&name, &self.skip_dirs)
        })
    }
}

fn should_skip(name: &str, skip_dirs: &HashSet<String>) -> bool {
    skip_dirs.iter().any(|skip| name.eq_ignore_ascii_case(skip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ExcludeFilter {
        let skip = [".git", "node_modules"].iter().map(|s| s.to_string()).collect();
        ExcludeFilter::new(vec![PathBuf::from("/proc"), PathBuf::from("/var/log")], skip)
    }

    #[test]
    fn test_should_skip() {
        let mut skip = HashSet::new();
        skip.insert("node_modules".to_string());
        skip.insert(".git".to_string());

        assert!(should_skip(".GIT", &skip));
        assert!(should_skip("node_modules", &skip));
        assert!(!should_skip("Documents", &skip));
    }

    #[test]
    fn test_prefix_exclusion() {
        let f = filter();
        assert!(f.is_excluded(Path::new("/proc/1/status")));
        assert!(f.is_excluded(Path::new("/var/log")));
        assert!(!f.is_excluded(Path::new("/var/logs")));
        assert!(!f.is_excluded(Path::new("/home/user/notes.txt")));
    }

    #[test]
    fn test_component_exclusion() {
        let f = filter();
        assert!(f.is_excluded(Path::new("/src/app/.git/objects")));
        assert!(f.is_excluded(Path::new("/src/app/node_modules")));
        assert!(!f.is_excluded(Path::new("/src/app/git/objects")));
    }
}
