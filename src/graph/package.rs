//! `Package` (spec.md §3): a directory holding a BUILD file, owning the
//! targets declared while evaluating it.

use std::collections::HashSet;

use crate::label::Label;

use super::target::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageState {
    Parsing,
    Parsed,
    ParseFailed,
}

pub struct Package {
    pub subrepo: Option<String>,
    /// Package-relative directory, e.g. `foo/bar` for `//foo/bar:target`.
    pub dir: String,
    /// Absolute filename of the BUILD file that was parsed.
    pub filename: String,
    pub state: PackageState,
    /// Labels seen via `subinclude` while evaluating this package, used to
    /// detect subinclude cycles and to avoid re-evaluating the same file.
    pub subincludes_seen: HashSet<Label>,
    targets: Vec<(String, TargetId)>,
    pub default_visibility: Vec<Label>,
    pub default_licences: Vec<String>,
}

impl Package {
    pub fn new(subrepo: Option<String>, dir: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            subrepo,
            dir: dir.into(),
            filename: filename.into(),
            state: PackageState::Parsing,
            subincludes_seen: HashSet::new(),
            targets: Vec::new(),
            default_visibility: Vec::new(),
            default_licences: Vec::new(),
        }
    }

    /// Declare a target by name. Returns `Err` if the name is already taken
    /// in this package (spec.md §3: "all target names inside a package are
    /// unique").
    pub fn declare_target(&mut self, name: &str, id: TargetId) -> Result<(), String> {
        if self.targets.iter().any(|(n, _)| n == name) {
            return Err(name.to_string());
        }
        self.targets.push((name.to_string(), id));
        Ok(())
    }

    pub fn target_id(&self, name: &str) -> Option<TargetId> {
        self.targets.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|(n, _)| n.as_str())
    }

    pub fn target_ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets.iter().map(|(_, id)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_target_name_is_rejected() {
        let mut pkg = Package::new(None, "foo", "foo/BUILD");
        pkg.declare_target("bar", TargetId(0)).unwrap();
        assert!(pkg.declare_target("bar", TargetId(1)).is_err());
    }

    #[test]
    fn target_lookup_by_name() {
        let mut pkg = Package::new(None, "foo", "foo/BUILD");
        pkg.declare_target("bar", TargetId(7)).unwrap();
        assert_eq!(pkg.target_id("bar"), Some(TargetId(7)));
        assert_eq!(pkg.target_id("missing"), None);
    }
}
