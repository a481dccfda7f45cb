//! Target labels: `//package:name`, `@subrepo//package:name`, `:name`
//! shorthand, `//pkg/...` recursive, `//pkg:all`, and an optional
//! `|annotation` suffix naming an entry point.
//!
//! Labels are the only identity of a target (spec.md §3) and are totally
//! orderable by `(subrepo, package, name)`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("empty label")]
    Empty,
    #[error("label {0:?} is missing the leading '//' or ':' marker")]
    MissingMarker(String),
    #[error("label {0:?} has an empty target name")]
    EmptyName,
    #[error("label {0:?} has an invalid character {1:?} in {2}")]
    InvalidChar(String, char, &'static str),
}

/// The matching rule a label describes beyond a single named target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    /// `//pkg:name` — exactly one target.
    Single,
    /// `//pkg:all` — every visible target in the package.
    AllInPackage,
    /// `//pkg/...` — every visible target in the package and its
    /// subdirectories, recursively.
    Recursive,
}

#[derive(Debug, Clone, Eq)]
pub struct Label {
    pub subrepo: Option<String>,
    pub package: String,
    pub name: String,
    pub annotation: Option<String>,
    pub kind: LabelKind,
}

impl Label {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subrepo: None,
            package: package.into(),
            name: name.into(),
            annotation: None,
            kind: LabelKind::Single,
        }
    }

    pub fn with_subrepo(mut self, subrepo: impl Into<String>) -> Self {
        self.subrepo = Some(subrepo.into());
        self
    }

    /// Resolve a possibly-relative label (`:name`) against the package of
    /// the file it was written in.
    pub fn parse_relative(s: &str, current_package: &str) -> Result<Self, LabelError> {
        if let Some(rest) = s.strip_prefix(':') {
            return Self::parse(&format!("//{current_package}:{rest}"));
        }
        Self::parse(s)
    }

    pub fn parse(s: &str) -> Result<Self, LabelError> {
        if s.is_empty() {
            return Err(LabelError::Empty);
        }

        let (annotation, body) = match s.split_once('|') {
            Some((body, ann)) => (Some(ann.to_string()), body),
            None => (None, s),
        };

        let (subrepo, rest) = if let Some(stripped) = body.strip_prefix('@') {
            let sep = stripped
                .find("//")
                .ok_or_else(|| LabelError::MissingMarker(s.to_string()))?;
            (Some(stripped[..sep].to_string()), &stripped[sep..])
        } else {
            (None, body)
        };

        let rest = rest
            .strip_prefix("//")
            .ok_or_else(|| LabelError::MissingMarker(s.to_string()))?;

        if let Some(pkg) = rest.strip_suffix("/...") {
            validate_package(pkg, s)?;
            return Ok(Label {
                subrepo,
                package: pkg.to_string(),
                name: String::new(),
                annotation,
                kind: LabelKind::Recursive,
            });
        }

        let (package, name) = rest
            .split_once(':')
            .ok_or_else(|| LabelError::MissingMarker(s.to_string()))?;
        validate_package(package, s)?;
        if name.is_empty() {
            return Err(LabelError::EmptyName);
        }
        for c in name.chars() {
            if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '#')) {
                return Err(LabelError::InvalidChar(s.to_string(), c, "target name"));
            }
        }

        let kind = if name == "all" {
            LabelKind::AllInPackage
        } else {
            LabelKind::Single
        };

        Ok(Label {
            subrepo,
            package: package.to_string(),
            name: name.to_string(),
            annotation,
            kind,
        })
    }

    /// True if this label's name begins a hidden child target
    /// (`_foo#bar`) — these share their visible parent's fate for
    /// reporting and garbage collection (spec.md §3).
    pub fn is_hidden_child(&self) -> bool {
        self.name.starts_with('_') && self.name.contains('#')
    }

    /// The visible parent label of a hidden child, if this is one.
    pub fn visible_parent(&self) -> Option<Label> {
        if !self.is_hidden_child() {
            return None;
        }
        let parent_name = self.name.trim_start_matches('_');
        let parent_name = parent_name.split('#').next().unwrap_or(parent_name);
        Some(Label {
            subrepo: self.subrepo.clone(),
            package: self.package.clone(),
            name: parent_name.to_string(),
            annotation: None,
            kind: LabelKind::Single,
        })
    }
}

fn validate_package(package: &str, original: &str) -> Result<(), LabelError> {
    for c in package.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')) {
            return Err(LabelError::InvalidChar(
                original.to_string(),
                c,
                "package path",
            ));
        }
    }
    Ok(())
}

impl FromStr for Label {
    type Err = LabelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::parse(s)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sub) = &self.subrepo {
            write!(f, "@{sub}")?;
        }
        write!(f, "//{}", self.package)?;
        match self.kind {
            LabelKind::Recursive => write!(f, "/...")?,
            _ => write!(f, ":{}", self.name)?,
        }
        if let Some(ann) = &self.annotation {
            write!(f, "|{ann}")?;
        }
        Ok(())
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.subrepo == other.subrepo && self.package == other.package && self.name == other.name
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.subrepo, &self.package, &self.name).cmp(&(
            &other.subrepo,
            &other.package,
            &other.name,
        ))
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Label {
    // Must hash exactly the fields `PartialEq` compares — annotation and
    // kind are deliberately excluded, same as `==` ignores them.
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.subrepo.hash(state);
        self.package.hash(state);
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_label() {
        let l = Label::parse("//foo/bar:baz").unwrap();
        assert_eq!(l.package, "foo/bar");
        assert_eq!(l.name, "baz");
        assert!(l.subrepo.is_none());
        assert_eq!(l.kind, LabelKind::Single);
    }

    #[test]
    fn parses_subrepo_label() {
        let l = Label::parse("@toolchain//foo:baz|run_me").unwrap();
        assert_eq!(l.subrepo.as_deref(), Some("toolchain"));
        assert_eq!(l.annotation.as_deref(), Some("run_me"));
    }

    #[test]
    fn parses_all_and_recursive() {
        let all = Label::parse("//foo:all").unwrap();
        assert_eq!(all.kind, LabelKind::AllInPackage);
        let rec = Label::parse("//foo/...").unwrap();
        assert_eq!(rec.kind, LabelKind::Recursive);
    }

    #[test]
    fn relative_label_resolves_against_package() {
        let l = Label::parse_relative(":baz", "foo/bar").unwrap();
        assert_eq!(l.package, "foo/bar");
        assert_eq!(l.name, "baz");
    }

    #[test]
    fn ordering_is_by_subrepo_then_package_then_name() {
        let a = Label::parse("//a:z").unwrap();
        let b = Label::parse("//b:a").unwrap();
        assert!(a < b);
    }

    #[test]
    fn rejects_missing_marker() {
        assert_eq!(
            Label::parse("foo:bar"),
            Err(LabelError::MissingMarker("foo:bar".to_string()))
        );
    }

    #[test]
    fn equal_labels_with_different_annotations_hash_the_same() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = Label::parse("//foo:bar|run_me").unwrap();
        let b = Label::parse("//foo:bar").unwrap();
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn hidden_child_shares_visible_parent() {
        let hidden = Label::parse("//foo:_bar#gen").unwrap();
        assert!(hidden.is_hidden_child());
        let parent = hidden.visible_parent().unwrap();
        assert_eq!(parent.name, "bar");
    }
}
