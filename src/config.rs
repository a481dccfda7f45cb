//! `.plzconfig` parsing (spec.md §6): an INI-like file with bracketed
//! sections. Unknown sections/keys emit a warning but never fail the
//! parse — `.plzconfig.<profile>` overlays are loaded on top and override
//! matching keys.

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::ParseError,
    },
    #[error("invalid value for [{section}] {key} = {value:?}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PleaseSection {
    pub num_threads: Option<usize>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildSection {
    pub timeout_secs: Option<u64>,
    pub link_generated_sources: bool,
    pub update_gitignore: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ParseSection {
    pub build_file_name: Vec<String>,
    pub preload_subincludes: Vec<String>,
    pub preload_build_defs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheSection {
    pub http_url: Option<String>,
    pub retrieve_command: Option<String>,
    pub store_command: Option<String>,
    pub read_only: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TestSection {
    pub sandbox: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LicencesSection {
    pub accept: Vec<String>,
    pub reject: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Alias {
    pub cmd: String,
    pub positional_labels: bool,
}

#[derive(Debug, Clone)]
pub struct PlzConfig {
    pub please: PleaseSection,
    pub build: BuildSection,
    pub parse: ParseSection,
    pub cache: CacheSection,
    pub test: TestSection,
    pub buildconfig: HashMap<String, String>,
    pub licences: LicencesSection,
    pub aliases: HashMap<String, Alias>,
}

impl Default for PlzConfig {
    fn default() -> Self {
        Self {
            please: PleaseSection {
                num_threads: None,
                version: None,
            },
            build: BuildSection::default(),
            parse: ParseSection {
                build_file_name: vec!["BUILD".to_string()],
                ..Default::default()
            },
            cache: CacheSection::default(),
            test: TestSection::default(),
            buildconfig: HashMap::new(),
            licences: LicencesSection::default(),
            aliases: HashMap::new(),
        }
    }
}

impl PlzConfig {
    /// Load a `.plzconfig` file, then apply a `.plzconfig.<profile>`
    /// overlay on top if `profile` is given and the overlay file exists.
    pub fn load(path: &Path, profile: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if path.exists() {
            config.merge_file(path)?;
        }
        if let Some(profile) = profile {
            let overlay = path.with_file_name(format!(
                "{}.{profile}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ));
            if overlay.exists() {
                config.merge_file(&overlay)?;
            }
        }
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let ini = Ini::load_from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        for (section, props) in ini.iter() {
            match section.map(|s| s.as_str()) {
                Some("Please") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "NumThreads" => {
                                self.please.num_threads = parse_usize("Please", "NumThreads", v)?;
                            }
                            "Version" => self.please.version = Some(v.to_string()),
                            other => warn_unknown("Please", other),
                        }
                    }
                }
                Some("Build") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "Timeout" => {
                                self.build.timeout_secs = parse_u64("Build", "Timeout", v)?;
                            }
                            "LinkGeneratedSources" => {
                                self.build.link_generated_sources = parse_bool(v);
                            }
                            "UpdateGitignore" => self.build.update_gitignore = parse_bool(v),
                            other => warn_unknown("Build", other),
                        }
                    }
                }
                Some("Parse") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "BuildFileName" => self.parse.build_file_name.push(v.to_string()),
                            "PreloadSubincludes" => {
                                self.parse.preload_subincludes.push(v.to_string())
                            }
                            "PreloadBuildDefs" => self.parse.preload_build_defs.push(v.to_string()),
                            other => warn_unknown("Parse", other),
                        }
                    }
                }
                Some("Cache") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "httpurl" => self.cache.http_url = Some(v.to_string()),
                            "RetrieveCommand" => self.cache.retrieve_command = Some(v.to_string()),
                            "StoreCommand" => self.cache.store_command = Some(v.to_string()),
                            "read-only" | "ReadOnly" => self.cache.read_only = parse_bool(v),
                            "timeout" => self.cache.timeout_secs = parse_u64("Cache", "timeout", v)?,
                            other => warn_unknown("Cache", other),
                        }
                    }
                }
                Some("Test") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "sandbox" => self.test.sandbox = parse_bool(v),
                            other => warn_unknown("Test", other),
                        }
                    }
                }
                Some("Buildconfig") => {
                    for (k, v) in props.iter() {
                        self.buildconfig.insert(k.to_string(), v.to_string());
                    }
                }
                Some("Licences") => {
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "accept" => self.licences.accept.push(v.to_string()),
                            "reject" => self.licences.reject.push(v.to_string()),
                            other => warn_unknown("Licences", other),
                        }
                    }
                }
                Some(section) if section.starts_with("Alias ") => {
                    let name = section
                        .trim_start_matches("Alias ")
                        .trim_matches('"')
                        .to_string();
                    let mut alias = Alias::default();
                    for (k, v) in props.iter() {
                        match k.as_str() {
                            "cmd" => alias.cmd = v.to_string(),
                            "positionallabels" => alias.positional_labels = parse_bool(v),
                            other => warn_unknown("Alias", other),
                        }
                    }
                    self.aliases.insert(name, alias);
                }
                Some(other) => warn!(section = other, "unknown .plzconfig section"),
                None => {}
            }
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on")
}

fn parse_usize(section: &'static str, key: &'static str, v: &str) -> Result<Option<usize>, ConfigError> {
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            section,
            key,
            value: v.to_string(),
            reason: e.to_string(),
        })
}

fn parse_u64(section: &'static str, key: &'static str, v: &str) -> Result<Option<u64>, ConfigError> {
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            section,
            key,
            value: v.to_string(),
            reason: e.to_string(),
        })
}

fn warn_unknown(section: &'static str, key: &str) {
    warn!(section, key, "unknown .plzconfig key");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_known_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[Please]\nNumThreads = 8\n[Build]\nTimeout = 600\n[Buildconfig]\nfoo = bar\n"
        )
        .unwrap();
        let cfg = PlzConfig::load(file.path(), None).unwrap();
        assert_eq!(cfg.please.num_threads, Some(8));
        assert_eq!(cfg.build.timeout_secs, Some(600));
        assert_eq!(cfg.buildconfig.get("foo"), Some(&"bar".to_string()));
    }

    #[test]
    fn unknown_section_does_not_fail_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[TotallyUnknown]\nkey = value\n").unwrap();
        assert!(PlzConfig::load(file.path(), None).is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = PlzConfig::load(Path::new("/does/not/exist/.plzconfig"), None).unwrap();
        assert_eq!(cfg.parse.build_file_name, vec!["BUILD".to_string()]);
    }
}
