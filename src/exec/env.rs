//! Deterministic environment construction (spec.md §4.5: "a deterministic
//! subset: the target's declared env plus a fixed allow-list ... Host env
//! is not inherited"), and the test-binary-visible variables of §6
//! (`RESULTS_FILE`, `SRCS`, `TOOLS_*`, ...).

/// Variables copied from the host environment if present, never anything
/// else — `exec` never does `std::env::vars()` wholesale.
const HOST_ALLOW_LIST: &[&str] = &["PATH", "HOME", "LANG", "TERM"];

#[derive(Debug, Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    /// Copies through the fixed host allow-list (spec.md's PATH/HOME plus
    /// a short extra set), then rewrites `TMPDIR` to the sandbox path.
    pub fn with_host_allow_list(mut self, sandbox_tmpdir: &str) -> Self {
        for key in HOST_ALLOW_LIST {
            if let Ok(value) = std::env::var(key) {
                self.vars.push((key.to_string(), value));
            }
        }
        self.vars.push(("TMPDIR".to_string(), sandbox_tmpdir.to_string()));
        self
    }

    pub fn with_arch_os(self, arch: &str, os: &str) -> Self {
        self.set("ARCH", arch)
            .set("OS", os)
            .set("XARCH", arch)
            .set("XOS", os)
    }

    /// The variables a test binary sees per spec.md's environment table:
    /// `RESULTS_FILE`, `TESTS`, `SRCS`, `SRC`, `OUTS`, `OUT`, `TMP_DIR`,
    /// `PKG`, `NAME`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_test_vars(
        self,
        results_file: &str,
        tests: &[String],
        srcs: &[String],
        outs: &[String],
        tmp_dir: &str,
        pkg: &str,
        name: &str,
    ) -> Self {
        let this = self
            .set("RESULTS_FILE", results_file)
            .set("TESTS", tests.join(" "))
            .set("SRCS", srcs.join(" "))
            .set("OUTS", outs.join(" "))
            .set("TMP_DIR", tmp_dir)
            .set("PKG", pkg)
            .set("NAME", name);
        match (srcs.first(), outs.first()) {
            (Some(src), Some(out)) => this.set("SRC", src.clone()).set("OUT", out.clone()),
            (Some(src), None) => this.set("SRC", src.clone()),
            (None, Some(out)) => this.set("OUT", out.clone()),
            (None, None) => this,
        }
    }

    pub fn with_tool(self, tool_name: &str, path: &str) -> Self {
        self.set(format!("TOOLS_{}", tool_name.to_uppercase()), path)
    }

    pub fn build(self) -> Vec<(String, String)> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_test_env_with_src_out_aliases() {
        let env = EnvBuilder::new()
            .with_test_vars(
                "/tmp/r.xml",
                &["//foo:bar".to_string()],
                &["a.go".to_string()],
                &["bin".to_string()],
                "/tmp/t",
                "foo",
                "bar",
            )
            .build();
        let map: std::collections::HashMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("SRC"), Some(&"a.go".to_string()));
        assert_eq!(map.get("OUT"), Some(&"bin".to_string()));
        assert_eq!(map.get("RESULTS_FILE"), Some(&"/tmp/r.xml".to_string()));
    }

    #[test]
    fn tool_binding_uppercases_name() {
        let env = EnvBuilder::new().with_tool("protoc", "/bin/protoc").build();
        assert_eq!(env[0], ("TOOLS_PROTOC".to_string(), "/bin/protoc".to_string()));
    }
}
