//! Per-file line coverage accumulation (spec.md §4.6: "Optional coverage
//! instrumentation produces a per-file line-level coverage stream; the
//! coverage accumulator merges across targets and exposes ordered-by-file
//! queries").

use std::collections::BTreeMap;

/// Line numbers hit at least once, for one file, across every target that
/// touched it. A `BTreeMap` keeps per-file entries ordered by line number
/// without a separate sort step.
#[derive(Debug, Clone, Default)]
pub struct FileCoverage {
    hit_lines: BTreeMap<u32, u32>,
    total_lines: u32,
}

impl FileCoverage {
    pub fn record_total_lines(&mut self, total: u32) {
        self.total_lines = self.total_lines.max(total);
    }

    pub fn record_hit(&mut self, line: u32) {
        *self.hit_lines.entry(line).or_insert(0) += 1;
    }

    pub fn lines_hit(&self) -> usize {
        self.hit_lines.len()
    }

    pub fn percent(&self) -> f64 {
        if self.total_lines == 0 {
            return 0.0;
        }
        (self.lines_hit() as f64 / self.total_lines as f64) * 100.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoverageAccumulator {
    // Keyed by file path; `BTreeMap` gives the "ordered-by-file" query the
    // spec names for free, with no separate sort at read time.
    files: BTreeMap<String, FileCoverage>,
}

impl CoverageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, file: &str, total_lines: u32, hit_lines: &[u32]) {
        let entry = self.files.entry(file.to_string()).or_default();
        entry.record_total_lines(total_lines);
        for &line in hit_lines {
            entry.record_hit(line);
        }
    }

    /// Ordered-by-file query: `(path, percent covered)` pairs, sorted by
    /// path.
    pub fn by_file(&self) -> Vec<(String, f64)> {
        self.files.iter().map(|(path, cov)| (path.clone(), cov.percent())).collect()
    }

    pub fn overall_percent(&self) -> f64 {
        let (total, hit) = self.files.values().fold((0u64, 0u64), |(t, h), cov| {
            (t + cov.total_lines as u64, h + cov.lines_hit() as u64)
        });
        if total == 0 {
            return 0.0;
        }
        (hit as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_coverage_from_multiple_targets() {
        let mut acc = CoverageAccumulator::new();
        acc.merge("a.go", 10, &[1, 2, 3]);
        acc.merge("a.go", 10, &[3, 4]);
        acc.merge("b.go", 4, &[1]);

        let by_file = acc.by_file();
        assert_eq!(by_file[0].0, "a.go");
        assert_eq!(by_file[1].0, "b.go");
        assert!((by_file[0].1 - 40.0).abs() < 1e-9);
    }

    #[test]
    fn overall_percent_combines_all_files() {
        let mut acc = CoverageAccumulator::new();
        acc.merge("a.go", 10, &[1, 2]);
        acc.merge("b.go", 10, &[1, 2, 3, 4]);
        assert!((acc.overall_percent() - 30.0).abs() < 1e-9);
    }
}
