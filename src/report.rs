use log::error;

use crate::error::HarnessResult;

/// Aggregate outcome of one harness run
///
/// ランナーごとに1つ作って明示的に受け渡す。グローバルなカウンタは持たない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunResult {
    pub total: usize,
    pub passed: usize,
    pub failed_names: Vec<String>,
}

impl TestRunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&mut self) {
        self.total += 1;
        self.passed += 1;
    }

    pub fn record_failure(&mut self, name: impl Into<String>) {
        self.total += 1;
        self.failed_names.push(name.into());
    }

    /// Record an outcome and print the `Passed.` / `Failed.` trace line
    pub fn record(&mut self, name: &str, outcome: HarnessResult<()>) {
        match outcome {
            Ok(()) => {
                println!("Passed.");
                self.record_pass();
            }
            Err(e) => {
                println!("Failed.");
                error!("{}: {}", name, e);
                self.record_failure(name);
            }
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.passed
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Process exit code for the runner: 0 when everything passed
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Failing names followed by the `<passed> / <total> passed` line
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.failed_names.is_empty() {
            lines.push("Failing tests:".to_string());
            for name in &self.failed_names {
                lines.push(format!("\t {}", name));
            }
        }
        lines.push(format!("{} / {} passed", self.passed, self.total));
        lines
    }

    pub fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{}", line);
        }
    }
}
