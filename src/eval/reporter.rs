//! Renders eval results for terminals, CI logs and files.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::harness::{EvalError, EvalOutcome, EvalResult};
use crate::display::{THEME, TableBuilder, metric_row};

/// Report layout selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    /// Summary followed by one block per test
    Detailed,
    Json,
    /// Single line, for CI logs
    Compact,
}

/// Writes reports to any [`Write`] sink.
pub struct Reporter<W: Write> {
    writer: W,
}

impl Reporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn print(&mut self, result: &EvalResult, format: OutputFormat) -> std::io::Result<()> {
        match format {
            OutputFormat::Summary => self.print_summary(result),
            OutputFormat::Detailed => {
                self.print_summary(result)?;
                self.print_details(result)
            }
            OutputFormat::Json => self.print_json(result),
            OutputFormat::Compact => self.print_compact(result),
        }
    }

    /// Header, pass count and the aggregate metric table.
    pub fn print_summary(&mut self, result: &EvalResult) -> std::io::Result<()> {
        let w = &mut self.writer;
        let t = &result.thresholds;
        let m = &result.aggregate;

        writeln!(w)?;
        writeln!(w, "{}", THEME.apply(&THEME.header, "Search Evaluation Results"))?;
        writeln!(w, "Suite:    {}", result.suite_name)?;
        writeln!(w, "Time:     {}", result.timestamp.to_rfc3339())?;
        writeln!(w, "Duration: {:.0}ms", result.duration_ms)?;
        writeln!(w)?;

        let line = format!(
            "Tests: {}/{} passed ({:.1}%)",
            result.passed_tests,
            result.total_tests,
            result.pass_rate() * 100.0
        );
        let line = if result.all_passed() {
            THEME.pass_with_icon(&line)
        } else if result.pass_rate() < 0.5 {
            THEME.fail_with_icon(&line)
        } else {
            THEME.warning_with_icon(&line)
        };
        writeln!(w, "{line}")?;
        writeln!(w)?;

        let table = TableBuilder::new()
            .set_headers(vec!["", "Metric", "", "Value", "Target"])
            .add_cells(metric_row("Precision@1", m.precision_1, None))
            .add_cells(metric_row("Precision@5", m.precision_5, None))
            .add_cells(metric_row("Precision@10", m.precision_10, Some(t.precision_10)))
            .add_cells(metric_row("Recall@5", m.recall_5, None))
            .add_cells(metric_row("Recall@10", m.recall_10, Some(t.recall_10)))
            .add_cells(metric_row("Recall@50", m.recall_50, None))
            .add_cells(metric_row("MRR", m.mrr, Some(t.mrr)))
            .add_cells(metric_row("NDCG@5", m.ndcg_5, None))
            .add_cells(metric_row("NDCG@10", m.ndcg_10, Some(t.ndcg_10)))
            .add_cells(metric_row("MAP", m.map, None))
            .add_cells(metric_row("Hit Rate", m.hit_rate, Some(t.hit_rate)))
            .build();
        writeln!(w, "{table}")?;
        writeln!(w)
    }

    /// One block per test case.
    pub fn print_details(&mut self, result: &EvalResult) -> std::io::Result<()> {
        let w = &mut self.writer;
        writeln!(w, "{}", THEME.apply(&THEME.header, "Per-Test Results"))?;
        writeln!(w)?;

        for (i, test) in result.results.iter().enumerate() {
            let title = format!("Test {}: {}", i + 1, test.test_case.name);
            let title = if test.error.is_some() {
                THEME.fail_with_icon(&title)
            } else if !test.passed {
                THEME.warning_with_icon(&title)
            } else {
                THEME.pass_with_icon(&title)
            };
            writeln!(w, "{title}")?;
            writeln!(w, "   Query: {:?}", truncate(&test.test_case.query, 50))?;
            writeln!(
                w,
                "   Method: {} | Duration: {:.2}ms",
                test.search_method, test.duration_ms
            )?;

            match &test.error {
                Some(error) => writeln!(w, "   Error: {error}")?,
                None => {
                    let m = &test.metrics;
                    writeln!(
                        w,
                        "   P@10: {:.2} | R@10: {:.2} | MRR: {:.2} | NDCG@10: {:.2}",
                        m.precision_10, m.recall_10, m.mrr, m.ndcg_10
                    )?;
                    writeln!(
                        w,
                        "   Expected: {} | Returned: {} | Hit: {}",
                        test.test_case.expected.len(),
                        test.returned.len(),
                        m.hit_rate > 0.0
                    )?;
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn print_json(&mut self, result: &EvalResult) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, result)?;
        writeln!(self.writer)
    }

    /// `[PASS] 4/5 tests | P@10=.. R@10=.. MRR=.. NDCG=.. HitRate=.. | 12ms`
    pub fn print_compact(&mut self, result: &EvalResult) -> std::io::Result<()> {
        let m = &result.aggregate;
        writeln!(
            self.writer,
            "[{}] {}/{} tests | P@10={:.2} R@10={:.2} MRR={:.2} NDCG={:.2} HitRate={:.2} | {:.0}ms",
            if result.all_passed() { "PASS" } else { "FAIL" },
            result.passed_tests,
            result.total_tests,
            m.precision_10,
            m.recall_10,
            m.mrr,
            m.ndcg_10,
            m.hit_rate,
            result.duration_ms
        )
    }
}

/// Writes `result` as pretty JSON to `path`.
pub fn save_json(result: &EvalResult, path: &Path) -> EvalOutcome<()> {
    let write_error = |source| EvalError::Write {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other).map_err(write_error)?;
    std::fs::write(path, json).map_err(write_error)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
