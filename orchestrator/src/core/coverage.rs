//! Coverage extraction and verification interpretation.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{CommandReport, VerificationSummary};

/// Slack applied when comparing coverage against the threshold.
pub const COVERAGE_TOLERANCE: f64 = 1e-6;

static TOTAL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TOTAL\s+\d+\s+\d+\s+(\d+)%").expect("valid TOTAL regex"));
static COVERAGE_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,3})%\s*coverage").expect("valid coverage regex"));

/// Extract the coverage percent from verification output; 0 when absent.
///
/// The `TOTAL <stmts> <miss> <pct>%` summary row wins over the looser
/// `<pct>% coverage` phrase.
pub fn parse_coverage(output: &str) -> f64 {
    [&*TOTAL_LINE, &*COVERAGE_PHRASE]
        .into_iter()
        .find_map(|pattern| {
            pattern
                .captures(output)
                .and_then(|caps| caps.get(1))
                .and_then(|value| value.as_str().parse::<f64>().ok())
        })
        .unwrap_or(0.0)
}

pub fn meets_threshold(coverage: f64, threshold: f64) -> bool {
    coverage >= threshold - COVERAGE_TOLERANCE
}

/// Interpret a raw command report against the coverage threshold.
pub fn summarize(report: &CommandReport, threshold: f64) -> VerificationSummary {
    let coverage = parse_coverage(&report.output);
    VerificationSummary {
        coverage,
        coverage_ok: meets_threshold(coverage, threshold),
        tests_ok: report.succeeded(),
        timed_out: report.timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(exit_code: Option<i32>, output: &str) -> CommandReport {
        CommandReport {
            exit_code,
            output: output.to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn parses_total_row() {
        let output = "Name    Stmts   Miss  Cover\nTOTAL     120      6    95%\n";
        assert_eq!(parse_coverage(output), 95.0);
    }

    #[test]
    fn falls_back_to_coverage_phrase() {
        assert_eq!(parse_coverage("Required test coverage of 95% reached. 97% Coverage"), 97.0);
        assert_eq!(parse_coverage("88% coverage"), 88.0);
    }

    #[test]
    fn missing_summary_is_zero() {
        assert_eq!(parse_coverage("3 passed in 0.1s"), 0.0);
    }

    #[test]
    fn success_requires_exit_zero_and_threshold() {
        let ok = summarize(&report(Some(0), "TOTAL 10 0 95%"), 95.0);
        assert!(ok.success());

        let low = summarize(&report(Some(0), "TOTAL 10 1 90%"), 95.0);
        assert!(low.tests_ok);
        assert!(!low.coverage_ok);
        assert!(!low.success());

        let failing = summarize(&report(Some(1), "TOTAL 10 0 100%"), 95.0);
        assert!(!failing.success());

        let unspawned = summarize(&report(None, ""), 0.0);
        assert!(unspawned.coverage_ok);
        assert!(!unspawned.tests_ok);
    }
}
