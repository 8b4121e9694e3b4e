//! Verification runner adapter (external test + coverage command).

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::core::coverage::summarize;
use crate::core::types::{CommandReport, VerificationSummary};
use crate::io::config::OrchestratorConfig;
use crate::io::process::run_shell;

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub workdir: PathBuf,
    pub command: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl VerificationRequest {
    pub fn from_config(workdir: impl Into<PathBuf>, cfg: &OrchestratorConfig) -> Self {
        Self {
            workdir: workdir.into(),
            command: cfg.verification.command.clone(),
            timeout: cfg.verification_timeout(),
            output_limit_bytes: cfg.verification.output_limit_bytes,
        }
    }
}

/// Runs the verification suite. Infallible: failures are reports.
pub trait Verifier {
    fn run(&self, request: &VerificationRequest) -> CommandReport;
}

/// Runs the configured command through the platform shell.
pub struct ShellVerifier;

impl Verifier for ShellVerifier {
    fn run(&self, request: &VerificationRequest) -> CommandReport {
        run_shell(
            &request.command,
            &request.workdir,
            request.timeout,
            request.output_limit_bytes,
        )
    }
}

/// Run verification and interpret it against `threshold`.
pub fn verify<V: Verifier>(
    verifier: &V,
    request: &VerificationRequest,
    threshold: f64,
) -> (VerificationSummary, CommandReport) {
    let report = verifier.run(request);
    let summary = summarize(&report, threshold);
    info!(
        exit_code = ?report.exit_code,
        coverage = summary.coverage,
        coverage_ok = summary.coverage_ok,
        timed_out = summary.timed_out,
        "verification finished"
    );
    (summary, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVerifier {
        report: CommandReport,
    }

    impl Verifier for FakeVerifier {
        fn run(&self, _request: &VerificationRequest) -> CommandReport {
            self.report.clone()
        }
    }

    fn request(root: &std::path::Path) -> VerificationRequest {
        VerificationRequest::from_config(root, &OrchestratorConfig::default())
    }

    #[test]
    fn verify_interprets_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = FakeVerifier {
            report: CommandReport {
                exit_code: Some(0),
                output: "TOTAL 50 2 96%".to_string(),
                timed_out: false,
            },
        };
        let (summary, report) = verify(&verifier, &request(temp.path()), 95.0);
        assert!(summary.success());
        assert_eq!(summary.coverage, 96.0);
        assert!(report.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn shell_verifier_reports_missing_command_as_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut req = request(temp.path());
        req.command = "definitely-not-a-real-binary-xyz".to_string();
        let report = ShellVerifier.run(&req);
        assert!(!report.succeeded());
        assert_ne!(report.exit_code, Some(0));
    }
}
