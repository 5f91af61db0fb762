//! Review code seeding.
//!
//! Ensures every code in the configured auto-approve and auto-reject lists
//! exists and is unused. Codes are processed one at a time; a failure is
//! reported for that code and the run moves on, so codes processed before it
//! stay committed.

use std::io::Write;

use domain::services::{
    InvitationLifecycle, InvitationStore, LifecycleError, SeedOutcome, SeedTemplate,
};
use tracing::{error, info, warn};

use crate::config::{ReviewCodesConfig, ReviewPolicy};

const RULE_WIDTH: usize = 60;

/// Result of seeding one code.
#[derive(Debug)]
pub struct CodeResult {
    pub code: String,
    pub outcome: Result<SeedOutcome, LifecycleError>,
}

/// Results for one policy list.
#[derive(Debug)]
pub struct PolicyReport {
    pub policy: ReviewPolicy,
    /// The list was empty or not configured.
    pub skipped: bool,
    pub results: Vec<CodeResult>,
}

/// Results of a whole seed run.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub policies: Vec<PolicyReport>,
}

impl SeedReport {
    pub fn results(&self) -> impl Iterator<Item = &CodeResult> {
        self.policies.iter().flat_map(|p| p.results.iter())
    }

    /// Outcome for `code`, if it was processed.
    pub fn outcome_of(&self, code: &str) -> Option<&Result<SeedOutcome, LifecycleError>> {
        self.results()
            .find(|result| result.code == code)
            .map(|result| &result.outcome)
    }

    pub fn processed(&self) -> usize {
        self.results().count()
    }

    pub fn failures(&self) -> usize {
        self.results().filter(|r| r.outcome.is_err()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }

    pub fn skipped(&self) -> Vec<ReviewPolicy> {
        self.policies
            .iter()
            .filter(|p| p.skipped)
            .map(|p| p.policy)
            .collect()
    }
}

fn status_line(result: &CodeResult, validity_days: i64) -> String {
    match &result.outcome {
        Ok(SeedOutcome::Created) => format!(
            "  [created]        {} (valid for {} days)",
            result.code, validity_days
        ),
        Ok(SeedOutcome::Reset) => format!(
            "  [reset]          {} (validity extended by {} days)",
            result.code, validity_days
        ),
        Ok(SeedOutcome::AlreadyActive) => {
            format!("  [already active] {} (no change)", result.code)
        }
        Err(e) => format!("  [failed]         {}: {}", result.code, e),
    }
}

/// Seeds both review code lists, printing one status line per code to `out`.
///
/// Only a failure to write to `out` aborts the run; per-code errors are
/// collected in the returned report.
pub async fn seed_review_codes<S, W>(
    lifecycle: &InvitationLifecycle<S>,
    config: &ReviewCodesConfig,
    out: &mut W,
) -> std::io::Result<SeedReport>
where
    S: InvitationStore,
    W: Write,
{
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "{}", rule)?;
    writeln!(out, "  Seeding review invitation codes")?;
    writeln!(out, "{}", rule)?;

    let mut report = SeedReport::default();

    for policy in ReviewPolicy::ALL {
        let codes = config.codes_for(policy);

        if codes.is_empty() {
            warn!(
                policy = %policy,
                env = policy.env_key(),
                "No review codes configured, skipping"
            );
            writeln!(out, "\n  {} is not configured, skipping", policy.env_key())?;
            report.policies.push(PolicyReport {
                policy,
                skipped: true,
                results: Vec::new(),
            });
            continue;
        }

        writeln!(out, "\n{}", "-".repeat(RULE_WIDTH / 3 * 2))?;
        writeln!(out, "  {} ({})", policy.notes(), policy.env_key())?;
        writeln!(out, "{}", "-".repeat(RULE_WIDTH / 3 * 2))?;

        let template =
            SeedTemplate::admin(policy.notes()).with_validity_window(config.validity_window());
        let mut results = Vec::with_capacity(codes.len());

        for code in codes {
            let outcome = lifecycle.ensure_seeded(&code, &template).await;
            match &outcome {
                Ok(outcome) => {
                    info!(code = %code, policy = %policy, outcome = %outcome, "Review code seeded")
                }
                Err(e) => {
                    error!(code = %code, policy = %policy, error = %e, "Failed to seed review code")
                }
            }

            let result = CodeResult { code, outcome };
            writeln!(out, "{}", status_line(&result, config.validity_days))?;
            results.push(result);
        }

        report.policies.push(PolicyReport {
            policy,
            skipped: false,
            results,
        });
    }

    writeln!(out, "\n{}", rule)?;
    writeln!(
        out,
        "Done: {} codes processed, {} failed",
        report.processed(),
        report.failures()
    )?;
    for policy_report in report.policies.iter().filter(|p| !p.skipped) {
        let codes: Vec<&str> = policy_report
            .results
            .iter()
            .map(|r| r.code.as_str())
            .collect();
        writeln!(out, "  {}: {}", policy_report.policy, codes.join(", "))?;
    }
    writeln!(out, "{}", rule)?;

    info!(
        processed = report.processed(),
        failed = report.failures(),
        "Review code seeding finished"
    );
    Ok(report)
}
