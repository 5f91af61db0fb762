//! Command dispatch for the admin binary.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use domain::models::{CreatorCodes, CreatorType, GenerateCodesRequest, InvitationCode};
use domain::services::{InvitationLifecycle, InvitationStore};
use tracing::warn;

use crate::args::Command;
use crate::config::Config;
use crate::seed::seed_review_codes;

/// Admin user id recorded on codes created from the command line.
const CLI_ADMIN_ID: i64 = 0;

/// How a command finished, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Some items failed; the rest were committed.
    PartialFailure,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => ExitCode::SUCCESS,
            RunStatus::PartialFailure => ExitCode::from(2),
        }
    }
}

/// Runs one command against the lifecycle service, writing its output to `out`.
pub async fn execute<S, W>(
    cmd: Command,
    config: &Config,
    lifecycle: &InvitationLifecycle<S>,
    out: &mut W,
) -> anyhow::Result<RunStatus>
where
    S: InvitationStore,
    W: Write,
{
    match cmd {
        Command::SeedReviewCodes => {
            let report = seed_review_codes(lifecycle, &config.review, out)
                .await
                .context("Failed to write seed report")?;
            if report.has_failures() {
                warn!(failed = report.failures(), "Some review codes could not be seeded");
                return Ok(RunStatus::PartialFailure);
            }
        }
        Command::Generate {
            count,
            notes,
            days,
            for_user,
        } => {
            let (created_by, created_by_type, default_notes) = match for_user {
                Some(user_id) => (
                    user_id,
                    CreatorType::User,
                    format!("invitation quota of user {}", user_id),
                ),
                None => (
                    CLI_ADMIN_ID,
                    CreatorType::Admin,
                    "generated by administrator".to_string(),
                ),
            };
            let request = GenerateCodesRequest {
                count,
                notes: Some(notes.unwrap_or(default_notes)),
                validity_days: days,
            };
            let codes = lifecycle
                .generate(&request, created_by, created_by_type)
                .await?;
            for code in &codes {
                writeln!(out, "{}", code.code)?;
            }
            writeln!(out, "Generated {} codes", codes.len())?;
        }
        Command::List {
            created_by: Some(created_by),
            creator_type,
            json,
            ..
        } => {
            let summary = lifecycle.creator_codes(created_by, creator_type).await?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &summary)?;
                writeln!(out)?;
            } else {
                write_creator_codes(out, &summary)?;
            }
        }
        Command::List {
            limit,
            offset,
            include_used,
            json,
            ..
        } => {
            let codes = lifecycle.list(include_used, limit, offset).await?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &codes)?;
                writeln!(out)?;
            } else {
                for code in &codes {
                    writeln!(out, "{}", list_line(code))?;
                }
            }
        }
        Command::Stats { json } => {
            let stats = lifecycle.stats().await?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &stats)?;
                writeln!(out)?;
            } else {
                writeln!(out, "Total codes:     {}", stats.total)?;
                writeln!(out, "Used codes:      {}", stats.used)?;
                writeln!(out, "Expired codes:   {}", stats.expired)?;
                writeln!(out, "Available codes: {}", stats.available())?;
            }
        }
    }

    Ok(RunStatus::Success)
}

fn write_creator_codes<W: Write>(out: &mut W, summary: &CreatorCodes) -> std::io::Result<()> {
    writeln!(
        out,
        "Codes of {} {}: {} total, {} used, {} available",
        summary.created_by_type,
        summary.created_by,
        summary.stats.total,
        summary.stats.used,
        summary.stats.available()
    )?;
    for code in &summary.codes {
        writeln!(out, "{}", list_line(code))?;
    }
    Ok(())
}

fn list_line(code: &InvitationCode) -> String {
    let status = match code.state.redemption() {
        Some(redemption) => format!(
            "used by {} at {}",
            redemption.used_by.as_deref().unwrap_or("-"),
            redemption.used_at.format("%Y-%m-%d %H:%M")
        ),
        None => "unused".to_string(),
    };
    format!(
        "{:<16} {:<40} expires {}  {}",
        code.code,
        status,
        code.expire_at.format("%Y-%m-%d"),
        code.notes.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()
}
