// Command-line shell: headless commands and the interactive menu
//
// Everything here goes through the service's public operations; nothing talks
// to the HTTP layer directly.

use anyhow::Context;
use chrono::Utc;
use dialoguer::{Confirm, Select};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::auth::Capability;
use crate::config::CliArgs;
use crate::error::{ApiError, Result};
use crate::health::{self, HealthReport, HealthThresholds};
use crate::models::{Aggregate, BuildOutcome, CubeTarget};
use crate::report::{csv_export, history, listing, statistics};
use crate::service::{AggregateService, PollOptions, WaitOutcome};

/// History entries fetched for reports and health checks
const HISTORY_DEPTH: usize = 50;

/// Cubes fetched concurrently when several are listed at once
const LIST_CONCURRENCY: usize = 4;

/// Work on a single cube
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeAction {
    ListAggregates,
    ExportCsv,
    Statistics,
    Health,
    BuildHistory,
    Rebuild { full_build: bool, wait: bool },
}

impl CubeAction {
    pub fn label(&self) -> &'static str {
        match self {
            CubeAction::ListAggregates => "List aggregates",
            CubeAction::ExportCsv => "Export aggregates to CSV",
            CubeAction::Statistics => "Show aggregate statistics",
            CubeAction::Health => "Aggregate health check",
            CubeAction::BuildHistory => "Aggregate build history",
            CubeAction::Rebuild { .. } => "Rebuild aggregates",
        }
    }
}

/// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Interactive,
    ListProjects,
    Cube {
        catalog_id: String,
        cube_id: String,
        actions: Vec<CubeAction>,
    },
}

impl Command {
    /// Resolve the command from parsed arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        if args.list_projects {
            return Ok(Command::ListProjects);
        }

        let mut actions = Vec::new();
        if args.list_aggregates {
            actions.push(CubeAction::ListAggregates);
        }
        if args.export_csv {
            actions.push(CubeAction::ExportCsv);
        }
        if args.statistics {
            actions.push(CubeAction::Statistics);
        }
        if args.health {
            actions.push(CubeAction::Health);
        }
        if args.build_history {
            actions.push(CubeAction::BuildHistory);
        }
        if args.rebuild {
            actions.push(CubeAction::Rebuild {
                full_build: !args.incremental,
                wait: args.wait,
            });
        }

        let ids = (
            args.project_id.as_deref().filter(|s| !s.trim().is_empty()),
            args.cube_id.as_deref().filter(|s| !s.trim().is_empty()),
        );

        match (actions.is_empty(), ids) {
            (true, (None, None)) => Ok(Command::Interactive),
            (true, _) => Err(ApiError::ValidationError(
                "--project-id/--cube-id need an action such as --list-aggregates".to_string(),
            )),
            (false, (Some(catalog_id), Some(cube_id))) => Ok(Command::Cube {
                catalog_id: catalog_id.to_string(),
                cube_id: cube_id.to_string(),
                actions,
            }),
            (false, _) => Err(ApiError::ValidationError(format!(
                "--project-id and --cube-id are required for {}",
                actions
                    .iter()
                    .map(|a| a.label().to_lowercase())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

pub struct Shell {
    service: AggregateService,
    output_dir: PathBuf,
    thresholds: HealthThresholds,
    poll: PollOptions,
}

impl Shell {
    pub fn new(
        service: AggregateService,
        output_dir: PathBuf,
        thresholds: HealthThresholds,
        poll: PollOptions,
    ) -> Self {
        Self {
            service,
            output_dir,
            thresholds,
            poll,
        }
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Interactive => self.interactive().await,
            Command::ListProjects => {
                let catalogs = self.service.list_catalogs().await?;
                print!("{}", listing::render_catalogs(&catalogs));
                Ok(())
            }
            Command::Cube {
                catalog_id,
                cube_id,
                actions,
            } => {
                let target = self.service.find_cube(&catalog_id, &cube_id).await?;
                println!("Target: {}", target);
                for action in actions {
                    self.run_action(&target, action).await?;
                }
                Ok(())
            }
        }
    }

    async fn run_action(&self, target: &CubeTarget, action: CubeAction) -> Result<()> {
        tracing::info!(cube = %target, action = action.label(), "Running action");
        match action {
            CubeAction::ListAggregates => {
                let aggregates = self.aggregates(target).await?;
                let report = self.health(target, &aggregates).await?;
                print!("{}", listing::render_aggregates(&aggregates, Some(&report)));
            }
            CubeAction::ExportCsv => {
                let aggregates = self.aggregates(target).await?;
                let report = self.health(target, &aggregates).await?;
                let path = csv_export::export(
                    &self.output_dir,
                    &target.cube_name,
                    &aggregates,
                    Some(&report),
                )?;
                println!(
                    "Exported {} aggregate(s) to {}",
                    aggregates.len(),
                    path.display()
                );
            }
            CubeAction::Statistics => {
                let aggregates = self.aggregates(target).await?;
                print!("{}", statistics::render(&statistics::compute(&aggregates)));
            }
            CubeAction::Health => {
                let aggregates = self.aggregates(target).await?;
                let report = self.health(target, &aggregates).await?;
                print!("{}", listing::render_health(&report));
            }
            CubeAction::BuildHistory => {
                let entries = self
                    .service
                    .get_build_history(&target.catalog_id, &target.cube_id, HISTORY_DEPTH)
                    .await?;
                print!("{}", history::render(&history::summarize(&entries)));
            }
            CubeAction::Rebuild { full_build, wait } => {
                self.rebuild(target, full_build, wait).await?;
            }
        }
        Ok(())
    }

    async fn aggregates(&self, target: &CubeTarget) -> Result<Vec<Aggregate>> {
        self.service
            .list_aggregates(&target.catalog_id, &target.cube_id)
            .await
    }

    /// Health check, including build history when the credentials allow it
    async fn health(&self, target: &CubeTarget, aggregates: &[Aggregate]) -> Result<HealthReport> {
        let history = if self.service.sessions().supports(Capability::PrivateApi) {
            match self
                .service
                .get_build_history(&target.catalog_id, &target.cube_id, HISTORY_DEPTH)
                .await
            {
                Ok(entries) => Some(entries),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Build history unavailable, skipping repeated failure check"
                    );
                    None
                }
            }
        } else {
            tracing::warn!("No OAuth client configured, health check runs without build history");
            None
        };

        Ok(health::check(
            aggregates,
            history.as_deref(),
            &self.thresholds,
            Utc::now(),
        ))
    }

    async fn rebuild(&self, target: &CubeTarget, full_build: bool, wait: bool) -> Result<()> {
        let receipt = self
            .service
            .trigger_rebuild(&target.catalog_id, &target.cube_id, full_build)
            .await?;
        println!(
            "{} rebuild triggered for {}{}",
            if full_build { "Full" } else { "Incremental" },
            target,
            receipt
                .batch_id
                .as_deref()
                .map(|id| format!(" (batch {})", id))
                .unwrap_or_default()
        );

        if !wait {
            return Ok(());
        }

        println!("Waiting for the rebuild to finish (Ctrl-C stops waiting, not the build)...");
        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });

        let outcome = self
            .service
            .wait_for_rebuild(target, receipt.requested_at, &self.poll, &cancel)
            .await;
        watcher.abort();

        match outcome? {
            WaitOutcome::Finished(entry) if entry.outcome == BuildOutcome::Failure => {
                Err(ApiError::ServerError {
                    status: None,
                    message: format!(
                        "rebuild of {} failed (batch {})",
                        target,
                        entry.batch_id.as_deref().unwrap_or("unknown")
                    ),
                })
            }
            WaitOutcome::Finished(entry) => {
                println!(
                    "Rebuild finished: {}{}",
                    entry.outcome,
                    history::entry_duration(&entry)
                        .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
                        .unwrap_or_default()
                );
                Ok(())
            }
            WaitOutcome::TimedOut => Err(ApiError::Internal(anyhow::anyhow!(
                "rebuild of {} did not finish within {}s; check the build history",
                target,
                self.poll.timeout.as_secs()
            ))),
            WaitOutcome::Cancelled => {
                println!("Stopped waiting; the rebuild continues on the server");
                Ok(())
            }
        }
    }

    // ==============================================================================================
    // Interactive menu
    // ==============================================================================================

    async fn interactive(&self) -> Result<()> {
        let items = ["Refresh Token", "Aggregate Rebuild", "Aggregate Report", "Exit"];
        loop {
            println!();
            let choice = Select::new()
                .with_prompt("Aggregate Manager")
                .items(&items)
                .default(0)
                .interact()
                .context("Failed to read menu selection")?;

            let result = match choice {
                0 => self.refresh_token().await,
                1 => self.interactive_rebuild().await,
                2 => self.interactive_report().await,
                _ => return Ok(()),
            };

            if let Err(e) = result {
                tracing::error!(error = %e, "Menu action failed");
                println!("Error: {}", e);
            }
        }
    }

    async fn refresh_token(&self) -> Result<()> {
        let token = self.service.sessions().force_refresh().await?;
        let preview: String = token.chars().take(20).collect();
        println!("Token refreshed ({}...)", preview);
        Ok(())
    }

    async fn pick_target(&self) -> Result<Option<CubeTarget>> {
        let targets = self.service.list_cube_targets().await?;
        if targets.is_empty() {
            println!("No published cubes");
            return Ok(None);
        }

        let mut labels: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        labels.push("Back".to_string());
        let choice = Select::new()
            .with_prompt("Select cube")
            .items(&labels)
            .default(0)
            .interact()
            .context("Failed to read cube selection")?;

        Ok(targets.get(choice).cloned())
    }

    async fn interactive_rebuild(&self) -> Result<()> {
        let Some(target) = self.pick_target().await? else {
            return Ok(());
        };

        let full_build = Confirm::new()
            .with_prompt("Full build? (no = incremental)")
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;
        let confirmed = Confirm::new()
            .with_prompt(format!("Trigger rebuild of {}?", target))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Rebuild cancelled");
            return Ok(());
        }

        let wait = Confirm::new()
            .with_prompt("Wait for the rebuild to finish?")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        self.rebuild(&target, full_build, wait).await
    }

    async fn interactive_report(&self) -> Result<()> {
        let Some(target) = self.pick_target().await? else {
            return Ok(());
        };

        let actions = [
            CubeAction::ListAggregates,
            CubeAction::ExportCsv,
            CubeAction::Statistics,
            CubeAction::Health,
            CubeAction::BuildHistory,
        ];
        let mut labels: Vec<&str> = actions.iter().map(|a| a.label()).collect();
        labels.push("Back");

        loop {
            let choice = Select::new()
                .with_prompt(format!("Report for {}", target))
                .items(&labels)
                .default(0)
                .interact()
                .context("Failed to read report selection")?;

            let Some(action) = actions.get(choice).copied() else {
                return Ok(());
            };
            if let Err(e) = self.run_action(&target, action).await {
                tracing::error!(error = %e, "Report failed");
                println!("Error: {}", e);
            }
        }
    }
}

/// Health thresholds from the command line
pub fn thresholds(args: &CliArgs) -> HealthThresholds {
    HealthThresholds {
        stale_after: chrono::Duration::days(args.stale_days),
        idle_after: chrono::Duration::days(args.idle_days),
        ..HealthThresholds::default()
    }
}

/// Poll options from the command line
pub fn poll_options(args: &CliArgs) -> PollOptions {
    PollOptions {
        timeout: std::time::Duration::from_secs(args.poll_timeout),
        ..PollOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["aggmgr"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_no_flags_is_interactive() {
        assert_eq!(Command::from_args(&args(&[])).unwrap(), Command::Interactive);
    }

    #[test]
    fn test_list_projects_needs_no_ids() {
        assert_eq!(
            Command::from_args(&args(&["--list-projects"])).unwrap(),
            Command::ListProjects
        );
    }

    #[test]
    fn test_cube_actions_need_both_ids() {
        let err = Command::from_args(&args(&["--export-csv", "--project-id", "p1"])).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
        assert_eq!(err.exit_code(), 2);

        let err =
            Command::from_args(&args(&["--project-id", "p1", "--cube-id", "c1"])).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_cube_actions_in_order() {
        let command = Command::from_args(&args(&[
            "--project-id",
            "p1",
            "--cube-id",
            "c1",
            "--export-csv",
            "--list-aggregates",
            "--rebuild",
            "--incremental",
        ]))
        .unwrap();

        assert_eq!(
            command,
            Command::Cube {
                catalog_id: "p1".to_string(),
                cube_id: "c1".to_string(),
                actions: vec![
                    CubeAction::ListAggregates,
                    CubeAction::ExportCsv,
                    CubeAction::Rebuild {
                        full_build: false,
                        wait: false
                    },
                ],
            }
        );
    }

    #[test]
    fn test_wait_requires_rebuild() {
        let result = CliArgs::try_parse_from(["aggmgr", "--wait"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_thresholds_from_args() {
        let t = thresholds(&args(&["--stale-days", "14", "--idle-days", "60"]));
        assert_eq!(t.stale_after, chrono::Duration::days(14));
        assert_eq!(t.idle_after, chrono::Duration::days(60));
        assert_eq!(thresholds(&args(&[])).idle_after, chrono::Duration::days(30));
        assert!(CliArgs::try_parse_from(["aggmgr", "--stale-days", "-1"]).is_err());
        let p = poll_options(&args(&["--poll-timeout", "60"]));
        assert_eq!(p.timeout, std::time::Duration::from_secs(60));
    }
}
