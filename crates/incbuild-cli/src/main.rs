//! incbuild - RTS-aware incremental build orchestration CLI
//!
//! ## Commands
//!
//! - `run`: build and test every project of a batch manifest
//! - `exclude`: escalate and plan test exclusions for one project
//! - `analyze-log`: summarize a Maven/surefire build log
//! - `benchmark`: compare a build without RTS against one with RTS

use anyhow::{Context, Result};
use artifact_registry::{is_docker_available, DockerBackend, RegistryError};
use clap::{Parser, Subcommand, ValueEnum};
use exclusion_engine::{
    load_hierarchy, render_exclude_file, EscalationOutcome, ExclusionLedger, ExclusionLevel,
    Probe, ProbeOutcome, RtsTool, TestId, EXCLUDE_FILE,
};
use incbuild_core::{
    analyze_log_file, compare, render_benchmark_md, render_summary_md, write_summary_json,
    write_summary_md, BatchManifest, PushMode, RunConfig, Scheduler, SummaryArtifact,
    SUMMARY_JSON, SUMMARY_MD,
};
use incbuild_driver::ProcessDriver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "incbuild")]
#[command(author = "Stevedores Org")]
#[command(version = incbuild_core::VERSION)]
#[command(about = "RTS-aware incremental build orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and test every project of a batch manifest
    Run {
        /// Batch manifest (TOML, one [[project]] table per project)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Worker pool size (default: available parallelism)
        #[arg(short, long, env = "INCBUILD_WORKERS")]
        workers: Option<usize>,

        /// Which artifacts to publish: none, base, inc or both
        #[arg(long, env = "INCBUILD_PUSH_MODE", default_value = "none")]
        push_mode: PushMode,

        /// Rebuild artifacts even when a local copy exists
        #[arg(long)]
        force_rebuild: bool,

        /// Push artifacts even when the registry already has them
        #[arg(long)]
        force_push: bool,

        /// Directory receiving per-project logs, results and the summary
        #[arg(long, env = "INCBUILD_ARTIFACT_ROOT", default_value = "incbuild-results")]
        artifact_root: PathBuf,

        /// Program invoked once per project
        #[arg(long, env = "INCBUILD_DRIVER")]
        driver: PathBuf,

        /// Extra argument passed to the driver before the project arguments
        #[arg(long = "driver-arg")]
        driver_args: Vec<String>,

        /// Kill a driver run after this many seconds (0 = never)
        #[arg(long, default_value = "0")]
        timeout_secs: u64,
    },

    /// Test exclusion escalation for one project
    Exclude {
        #[command(subcommand)]
        action: ExcludeAction,
    },

    /// Summarize a Maven/surefire build log
    AnalyzeLog {
        /// Log file to analyze
        file: PathBuf,
    },

    /// Compare a build without RTS against one with RTS
    Benchmark {
        /// Log of the run without RTS
        no_rts_log: PathBuf,

        /// Log of the run with RTS
        rts_log: PathBuf,

        /// Wall time of the run without RTS (default: read from the log)
        #[arg(long, default_value = "0")]
        without_secs: f64,

        /// Wall time of the run with RTS (default: read from the log)
        #[arg(long, default_value = "0")]
        with_secs: f64,

        /// Also write the markdown report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ExcludeAction {
    /// Record a test failing under RTS; escalates an existing exclusion
    Observe {
        #[command(flatten)]
        target: ExcludeTarget,

        /// Failing test, e.g. com.acme.FooTest or com.acme.FooTest#bar
        #[arg(short, long)]
        test: String,
    },

    /// Record a new failure from one uninstrumented and one instrumented run
    Classify {
        #[command(flatten)]
        target: ExcludeTarget,

        #[arg(short, long)]
        test: String,

        /// Outcome without instrumentation
        #[arg(long)]
        uninstrumented: Outcome,

        /// Outcome with instrumentation
        #[arg(long)]
        instrumented: Outcome,
    },

    /// Resolve owning modules and show the configuration edits
    Plan {
        #[command(flatten)]
        target: ExcludeTarget,

        /// Record owners in the ledger and rewrite the exclude file
        #[arg(long)]
        apply: bool,
    },

    /// Show the project's exclusion ledger
    Status {
        #[command(flatten)]
        target: ExcludeTarget,
    },
}

#[derive(clap::Args)]
struct ExcludeTarget {
    /// Project source root (holds the root pom.xml)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Project id recorded in the ledger (default: directory name)
    #[arg(long)]
    id: Option<String>,

    /// RTS tool (default: the ledger's, else ekstazi)
    #[arg(long)]
    tool: Option<RtsTool>,

    /// Ledger file (default: <project>/exclusions.json)
    #[arg(long)]
    ledger: Option<PathBuf>,
}

impl ExcludeTarget {
    fn ledger_path(&self) -> PathBuf {
        self.ledger
            .clone()
            .unwrap_or_else(|| ExclusionLedger::path_in(&self.project))
    }

    fn project_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            self.project
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "project".to_string())
        })
    }

    fn load(&self) -> Result<ExclusionLedger> {
        let path = self.ledger_path();
        let mut ledger = match ExclusionLedger::load(&path)
            .with_context(|| format!("read ledger {:?}", path))?
        {
            Some(ledger) => ledger,
            None => ExclusionLedger::new(
                self.project_id(),
                self.tool.unwrap_or(RtsTool::Ekstazi),
            ),
        };
        if let Some(tool) = self.tool {
            ledger.tool = tool;
        }
        Ok(ledger)
    }

    fn save(&self, ledger: &ExclusionLedger) -> Result<()> {
        let path = self.ledger_path();
        ledger
            .save(&path)
            .with_context(|| format!("write ledger {:?}", path))?;
        let exclude_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(EXCLUDE_FILE);
        std::fs::write(&exclude_path, render_exclude_file(&ledger.entries))
            .with_context(|| format!("write {:?}", exclude_path))?;
        Ok(())
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Outcome {
    Pass,
    Fail,
}

impl From<Outcome> for ProbeOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Pass => ProbeOutcome::Passed,
            Outcome::Fail => ProbeOutcome::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    incbuild_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            manifest,
            workers,
            push_mode,
            force_rebuild,
            force_push,
            artifact_root,
            driver,
            driver_args,
            timeout_secs,
        } => {
            let mut config = RunConfig::new(artifact_root)
                .with_push_mode(push_mode)
                .with_force_rebuild(force_rebuild)
                .with_force_push(force_push);
            if let Some(workers) = workers {
                config = config.with_workers(workers)?;
            }
            let driver = ProcessDriver::new(driver)
                .with_args(driver_args)
                .with_timeout_secs(timeout_secs);
            cmd_run(&manifest, config, driver).await
        }
        Commands::Exclude { action } => match action {
            ExcludeAction::Observe { target, test } => cmd_exclude_observe(&target, &test),
            ExcludeAction::Classify {
                target,
                test,
                uninstrumented,
                instrumented,
            } => cmd_exclude_classify(
                &target,
                &test,
                Probe::new(uninstrumented.into(), instrumented.into()),
            ),
            ExcludeAction::Plan { target, apply } => cmd_exclude_plan(&target, apply),
            ExcludeAction::Status { target } => cmd_exclude_status(&target),
        },
        Commands::AnalyzeLog { file } => cmd_analyze_log(&file),
        Commands::Benchmark {
            no_rts_log,
            rts_log,
            without_secs,
            with_secs,
            output,
        } => cmd_benchmark(
            &no_rts_log,
            &rts_log,
            without_secs,
            with_secs,
            output.as_deref(),
        ),
    }
}

async fn cmd_run(manifest: &Path, config: RunConfig, driver: ProcessDriver) -> Result<()> {
    let batch = BatchManifest::load(manifest)?;
    let base_dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    let projects = batch.projects(base_dir)?;

    anyhow::ensure!(is_docker_available().await, RegistryError::DockerNotFound);
    let backend = DockerBackend::new(config.registry.clone())
        .context("Failed to set up artifact registry backend")?;
    let config = Arc::new(config);
    std::fs::create_dir_all(&config.artifact_root)
        .with_context(|| format!("create {:?}", config.artifact_root))?;

    println!(
        "Running {} projects with {} workers",
        projects.len(),
        config.worker_count
    );

    let scheduler = Scheduler::new(Arc::clone(&config), Arc::new(backend), Arc::new(driver));
    let outcome = scheduler.run(&projects).await?;

    let artifact = SummaryArtifact::new(
        outcome.batch_id.clone(),
        config.echo(),
        outcome.summary.clone(),
        &outcome.records,
    );
    write_summary_json(&config.artifact_root.join(SUMMARY_JSON), &artifact)?;
    write_summary_md(&config.artifact_root.join(SUMMARY_MD), &artifact)?;

    println!();
    for record in &outcome.records {
        let status = if record.failure.is_none() { "✓" } else { "✗" };
        let detail = match (&record.failure, &record.stats) {
            (Some(failure), _) => format!("{}: {}", failure.kind(), failure.reason()),
            (None, Some(stats)) => format!(
                "{} tests, {} selected, {} excluded",
                stats.total(),
                stats.selected(),
                stats.excluded()
            ),
            (None, None) => String::new(),
        };
        println!("  {} {} {}", status, record.project_id, detail);
    }

    let summary = &outcome.summary;
    println!();
    println!(
        "Summary: {}/{} projects passed",
        summary.passed_count, summary.total_projects
    );
    println!("Report: {:?}", config.artifact_root.join(SUMMARY_MD));

    if summary.all_passed() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} project(s) failed: {}",
            summary.failed_count,
            summary.failed_project_ids.join(", ")
        )
    }
}

fn describe(outcome: &EscalationOutcome) -> String {
    match outcome {
        EscalationOutcome::Created { level } => format!("excluded at {} level", level),
        EscalationOutcome::Promoted { from, to } => format!("promoted {} -> {}", from, to),
        EscalationOutcome::Unchanged { level } => format!("unchanged at {} level", level),
        EscalationOutcome::ManualFollowUp { test_id } => format!(
            "{} still fails with execution exclusion; check the modules that own it",
            test_id
        ),
        EscalationOutcome::NotReproducible => "not reproducible, nothing recorded".to_string(),
    }
}

fn cmd_exclude_observe(target: &ExcludeTarget, test: &str) -> Result<()> {
    let test_id = TestId::parse(test)?;
    let mut ledger = target.load()?;
    let mut engine = ledger.engine();

    let outcome = engine.observe_failure(&test_id);
    ledger.update_from(&engine)?;
    target.save(&ledger)?;

    println!("{}: {}", test_id, describe(&outcome));
    Ok(())
}

fn cmd_exclude_classify(target: &ExcludeTarget, test: &str, probe: Probe) -> Result<()> {
    let test_id = TestId::parse(test)?;
    let mut ledger = target.load()?;
    let mut engine = ledger.engine();

    let outcome = engine.record_classification(&test_id, probe);
    ledger.update_from(&engine)?;
    target.save(&ledger)?;

    println!("{}: {}", test_id, describe(&outcome));
    Ok(())
}

fn cmd_exclude_plan(target: &ExcludeTarget, apply: bool) -> Result<()> {
    let mut ledger = target.load()?;
    let mut engine = ledger.engine();
    let mut hierarchy = load_hierarchy(&target.project)
        .with_context(|| format!("load build configuration under {:?}", target.project))?;

    let plan = engine.plan_edits(&hierarchy, &target.project)?;

    if plan.is_empty() && plan.unresolved.is_empty() {
        println!("No exclusion edits needed.");
        return Ok(());
    }

    for edit in &plan.edits {
        println!(
            "== {} ({}, {} level{})",
            edit.unit,
            edit.plugin,
            edit.level,
            if edit.declares_plugin {
                ", new declaration"
            } else {
                ""
            }
        );
        println!("tests: {}", edit.tests.join(", "));
        println!("{}", edit.fragment);
    }
    for miss in &plan.unresolved {
        println!("!! {}: {}", miss.test_id, miss.reason);
    }

    if apply {
        let reports = engine.apply(&plan, &mut hierarchy)?;
        ledger.update_from(&engine)?;
        target.save(&ledger)?;
        let changed = reports.iter().filter(|r| r.changed()).count();
        info!(units = reports.len(), changed = changed, "Exclusion plan recorded");
        println!(
            "Recorded {} unit edit(s); wrote {}",
            reports.len(),
            EXCLUDE_FILE
        );
    }
    Ok(())
}

fn cmd_exclude_status(target: &ExcludeTarget) -> Result<()> {
    let ledger = target.load()?;
    println!("Project: {}", ledger.project);
    println!("Tool: {}", ledger.tool);
    println!(
        "Exclusions: {} instrumentation, {} execution",
        ledger.count_at(ExclusionLevel::Instrumentation),
        ledger.count_at(ExclusionLevel::Execution)
    );
    for entry in &ledger.entries {
        let owners: Vec<String> = entry.owner_units.iter().map(|u| u.to_string()).collect();
        println!(
            "  [{}] {}{}",
            entry.level,
            entry.test_id,
            if owners.is_empty() {
                String::new()
            } else {
                format!(" ({})", owners.join(", "))
            }
        );
    }
    Ok(())
}

fn cmd_analyze_log(file: &Path) -> Result<()> {
    let analysis =
        analyze_log_file(file).with_context(|| format!("analyze log {:?}", file))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&analysis).context("serialize log analysis")?
    );
    Ok(())
}

fn cmd_benchmark(
    no_rts_log: &Path,
    rts_log: &Path,
    without_secs: f64,
    with_secs: f64,
    output: Option<&Path>,
) -> Result<()> {
    let without =
        analyze_log_file(no_rts_log).with_context(|| format!("analyze log {:?}", no_rts_log))?;
    let with = analyze_log_file(rts_log).with_context(|| format!("analyze log {:?}", rts_log))?;

    let report = compare(&without, &with, without_secs, with_secs);
    let md = render_benchmark_md(&report);
    if let Some(path) = output {
        std::fs::write(path, &md).with_context(|| format!("write {:?}", path))?;
    }
    print!("{}", md);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(dir: &Path) -> ExcludeTarget {
        ExcludeTarget {
            project: dir.to_path_buf(),
            id: Some("oss/jvm/alpha".to_string()),
            tool: None,
            ledger: None,
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn two_module_project(dir: &Path) {
        write(
            &dir.join("pom.xml"),
            "<project><modules><module>core</module></modules></project>",
        );
        write(&dir.join("core/pom.xml"), "<project></project>");
        write(
            &dir.join("core/src/test/java/com/acme/FooTest.java"),
            "class FooTest {}",
        );
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "incbuild",
            "run",
            "--manifest",
            "batch.toml",
            "--workers",
            "4",
            "--push-mode",
            "inc",
            "--force-push",
            "--driver",
            "./drive.sh",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                workers,
                push_mode,
                force_push,
                force_rebuild,
                ..
            } => {
                assert_eq!(workers, Some(4));
                assert_eq!(push_mode, PushMode::Incremental);
                assert!(force_push);
                assert!(!force_rebuild);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_push_mode() {
        let parsed = Cli::try_parse_from([
            "incbuild",
            "run",
            "--manifest",
            "b.toml",
            "--driver",
            "d",
            "--push-mode",
            "all",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_observe_twice_promotes_and_writes_exclude_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = target(dir.path());

        cmd_exclude_observe(&t, "com.acme.FooTest").unwrap();
        let ledger = t.load().unwrap();
        assert_eq!(ledger.count_at(ExclusionLevel::Instrumentation), 1);
        let excludes = std::fs::read_to_string(dir.path().join(EXCLUDE_FILE)).unwrap();
        assert!(excludes.contains("**/FooTest.java"));

        cmd_exclude_observe(&t, "com.acme.FooTest").unwrap();
        let ledger = t.load().unwrap();
        assert_eq!(ledger.count_at(ExclusionLevel::Execution), 1);
        // Execution-level entries leave the instrumentation list.
        let excludes = std::fs::read_to_string(dir.path().join(EXCLUDE_FILE)).unwrap();
        assert!(excludes.is_empty());
    }

    #[test]
    fn test_classify_pass_pass_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let t = target(dir.path());
        cmd_exclude_classify(
            &t,
            "com.acme.FooTest",
            Probe::new(ProbeOutcome::Passed, ProbeOutcome::Passed),
        )
        .unwrap();
        assert!(t.load().unwrap().entries.is_empty());
    }

    #[test]
    fn test_plan_apply_records_owner_unit() {
        let dir = tempfile::tempdir().unwrap();
        two_module_project(dir.path());
        let t = target(dir.path());

        cmd_exclude_observe(&t, "com.acme.FooTest").unwrap();
        cmd_exclude_plan(&t, true).unwrap();

        let ledger = t.load().unwrap();
        let owners: Vec<String> = ledger.entries[0]
            .owner_units
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(owners, vec!["core"]);
        cmd_exclude_status(&t).unwrap();
    }

    #[test]
    fn test_benchmark_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let no_rts = dir.path().join("no-rts.log");
        let rts = dir.path().join("rts.log");
        write(
            &no_rts,
            "[INFO] Results:\n[INFO] Tests run: 40, Failures: 0, Errors: 0, Skipped: 0\n",
        );
        write(
            &rts,
            "[INFO] Results:\n[INFO] Tests run: 10, Failures: 0, Errors: 0, Skipped: 0\n",
        );
        let out = dir.path().join("bench.md");

        cmd_benchmark(&no_rts, &rts, 80.0, 20.0, Some(&out)).unwrap();
        let md = std::fs::read_to_string(out).unwrap();
        assert!(md.contains("- tests skipped: 30"));
        assert!(md.contains("- speedup: 4.00x"));
    }
}
