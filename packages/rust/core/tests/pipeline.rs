//! End-to-end runs of the pipeline with stages launched in-process.

use std::path::{Path, PathBuf};

use wordflow_core::{
    LogFile, Pipeline, RunContext, SilentProgress, StageLauncher, StageStatus, Step, read_error,
    run_builtin_stage, scan_artifacts,
};
use wordflow_shared::{AppConfig, Result, StageName, WordflowError};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const PRESS: &str = "表紙\n\
[PARENT]\n\
【総務課】庁舎の移転について\n\
[CHILD]\n\
【総務課】庁舎の移転時期は。\n\
[QA_SPLIT]\n\
来年四月を予定しています。\n\
[SKIP]\n\
内部メモ\n\
[CHILD]\n\
費用は。\n\
[QA_SPLIT]\n\
約十億円です。\n";

/// Runs built-in stages in this process; optionally forces one stage's code.
#[derive(Default)]
struct InProcess {
    forced: Option<(StageName, i32)>,
    bootstrap_code: i32,
}

impl StageLauncher for InProcess {
    async fn resolve(&self, ctx: &RunContext, stage: &wordflow_core::StageDef) -> Result<Step> {
        Ok(Step {
            label: stage.name().to_string(),
            program: PathBuf::from("in-process"),
            args: Vec::new(),
            cwd: ctx.project_root.clone(),
            version: Some("test".into()),
        })
    }

    async fn launch(&self, ctx: &RunContext, step: &Step, log: &mut LogFile) -> Result<i32> {
        if step.label == "bootstrap" {
            return Ok(self.bootstrap_code);
        }
        let stage: StageName = step.label.parse()?;
        if let Some((forced, code)) = self.forced {
            if forced == stage {
                log.line("forced failure")?;
                return Ok(code);
            }
        }
        match run_builtin_stage(ctx, stage) {
            Ok(report) => {
                for unit in &report.units {
                    log.line(format_args!("{} {:?}", unit.unit, unit.outcome))?;
                }
                Ok(0)
            }
            Err(e) => {
                log.line(&e)?;
                Ok(i32::from(e.exit_code()))
            }
        }
    }
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("wordflow-it-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn data(root: &Path, area: &str) -> PathBuf {
    root.join("data").join(area)
}

fn seed(root: &Path, area: &str, name: &str, content: &[u8]) {
    let dir = data(root, area);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), content).unwrap();
}

fn pipeline(root: &Path, config: AppConfig) -> Pipeline {
    Pipeline::new(root, config, None)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn document_flows_through_all_stages() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_press.txt", PRESS.as_bytes());
    seed(&root, "01_input", "~$240105_press.txt", b"lock");

    let report = pipeline(&root, AppConfig::default())
        .run(&InProcess::default(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert!(report.aborted_at.is_none());
    assert_eq!(report.stages.len(), 3);
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Completed));

    let run_dir = data(&root, "06_after_department").join(report.run_id.as_str());
    let out = std::fs::read_to_string(run_dir.join("20240105_総務課.txt")).unwrap();
    assert!(out.starts_with("\n\n[PARENT]\n# 問答ID: 20240105-001\n- 日付: 2024-01-05\n- 部署: 総務課\n"));
    assert!(out.contains("[CHILD]\n## 更問1\n[Q] 費用は。\n[A] 約十億円です。\n"));
    assert!(!out.contains("内部メモ"));

    // Extract keeps its inputs; later stages archive theirs.
    assert!(data(&root, "01_input").join("240105_press.txt").is_file());
    assert!(data(&root, "02_output/done").join("240105_press.txt").is_file());
    assert!(data(&root, "03_before_structured/done").join("240105_press.txt").is_file());
    assert!(data(&root, "04_after_structured/done").join("240105_press.txt").is_file());
    assert!(data(&root, "05_before_department/done").join("240105_press.txt").is_file());

    // The temp file never became a unit.
    assert!(!data(&root, "02_output/done").join("~$240105_press.txt").exists());

    let logs = root.join("logs");
    for name in ["run", "extract", "structure", "split"] {
        assert!(logs.join(format!("{name}_{}.log", report.run_id)).is_file(), "{name} log");
    }
    let agg = std::fs::read_to_string(&report.aggregate_log).unwrap();
    assert!(agg.contains("=== structure start ==="));
    assert!(agg.contains("tool: in-process"));
    assert!(agg.contains("=== split finished: return code 0 ==="));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn corrupt_unit_gets_artifact_and_is_not_handed_off() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_A.txt", PRESS.as_bytes());
    seed(&root, "01_input", "240105_B.txt", b"[PARENT]\n[CHILD]\nno split marker\n");

    let report = pipeline(&root, AppConfig::default())
        .run(&InProcess::default(), &SilentProgress)
        .await
        .unwrap();
    assert_eq!(report.exit_code, 0);

    let structured = data(&root, "04_after_structured");
    let artifact = structured.join("240105_B_ERROR.txt");
    let record = read_error(&artifact).unwrap();
    assert_eq!(record.unit_id, "240105_B.txt");
    assert_eq!(record.source_stage, StageName::Structure);
    assert_eq!(record.run_id, report.run_id);

    // The artifact stays put; only A moved on.
    assert!(artifact.is_file());
    assert!(!data(&root, "05_before_department/done").join("240105_B.txt").exists());
    assert!(!data(&root, "05_before_department").join("240105_B_ERROR.txt").exists());
    assert!(data(&root, "05_before_department/done").join("240105_A.txt").is_file());
    // The failed input waits for the next run.
    assert!(data(&root, "03_before_structured").join("240105_B.txt").is_file());

    let ctx = RunContext::new(report.run_id.clone(), &root, AppConfig::default(), None);
    let found = scan_artifacts(&ctx, Some(&report.run_id)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].path, artifact);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn failed_partition_sits_beside_successful_one() {
    let root = temp_dir();
    std::fs::create_dir_all(data(&root, "01_input")).unwrap();
    seed(
        &root,
        "05_before_department",
        "D.txt",
        "[PARENT]\n- 部署: Sales\n[Q] a\n[PARENT]\n- 部署: HR?\n[Q] b\n".as_bytes(),
    );

    let report = pipeline(&root, AppConfig::default())
        .run(&InProcess::default(), &SilentProgress)
        .await
        .unwrap();
    assert_eq!(report.exit_code, 0);

    let run_dir = data(&root, "06_after_department").join(report.run_id.as_str());
    assert!(run_dir.join("Sales.txt").is_file());
    let record = read_error(&run_dir.join("HR_ERROR.txt")).unwrap();
    assert_eq!(record.partition_key.as_deref(), Some("HR"));
    assert_eq!(record.context[0], "[PARENT]");
    assert!(!run_dir.join("HR.txt").exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn non_zero_stage_stops_the_run() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_A.txt", PRESS.as_bytes());

    let launcher = InProcess {
        forced: Some((StageName::Structure, 4)),
        ..Default::default()
    };
    let report = pipeline(&root, AppConfig::default())
        .run(&launcher, &SilentProgress)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.aborted_at.as_deref(), Some("structure"));
    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.stages[1].status, StageStatus::Aborted);
    assert!(report.stages[1].handoff.is_none());

    // Extract's handoff happened; nothing downstream of structure did.
    assert!(data(&root, "03_before_structured").join("240105_A.txt").is_file());
    assert!(!data(&root, "05_before_department").exists());
    assert!(!root.join("logs").join(format!("split_{}.log", report.run_id)).exists());

    let agg = std::fs::read_to_string(&report.aggregate_log).unwrap();
    assert!(agg.contains("run aborted at stage structure"));
    assert!(agg.contains("run finished with exit code 4"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn continue_code_finishes_run_with_warning() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_A.txt", PRESS.as_bytes());
    let mut config = AppConfig::default();
    config.stages.extract.continue_codes = Some(vec![2]);

    let launcher = InProcess {
        forced: Some((StageName::Extract, 2)),
        ..Default::default()
    };
    let report = pipeline(&root, config).run(&launcher, &SilentProgress).await.unwrap();

    assert_eq!(report.exit_code, 2);
    assert!(report.aborted_at.is_none());
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.stages[0].status, StageStatus::CompletedWithWarnings);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn missing_input_area_is_reported() {
    let root = temp_dir();
    let err = pipeline(&root, AppConfig::default())
        .run(&InProcess::default(), &SilentProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, WordflowError::InputMissing { .. }));
    assert_eq!(err.exit_code(), 3);

    let logs: Vec<_> = std::fs::read_dir(root.join("logs")).unwrap().collect();
    assert_eq!(logs.len(), 1);
    let agg = std::fs::read_to_string(logs[0].as_ref().unwrap().path()).unwrap();
    assert!(agg.contains("FATAL: input area missing"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn unresolvable_tool_stops_before_any_stage() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_A.txt", PRESS.as_bytes());
    let mut config = AppConfig::default();
    config.stages.split.command = Some(vec!["wordflow-no-such-tool".into(), "{input}".into()]);

    let launcher = wordflow_core::ProcessLauncher::with_executable(std::env::current_exe().unwrap());
    let err = pipeline(&root, config)
        .run(&launcher, &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 127);
    assert!(!data(&root, "02_output").exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[tokio::test]
async fn failing_bootstrap_aborts_before_stages() {
    let root = temp_dir();
    seed(&root, "01_input", "240105_A.txt", PRESS.as_bytes());
    let mut config = AppConfig::default();
    config.bootstrap = Some(wordflow_shared::BootstrapConfig {
        command: vec!["sh".into(), "-c".into(), "exit 0".into()],
        version_args: vec!["-c".into(), "echo sh".into()],
    });

    let launcher = InProcess {
        bootstrap_code: 9,
        ..Default::default()
    };
    let report = pipeline(&root, config).run(&launcher, &SilentProgress).await.unwrap();

    assert_eq!(report.exit_code, 9);
    assert_eq!(report.aborted_at.as_deref(), Some("bootstrap"));
    assert!(report.stages.is_empty());
    assert!(!data(&root, "02_output").exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn sub_element_failures_do_not_produce_artifacts() {
    let root = temp_dir();
    let mut doc = b"[PARENT]\nkept\n".to_vec();
    doc.extend_from_slice(&[0xff, b'\n', b'x', 0xfe, b'\n']);
    seed(&root, "01_input", "240105_A.txt", &doc);

    let ctx = RunContext::new("20240105093000".parse().unwrap(), &root, AppConfig::default(), None);
    let report = run_builtin_stage(&ctx, StageName::Extract).unwrap();

    assert_eq!(report.element_error_count(), 2);
    let out = data(&root, "02_output");
    assert_eq!(std::fs::read_to_string(out.join("240105_A.txt")).unwrap(), "[PARENT]\nkept\n");
    assert!(!out.join("240105_A_ERROR.txt").exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn reserved_department_name_is_reported_not_written() {
    let root = temp_dir();
    let doc = "\n\n[PARENT]\n# 問答ID: 20240105-001\n- 日付: 2024-01-05\n- 部署: Sales_ERROR\n[Q] q\n";
    seed(&root, "05_before_department", "240105_press.txt", doc.as_bytes());

    let ctx = RunContext::new("20240105093000".parse().unwrap(), &root, AppConfig::default(), None);
    let report = run_builtin_stage(&ctx, StageName::Split).unwrap();
    assert!(report.units[0].outputs.is_empty());

    let run_dir = data(&root, "06_after_department").join("20240105093000");
    assert!(!run_dir.join("20240105_Sales_ERROR.txt").exists());

    let found = scan_artifacts(&ctx, Some(&ctx.run_id)).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].path.ends_with("20240105_Sales_ERROR_ERROR.txt"));
    let record = found[0].record.as_ref().expect("artifact is a readable record");
    assert_eq!(record.partition_key.as_deref(), Some("20240105_Sales_ERROR"));

    let _ = std::fs::remove_dir_all(&root);
}
