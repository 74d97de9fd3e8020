//! End-to-end deploy command against in-memory collaborators.

mod support;

use std::sync::Arc;

use tempfile::TempDir;

use declpipe_core::commands::{DeployCommand, DeployOptions, StageStatus};
use declpipe_core::config::DeclpipeConfig;
use declpipe_core::context::DeployContext;
use declpipe_core::error::DeployError;
use declpipe_core::manifest::ManifestRecord;
use declpipe_core::storage::{ObjectStore, WritePrecondition};
use declpipe_core::version::VersionId;

use support::{ComposerRunner, FixedHistory, RecordingProvider, SharedStore, write_file};

const DEPLOYMENT: &str = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    composer_environment: orchestrator
    artifact_storage:
      bucket: demo-artifacts
      path_prefix: pipelines
    variables:
      dataset: staging
    resources:
      - type: dataform.repository
        name: repo-a
  stage:
    project: demo-stage
    region: us-central1
    resources:
      - type: dataform.repository
        name: repo-a
  prod:
    project: demo-prod
    region: us-central1
"#;

const PIPELINE: &str = r#"
pipelineId: daily-${env}
actions:
  - name: load
    filename: jobs/load.py
    args: ["--dataset=${dataset}"]
"#;

const MANIFEST: &str = "gs://orch-bucket/data/daily-dev/manifest.yml";

struct Harness {
    _temp: TempDir,
    ctx: DeployContext,
    store: SharedStore,
    provider: RecordingProvider,
    history: FixedHistory,
}

fn fixed_clock() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

fn harness(history: FixedHistory) -> Harness {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "deployment.yaml", DEPLOYMENT);
    write_file(temp.path(), "orchestration-pipeline.yaml", PIPELINE);
    write_file(temp.path(), "orchestration-pipeline.py", "# dag\n");
    write_file(temp.path(), "jobs/load.py", "print('load')\n");

    let store = SharedStore::new();
    let provider = RecordingProvider::new();
    let ctx = DeployContext::new(
        temp.path().to_path_buf(),
        DeclpipeConfig::default(),
        Arc::new(ComposerRunner::new("gs://orch-bucket/dags")),
        Box::new(store.clone()),
        Box::new(provider.clone()),
        Box::new(history.clone()),
    )
    .with_clock(fixed_clock);

    Harness {
        _temp: temp,
        ctx,
        store,
        provider,
        history,
    }
}

fn never_confirm(_: &[String]) -> bool {
    panic!("confirmation not expected")
}

fn manifest(store: &SharedStore) -> ManifestRecord {
    let content = store.memory().read_string(MANIFEST).unwrap();
    ManifestRecord::parse(MANIFEST, content.as_bytes()).unwrap()
}

#[test]
fn deploys_resources_and_publishes_pipeline() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));

    let report = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev"), &never_confirm)
        .unwrap();

    assert_eq!(report.resource_status, StageStatus::Success);
    assert_eq!(report.pipeline_status, StageStatus::Success);
    assert_eq!(
        report.summary(),
        "Resource and pipeline deployment successful for version c0ffee"
    );
    assert_eq!(h.provider.calls().len(), 1);

    let pipeline = report.pipeline.unwrap();
    assert_eq!(pipeline.pipeline_id, "daily-dev");
    assert_eq!(pipeline.manifest_uri, MANIFEST);
    assert_eq!(pipeline.publish.as_ref().unwrap().attempts, 1);

    let keys = h.store.memory().keys();
    assert!(keys.contains(&"gs://demo-artifacts/pipelines/versions/c0ffee/jobs/load.py".to_string()));
    assert!(keys.contains(&"gs://orch-bucket/dags/orchestration-pipeline.py".to_string()));

    let definition = h
        .store
        .memory()
        .read_string("gs://orch-bucket/data/daily-dev/versions/c0ffee/orchestration-pipeline.yaml")
        .unwrap();
    assert!(definition.contains("gs://demo-artifacts/pipelines/versions/c0ffee/jobs/load.py"));
    assert!(definition.contains("--dataset=staging"));

    assert_eq!(manifest(&h.store).default_version, Some(VersionId::new("c0ffee")));
}

#[test]
fn resources_only_environment_skips_pipeline() {
    let h = harness(FixedHistory::linear(&["c0ffee"]).with_dirty(&["notes.txt"]));

    let report = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("stage"), &never_confirm)
        .unwrap();

    assert_eq!(report.pipeline_status, StageStatus::Skipped);
    assert_eq!(report.summary(), "Resource deployment successful.");
    assert!(h.store.memory().keys().is_empty());
}

#[test]
fn empty_environment_has_nothing_to_deploy() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("prod"), &never_confirm)
        .unwrap_err();
    assert!(matches!(err, DeployError::NothingToDeploy(_)));
}

#[test]
fn unknown_environment_names_file() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("qa"), &never_confirm)
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::EnvironmentNotFound { ref env, ref file } if env == "qa" && file == "deployment.yaml"
    ));
}

#[test]
fn uncommitted_changes_abort_before_upload() {
    let h = harness(FixedHistory::linear(&["c0ffee"]).with_dirty(&["jobs/load.py"]));

    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev"), &never_confirm)
        .unwrap_err();

    assert!(matches!(err, DeployError::UncommittedChanges { ref changes } if changes.contains("jobs/load.py")));
    assert!(h.store.memory().keys().is_empty());
}

#[test]
fn ignored_paths_do_not_count_as_changes() {
    let h = harness(
        FixedHistory::linear(&["c0ffee"])
            .with_dirty(&["jobs/__pycache__/load.cpython-311.pyc", ".declpipe/bundles/x.zip"]),
    );
    let report = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev"), &never_confirm)
        .unwrap();
    assert!(report.forced_changes.is_empty());
}

#[test]
fn forced_deploy_asks_and_marks_version() {
    let h = harness(FixedHistory::linear(&["c0ffee"]).with_dirty(&["jobs/load.py"]));
    let asked = std::sync::Mutex::new(Vec::new());
    let confirm = |changes: &[String]| {
        asked.lock().unwrap().extend_from_slice(changes);
        true
    };

    let report = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev").force(true), &confirm)
        .unwrap();

    assert_eq!(*asked.lock().unwrap(), vec!["jobs/load.py".to_string()]);
    assert_eq!(report.forced_changes, vec!["jobs/load.py"]);
    let version = report.pipeline.unwrap().version;
    assert_eq!(version.as_str(), "c0ffee-forced-1760000000");
    assert_eq!(manifest(&h.store).default_version, Some(version));
}

#[test]
fn declined_confirmation_aborts() {
    let h = harness(FixedHistory::linear(&["c0ffee"]).with_dirty(&["jobs/load.py"]));
    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev").force(true), &|_: &[String]| false)
        .unwrap_err();
    assert!(matches!(err, DeployError::UncommittedChanges { .. }));
    assert!(h.store.memory().keys().is_empty());
}

#[test]
fn dry_run_changes_nothing() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    let report = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev").dry_run(true), &never_confirm)
        .unwrap();

    assert_eq!(report.resource_status, StageStatus::Planned);
    assert_eq!(report.pipeline_status, StageStatus::Planned);
    assert!(report.pipeline.unwrap().publish.is_none());
    assert!(h.provider.calls().is_empty());
    assert!(h.store.memory().keys().is_empty());
}

#[test]
fn rollback_requires_version() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev").rollback(true), &never_confirm)
        .unwrap_err();
    assert!(matches!(err, DeployError::Config(_)));
    assert!(h.history.checkouts().is_empty());
}

#[test]
fn rollback_reuses_uploaded_artifacts() {
    let h = harness(FixedHistory::linear(&["aaa111", "bbb222"]));
    h.store
        .write(
            "gs://demo-artifacts/pipelines/versions/aaa111/jobs/load.py",
            b"print('old')\n",
            WritePrecondition::None,
        )
        .unwrap();
    h.store
        .write(MANIFEST, b"default-version: bbb222\nprev-version:\n- aaa111\n", WritePrecondition::None)
        .unwrap();

    let report = DeployCommand::new(&h.ctx)
        .execute(
            &DeployOptions::new("dev").rollback(true).with_version("aaa111"),
            &never_confirm,
        )
        .unwrap();

    assert_eq!(h.history.checkouts(), vec![("aaa111".to_string(), false)]);
    let pipeline = report.pipeline.unwrap();
    assert!(pipeline.reused_artifacts);
    assert_eq!(
        h.store
            .memory()
            .read_string("gs://demo-artifacts/pipelines/versions/aaa111/jobs/load.py")
            .as_deref(),
        Some("print('old')\n")
    );
    let record = manifest(&h.store);
    assert_eq!(record.default_version, Some(VersionId::new("aaa111")));
    assert_eq!(
        record.prev_version,
        vec![VersionId::new("aaa111"), VersionId::new("bbb222")]
    );
}

#[test]
fn failed_rollback_checkout_is_reported() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    let err = DeployCommand::new(&h.ctx)
        .execute(
            &DeployOptions::new("dev").rollback(true).with_version("nope"),
            &never_confirm,
        )
        .unwrap_err();
    assert!(matches!(err, DeployError::Rollback { ref version, .. } if version == "nope"));
}

const LIVE_DAG: &str = "gs://orch-bucket/dags/orchestration-pipeline.py";

#[test]
fn blocked_regression_leaves_live_dag_and_manifest() {
    let h = harness(FixedHistory::linear(&["aaa111", "bbb222"]));
    h.store
        .write(LIVE_DAG, b"# live dag for bbb222\n", WritePrecondition::None)
        .unwrap();
    h.store
        .write(MANIFEST, b"default-version: bbb222\n", WritePrecondition::None)
        .unwrap();

    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev").with_version("aaa111"), &never_confirm)
        .unwrap_err();

    match &err {
        DeployError::PipelineDeployment { env, file, source } => {
            assert_eq!(env, "dev");
            assert_eq!(file, "deployment.yaml");
            assert!(matches!(**source, DeployError::RegressionBlocked { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        h.store.memory().read_string(LIVE_DAG).as_deref(),
        Some("# live dag for bbb222\n")
    );
    assert_eq!(h.store.memory().write_count(LIVE_DAG), 1);
    assert_eq!(h.store.memory().write_count(MANIFEST), 1);
    assert_eq!(manifest(&h.store).default_version, Some(VersionId::new("bbb222")));
}

#[test]
fn pipeline_failures_name_environment_and_file() {
    let h = harness(FixedHistory::linear(&["c0ffee"]));
    write_file(
        h.ctx.work_dir(),
        "orchestration-pipeline.yaml",
        "pipelineId: daily-${env}\nactions:\n  - filename: jobs/missing.py\n",
    );

    let err = DeployCommand::new(&h.ctx)
        .execute(&DeployOptions::new("dev"), &never_confirm)
        .unwrap_err();

    assert!(err.to_string().contains("environment 'dev' from file 'deployment.yaml'"));
    assert!(matches!(err.root(), DeployError::BadFile(m) if m.contains("jobs/missing.py")));
    assert!(h.store.memory().read_string(MANIFEST).is_none());
}
