//! Reconcile loop against a recording provider.

mod support;

use serde_json::json;

use declpipe_core::deploy::{EnvironmentDeployer, ReconcileOutcome};
use declpipe_core::error::DeployError;
use declpipe_core::handler::HandlerRegistry;
use declpipe_core::model::DeploymentModel;
use declpipe_core::provider::HttpVerb;

use support::RecordingProvider;

const REPO_A: &str = "projects/demo-dev/locations/us-central1/repositories/repo-a";

fn deploy_env(yaml: &str, provider: &RecordingProvider, dry_run: bool) -> Result<declpipe_core::deploy::EnvironmentReport, DeployError> {
    let model = DeploymentModel::from_yaml_str("deployment.yaml", yaml).unwrap();
    let env = model.environment("dev", "deployment.yaml").unwrap();
    let registry = HandlerRegistry::default();
    EnvironmentDeployer::new(&registry, provider, dry_run).deploy("dev", "deployment.yaml", env)
}

const SINGLE_REPO: &str = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: dataform.repository
        name: repo-a
"#;

#[test]
fn creates_missing_repository_then_converges() {
    let provider = RecordingProvider::new();

    let first = deploy_env(SINGLE_REPO, &provider, false).unwrap();
    assert_eq!(first.resources.len(), 1);
    assert_eq!(first.resources[0].outcome, ReconcileOutcome::Created);
    assert!(first.resources[0].applied);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].verb, HttpVerb::Post);
    assert_eq!(calls[0].request.query_value("repositoryId"), Some("repo-a"));
    assert_eq!(
        calls[0].request.path,
        "projects/demo-dev/locations/us-central1/repositories"
    );
    assert!(provider.resource(REPO_A).is_some());

    provider.reset_calls();
    let second = deploy_env(SINGLE_REPO, &provider, false).unwrap();
    assert_eq!(second.resources[0].outcome, ReconcileOutcome::Unchanged);
    assert!(provider.calls().is_empty());
    assert_eq!(provider.gets(), vec![REPO_A.to_string()]);
}

const REPO_WITH_SETTINGS: &str = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: dataform.repository
        name: repo-a
        definition:
          gitRemoteSettings:
            url: https://example.com/analytics.git
            defaultBranch: main
          labels:
            team: data
"#;

#[test]
fn update_touches_only_changed_fields() {
    let provider = RecordingProvider::new();
    provider.insert(
        REPO_A,
        json!({
            "gitRemoteSettings": {"url": "https://example.com/analytics.git", "defaultBranch": "develop"},
            "labels": {"team": "data"},
        }),
    );

    let report = deploy_env(REPO_WITH_SETTINGS, &provider, false).unwrap();
    assert_eq!(report.resources[0].outcome, ReconcileOutcome::Updated);
    assert_eq!(report.resources[0].changed_fields, vec!["gitRemoteSettings"]);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].verb, HttpVerb::Patch);
    assert_eq!(calls[0].request.path, REPO_A);
    assert_eq!(calls[0].request.update_mask(), vec!["gitRemoteSettings"]);

    provider.reset_calls();
    let again = deploy_env(REPO_WITH_SETTINGS, &provider, false).unwrap();
    assert_eq!(again.resources[0].outcome, ReconcileOutcome::Unchanged);
    assert!(provider.calls().is_empty());
}

#[test]
fn dry_run_reports_without_mutating() {
    let provider = RecordingProvider::new();
    provider.insert(
        REPO_A,
        json!({
            "gitRemoteSettings": {"url": "https://example.com/old.git", "defaultBranch": "main"},
            "labels": {"team": "data"},
        }),
    );

    let report = deploy_env(REPO_WITH_SETTINGS, &provider, true).unwrap();
    let resource = &report.resources[0];
    assert_eq!(resource.outcome, ReconcileOutcome::Updated);
    assert_eq!(resource.changed_fields, vec!["gitRemoteSettings"]);
    assert!(!resource.applied);
    assert_eq!(report.applied_count(), 0);
    assert!(provider.calls().is_empty());
}

#[test]
fn dry_run_create_is_not_issued() {
    let provider = RecordingProvider::new();
    let report = deploy_env(SINGLE_REPO, &provider, true).unwrap();
    assert_eq!(report.resources[0].outcome, ReconcileOutcome::Created);
    assert!(!report.resources[0].applied);
    assert!(provider.calls().is_empty());
    assert!(provider.resource(REPO_A).is_none());
}

#[test]
fn unknown_type_fails_before_any_remote_call() {
    let provider = RecordingProvider::new();
    let yaml = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: dataform.repository
        name: repo-a
      - type: spanner.instance
        name: db
"#;

    let err = deploy_env(yaml, &provider, false).unwrap_err();
    match &err {
        DeployError::ResourceDeployment { env, file, source } => {
            assert_eq!(env, "dev");
            assert_eq!(file, "deployment.yaml");
            assert!(matches!(**source, DeployError::UnknownResourceType(ref t) if t == "spanner.instance"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(provider.gets().is_empty());
    assert!(provider.calls().is_empty());
}

#[test]
fn profiles_are_skipped() {
    let provider = RecordingProvider::new();
    let yaml = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: resourceProfile
        name: shared-defaults
        source: profiles/shared.yaml
      - type: dataform.repository
        name: repo-a
"#;

    let report = deploy_env(yaml, &provider, false).unwrap();
    assert_eq!(report.skipped_profiles, vec!["shared-defaults"]);
    assert_eq!(report.resources.len(), 1);
    assert_eq!(provider.calls().len(), 1);
}

#[test]
fn transfer_config_found_by_display_name() {
    let provider = RecordingProvider::new();
    provider.insert(
        "projects/demo-dev/locations/us-central1/transferConfigs/6a1f",
        json!({
            "displayName": "Nightly copy",
            "dataSourceId": "cross_region_copy",
            "params": {"source_dataset_id": "raw", "overwrite_destination_table": true},
        }),
    );
    let yaml = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: bigquery.datatransfer.config
        name: nightly-copy
        displayName: Nightly copy
        serviceAccountName: dts@demo-dev.iam.gserviceaccount.com
        definition:
          dataSourceId: cross_region_copy
          params:
            source_dataset_id: curated
            overwrite_destination_table: true
"#;

    let report = deploy_env(yaml, &provider, false).unwrap();
    assert_eq!(report.resources[0].outcome, ReconcileOutcome::Updated);
    assert_eq!(report.resources[0].changed_fields, vec!["params"]);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].request.path,
        "projects/demo-dev/locations/us-central1/transferConfigs/6a1f"
    );
    assert_eq!(
        calls[0].request.query_value("serviceAccountName"),
        Some("dts@demo-dev.iam.gserviceaccount.com")
    );
    assert_eq!(calls[0].request.update_mask(), vec!["params"]);
}

#[test]
fn ambiguous_display_name_is_rejected() {
    let provider = RecordingProvider::new();
    for id in ["a1", "b2"] {
        provider.insert(
            &format!("projects/demo-dev/locations/us-central1/transferConfigs/{id}"),
            json!({"displayName": "Nightly copy"}),
        );
    }
    let yaml = r#"
environments:
  dev:
    project: demo-dev
    region: us-central1
    resources:
      - type: bigquery.datatransfer.config
        name: nightly-copy
        displayName: Nightly copy
        definition:
          dataSourceId: cross_region_copy
"#;

    let err = deploy_env(yaml, &provider, false).unwrap_err();
    let DeployError::ResourceDeployment { source, .. } = err else {
        panic!("expected wrapped error");
    };
    assert!(matches!(*source, DeployError::AmbiguousResource { count: 2, .. }));
    assert!(provider.calls().is_empty());
}
