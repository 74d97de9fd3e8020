//! Ancestry checks against real git histories.

mod support;

use git2::{Repository, Signature};
use tempfile::TempDir;

use declpipe_core::error::DeployError;
use declpipe_core::version::{
    AncestryValidator, AncestryVerdict, Bypass, GitHistory, VersionControl, VersionId,
};

use support::{commit_all, write_file};

struct Fixture {
    _temp: TempDir,
    history: GitHistory,
    first: String,
    second: String,
    divergent: String,
}

/// first -> second on the main line, and `divergent` branching off first.
fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let repo = Repository::init(temp.path()).unwrap();

    write_file(temp.path(), "jobs/load.py", "print('v1')\n");
    let first = commit_all(&repo, "first");
    write_file(temp.path(), "jobs/load.py", "print('v2')\n");
    let second = commit_all(&repo, "second");

    let sig = Signature::now("deployer", "deployer@example.com").unwrap();
    let first_commit = repo.find_commit(first).unwrap();
    let tree = first_commit.tree().unwrap();
    let divergent = repo
        .commit(None, &sig, &sig, "side branch", &tree, &[&first_commit])
        .unwrap();

    Fixture {
        history: GitHistory::new(temp.path()),
        _temp: temp,
        first: first.to_string(),
        second: second.to_string(),
        divergent: divergent.to_string(),
    }
}

fn check(
    fixture: &Fixture,
    env: &str,
    remote: &str,
    local: &str,
    bypass: Bypass,
) -> Result<AncestryVerdict, DeployError> {
    AncestryValidator::default().validate(
        &fixture.history,
        env,
        Some(&VersionId::new(remote)),
        &VersionId::new(local),
        bypass,
    )
}

#[test]
fn descendant_is_accepted() {
    let f = fixture();
    assert_eq!(
        check(&f, "prod", &f.first, &f.second, Bypass::None).unwrap(),
        AncestryVerdict::Descendant
    );
}

#[test]
fn republishing_the_same_commit_is_accepted() {
    let f = fixture();
    assert_eq!(
        check(&f, "prod", &f.second, &f.second, Bypass::None).unwrap(),
        AncestryVerdict::Descendant
    );
}

#[test]
fn older_commit_is_blocked_in_every_environment() {
    let f = fixture();
    for env in ["dev", "stage", "prod"] {
        let err = check(&f, env, &f.second, &f.first, Bypass::None).unwrap_err();
        assert!(matches!(err, DeployError::RegressionBlocked { .. }), "{env}");
    }
}

#[test]
fn divergent_history_is_blocked() {
    let f = fixture();
    let err = check(&f, "stage", &f.second, &f.divergent, Bypass::None).unwrap_err();
    assert!(matches!(err, DeployError::RegressionBlocked { ref remote, .. } if *remote == f.second));
}

#[test]
fn forced_marker_is_ignored_when_walking_history() {
    let f = fixture();
    let remote = VersionId::forced(&f.first, 1_700_000_000);
    let local = VersionId::forced(&f.second, 1_700_000_100);
    let verdict = AncestryValidator::default()
        .validate(&f.history, "prod", Some(&remote), &local, Bypass::None)
        .unwrap();
    assert_eq!(verdict, AncestryVerdict::Descendant);
}

#[test]
fn unknown_remote_depends_on_environment() {
    let f = fixture();
    let unknown = "0123456789abcdef0123456789abcdef01234567";
    assert!(!f.history.known_locally(unknown).unwrap());

    let err = check(&f, "prod", unknown, &f.second, Bypass::None).unwrap_err();
    assert!(matches!(err, DeployError::RegressionBlocked { .. }));
    assert_eq!(
        check(&f, "dev", unknown, &f.second, Bypass::None).unwrap(),
        AncestryVerdict::UnknownRemote
    );
}

#[test]
fn force_and_rollback_bypass_the_check() {
    let f = fixture();
    for bypass in [Bypass::Force, Bypass::Rollback] {
        assert_eq!(
            check(&f, "prod", &f.second, &f.first, bypass).unwrap(),
            AncestryVerdict::Bypassed
        );
    }
}

#[test]
fn missing_remote_is_accepted() {
    let f = fixture();
    let verdict = AncestryValidator::default()
        .validate(&f.history, "prod", None, &VersionId::new(&f.first), Bypass::None)
        .unwrap();
    assert_eq!(verdict, AncestryVerdict::NoRemote);
}
