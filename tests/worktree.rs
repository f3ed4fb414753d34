//! Worktree manager integration tests against real git repositories.

mod common;

use common::TestRepo;
use pai::config::OrchestratorConfig;
use pai::git::{self, GitError, Repository};
use pai::output::TaskLogger;

fn setup() -> (TestRepo, OrchestratorConfig, TaskLogger) {
    (TestRepo::new(), OrchestratorConfig::default(), TaskLogger::root())
}

#[test]
fn worktree_from_configured_base_when_no_deps() {
    let (test_repo, config, logger) = setup();
    let repo = Repository::at(test_repo.root());

    let setup = git::create_worktree(&repo, "feat/1-solo", &[], &config, &logger).unwrap();

    assert_eq!(setup.base_branch, "master");
    assert!(setup.worktree_path.exists());
    assert!(setup.worktree_path.join("README.md").exists());
    let worktree_repo = Repository::at(&setup.worktree_path);
    assert_eq!(
        worktree_repo.current_branch().unwrap().as_deref(),
        Some("feat/1-solo")
    );
}

#[test]
fn worktree_bases_on_first_existing_dep_branch() {
    let (test_repo, config, logger) = setup();
    test_repo.branch_with_commit("feat/dep", "master", "dep.txt", "dep work\n");
    let repo = Repository::at(test_repo.root());

    let setup = git::create_worktree(
        &repo,
        "feat/child",
        &["feat/dep".to_string()],
        &config,
        &logger,
    )
    .unwrap();

    assert_eq!(setup.base_branch, "feat/dep");
    let worktree_repo = Repository::at(&setup.worktree_path);
    let log = worktree_repo
        .run_command(&["log", "--format=%s"])
        .unwrap();
    assert!(log.contains("work on feat/dep"), "log was: {log}");
    assert!(setup.worktree_path.join("dep.txt").exists());
}

#[test]
fn worktree_merges_remaining_dep_branches() {
    let (test_repo, config, logger) = setup();
    test_repo.branch_with_commit("feat/a", "master", "a.txt", "a\n");
    test_repo.branch_with_commit("feat/b", "master", "b.txt", "b\n");
    let repo = Repository::at(test_repo.root());

    let setup = git::create_worktree(
        &repo,
        "feat/child",
        &["feat/a".to_string(), "feat/b".to_string()],
        &config,
        &logger,
    )
    .unwrap();

    assert_eq!(setup.base_branch, "feat/a");
    assert!(setup.worktree_path.join("a.txt").exists());
    assert!(setup.worktree_path.join("b.txt").exists());
}

#[test]
fn worktree_missing_dep_branches_are_skipped() {
    let (test_repo, config, logger) = setup();
    test_repo.branch_with_commit("feat/real", "master", "real.txt", "real\n");
    let repo = Repository::at(test_repo.root());

    let setup = git::create_worktree(
        &repo,
        "feat/child",
        &["feat/ghost".to_string(), "feat/real".to_string()],
        &config,
        &logger,
    )
    .unwrap();

    // the missing first dep is ignored; the real one becomes the base
    assert_eq!(setup.base_branch, "feat/real");
}

#[test]
fn worktree_conflicting_dep_merge_fails_and_cleans_up() {
    let (test_repo, config, logger) = setup();
    test_repo.branch_with_commit("feat/a", "master", "shared.txt", "from a\n");
    test_repo.branch_with_commit("feat/b", "master", "shared.txt", "from b\n");
    let repo = Repository::at(test_repo.root());

    let result = git::create_worktree(
        &repo,
        "feat/child",
        &["feat/a".to_string(), "feat/b".to_string()],
        &config,
        &logger,
    );

    match result {
        Err(GitError::MergeConflict { branch }) => assert_eq!(branch, "feat/b"),
        other => panic!("expected MergeConflict, got {other:?}"),
    }
    // the half-built worktree is gone
    let worktree_path = test_repo.root().join(".pait/worktrees/feat-child");
    assert!(!worktree_path.exists());
}

#[test]
fn worktree_replaces_stale_branch() {
    let (test_repo, config, logger) = setup();
    // a stale branch with an extra commit, left by a previous run
    test_repo.branch_with_commit("feat/1-retry", "master", "stale.txt", "stale\n");
    let repo = Repository::at(test_repo.root());

    let setup = git::create_worktree(&repo, "feat/1-retry", &[], &config, &logger).unwrap();

    // the branch was recreated from master; the stale commit is gone
    assert!(!setup.worktree_path.join("stale.txt").exists());
    assert_eq!(setup.base_branch, "master");
}

#[test]
fn worktree_create_twice_is_idempotent() {
    let (test_repo, config, logger) = setup();
    let repo = Repository::at(test_repo.root());

    let first = git::create_worktree(&repo, "feat/1-again", &[], &config, &logger).unwrap();
    // no teardown: a second create must clean up and succeed
    let second = git::create_worktree(&repo, "feat/1-again", &[], &config, &logger).unwrap();

    assert_eq!(first.worktree_path, second.worktree_path);
    assert!(second.worktree_path.exists());
}

#[test]
fn remove_worktree_keeps_branch() {
    let (test_repo, config, logger) = setup();
    let repo = Repository::at(test_repo.root());
    let setup = git::create_worktree(&repo, "feat/1-done", &[], &config, &logger).unwrap();

    git::remove_worktree(&repo, &setup.worktree_path, "feat/1-done", &logger);

    assert!(!setup.worktree_path.exists());
    assert!(test_repo.branch_exists("feat/1-done"));
}

#[test]
fn remove_worktree_survives_missing_directory() {
    let (test_repo, config, logger) = setup();
    let repo = Repository::at(test_repo.root());
    let setup = git::create_worktree(&repo, "feat/1-gone", &[], &config, &logger).unwrap();

    // simulate a crash that deleted the directory but left the registration
    std::fs::remove_dir_all(&setup.worktree_path).unwrap();
    git::remove_worktree(&repo, &setup.worktree_path, "feat/1-gone", &logger);

    assert!(!setup.worktree_path.exists());
}
