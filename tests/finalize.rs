//! Merge sequencer integration tests: real git, in-memory agent and forge.

mod common;

use common::{FakeForge, FnAgent, TestRepo};
use pai::agent::AgentOutcome;
use pai::commands::finalize::{self, FinalizeFlags};
use pai::config::OrchestratorConfig;
use pai::forge::{ChangeRequestState, MergeStrategy};
use pai::git::Repository;
use pai::state::{
    self, FINALIZE_TOOL, MergeState, MergeStatus, ORCHESTRATE_TOOL, OrchestratorState, TaskState,
};

fn flags() -> FinalizeFlags {
    FinalizeFlags {
        dry_run: false,
        single: false,
        no_verify: true,
        strategy: MergeStrategy::Squash,
        from: None,
        auto_resolve: false,
    }
}

/// Write orchestrator state declaring completed tasks with change requests.
fn write_state(test_repo: &TestRepo, records: &[(u64, u64, &str, &str)]) {
    let mut state = OrchestratorState::new();
    for &(task_id, cr_id, branch, base) in records {
        let mut task = TaskState::new(task_id, &format!("Task {task_id}"));
        task.mark_in_progress(branch, base);
        task.mark_completed(cr_id);
        state.tasks.insert(task_id, task);
    }
    let path = state::state_path(test_repo.root(), ORCHESTRATE_TOOL);
    state::save(&mut state, &path).unwrap();
}

fn register_open_crs(forge: &FakeForge, ids: &[u64]) {
    let mut states = forge.cr_states.lock().unwrap();
    for &id in ids {
        states.insert(id, ChangeRequestState::Open);
    }
}

/// master <- feat/1-a <- feat/2-b, both pushed to origin.
fn stacked_repo() -> TestRepo {
    let test_repo = TestRepo::new().with_remote();
    test_repo.branch_with_commit("feat/1-a", "master", "one.txt", "one\n");
    test_repo.branch_with_commit("feat/2-b", "feat/1-a", "two.txt", "two\n");
    test_repo.git(&["push", "-u", "origin", "feat/1-a"]);
    test_repo.git(&["push", "-u", "origin", "feat/2-b"]);
    test_repo
}

#[test]
fn finalize_requires_orchestrator_state() {
    let test_repo = TestRepo::new();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);

    let err = finalize::run(&repo, &config, &agent, &forge, &flags()).unwrap_err();
    assert!(err.to_string().contains("pai orchestrate"));
}

#[test]
fn dry_run_prints_plan_without_merging() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "feat/1-a")],
    );
    register_open_crs(&forge, &[10, 20]);

    let mut run_flags = flags();
    run_flags.dry_run = true;
    finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap();

    assert!(forge.merged.lock().unwrap().is_empty());
    assert!(
        state::load::<MergeState>(&state::state_path(test_repo.root(), FINALIZE_TOOL)).is_none()
    );
}

#[test]
fn stacked_change_requests_merge_in_order_and_retarget() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(2, 20, "feat/2-b", "feat/1-a"), (1, 10, "feat/1-a", "master")],
    );
    register_open_crs(&forge, &[10, 20]);

    finalize::run(&repo, &config, &agent, &forge, &flags()).unwrap();

    // lower entry first, dependent second
    let merged = forge.merged.lock().unwrap();
    let merged_ids: Vec<u64> = merged.iter().map(|&(id, _)| id).collect();
    assert_eq!(merged_ids, vec![10, 20]);
    assert!(merged.iter().all(|&(_, s)| s == MergeStrategy::Squash));
    drop(merged);

    // the dependent was retargeted off the soon-deleted branch
    let retargeted = forge.retargeted.lock().unwrap();
    assert_eq!(retargeted.as_slice(), &[(20, "master".to_string())]);
    drop(retargeted);

    let merge_state: MergeState =
        state::load(&state::state_path(test_repo.root(), FINALIZE_TOOL)).unwrap();
    assert_eq!(merge_state.prs[&1].status, MergeStatus::Merged);
    assert_eq!(merge_state.prs[&2].status, MergeStatus::Merged);
    assert!(merge_state.prs[&1].merged_at.is_some());

    let closed = forge.closed_tasks.lock().unwrap();
    assert!(closed.contains(&1) && closed.contains(&2));
}

#[test]
fn single_stops_after_first_merge() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "feat/1-a")],
    );
    register_open_crs(&forge, &[10, 20]);

    let mut run_flags = flags();
    run_flags.single = true;
    finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap();

    let merged = forge.merged.lock().unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].0, 10);
}

#[test]
fn from_skips_earlier_entries() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "feat/1-a")],
    );
    register_open_crs(&forge, &[10, 20]);

    let mut run_flags = flags();
    run_flags.from = Some(2);
    finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap();

    let merged = forge.merged.lock().unwrap();
    let merged_ids: Vec<u64> = merged.iter().map(|&(id, _)| id).collect();
    assert_eq!(merged_ids, vec![20]);
}

#[test]
fn from_target_missing_is_an_error() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(&test_repo, &[(1, 10, "feat/1-a", "master")]);
    register_open_crs(&forge, &[10]);

    let mut run_flags = flags();
    run_flags.from = Some(99);
    let err = finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap_err();
    assert!(err.to_string().contains("#99"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn non_open_change_requests_are_skipped() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "feat/1-a")],
    );
    forge
        .cr_states
        .lock()
        .unwrap()
        .insert(10, ChangeRequestState::Merged);
    register_open_crs(&forge, &[20]);

    finalize::run(&repo, &config, &agent, &forge, &flags()).unwrap();

    let merged = forge.merged.lock().unwrap();
    let merged_ids: Vec<u64> = merged.iter().map(|&(id, _)| id).collect();
    assert_eq!(merged_ids, vec![20]);
}

#[test]
fn merge_is_retried_after_platform_delay() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(&test_repo, &[(1, 10, "feat/1-a", "master")]);
    register_open_crs(&forge, &[10]);
    forge.fail_merge(10, 1);

    finalize::run(&repo, &config, &agent, &forge, &flags()).unwrap();

    let merged = forge.merged.lock().unwrap();
    assert_eq!(merged.len(), 1);
}

#[test]
fn exhausted_merge_retries_record_failure_and_continue() {
    let test_repo = stacked_repo();
    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let agent = FnAgent::accepting();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "feat/1-a")],
    );
    register_open_crs(&forge, &[10, 20]);
    forge.fail_merge(10, 2);

    finalize::run(&repo, &config, &agent, &forge, &flags()).unwrap();

    let merge_state: MergeState =
        state::load(&state::state_path(test_repo.root(), FINALIZE_TOOL)).unwrap();
    assert_eq!(merge_state.prs[&1].status, MergeStatus::Failed);
    // the failure was local: the dependent still merged
    assert_eq!(merge_state.prs[&2].status, MergeStatus::Merged);
}

#[test]
fn rebase_conflict_with_auto_resolve_merges() {
    let test_repo = TestRepo::new().with_remote();
    test_repo.branch_with_commit("feat/1-a", "master", "README.md", "feature\n");
    test_repo.git(&["push", "-u", "origin", "feat/1-a"]);
    test_repo.commit_file("README.md", "main\n", "diverge on master");
    test_repo.git(&["push", "origin", "master"]);

    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let forge = FakeForge::new(vec![]);
    write_state(&test_repo, &[(1, 10, "feat/1-a", "master")]);
    register_open_crs(&forge, &[10]);

    let agent = FnAgent::new(|request| {
        if request.prompt.contains("merge conflict") {
            return AgentOutcome {
                ok: true,
                output: "merged readme\n".to_string(),
            };
        }
        AgentOutcome {
            ok: true,
            output: String::new(),
        }
    });

    let mut run_flags = flags();
    run_flags.auto_resolve = true;
    finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap();

    assert_eq!(forge.merged.lock().unwrap().len(), 1);
    let merge_state: MergeState =
        state::load(&state::state_path(test_repo.root(), FINALIZE_TOOL)).unwrap();
    assert_eq!(merge_state.prs[&1].status, MergeStatus::Merged);

    // the resolved content ended up on the rebased branch
    let content = test_repo.git_stdout(&["show", "feat/1-a:README.md"]);
    assert_eq!(content, "merged readme\n");
}

#[test]
fn rejected_resolution_marks_conflict_and_continues() {
    let test_repo = TestRepo::new().with_remote();
    test_repo.branch_with_commit("feat/1-a", "master", "README.md", "feature\n");
    test_repo.branch_with_commit("feat/2-b", "master", "other.txt", "other\n");
    test_repo.git(&["push", "-u", "origin", "feat/1-a"]);
    test_repo.git(&["push", "-u", "origin", "feat/2-b"]);
    test_repo.commit_file("README.md", "main\n", "diverge on master");
    test_repo.git(&["push", "origin", "master"]);

    let repo = Repository::at(test_repo.root());
    let config = OrchestratorConfig::default();
    let forge = FakeForge::new(vec![]);
    write_state(
        &test_repo,
        &[(1, 10, "feat/1-a", "master"), (2, 20, "feat/2-b", "master")],
    );
    register_open_crs(&forge, &[10, 20]);

    // empty output is rejected by the validator
    let agent = FnAgent::new(|_| AgentOutcome {
        ok: true,
        output: String::new(),
    });

    let mut run_flags = flags();
    run_flags.auto_resolve = true;
    finalize::run(&repo, &config, &agent, &forge, &run_flags).unwrap();

    let merge_state: MergeState =
        state::load(&state::state_path(test_repo.root(), FINALIZE_TOOL)).unwrap();
    assert_eq!(merge_state.prs[&1].status, MergeStatus::Conflict);
    // entry 2 was unaffected by entry 1's conflict
    assert_eq!(merge_state.prs[&2].status, MergeStatus::Merged);
}
