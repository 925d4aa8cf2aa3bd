// Copyright (c) The functest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Basic end-to-end tests for the test runner, driving real child processes.
//!
//! The fixture "units" are small shell scripts written into a shared directory at first use,
//! exercising each leg of the unit contract: exit codes, stderr discipline, the skip sentinel,
//! interrupt handling, and coverage fragments.

#![cfg(unix)]

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use functest_runner::{
    coverage::{CommandCoverage, REFERENCE_FILENAME},
    runner::{CompletedTest, TestRunner, TestRunnerOpts, TestStatus},
    signal::SignalHandler,
    test_list::TestList,
};
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    os::unix::fs::PermissionsExt,
    sync::atomic::Ordering,
    thread,
    time::{Duration, Instant},
};

static FIXTURES: Lazy<Utf8TempDir> = Lazy::new(|| {
    let dir = camino_tempfile::tempdir().expect("created fixture dir");

    write_script(dir.path(), "pass.sh", "#!/bin/sh\nexit 0\n");
    write_script(
        dir.path(),
        "fail.sh",
        "#!/bin/sh\necho failing output\nexit 1\n",
    );
    write_script(
        dir.path(),
        "stderr-pass.sh",
        "#!/bin/sh\necho boom >&2\nexit 0\n",
    );
    write_script(
        dir.path(),
        "skip.sh",
        "#!/bin/sh\necho deliberately skipped >&2\nexit 77\n",
    );
    write_script(dir.path(), "sleep.sh", "#!/bin/sh\nsleep 0.3\nexit 0\n");
    write_script(
        dir.path(),
        "seed.sh",
        concat!(
            "#!/bin/sh\n",
            "for arg in \"$@\"; do\n",
            "  case \"$arg\" in\n",
            "    --portseed=*) echo \"${arg#*=}\" ;;\n",
            "  esac\n",
            "done\n",
            "exit 0\n",
        ),
    );
    // Responds to the graceful interrupt tier; would otherwise run for ~30s.
    write_script(
        dir.path(),
        "trap.sh",
        concat!(
            "#!/bin/sh\n",
            "trap 'exit 1' INT\n",
            "i=0\n",
            "while [ \"$i\" -lt 300 ]; do\n",
            "  sleep 0.1\n",
            "  i=$((i+1))\n",
            "done\n",
            "exit 0\n",
        ),
    );
    // Records its own pid in its working directory, then blocks.
    write_script(dir.path(), "hang.sh", "#!/bin/sh\necho $$ > pid\nsleep 30\nexit 0\n");
    write_script(
        dir.path(),
        "cover.sh",
        concat!(
            "#!/bin/sh\n",
            "for arg in \"$@\"; do\n",
            "  case \"$arg\" in\n",
            "    --coveragedir=*) dir=\"${arg#*=}\" ;;\n",
            "  esac\n",
            "done\n",
            "echo \"$1\" >> \"$dir/coverage.$$\"\n",
            "exit 0\n",
        ),
    );

    dir
});

fn write_script(dir: &Utf8Path, name: &str, contents: &str) {
    let path = dir.join(name);
    fs::write(&path, contents).expect("wrote script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("made script executable");
}

fn build_runner(
    names: &[&str],
    jobs: usize,
    timeout: Option<u64>,
    flags: Vec<String>,
    tmpdir: &Utf8Path,
) -> TestRunner {
    let test_list = TestList::new(names.iter().copied(), &[]).expect("valid test list");
    TestRunnerOpts {
        jobs: Some(jobs),
        timeout,
    }
    .build(
        test_list,
        FIXTURES.path(),
        tmpdir,
        flags,
        SignalHandler::noop().canceled_flag(),
    )
    .expect("runner built")
}

/// Pulls every result out of a fresh runner and returns them keyed by unit name.
fn execute_collect(
    names: &[&str],
    jobs: usize,
    timeout: Option<u64>,
    flags: Vec<String>,
) -> (BTreeMap<String, CompletedTest>, Utf8TempDir) {
    let tmpdir = camino_tempfile::tempdir().expect("created tmpdir");
    let mut runner = build_runner(names, jobs, timeout, flags, tmpdir.path());

    let mut completed = BTreeMap::new();
    for _ in 0..names.len() {
        let test = runner.get_next().expect("next result");
        completed.insert(test.result.name.clone(), test);
    }
    runner
        .get_next()
        .expect_err("get_next past the end is a contract violation");
    (completed, tmpdir)
}

#[test]
fn test_classification() {
    let (completed, _tmpdir) = execute_collect(
        &["pass.sh", "fail.sh", "skip.sh", "stderr-pass.sh"],
        2,
        None,
        vec![],
    );
    assert_eq!(completed.len(), 4, "every spec yields exactly one result");

    assert_eq!(completed["pass.sh"].result.status, TestStatus::Passed);
    assert_eq!(completed["fail.sh"].result.status, TestStatus::Failed);
    assert_eq!(
        completed["skip.sh"].result.status,
        TestStatus::Skipped,
        "skip code wins even with stderr output"
    );
    assert_eq!(
        completed["stderr-pass.sh"].result.status,
        TestStatus::Failed,
        "stderr output fails a clean exit"
    );

    assert_eq!(completed["fail.sh"].stdout, b"failing output\n");
    assert_eq!(completed["stderr-pass.sh"].stderr, b"boom\n");

    for test in completed.values() {
        assert!(
            test.testdir.is_dir(),
            "working directory survives for post-mortem inspection"
        );
    }
}

#[test]
fn test_every_spec_yields_one_result() {
    // N = 1
    let (completed, _tmpdir) = execute_collect(&["pass.sh solo"], 1, None, vec![]);
    assert_eq!(completed.len(), 1);
    assert!(completed["pass.sh solo"].result.was_successful());

    // N = 50 with more specs than slots
    let names: Vec<String> = (0..50).map(|n| format!("pass.sh {}", n)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (completed, _tmpdir) = execute_collect(&name_refs, 8, None, vec![]);

    let got: BTreeSet<&str> = completed.keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    assert_eq!(got, expected, "no duplicates, no omissions");
    for test in completed.values() {
        assert_eq!(test.result.status, TestStatus::Passed);
    }
}

#[test]
fn test_get_next_on_empty_runner_is_an_error() {
    let tmpdir = camino_tempfile::tempdir().expect("created tmpdir");
    let mut runner = build_runner(&[], 1, None, vec![], tmpdir.path());
    runner
        .get_next()
        .expect_err("nothing pending or running is a contract violation");
}

#[test]
fn test_bounded_parallelism() {
    let names: Vec<String> = (0..6).map(|n| format!("sleep.sh {}", n)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let tmpdir = camino_tempfile::tempdir().expect("created tmpdir");
    let mut runner = build_runner(&name_refs, 2, None, vec![], tmpdir.path());
    assert_eq!(runner.running_count(), 0);
    assert_eq!(runner.pending_count(), 6);

    for pulled in 1..=6 {
        runner.get_next().expect("next result");
        assert!(
            runner.running_count() <= 2,
            "at most 2 jobs in flight after {} results",
            pulled
        );
    }
    assert_eq!(runner.pending_count(), 0);
    assert_eq!(runner.running_count(), 0);
}

#[test]
fn test_timeout_sends_interrupt() {
    let (completed, _tmpdir) = execute_collect(&["trap.sh"], 1, Some(1), vec![]);
    let test = &completed["trap.sh"];
    assert_eq!(
        test.result.status,
        TestStatus::Failed,
        "interrupted unit exits nonzero and classifies normally"
    );
    assert!(
        test.result.time_taken >= Duration::from_secs(1),
        "interrupt is not sent before the deadline"
    );
    assert!(
        test.result.time_taken < Duration::from_secs(10),
        "interrupt cut the unit short (took {:?})",
        test.result.time_taken
    );
}

#[test]
fn test_failfast_stops_dequeueing() {
    let tmpdir = camino_tempfile::tempdir().expect("created tmpdir");
    let mut runner = build_runner(
        &["fail.sh", "pass.sh 1", "pass.sh 2"],
        1,
        None,
        vec![],
        tmpdir.path(),
    );

    // The caller owns fail-fast policy: stop pulling after the first failure.
    let mut results = Vec::new();
    loop {
        let test = runner.get_next().expect("next result");
        let failed = test.result.status == TestStatus::Failed;
        results.push(test.result);
        if failed {
            break;
        }
    }
    runner.kill_and_join().expect("clean shutdown");

    assert_eq!(results.len(), 1, "no further results after the failure");
    assert_eq!(runner.pending_count(), 2, "remaining specs never dequeued");
    assert_eq!(runner.running_count(), 0);
}

#[test]
fn test_kill_and_join_leaves_no_processes() {
    let tmpdir = camino_tempfile::tempdir().expect("created tmpdir");
    let handler = SignalHandler::noop();
    let canceled = handler.canceled_flag();

    let test_list =
        TestList::new(["hang.sh a", "hang.sh b"], &[]).expect("valid test list");
    let mut runner = TestRunnerOpts {
        jobs: Some(2),
        timeout: None,
    }
    .build(
        test_list,
        FIXTURES.path(),
        tmpdir.path(),
        vec![],
        canceled.clone(),
    )
    .expect("runner built");

    let pids = thread::scope(|scope| {
        let waiter = scope.spawn(|| runner.get_next());
        // Both units are in flight once their pid files land; cancel the blocked get_next.
        let pids = wait_for_pid_files(tmpdir.path(), 2);
        assert_eq!(pids.len(), 2);
        canceled.store(true, Ordering::Release);
        let result = waiter.join().expect("waiter thread finished");
        result.expect_err("cancellation surfaces as an error");
        pids
    });

    assert_eq!(runner.running_count(), 2, "canceled jobs are still tracked");
    runner.kill_and_join().expect("killed and reaped");
    assert_eq!(runner.running_count(), 0);

    for pid in pids {
        let alive = unsafe { libc::kill(pid, 0) == 0 };
        assert!(!alive, "process {} still alive after kill_and_join", pid);
    }
}

fn wait_for_pid_files(root: &Utf8Path, expected: usize) -> Vec<i32> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut pids = Vec::new();
        for entry in fs::read_dir(root).expect("read tmp root") {
            let entry = entry.expect("tmp root entry");
            let pid_file = entry.path().join("pid");
            if let Ok(contents) = fs::read_to_string(pid_file) {
                if let Ok(pid) = contents.trim().parse::<i32>() {
                    pids.push(pid);
                }
            }
        }
        if pids.len() >= expected {
            return pids;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} pid files",
            expected
        );
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_overlapping_seeds_are_disjoint() {
    let names: Vec<String> = (0..5).map(|n| format!("seed.sh {}", n)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (completed, _tmpdir) = execute_collect(&name_refs, 5, None, vec![]);

    let seeds: BTreeSet<u64> = completed
        .values()
        .map(|test| {
            String::from_utf8_lossy(&test.stdout)
                .trim()
                .parse()
                .expect("unit echoed its seed")
        })
        .collect();
    assert_eq!(seeds.len(), 5, "concurrent jobs never share a seed");
}

#[test]
fn test_spawn_failure_is_a_failed_result() {
    let (completed, _tmpdir) =
        execute_collect(&["does-not-exist.sh", "pass.sh"], 1, None, vec![]);
    assert_eq!(completed.len(), 2, "spawn failure does not abort the run");

    let missing = &completed["does-not-exist.sh"];
    assert_eq!(missing.result.status, TestStatus::Failed);
    let stderr = String::from_utf8_lossy(&missing.stderr);
    assert!(
        stderr.contains("failed to launch"),
        "spawn error captured as stderr: {}",
        stderr
    );
    assert!(completed["pass.sh"].result.was_successful());
}

#[test]
fn test_workdir_layout() {
    let (completed, tmpdir) = execute_collect(&["pass.sh layout"], 1, None, vec![]);
    let testdir = &completed["pass.sh layout"].testdir;
    assert!(testdir.starts_with(tmpdir.path()), "workdir lives under the run root");
    let dir_name = testdir.file_name().expect("workdir has a name");
    assert!(
        dir_name.starts_with("pass_"),
        "workdir named from the program stem and seed: {}",
        dir_name
    );
}

#[test]
fn test_coverage_report() {
    let coverage = CommandCoverage::create().expect("created coverage dir");
    fs::write(
        coverage.dir().join(REFERENCE_FILENAME),
        "getinfo\ngetblock\nsendraw\n",
    )
    .expect("wrote reference");

    let (completed, _tmpdir) = execute_collect(
        &["cover.sh getinfo", "cover.sh getblock"],
        2,
        None,
        vec![coverage.flag()],
    );
    for test in completed.values() {
        assert!(test.result.was_successful());
    }

    let uncovered = coverage.uncovered_commands().expect("diff succeeded");
    assert_eq!(
        uncovered.into_iter().collect::<Vec<_>>(),
        ["sendraw"],
        "only the unexercised command is reported"
    );
}
