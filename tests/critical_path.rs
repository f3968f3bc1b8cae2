//! Integration tests for the critical path: init → run → re-run → change.
//!
//! These tests run the actual `confgit` binary against temp git repos.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use git2::Repository;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture: source dir + bare remote + isolated state dir.
struct TestRig {
    source: TempDir,
    remote: TempDir,
    state: TempDir,
    config_path: PathBuf,
}

impl TestRig {
    fn new() -> Self {
        let remote = TempDir::new().expect("remote dir");
        let bare = Repository::init_bare(remote.path()).expect("init bare");
        bare.set_head("refs/heads/main").expect("bare HEAD");
        seed_commit(&bare, "README.md", "ops configs\n");

        let source = TempDir::new().expect("source dir");
        fs::write(source.path().join("a.conf"), "X").expect("seed source");

        let state = TempDir::new().expect("state dir");
        let config_path = state.path().join("confgit.toml");
        let config = format!(
            r#"
[repo]
remote = {remote:?}
branch = "main"
workdir = {workdir:?}
target_subtree = "hosts/testhost"
policy = "rebase"
push = true
retries = 1

[[sources]]
path = {source:?}
dest = "etc"

[lock]
path = {lock:?}
"#,
            remote = remote.path().to_str().unwrap(),
            workdir = state.path().join("work").to_str().unwrap(),
            source = source.path().to_str().unwrap(),
            lock = state.path().join("run.lock").to_str().unwrap(),
        );
        fs::write(&config_path, config).expect("write config");

        Self {
            source,
            remote,
            state,
            config_path,
        }
    }

    fn confgit(&self) -> Command {
        let mut cmd = Command::cargo_bin("confgit").expect("confgit binary");
        cmd.env("CONFGIT_DATA_DIR", self.state.path().join("data"));
        for var in [
            "CONFGIT_REMOTE",
            "CONFGIT_BRANCH",
            "CONFGIT_LOCK_PATH",
            "CONFGIT_NO_PUSH",
        ] {
            cmd.env_remove(var);
        }
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }

    fn workdir(&self) -> PathBuf {
        self.state.path().join("work")
    }

    fn remote_commit_count(&self) -> usize {
        commit_count(self.remote.path())
    }

    fn remote_file(&self, rel: &str) -> Option<String> {
        let repo = Repository::open(self.remote.path()).expect("open remote");
        let oid = repo.refname_to_id("refs/heads/main").ok()?;
        let tree = repo.find_commit(oid).expect("head commit").tree().expect("tree");
        let entry = tree.get_path(Path::new(rel)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

fn seed_commit(bare: &Repository, name: &str, content: &str) {
    let blob = bare.blob(content.as_bytes()).expect("blob");
    let mut builder = bare.treebuilder(None).expect("treebuilder");
    builder.insert(name, blob, 0o100644).expect("insert");
    let tree = bare.find_tree(builder.write().expect("tree")).expect("find");
    let sig = git2::Signature::now("Seed", "seed@test.com").expect("sig");
    bare.commit(Some("refs/heads/main"), &sig, &sig, "initial import", &tree, &[])
        .expect("seed commit");
}

fn commit_count(repo_path: &Path) -> usize {
    let repo = Repository::open(repo_path).expect("open repo");
    let Ok(oid) = repo.refname_to_id("refs/heads/main") else {
        return 0;
    };
    let mut walk = repo.revwalk().expect("revwalk");
    walk.push(oid).expect("push");
    walk.count()
}

/// Push a file's mtime forward so same-size edits register as changes.
fn touch_future(path: &Path) {
    let file = fs::OpenOptions::new().write(true).open(path).expect("open");
    file.set_modified(SystemTime::now() + Duration::from_secs(2))
        .expect("set mtime");
}

#[test]
fn first_run_commits_snapshot() {
    let rig = TestRig::new();

    rig.confgit().arg("run").assert().success();

    assert_eq!(rig.remote_commit_count(), 2);
    assert_eq!(
        rig.remote_file("hosts/testhost/etc/a.conf").as_deref(),
        Some("X")
    );
}

#[test]
fn unchanged_rerun_produces_no_commit() {
    let rig = TestRig::new();

    rig.confgit().arg("run").assert().success();
    assert_eq!(rig.remote_commit_count(), 2);

    rig.confgit().arg("run").assert().success();
    assert_eq!(rig.remote_commit_count(), 2);
}

#[test]
fn changed_file_produces_exactly_one_commit() {
    let rig = TestRig::new();
    rig.confgit().arg("run").assert().success();

    let a_conf = rig.source.path().join("a.conf");
    fs::write(&a_conf, "Y").expect("modify");
    touch_future(&a_conf);

    rig.confgit().arg("run").assert().success();

    assert_eq!(rig.remote_commit_count(), 3);
    assert_eq!(
        rig.remote_file("hosts/testhost/etc/a.conf").as_deref(),
        Some("Y")
    );

    // The new commit's diff touches only a.conf.
    let repo = Repository::open(rig.remote.path()).expect("open remote");
    let head = repo
        .find_commit(repo.refname_to_id("refs/heads/main").expect("head"))
        .expect("commit");
    let parent = head.parent(0).expect("parent");
    let diff = repo
        .diff_tree_to_tree(
            Some(&parent.tree().expect("tree")),
            Some(&head.tree().expect("tree")),
            None,
        )
        .expect("diff");
    let paths: Vec<_> = diff
        .deltas()
        .filter_map(|d| d.new_file().path().map(|p| p.to_path_buf()))
        .collect();
    assert_eq!(paths, vec![PathBuf::from("hosts/testhost/etc/a.conf")]);
}

#[test]
fn dry_run_mirrors_but_never_commits() {
    let rig = TestRig::new();

    rig.confgit()
        .args(["run", "--dry-run", "--report"])
        .assert()
        .success()
        .stdout(predicate::str::contains("commit       none"));

    // Mirrored into the working tree, but nothing published.
    assert_eq!(rig.remote_commit_count(), 1);
    assert!(rig.workdir().join("hosts/testhost/etc/a.conf").exists());
    assert_eq!(commit_count(&rig.workdir()), 1);
}

#[test]
fn held_lock_fails_fast_without_touching_the_repo() {
    let rig = TestRig::new();
    fs::write(rig.state.path().join("run.lock"), "{}").expect("fake holder");

    rig.confgit()
        .arg("run")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("lock already held"));

    assert_eq!(rig.remote_commit_count(), 1);
    assert!(!rig.workdir().exists());
}

#[test]
fn excluded_files_are_never_snapshotted() {
    let rig = TestRig::new();
    fs::write(rig.source.path().join("state.db"), "binary").expect("write db");
    fs::create_dir_all(rig.source.path().join(".git")).expect("vcs dir");
    fs::write(rig.source.path().join(".git/config"), "vcs").expect("vcs file");

    rig.confgit().arg("run").assert().success();

    assert!(rig.remote_file("hosts/testhost/etc/a.conf").is_some());
    assert!(rig.remote_file("hosts/testhost/etc/state.db").is_none());
    assert!(rig.remote_file("hosts/testhost/etc/.git/config").is_none());
}

#[test]
fn no_push_keeps_commit_local_until_next_push_run() {
    let rig = TestRig::new();

    rig.confgit().args(["run", "--no-push"]).assert().success();
    assert_eq!(rig.remote_commit_count(), 1);
    assert_eq!(commit_count(&rig.workdir()), 2);

    // A later push-enabled run drains the pending commit even though
    // nothing changed on disk.
    rig.confgit().arg("run").assert().success();
    assert_eq!(rig.remote_commit_count(), 2);
    assert_eq!(commit_count(&rig.workdir()), 2);
}

#[test]
fn report_prints_summary_and_json_is_parseable() {
    let rig = TestRig::new();

    rig.confgit()
        .args(["run", "--report"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alignment"))
        .stdout(predicate::str::contains("staged"));

    let output = rig
        .confgit()
        .args(["run", "--json", "--quiet"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value =
        serde_json::from_slice(&output).expect("json report parses");
    assert_eq!(value["staged_files"], 0);
    assert_eq!(value["commit"], serde_json::Value::Null);
}

#[test]
fn removed_source_file_disappears_from_snapshot() {
    let rig = TestRig::new();
    fs::write(rig.source.path().join("b.conf"), "gone soon").expect("write");
    rig.confgit().arg("run").assert().success();
    assert!(rig.remote_file("hosts/testhost/etc/b.conf").is_some());

    fs::remove_file(rig.source.path().join("b.conf")).expect("remove");
    rig.confgit().arg("run").assert().success();

    assert!(rig.remote_file("hosts/testhost/etc/b.conf").is_none());
    assert!(rig.remote_file("hosts/testhost/etc/a.conf").is_some());
}

#[test]
fn foreign_staged_paths_abort_before_commit() {
    let rig = TestRig::new();
    rig.confgit().arg("run").assert().success();
    assert_eq!(rig.remote_commit_count(), 2);

    // A foreign `git add` stages an out-of-scope change in the working
    // copy; the next run must refuse to commit it.
    let repo = Repository::open(rig.workdir()).expect("open workdir");
    fs::write(rig.workdir().join("README.md"), "tampered").expect("tamper");
    let mut index = repo.index().expect("index");
    index.add_path(Path::new("README.md")).expect("stage foreign path");
    index.write().expect("write index");

    rig.confgit()
        .arg("run")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("escapes the target subtree"));

    assert_eq!(rig.remote_commit_count(), 2);
}

#[test]
fn init_writes_skeleton_and_refuses_overwrite() {
    let state = TempDir::new().expect("state dir");
    let path = state.path().join("confgit.toml");

    let mut cmd = Command::cargo_bin("confgit").expect("confgit binary");
    cmd.env("CONFGIT_DATA_DIR", state.path().join("data"));
    cmd.arg("init").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("wrote"));
    assert!(fs::read_to_string(&path)
        .expect("skeleton")
        .contains("[repo]"));

    let mut again = Command::cargo_bin("confgit").expect("confgit binary");
    again.env("CONFGIT_DATA_DIR", state.path().join("data"));
    again.arg("init").arg(&path);
    again
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn usage_errors_exit_2() {
    let mut cmd = Command::cargo_bin("confgit").expect("confgit binary");
    cmd.arg("bogus-subcommand");
    cmd.assert().failure().code(2);
}

#[test]
fn missing_configuration_fails_before_any_mutation() {
    let rig = TestRig::new();
    fs::write(&rig.config_path, "[repo]\nbranch = \"main\"\n").expect("gut config");

    rig.confgit()
        .arg("run")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("missing required configuration"));

    assert_eq!(rig.remote_commit_count(), 1);
    assert!(!rig.workdir().exists());
}
