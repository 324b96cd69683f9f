//! Storage backends against a temporary filesystem.

use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hpcid_connector::prelude::*;
use hpcid_connector_storage::{
    FilesystemSimulator, HomeDirConfig, HomeDirectories, HomeLinks, HomeRepair, HomeState,
    Ownership, QuotaTool, StorageBackend, StorageConfig, UserQuota,
};

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new(subdirs: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for sub in subdirs {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        Self { _dir: dir, root }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn storage_config(&self) -> StorageConfig {
        let mut config = StorageConfig::new(vec![self.path("projects"), self.path("scratch")])
            .with_home_root(self.path("home"));
        config.step_delay_secs = 0;
        config
    }
}

fn executor(sim: Arc<FilesystemSimulator>, dry_run: bool) -> CommandExecutor {
    CommandExecutor::new(sim, dry_run, Duration::from_secs(30))
}

fn desired(group: &str) -> DesiredState {
    DesiredState::Storage {
        group: group.to_string(),
        quotas: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_apply_creates_directory_on_every_mount() {
    let fx = Fixture::new(&["projects", "scratch", "home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let backend = StorageBackend::new(fx.storage_config(), executor(sim.clone(), false)).unwrap();

    assert_eq!(
        backend.list_targets(),
        vec![
            fx.path("projects").to_string_lossy().into_owned(),
            fx.path("scratch").to_string_lossy().into_owned(),
        ]
    );
    let before = backend.current_assignment("p123").await.unwrap();
    assert_eq!(before.missing_targets().len(), 2);

    let outcome = backend.apply("p123", &desired("p123")).await.unwrap();
    assert_eq!(outcome.actions().len(), 2);
    assert!(fx.path("projects/p123").is_dir());
    assert!(fx.path("scratch/p123").is_dir());

    let order: Vec<String> = sim
        .commands()
        .iter()
        .take(3)
        .map(|c| c.split(' ').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(order, vec!["/bin/mkdir", "/bin/chgrp", "/bin/chmod"]);
    assert!(sim.commands_for("chmod")[0].contains(" 2770 "));

    let after = backend.current_assignment("p123").await.unwrap();
    assert!(after.satisfies(&desired("p123")));
}

#[tokio::test]
async fn test_apply_is_idempotent() {
    let fx = Fixture::new(&["projects", "scratch", "home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let backend = StorageBackend::new(fx.storage_config(), executor(sim.clone(), false)).unwrap();

    backend.apply("p123", &desired("p123")).await.unwrap();
    let mutations = sim.mutation_count();

    let second = backend.apply("p123", &desired("p123")).await.unwrap();
    assert!(second.is_unchanged());
    assert_eq!(sim.mutation_count(), mutations);
}

#[tokio::test]
async fn test_only_missing_mounts_are_created() {
    let fx = Fixture::new(&["projects", "scratch", "home", "projects/p123"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let backend = StorageBackend::new(fx.storage_config(), executor(sim.clone(), false)).unwrap();

    let outcome = backend.apply("p123", &desired("p123")).await.unwrap();
    assert_eq!(outcome.actions().len(), 1);
    assert!(outcome.actions()[0].contains("scratch"));
    assert_eq!(sim.commands_for("mkdir").len(), 1);
}

#[tokio::test]
async fn test_dry_run_reports_same_actions_without_mutation() {
    let fx = Fixture::new(&["projects", "scratch", "home"]);

    let dry_sim = Arc::new(FilesystemSimulator::new());
    let dry = StorageBackend::new(fx.storage_config(), executor(dry_sim.clone(), true)).unwrap();
    let dry_outcome = dry.apply("p123", &desired("p123")).await.unwrap();

    assert_eq!(dry_sim.mutation_count(), 0);
    assert!(!fx.path("projects/p123").exists());

    let live_sim = Arc::new(FilesystemSimulator::new());
    let live = StorageBackend::new(fx.storage_config(), executor(live_sim, false)).unwrap();
    let live_outcome = live.apply("p123", &desired("p123")).await.unwrap();

    assert_eq!(dry_outcome.actions(), live_outcome.actions());
}

#[tokio::test]
async fn test_lustre_quota_applied_per_mount() {
    let fx = Fixture::new(&["projects", "scratch", "home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let config = fx.storage_config().with_quota(QuotaTool::Lustre);
    let backend = StorageBackend::new(config, executor(sim.clone(), false)).unwrap();

    let quotas = BTreeMap::from([(
        fx.path("projects").to_string_lossy().into_owned(),
        "500G".to_string(),
    )]);
    let state = DesiredState::Storage {
        group: "p123".to_string(),
        quotas,
    };
    backend.apply("p123", &state).await.unwrap();

    let lfs = sim.commands_for("lfs");
    assert_eq!(lfs.len(), 1);
    assert!(lfs[0].contains("setquota -g p123 -B 500G"));
}

#[tokio::test]
async fn test_failed_step_is_backend_error() {
    let fx = Fixture::new(&["projects", "scratch", "home"]);
    let sim = Arc::new(FilesystemSimulator::new().with_failing_program("chgrp"));
    let backend = StorageBackend::new(fx.storage_config(), executor(sim.clone(), false)).unwrap();

    let err = backend.apply("p123", &desired("p123")).await.unwrap_err();
    assert_eq!(err.error_code(), "BACKEND_COMMAND");
    assert!(sim.commands_for("chmod").is_empty());
}

fn links(fx: &Fixture, sim: Arc<FilesystemSimulator>, dry_run: bool) -> HomeLinks {
    HomeLinks::new(&fx.storage_config(), executor(sim, dry_run)).unwrap()
}

fn owner(path: &Path) -> (u32, u32) {
    let meta = std::fs::symlink_metadata(path).unwrap();
    (meta.uid(), meta.gid())
}

#[tokio::test]
async fn test_links_created_with_scratch_suffix() {
    let fx = Fixture::new(&["projects/p123", "scratch/p123", "home/alice"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let links = links(&fx, sim, false);

    let outcome = links.ensure_links("p123", "alice").await.unwrap();
    assert_eq!(outcome.created.len(), 2);
    assert!(outcome.warnings.is_empty());

    let project_link = fx.path("home/alice/p123");
    let scratch_link = fx.path("home/alice/p123_scratch");
    assert_eq!(
        std::fs::read_link(&project_link).unwrap(),
        fx.path("projects/p123")
    );
    assert_eq!(
        std::fs::read_link(&scratch_link).unwrap(),
        fx.path("scratch/p123")
    );
}

#[tokio::test]
async fn test_existing_links_are_left_alone() {
    let fx = Fixture::new(&["projects/p123", "scratch/p123", "home/alice"]);
    let sim = Arc::new(FilesystemSimulator::new());
    links(&fx, sim.clone(), false)
        .ensure_links("p123", "alice")
        .await
        .unwrap();
    let (uid, gid) = owner(&fx.path("home/alice/p123"));
    let mutations = sim.mutation_count();

    let trusted = links(&fx, sim.clone(), false).with_expected_owner(uid, gid);
    let outcome = trusted.ensure_links("p123", "alice").await.unwrap();
    assert!(outcome.is_noop());

    let strict = links(&fx, sim.clone(), false).with_expected_owner(uid + 1, gid);
    let outcome = strict.ensure_links("p123", "alice").await.unwrap();
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.warnings.len(), 2);
    assert!(outcome.warnings[0].starts_with("Symlink not owned by `root:root`"));

    assert_eq!(sim.mutation_count(), mutations);
}

#[tokio::test]
async fn test_plain_directory_in_link_place_is_warned() {
    let fx = Fixture::new(&["projects/p123", "scratch/p123", "home/alice/p123"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let outcome = links(&fx, sim, false)
        .ensure_links("p123", "alice")
        .await
        .unwrap();

    assert_eq!(outcome.created, vec![fx.path("home/alice/p123_scratch")]);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("not a symlink"));
}

#[tokio::test]
async fn test_missing_home_is_reported() {
    let fx = Fixture::new(&["projects/p123", "scratch/p123", "home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let outcome = links(&fx, sim.clone(), false)
        .ensure_links("p123", "bob")
        .await
        .unwrap();

    assert!(outcome.home_missing);
    assert!(outcome.created.is_empty());
    assert_eq!(sim.mutation_count(), 0);
}

fn home_config(fx: &Fixture) -> HomeDirConfig {
    HomeDirConfig::new("monarch", fx.path("home"))
        .with_allowed_host("nfs1")
        .with_quota(UserQuota {
            bsoft: 10_000_000,
            bhard: 11_000_000,
            isoft: 0,
            ihard: 0,
        })
}

#[tokio::test]
async fn test_home_directory_created_with_marker_and_quota() {
    let fx = Fixture::new(&["home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let homes = HomeDirectories::new(home_config(&fx), executor(sim.clone(), false)).unwrap();

    assert!(!homes.exists("carol").await.unwrap());
    let actions = homes.create("carol").await.unwrap();

    assert_eq!(actions.len(), 2);
    assert!(homes.exists("carol").await.unwrap());
    assert!(fx.path("home/carol/.mgid").is_file());

    let setquota = sim.commands_for("setquota");
    assert_eq!(setquota.len(), 1);
    assert!(setquota[0].contains("-u carol 10000000 11000000 0 0"));
}

#[tokio::test]
async fn test_home_symlink_counts_as_present() {
    let fx = Fixture::new(&["home", "elsewhere/dave"]);
    std::os::unix::fs::symlink(fx.path("elsewhere/dave"), fx.path("home/dave")).unwrap();
    let sim = Arc::new(FilesystemSimulator::new());
    let homes = HomeDirectories::new(home_config(&fx), executor(sim, false)).unwrap();

    assert!(homes.exists("dave").await.unwrap());
}

#[tokio::test]
async fn test_home_directory_dry_run() {
    let fx = Fixture::new(&["home"]);
    let sim = Arc::new(FilesystemSimulator::new());
    let homes = HomeDirectories::new(home_config(&fx), executor(sim.clone(), true)).unwrap();

    let actions = homes.create("erin").await.unwrap();
    assert_eq!(actions.len(), 2);
    assert!(!fx.path("home/erin").exists());
    assert_eq!(sim.mutation_count(), 0);
}

#[tokio::test]
async fn test_home_repair_inspect_and_repair() {
    let fx = Fixture::new(&["projects", "scratch", "home/bob", "skel/.config"]);
    std::fs::write(fx.path("skel/.config/motd"), "welcome\n").unwrap();
    std::fs::write(fx.path("home/bob/.bashrc"), "# mine\n").unwrap();
    std::fs::write(fx.path("skel/.bashrc"), "# skeleton\n").unwrap();
    let sim = Arc::new(FilesystemSimulator::new().with_user("bob", 4001, 4002));
    let config = fx.storage_config().with_skeleton_dir(fx.path("skel"));
    let repair = HomeRepair::new(&config, executor(sim.clone(), false)).unwrap();

    assert_eq!(repair.inspect("nobody").await.unwrap(), HomeState::Missing);
    let HomeState::Present(before) = repair.inspect("bob").await.unwrap() else {
        panic!("bob's home should be present");
    };
    assert_eq!(before.expected, Ownership::new(4001, 4002));
    assert!(!before.keys_authorized);

    let actions = repair.repair("bob", before.expected).await.unwrap();
    assert_eq!(actions.len(), 4);
    assert_eq!(
        std::fs::read_to_string(fx.path("home/bob/.bashrc")).unwrap(),
        "# mine\n"
    );
    assert!(fx.path("home/bob/.config/motd").is_file());

    let HomeState::Present(after) = repair.inspect("bob").await.unwrap() else {
        panic!("bob's home should be present");
    };
    assert!(after.is_healthy());
    assert_eq!(sim.commands_for("chmod").len(), 1);
}
