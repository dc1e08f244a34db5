use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use lantern_core::{ErrorKind, UpdaterConfig};

use crate::layout::{format_snapshot_id, parse_snapshot_id};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_root_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "lantern-snapshot-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let root = build_test_root_path(nanos);
    fs::create_dir_all(&root).expect("must create test root");
    root
}

struct Fixture {
    root: PathBuf,
    store: SnapshotStore,
    marker: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = test_root();
        let install_root = root.join("app");
        let marker = install_root.join("VERSION");
        let config_dir = root.join("config");
        let data_dir = root.join("data");

        write_file(&marker, "1.2.0\n");
        write_file(&config_dir.join("settings.toml"), "model = \"llama3.2\"\n");
        write_file(&data_dir.join("db/history.sqlite"), "rows-v1");
        fs::create_dir_all(data_dir.join("empty")).expect("must create empty dir");

        Self {
            store: SnapshotStore::new(SnapshotLayout::new(root.join("state"))),
            root,
            marker,
            config_dir,
            data_dir,
        }
    }

    fn scope(&self) -> Vec<PathBuf> {
        vec![
            self.marker.clone(),
            self.config_dir.clone(),
            self.data_dir.clone(),
        ]
    }

    fn digests(&self) -> Vec<Option<String>> {
        self.scope()
            .iter()
            .map(|path| tree_digest(path).expect("must digest"))
            .collect()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, content).expect("must write file");
}

fn mutate_installation(fixture: &Fixture) {
    write_file(&fixture.marker, "1.3.0\n");
    write_file(&fixture.config_dir.join("settings.toml"), "model = \"qwen\"\n");
    write_file(&fixture.config_dir.join("added.toml"), "new = true\n");
    write_file(&fixture.data_dir.join("db/history.sqlite"), "rows-v2-migrated");
    fs::remove_dir_all(fixture.data_dir.join("empty")).expect("must remove empty dir");
}

#[test]
fn build_test_root_path_disambiguates_same_timestamp_calls() {
    let first = build_test_root_path(42);
    let second = build_test_root_path(42);
    assert_ne!(first, second);
}

#[test]
fn snapshot_ids_are_fixed_width_and_sortable() {
    let early = format_snapshot_id(9);
    let late = format_snapshot_id(1_700_000_000_000_000_000);
    assert_eq!(early, "snap-00000000000000000009");
    assert!(early < late);
    assert_eq!(parse_snapshot_id(&late), Some(1_700_000_000_000_000_000));
    assert_eq!(parse_snapshot_id("snap-123"), None);
    assert_eq!(parse_snapshot_id("snap-0000000000000000000x"), None);
    assert_eq!(parse_snapshot_id("../../etc"), None);
}

#[test]
fn pointer_round_trip() {
    let root = test_root();
    let layout = SnapshotLayout::new(root.join("state"));

    assert_eq!(read_last_snapshot_id(&layout).expect("must read"), None);

    let id = format_snapshot_id(7);
    write_last_snapshot_id(&layout, &id).expect("must write pointer");
    assert_eq!(
        read_last_snapshot_id(&layout).expect("must read"),
        Some(id.clone())
    );

    let err = write_last_snapshot_id(&layout, "not-an-id").expect_err("invalid id must fail");
    assert!(err.to_string().contains("invalid snapshot id"));
    assert_eq!(read_last_snapshot_id(&layout).expect("must read"), Some(id));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn pointer_with_garbage_is_an_error() {
    let root = test_root();
    let layout = SnapshotLayout::new(root.join("state"));
    write_file(&layout.pointer_path(), "garbage\n");

    let err = read_last_snapshot_id(&layout).expect_err("garbage pointer must fail");
    assert!(err.to_string().contains("holds an invalid id"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn scope_from_config_skips_cache_by_default() {
    let mut config = UpdaterConfig::default();
    config.install_root = PathBuf::from("/opt/lantern");
    config.config_dir = PathBuf::from("/etc/lantern");
    config.data_dir = PathBuf::from("/var/lib/lantern");
    config.cache_dir = PathBuf::from("/var/cache/lantern");

    let scope = SnapshotScope::from_config(&config);
    assert_eq!(
        scope.paths(),
        &[
            PathBuf::from("/opt/lantern/VERSION"),
            PathBuf::from("/etc/lantern"),
            PathBuf::from("/var/lib/lantern"),
        ]
    );
    assert!(!scope.contains(Path::new("/var/cache/lantern")));

    config.snapshot.include_cache = true;
    config.snapshot.extra_paths = vec![
        PathBuf::from("/srv/lantern/plugins"),
        PathBuf::from("/etc/lantern"),
    ];
    let scope = SnapshotScope::from_config(&config);
    assert_eq!(scope.paths().len(), 5);
    assert!(scope.contains(Path::new("/var/cache/lantern")));
    assert_eq!(scope.paths()[4], PathBuf::from("/srv/lantern/plugins"));
}

#[test]
fn tree_digest_tracks_content_and_structure() {
    let root = test_root();
    let dir = root.join("tree");
    write_file(&dir.join("a.txt"), "alpha");
    write_file(&dir.join("nested/b.txt"), "beta");

    let original = tree_digest(&dir).expect("must digest").expect("must exist");

    write_file(&dir.join("nested/b.txt"), "BETA");
    let changed = tree_digest(&dir).expect("must digest").expect("must exist");
    assert_ne!(original, changed);

    write_file(&dir.join("nested/b.txt"), "beta");
    assert_eq!(
        tree_digest(&dir).expect("must digest").expect("must exist"),
        original
    );

    fs::create_dir_all(dir.join("empty")).expect("must create empty dir");
    assert_ne!(
        tree_digest(&dir).expect("must digest").expect("must exist"),
        original,
        "empty directories are part of the digest"
    );

    assert_eq!(
        tree_digest(&root.join("missing")).expect("must digest"),
        None
    );

    let _ = fs::remove_dir_all(root);
}

#[test]
fn create_then_restore_round_trips_every_path() {
    let fixture = Fixture::new();
    let before = fixture.digests();

    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");
    assert_eq!(snapshot.captured_paths.len(), 3);
    assert!(snapshot.captured_paths.iter().all(|captured| captured.present));
    assert_eq!(
        fixture.store.most_recent_id().expect("must read pointer"),
        Some(snapshot.id.clone())
    );

    mutate_installation(&fixture);
    assert_ne!(fixture.digests(), before);

    let restored = fixture.store.restore(&snapshot.id).expect("must restore");
    assert_eq!(restored, snapshot);
    assert_eq!(fixture.digests(), before);
    assert_eq!(
        fs::read_to_string(&fixture.marker).expect("must read marker"),
        "1.2.0\n"
    );
    assert!(!fixture.config_dir.join("added.toml").exists());
    assert!(fixture.data_dir.join("empty").is_dir());
}

#[test]
fn manifest_is_loaded_back_identically() {
    let fixture = Fixture::new();
    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");

    let loaded = fixture.store.load(&snapshot.id).expect("must load");
    assert_eq!(loaded, snapshot);
    assert_eq!(
        fixture.store.most_recent().expect("must read"),
        Some(snapshot)
    );
}

#[test]
fn absent_path_is_recorded_and_removed_on_restore() {
    let fixture = Fixture::new();
    let plugins = fixture.root.join("plugins");
    let mut scope = fixture.scope();
    scope.push(plugins.clone());

    let snapshot = fixture.store.create(&scope).expect("must snapshot");
    let captured = snapshot
        .captured_paths
        .iter()
        .find(|captured| captured.source == plugins)
        .expect("absent path must still be recorded");
    assert!(!captured.present);
    assert_eq!(captured.digest, None);

    write_file(&plugins.join("installed-by-update.py"), "print('hi')");
    fixture.store.restore(&snapshot.id).expect("must restore");
    assert!(!plugins.exists());
}

#[test]
fn failed_capture_leaves_no_snapshot_and_keeps_previous_pointer() {
    let fixture = Fixture::new();
    let previous = fixture.store.create(&fixture.scope()).expect("must snapshot");

    let data_dir = fixture.data_dir.clone();
    let mut copier = |src: &Path, dst: &Path| {
        if src == data_dir {
            return Err(anyhow!("disk full"));
        }
        copy_tree(src, dst)
    };
    let err = fixture
        .store
        .create_with_copier(&fixture.scope(), &mut copier)
        .expect_err("capture must fail");

    assert_eq!(err.kind(), ErrorKind::BackupFailed);
    assert!(err.message().contains("disk full"));
    assert!(err.message().contains(&data_dir.display().to_string()));

    let listed = fixture.store.list().expect("must list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, previous.id);
    assert_eq!(
        fixture.store.most_recent_id().expect("must read pointer"),
        Some(previous.id)
    );

    let staging_left = fs::read_dir(fixture.store.layout().staging_dir())
        .expect("staging dir must exist")
        .count();
    assert_eq!(staging_left, 0, "partial capture must be cleaned up");
}

#[test]
fn capture_rejects_copy_that_does_not_match_source() {
    let fixture = Fixture::new();
    let mut copier = |src: &Path, dst: &Path| -> anyhow::Result<()> {
        copy_tree(src, dst)?;
        if dst.is_dir() {
            fs::write(dst.join("stray"), "x")?;
        }
        Ok(())
    };

    let err = fixture
        .store
        .create_with_copier(&fixture.scope(), &mut copier)
        .expect_err("mismatched copy must fail");
    assert_eq!(err.kind(), ErrorKind::BackupFailed);
    assert!(err.message().contains("does not match its source"));
    assert_eq!(fixture.store.most_recent_id().expect("must read"), None);
    assert!(fixture.store.list().expect("must list").is_empty());
}

#[test]
fn stale_staging_is_discarded_on_next_capture() {
    let fixture = Fixture::new();
    let layout = fixture.store.layout().clone();
    let stale = layout.staging_path(&format_snapshot_id(1));
    write_file(&stale.join("entries/00-VERSION"), "half written");

    fixture.store.create(&fixture.scope()).expect("must snapshot");
    assert!(!stale.exists());
    assert_eq!(fixture.store.list().expect("must list").len(), 1);
}

#[test]
fn rapid_captures_get_strictly_increasing_ids() {
    let fixture = Fixture::new();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            fixture
                .store
                .create(&fixture.scope())
                .expect("must snapshot")
                .id,
        );
    }

    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1], "{} must sort before {}", pair[0], pair[1]);
    }
    assert_eq!(
        fixture.store.most_recent_id().expect("must read"),
        ids.last().cloned()
    );

    let listed: Vec<String> = fixture
        .store
        .list()
        .expect("must list")
        .into_iter()
        .map(|snapshot| snapshot.id)
        .collect();
    let mut newest_first = ids.clone();
    newest_first.reverse();
    assert_eq!(listed, newest_first);
}

#[test]
fn ids_stay_ahead_of_snapshots_stamped_in_the_future() {
    let fixture = Fixture::new();
    let layout = fixture.store.layout().clone();
    let future = format_snapshot_id(u128::from(u64::MAX) * 4);
    fs::create_dir_all(layout.snapshot_dir(&future)).expect("must create future snapshot dir");

    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");
    assert!(snapshot.id > future);
}

#[test]
fn corrupted_archive_fails_restore_before_touching_anything() {
    let fixture = Fixture::new();
    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");
    mutate_installation(&fixture);
    let mutated = fixture.digests();

    let archived = fixture
        .store
        .layout()
        .snapshot_dir(&snapshot.id)
        .join(&snapshot.captured_paths[2].archived)
        .join("db/history.sqlite");
    write_file(&archived, "bit rot");

    let err = fixture
        .store
        .restore(&snapshot.id)
        .expect_err("corrupted snapshot must not restore");
    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert!(err.message().contains("integrity check"));
    assert_eq!(fixture.digests(), mutated, "nothing may be restored");
}

#[test]
fn restore_failure_reports_the_path_and_keeps_earlier_entries_restored() {
    let fixture = Fixture::new();
    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");
    mutate_installation(&fixture);

    let mut copier = |src: &Path, dst: &Path| {
        if src.ends_with("02-data") {
            return Err(anyhow!("permission denied"));
        }
        copy_tree(src, dst)
    };
    let err = fixture
        .store
        .restore_with_copier(&snapshot.id, &mut copier)
        .expect_err("restore must fail");

    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert!(err.message().contains("permission denied"));
    assert!(err
        .message()
        .contains(&fixture.data_dir.display().to_string()));
    assert_eq!(
        fs::read_to_string(&fixture.marker).expect("must read marker"),
        "1.2.0\n"
    );
    assert_eq!(
        fs::read_to_string(fixture.data_dir.join("db/history.sqlite")).expect("must read data"),
        "rows-v2-migrated",
        "a failed entry keeps its current contents"
    );
    let leftovers: Vec<_> = fs::read_dir(&fixture.root)
        .expect("must read root")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains(".lantern-restore"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn failed_swap_leaves_current_contents_in_place() {
    let fixture = Fixture::new();
    let snapshot = fixture.store.create(&fixture.scope()).expect("must snapshot");
    mutate_installation(&fixture);

    // Claims success without producing the staged copy, so moving it into place fails.
    let mut copier = |src: &Path, dst: &Path| -> anyhow::Result<()> {
        if src.ends_with("01-config") {
            return Ok(());
        }
        copy_tree(src, dst)
    };
    let err = fixture
        .store
        .restore_with_copier(&snapshot.id, &mut copier)
        .expect_err("restore must fail");

    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert!(err.message().contains("into place"));
    assert_eq!(
        fs::read_to_string(fixture.config_dir.join("settings.toml")).expect("must read config"),
        "model = \"qwen\"\n",
        "the failed entry keeps its current contents"
    );
    assert!(fixture.config_dir.join("added.toml").is_file());
    let leftovers: Vec<_> = fs::read_dir(&fixture.root)
        .expect("must read root")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains(".lantern-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn restore_of_unknown_snapshot_fails() {
    let fixture = Fixture::new();
    let err = fixture
        .store
        .restore(&format_snapshot_id(3))
        .expect_err("unknown snapshot must fail");
    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert!(err.message().contains("failed to read snapshot manifest"));

    let err = fixture
        .store
        .restore("../outside")
        .expect_err("invalid id must fail");
    assert!(err.message().contains("invalid snapshot id"));
}

#[test]
fn most_recent_is_none_without_any_capture() {
    let fixture = Fixture::new();
    assert_eq!(fixture.store.most_recent().expect("must read"), None);
    assert!(fixture.store.list().expect("must list").is_empty());
}

#[test]
fn list_skips_unreadable_snapshots() {
    let fixture = Fixture::new();
    let good = fixture.store.create(&fixture.scope()).expect("must snapshot");
    let broken = format_snapshot_id(1);
    write_file(
        &fixture.store.layout().manifest_path(&broken),
        "{ not json",
    );

    let listed = fixture.store.list().expect("must list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good.id);
}

#[test]
fn prune_keeps_newest_and_the_pointed_snapshot() {
    let fixture = Fixture::new();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            fixture
                .store
                .create(&fixture.scope())
                .expect("must snapshot")
                .id,
        );
    }

    // Point back at the oldest, as a manual rollback target would.
    write_last_snapshot_id(fixture.store.layout(), &ids[0]).expect("must write pointer");

    let removed = fixture.store.prune(2).expect("must prune");
    assert_eq!(removed, vec![ids[1].clone()]);

    let remaining: Vec<String> = fixture
        .store
        .list()
        .expect("must list")
        .into_iter()
        .map(|snapshot| snapshot.id)
        .collect();
    assert_eq!(remaining, vec![ids[3].clone(), ids[2].clone(), ids[0].clone()]);
}
