use super::{
    locking::AdvisoryLock,
    node::{NodeDirectoryManager, NodeState, Preparation},
    SyncError,
};
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Barrier},
    thread,
};
use tempfile::tempdir;

#[test]
pub fn derived_lock_paths() {
    let node = NodeState::new(PathBuf::from("/scratch/n07"));

    assert_eq!(node.lock_path, PathBuf::from("/scratch/n07.lock"));
    assert_eq!(
        node.cleanup_lock_path,
        PathBuf::from("/scratch/n07.clean-in-progress.lock")
    );
}

#[test]
pub fn ensure_creates_missing_directory() {
    let root = tempdir().unwrap();
    let node = NodeState::new(root.path().join("scratch").join("n07"));

    assert!(!node.exists());
    assert_eq!(
        NodeDirectoryManager::new().ensure(&node).unwrap(),
        Preparation::Created
    );
    assert!(node.exists());
    // the lock file is removed once the check is done
    assert!(!node.lock_path.exists());
}

#[test]
pub fn ensure_is_idempotent() {
    let root = tempdir().unwrap();
    let node = NodeState::new(root.path().join("n07"));
    let manager = NodeDirectoryManager::new();

    manager.ensure(&node).unwrap();
    fs::write(node.path.join("marker"), "keep me").unwrap();

    for _ in 0..5 {
        assert_eq!(manager.ensure(&node).unwrap(), Preparation::Existing);
    }

    assert_eq!(
        fs::read_to_string(node.path.join("marker")).unwrap(),
        "keep me"
    );
    assert_eq!(fs::read_dir(&node.path).unwrap().count(), 1);
}

#[test]
pub fn concurrent_ensure_creates_once() {
    const TASKS: usize = 16;

    let root = tempdir().unwrap();
    let node = NodeState::new(root.path().join("n07"));
    let barrier = Arc::new(Barrier::new(TASKS));

    let results = thread::scope(|scope| {
        let handles = (0..TASKS)
            .map(|_| {
                let barrier = barrier.clone();
                let node = &node;

                scope.spawn(move || {
                    barrier.wait();
                    NodeDirectoryManager::new().ensure(node).unwrap()
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(
        results
            .iter()
            .filter(|result| **result == Preparation::Created)
            .count(),
        1
    );
    assert!(node.exists());
}

#[test]
pub fn ensure_propagates_creation_failure() {
    let root = tempdir().unwrap();
    // a regular file where the parent directory should be
    let blocker = root.path().join("scratch");
    fs::write(&blocker, "").unwrap();
    let node = NodeState::new(blocker.join("n07"));

    assert!(matches!(
        NodeDirectoryManager::new().ensure(&node),
        Err(SyncError::CreateDirectory { .. })
    ));
}

#[test]
pub fn lock_is_exclusive_and_released_on_drop() {
    let root = tempdir().unwrap();
    let path = root.path().join("n07.lock");

    let held = AdvisoryLock::acquire(&path).unwrap();
    assert!(AdvisoryLock::try_acquire(&path).unwrap().is_none());

    drop(held);
    assert!(AdvisoryLock::try_acquire(&path).unwrap().is_some());
}

#[test]
pub fn ensure_releases_lock_on_failure() {
    let root = tempdir().unwrap();
    let blocker = root.path().join("file");
    fs::write(&blocker, "").unwrap();
    // lock file next to a node path that can never be created
    let node = NodeState {
        path: blocker.join("n07"),
        lock_path: root.path().join("n07.lock"),
        cleanup_lock_path: root.path().join("n07.clean-in-progress.lock"),
    };

    assert!(NodeDirectoryManager::new().ensure(&node).is_err());
    assert!(AdvisoryLock::try_acquire(&node.lock_path).unwrap().is_some());
}
