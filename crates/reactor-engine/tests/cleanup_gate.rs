#![allow(missing_docs)]

use reactor_core::{ContainerRuntime, ContainerState, NameScheme, Timeouts, labels};
use reactor_engine::runtime::MemoryRuntime;
use reactor_engine::{CleanupError, CleanupGuard, CleanupOutcome, SafetyViolation};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A temp directory whose own name is the scope token.
fn scoped_dir() -> (TempDir, String) {
    let dir = tempfile::Builder::new()
        .prefix("reactor-scope-")
        .tempdir()
        .unwrap();
    let scope = dir
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    (dir, scope)
}

fn guard(runtime: &Arc<MemoryRuntime>, scope: &str) -> CleanupGuard {
    CleanupGuard::new(
        Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
        scope,
        "busybox:1.36",
        NameScheme::unprefixed(),
        Timeouts::default(),
    )
}

async fn assert_refused(guard: &CleanupGuard, runtime: &MemoryRuntime, target: &Path) -> SafetyViolation {
    let err = guard.remove(target).await.unwrap_err();
    assert!(runtime.calls().is_empty(), "runtime touched for {}", target.display());
    match err {
        CleanupError::Safety(violation) => violation,
        other => panic!("expected a safety violation, got {other:?}"),
    }
}

#[tokio::test]
async fn relative_paths_are_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let guard = guard(&runtime, "scope");

    let violation = assert_refused(&guard, &runtime, Path::new("scope/data")).await;
    assert!(matches!(violation, SafetyViolation::NotAbsolute(_)));
}

#[tokio::test]
async fn paths_outside_temp_are_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let guard = guard(&runtime, "etc");

    let violation = assert_refused(&guard, &runtime, Path::new("/etc")).await;
    assert!(matches!(violation, SafetyViolation::OutsideTemp { .. }));
    assert!(Path::new("/etc").exists());
}

#[tokio::test]
async fn the_temp_root_itself_is_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let temp = std::fs::canonicalize(std::env::temp_dir()).unwrap();
    let scope = temp.file_name().unwrap().to_string_lossy().into_owned();
    let guard = guard(&runtime, &scope);

    let violation = assert_refused(&guard, &runtime, &temp).await;
    assert!(matches!(violation, SafetyViolation::OutsideTemp { .. }));
}

#[tokio::test]
async fn missing_scope_segment_is_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, scope) = scoped_dir();
    let target = dir.path().join("data");
    std::fs::create_dir(&target).unwrap();

    let other = guard(&runtime, "some-other-scope");
    let violation = assert_refused(&other, &runtime, &target).await;
    assert!(matches!(violation, SafetyViolation::MissingScope { .. }));

    // A substring of a segment does not count.
    let partial = guard(&runtime, &scope[..scope.len() - 1]);
    let violation = assert_refused(&partial, &runtime, &target).await;
    assert!(matches!(violation, SafetyViolation::MissingScope { .. }));

    assert!(target.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_out_of_temp_are_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, scope) = scoped_dir();
    let link = dir.path().join("escape");
    std::os::unix::fs::symlink("/etc", &link).unwrap();

    let guard = guard(&runtime, &scope);
    let violation = assert_refused(&guard, &runtime, &link).await;
    assert!(matches!(violation, SafetyViolation::OutsideTemp { .. }));
    assert!(Path::new("/etc").exists());
}

#[tokio::test]
async fn empty_scope_is_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, _) = scoped_dir();
    let guard = guard(&runtime, "  ");

    let violation = assert_refused(&guard, &runtime, dir.path()).await;
    assert!(matches!(violation, SafetyViolation::EmptyScope));
}

#[tokio::test]
async fn nonexistent_target_is_already_gone() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, scope) = scoped_dir();
    let guard = guard(&runtime, &scope);

    let outcome = guard.remove(&dir.path().join("never-created")).await.unwrap();

    assert_eq!(outcome, CleanupOutcome::AlreadyGone);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn missing_paths_outside_temp_are_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let my_guard = guard(&runtime, "my-test");
    let target = Path::new("/etc/reactor-missing-target");
    assert!(!target.exists());

    let violation = assert_refused(&my_guard, &runtime, target).await;
    assert!(matches!(violation, SafetyViolation::OutsideTemp { .. }));

    // Holding the scope token does not help outside the temp directory.
    let scoped = guard(&runtime, "etc");
    let violation = assert_refused(&scoped, &runtime, target).await;
    assert!(matches!(violation, SafetyViolation::OutsideTemp { .. }));
}

#[tokio::test]
async fn missing_paths_without_the_scope_are_refused() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, _) = scoped_dir();
    let guard = guard(&runtime, "some-other-scope");

    let violation = assert_refused(&guard, &runtime, &dir.path().join("never/created")).await;
    assert!(matches!(violation, SafetyViolation::MissingScope { .. }));
}

#[tokio::test]
async fn ordinary_removal_needs_no_helper() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (dir, scope) = scoped_dir();
    let target = dir.path().join("cache");
    std::fs::create_dir_all(target.join("nested/deeper")).unwrap();
    std::fs::write(target.join("nested/file.txt"), "data").unwrap();
    let guard = guard(&runtime, &scope);

    let outcome = guard.remove(&target).await.unwrap();

    assert_eq!(outcome, CleanupOutcome::Removed);
    assert!(!target.exists());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn reclaim_removes_only_the_scope_containers() {
    let runtime = Arc::new(MemoryRuntime::new());
    let scoped = |scope: &str| {
        BTreeMap::from([
            (labels::MANAGED.to_string(), labels::MANAGED_VALUE.to_string()),
            (labels::CLEANUP_SCOPE.to_string(), scope.to_string()),
        ])
    };
    runtime.add_labelled_container("helper-a", ContainerState::Running, scoped("run-1"));
    runtime.add_labelled_container("helper-b", ContainerState::Stopped, scoped("run-1"));
    runtime.add_labelled_container("helper-c", ContainerState::Running, scoped("run-2"));
    // Name contains the scope but carries no label.
    runtime.add_container("reactor-cleanup-run-1-unlabelled", ContainerState::Stopped);

    let removed = guard(&runtime, "run-1").reclaim_scope().await.unwrap();

    assert_eq!(removed, 2);
    let left: Vec<_> = runtime.containers().into_iter().map(|c| c.name).collect();
    assert_eq!(left, ["helper-c", "reactor-cleanup-run-1-unlabelled"]);
}
