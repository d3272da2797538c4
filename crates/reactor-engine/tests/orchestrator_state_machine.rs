#![allow(missing_docs)]

use reactor_core::{
    BlueprintBuilder, ContainerBlueprint, ContainerRuntime, ContainerState, ExecOutput,
    NameScheme, ResolvedConfig, RuntimeError, Timeouts,
};
use reactor_engine::runtime::{MemoryRuntime, Op, RuntimeCall};
use reactor_engine::{DownOutcome, Orchestrator, ReactorError, Transition};
use std::sync::Arc;
use std::time::Duration;

const IMAGE: &str = "ubuntu:24.04";

fn blueprint() -> ContainerBlueprint {
    let config = ResolvedConfig {
        account: "alice".into(),
        project_root: "/home/alice/app".into(),
        project_hash: "a1b2c3d4".into(),
        image: IMAGE.into(),
    };
    BlueprintBuilder::new(&config).build(&NameScheme::new(Some("orch")))
}

fn setup() -> (Arc<MemoryRuntime>, Orchestrator) {
    let runtime = Arc::new(MemoryRuntime::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        Timeouts::default(),
    );
    (runtime, orchestrator)
}

fn inspect(name: &str) -> RuntimeCall {
    RuntimeCall::Inspect {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn running_container_is_left_alone() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    let id = runtime.add_container(&bp.name, ContainerState::Running);

    let outcome = orchestrator.up(&bp).await.unwrap();

    assert_eq!(outcome.transition, Transition::AlreadyRunning);
    assert_eq!(outcome.id, id);
    assert_eq!(runtime.calls(), vec![inspect(&bp.name)]);
}

#[tokio::test]
async fn stopped_container_is_started_not_recreated() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    let id = runtime.add_container(&bp.name, ContainerState::Stopped);

    let outcome = orchestrator.up(&bp).await.unwrap();

    assert_eq!(outcome.transition, Transition::Started);
    assert_eq!(
        runtime.calls(),
        vec![inspect(&bp.name), RuntimeCall::Start { id: id.clone() }]
    );
    assert_eq!(runtime.state_of(&id), ContainerState::Running);
}

#[tokio::test]
async fn failed_restart_is_fatal_and_never_recreates() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    runtime.add_image(IMAGE);
    runtime.add_container(&bp.name, ContainerState::Stopped);
    runtime.fail_always(
        Op::Start,
        RuntimeError::Engine {
            operation: "start",
            message: "mount source missing".into(),
        },
    );

    let err = orchestrator.up(&bp).await.unwrap_err();

    assert!(matches!(err, ReactorError::RestartFailed { ref name, .. } if *name == bp.name));
    let calls = runtime.calls();
    assert!(!calls.iter().any(|c| matches!(c, RuntimeCall::Create { .. } | RuntimeCall::Remove { .. })));
    assert_eq!(runtime.state_of(&bp.name), ContainerState::Stopped);
}

#[tokio::test]
async fn absent_container_pulls_creates_and_starts() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();

    let outcome = orchestrator.up(&bp).await.unwrap();

    assert_eq!(outcome.transition, Transition::Created);
    assert_eq!(outcome.name, bp.name);
    assert_eq!(
        runtime.calls(),
        vec![
            inspect(&bp.name),
            RuntimeCall::ImageExists { image: IMAGE.into() },
            RuntimeCall::Pull { image: IMAGE.into() },
            RuntimeCall::Create {
                name: bp.name.clone(),
                image: IMAGE.into()
            },
            RuntimeCall::Start {
                id: outcome.id.clone()
            },
        ]
    );
    assert_eq!(runtime.blueprint_of(&bp.name), Some(bp));
}

#[tokio::test]
async fn present_image_is_not_pulled() {
    let (runtime, orchestrator) = setup();
    runtime.add_image(IMAGE);

    orchestrator.up(&blueprint()).await.unwrap();

    assert!(!runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Pull { .. })));
}

#[tokio::test]
async fn second_up_reuses_the_container() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();

    let first = orchestrator.up(&bp).await.unwrap();
    let second = orchestrator.up(&bp).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.transition, Transition::AlreadyRunning);
    assert_eq!(runtime.containers().len(), 1);
}

#[tokio::test]
async fn concurrent_up_in_one_process_is_serialized() {
    let (runtime, orchestrator) = setup();
    runtime.set_latency(Op::Create, Duration::from_millis(50));
    let orchestrator = Arc::new(orchestrator);
    let bp = blueprint();

    let (a, b) = tokio::join!(orchestrator.up(&bp), orchestrator.up(&bp));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    let mut transitions = [a.transition, b.transition];
    transitions.sort_by_key(|t| t.to_string());
    assert_eq!(transitions, [Transition::AlreadyRunning, Transition::Created]);
    assert_eq!(runtime.containers().len(), 1);
}

#[tokio::test]
async fn create_conflict_converges_on_the_winner() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_image(IMAGE);
    runtime.set_latency(Op::ImageExists, Duration::from_millis(50));
    let first = Orchestrator::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>, Timeouts::default());
    let second = Orchestrator::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>, Timeouts::default());
    let bp = blueprint();

    let (a, b) = tokio::join!(first.up(&bp), second.up(&bp));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    assert_eq!(runtime.containers().len(), 1);
    assert_eq!(runtime.state_of(&bp.name), ContainerState::Running);
}

#[tokio::test]
async fn down_on_absent_touches_nothing() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();

    let outcome = orchestrator.down(&bp.name).await.unwrap();

    assert_eq!(outcome, DownOutcome::NothingToDo);
    assert_eq!(runtime.calls(), vec![inspect(&bp.name)]);
    assert!(!runtime.calls().iter().any(RuntimeCall::is_mutation));
}

#[tokio::test]
async fn down_stops_then_removes() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    let id = runtime.add_container(&bp.name, ContainerState::Running);

    let outcome = orchestrator.down(&bp.name).await.unwrap();

    assert_eq!(outcome, DownOutcome::Removed { id: id.clone() });
    assert_eq!(
        runtime.calls(),
        vec![
            inspect(&bp.name),
            RuntimeCall::Stop { id: id.clone() },
            RuntimeCall::Remove { id, force: false },
        ]
    );
    assert_eq!(runtime.state_of(&bp.name), ContainerState::Absent);
}

#[tokio::test]
async fn removal_is_retried_once() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    let id = runtime.add_container(&bp.name, ContainerState::Stopped);
    runtime.fail_once(Op::Remove, RuntimeError::Conflict("removal in progress".into()));

    let outcome = orchestrator.down(&bp.name).await.unwrap();

    assert_eq!(outcome, DownOutcome::Removed { id: id.clone() });
    let removes: Vec<_> = runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RuntimeCall::Remove { .. }))
        .collect();
    assert_eq!(
        removes,
        vec![
            RuntimeCall::Remove {
                id: id.clone(),
                force: false
            },
            RuntimeCall::Remove { id, force: true },
        ]
    );
}

#[tokio::test]
async fn second_removal_failure_is_reported() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    runtime.add_container(&bp.name, ContainerState::Stopped);
    runtime.fail_always(
        Op::Remove,
        RuntimeError::Engine {
            operation: "remove",
            message: "device busy".into(),
        },
    );

    let err = orchestrator.down(&bp.name).await.unwrap_err();
    assert!(matches!(err, ReactorError::Operation { operation: "remove", .. }));
}

#[tokio::test]
async fn stop_failure_is_fatal_with_cause() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    runtime.add_container(&bp.name, ContainerState::Running);
    runtime.fail_always(
        Op::Stop,
        RuntimeError::Timeout {
            operation: "stop",
            after: Duration::from_secs(30),
        },
    );

    let err = orchestrator.down(&bp.name).await.unwrap_err();

    assert!(matches!(
        err,
        ReactorError::Operation {
            operation: "stop",
            source: RuntimeError::Timeout { .. },
            ..
        }
    ));
    assert!(!runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Remove { .. })));
    assert_eq!(runtime.state_of(&bp.name), ContainerState::Running);
}

#[tokio::test]
async fn unreachable_engine_is_reported_as_such() {
    let (runtime, orchestrator) = setup();
    runtime.set_unavailable(true);

    let err = orchestrator.up(&blueprint()).await.unwrap_err();
    assert!(err.is_engine_unavailable());
    assert!(orchestrator.health().await.unwrap_err().is_engine_unavailable());
}

#[tokio::test]
async fn exec_requires_a_running_container() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    let command = vec!["echo".to_string(), "hi".to_string()];

    let err = orchestrator.exec(&bp.name, &command).await.unwrap_err();
    assert!(matches!(err, ReactorError::NotRunning { .. }));

    runtime.add_container(&bp.name, ContainerState::Running);
    runtime.set_exec_output(ExecOutput {
        exit_code: 0,
        stdout: "hi\n".into(),
        stderr: String::new(),
    });
    let output = orchestrator.exec(&bp.name, &command).await.unwrap();
    assert_eq!(output.stdout, "hi\n");
    assert!(output.success());
}

#[tokio::test]
async fn state_reflects_the_engine() {
    let (runtime, orchestrator) = setup();
    let bp = blueprint();
    assert_eq!(orchestrator.state(&bp.name).await.unwrap(), ContainerState::Absent);
    runtime.add_container(&bp.name, ContainerState::Stopped);
    assert_eq!(orchestrator.state(&bp.name).await.unwrap(), ContainerState::Stopped);
}
