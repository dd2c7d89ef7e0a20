use serde_json::{json, Value};

use seedpool::scheduler::{Kwargs, Task, TaskStatus};
use seedpool::worker::{TaskExecutor, TaskPlan};
use seedpool::{PoolError, Registry, SeedSequence, WorkerContext};

/// Registry with hooks that leave a trace in worker state.
fn test_registry() -> Registry {
    Registry::new()
        .function("trace", |ctx, kwargs| {
            let x: i64 = kwargs.get("x")?;
            Ok(json!({
                "x": x,
                "pre": ctx.get("pre").cloned(),
                "seed": kwargs.get_raw("seed").is_some(),
            }))
        })
        .function("divide", |_, kwargs| {
            let x: i64 = kwargs.get("x")?;
            if x == 0 {
                return Err("division by zero".into());
            }
            Ok(json!(100 / x))
        })
        .pre_hook("mark", |ctx, seed| {
            ctx.set("pre", json!(seed.spawn_key()));
            Ok(())
        })
        .pre_hook("refuse", |_, _| Err("not today".into()))
        .post_hook("count", |ctx| {
            let n = ctx.get("post").and_then(Value::as_u64).unwrap_or(0);
            ctx.set("post", json!(n + 1));
            Ok(())
        })
        .post_hook("explode", |_| panic!("post hook blew up"))
}

fn task(index: usize, x: i64) -> Task {
    Task::new(
        index,
        Kwargs::new().with("x", x),
        SeedSequence::new(0).spawn(index + 1).remove(index),
    )
}

fn plan(function: &str, pre: Option<&str>, post: Option<&str>) -> TaskPlan {
    TaskPlan {
        function: function.to_string(),
        pre: pre.map(str::to_string),
        post: post.map(str::to_string),
    }
}

#[test]
fn test_execute_simple_task() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("divide", None, None)).unwrap();
    let mut ctx = WorkerContext::new(2, None);

    let outcome = executor.execute(&mut ctx, task(0, 4)).unwrap();

    assert_eq!(outcome.index, 0);
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.result, Some(json!(25)));
    assert_eq!(outcome.slot, Some(2));
    assert!(outcome.error.is_none());
}

#[test]
fn test_execute_function_error() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("divide", None, None)).unwrap();
    let mut ctx = WorkerContext::new(0, None);

    let outcome = executor.execute(&mut ctx, task(3, 0)).unwrap();

    assert_eq!(outcome.index, 3);
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.error.as_deref(), Some("division by zero"));
}

#[test]
fn test_execute_missing_argument_fails_task() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("divide", None, None)).unwrap();
    let mut ctx = WorkerContext::new(0, None);
    let bare = Task::new(0, Kwargs::new(), SeedSequence::new(0));

    let outcome = executor.execute(&mut ctx, bare).unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().contains('x'));
}

#[test]
fn test_pre_hook_sees_task_seed() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("trace", Some("mark"), None)).unwrap();
    let mut ctx = WorkerContext::new(0, None);

    let outcome = executor.execute(&mut ctx, task(2, 1)).unwrap();

    let result = outcome.result.unwrap();
    assert_eq!(result["pre"], json!([2]));
    assert_eq!(result["seed"], json!(true));
}

#[test]
fn test_pre_hook_failure_fails_task_and_skips_function() {
    let registry = test_registry();
    let executor =
        TaskExecutor::new(&registry, &plan("trace", Some("refuse"), Some("count"))).unwrap();
    let mut ctx = WorkerContext::new(0, None);

    let outcome = executor.execute(&mut ctx, task(0, 1)).unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("not today"));
    // The post hook still ran.
    assert_eq!(ctx.get("post"), Some(&json!(1)));
}

#[test]
fn test_post_hook_runs_after_every_task() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("divide", None, Some("count"))).unwrap();
    let mut ctx = WorkerContext::new(0, None);

    for (i, x) in [1, 0, 5].into_iter().enumerate() {
        executor.execute(&mut ctx, task(i, x)).unwrap();
    }

    assert_eq!(ctx.get("post"), Some(&json!(3)));
}

#[test]
fn test_post_hook_panic_is_an_error() {
    let registry = test_registry();
    let executor = TaskExecutor::new(&registry, &plan("divide", None, Some("explode"))).unwrap();
    let mut ctx = WorkerContext::new(0, None);

    let err = executor.execute(&mut ctx, task(4, 1)).unwrap_err();

    match err {
        PoolError::PostHook { index, message } => {
            assert_eq!(index, 4);
            assert!(message.contains("post hook blew up"));
        }
        other => panic!("expected PostHook, got {:?}", other),
    }
}

#[test]
fn test_executor_rejects_unknown_names() {
    let registry = test_registry();

    let err = TaskExecutor::new(&registry, &plan("missing", None, None))
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Unknown function: missing");

    let err = TaskExecutor::new(&registry, &plan("divide", None, Some("missing")))
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Unknown post hook: missing");
}
