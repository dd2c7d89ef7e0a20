//! Ready-made functions and hooks.
//!
//! The `seedpool` binary registers these so a pool can be exercised from the
//! command line without writing a worker program. Tasks take an integer `x`.

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};

use crate::registry::{BoxError, Registry};
use crate::scheduler::task::Kwargs;
use crate::worker::affinity;
use crate::worker::context::WorkerContext;

const OFFSET_KEY: &str = "offset";
const TASKS_RUN_KEY: &str = "tasks_run";

pub fn registry() -> Registry {
    Registry::new()
        .function("square", |_, kwargs| square(kwargs))
        .function("seed_value", |_, kwargs| seed_value(kwargs))
        .function("fail_on", |_, kwargs| {
            let x: i64 = kwargs.get("x")?;
            let fail: i64 = kwargs.get("fail")?;
            if x == fail {
                return Err(format!("refusing x = {}", x).into());
            }
            Ok(json!(x))
        })
        .function("panic_on", |_, kwargs| {
            let x: i64 = kwargs.get("x")?;
            let panic_at: i64 = kwargs.get("panic")?;
            if x == panic_at {
                panic!("x = {}", x);
            }
            Ok(json!(x))
        })
        .function("exit_on", |_, kwargs| {
            let x: i64 = kwargs.get("x")?;
            let exit_at: i64 = kwargs.get("exit")?;
            if x == exit_at {
                std::process::exit(101);
            }
            Ok(json!(x))
        })
        .function("sleep_square", |_, kwargs| {
            let ms: u64 = kwargs.get("ms")?;
            std::thread::sleep(Duration::from_millis(ms));
            square(kwargs)
        })
        .function("print_square", |_, kwargs| {
            // No trailing newline: the next frame shares the line.
            print!("progress ");
            square(kwargs)
        })
        .function("offset_square", |ctx, kwargs| {
            let x: i64 = kwargs.get("x")?;
            Ok(json!(x * x + offset(ctx)))
        })
        .function("sample", |ctx, _| Ok(json!(ctx.rng().gen::<u32>())))
        .function("tasks_run", |ctx, _| {
            Ok(ctx.get(TASKS_RUN_KEY).cloned().unwrap_or(json!(0)))
        })
        .function("worker_info", |ctx, _| {
            Ok(json!({
                "slot": ctx.slot(),
                "pid": ctx.pid(),
                "pinned": ctx.affinity(),
                "allowed": affinity::current_affinity(),
            }))
        })
        .init_hook("set_offset", |ctx, args| {
            let offset = args
                .first()
                .and_then(Value::as_i64)
                .ok_or("set_offset expects one integer argument")?;
            ctx.set(OFFSET_KEY, json!(offset));
            Ok(())
        })
        .init_hook("fail_init", |_, _| Err("init hook refused to start".into()))
        .pre_hook("reseed", |ctx, seed| {
            ctx.reseed(seed);
            Ok(())
        })
        .pre_hook("fail_pre", |_, _| Err("pre hook refused".into()))
        .post_hook("count_tasks", |ctx| {
            let done = ctx.get(TASKS_RUN_KEY).and_then(Value::as_u64).unwrap_or(0);
            ctx.set(TASKS_RUN_KEY, json!(done + 1));
            Ok(())
        })
        .post_hook("fail_post", |_| Err("post hook refused".into()))
}

fn square(kwargs: &Kwargs) -> Result<Value, BoxError> {
    let x: i64 = kwargs.get("x")?;
    Ok(json!(x * x))
}

/// First 64 bits of the task's seed stream.
fn seed_value(kwargs: &Kwargs) -> Result<Value, BoxError> {
    let seed = kwargs.seed()?.ok_or("task has no seed argument")?;
    Ok(json!(seed.generate_state_u64(1)[0]))
}

fn offset(ctx: &WorkerContext) -> i64 {
    ctx.get(OFFSET_KEY).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedSequence;

    fn call(name: &str, ctx: &mut WorkerContext, kwargs: Kwargs) -> Result<Value, BoxError> {
        let reg = registry();
        let f = reg.get_function(name).unwrap();
        f(ctx, &kwargs)
    }

    #[test]
    fn square_squares() {
        let mut ctx = WorkerContext::new(0, None);
        let out = call("square", &mut ctx, Kwargs::new().with("x", -4)).unwrap();
        assert_eq!(out, json!(16));
    }

    #[test]
    fn seed_value_reads_the_seed_argument() {
        let mut ctx = WorkerContext::new(0, None);
        let seed = SeedSequence::new(5);
        let kwargs = Kwargs::new().with("seed", serde_json::to_value(&seed).unwrap());
        let out = call("seed_value", &mut ctx, kwargs).unwrap();
        assert_eq!(out, json!(seed.generate_state_u64(1)[0]));

        assert!(call("seed_value", &mut ctx, Kwargs::new()).is_err());
    }

    #[test]
    fn fail_on_only_fails_the_chosen_value() {
        let mut ctx = WorkerContext::new(0, None);
        let ok = Kwargs::new().with("x", 1).with("fail", 2);
        assert_eq!(call("fail_on", &mut ctx, ok).unwrap(), json!(1));
        let bad = Kwargs::new().with("x", 2).with("fail", 2);
        assert!(call("fail_on", &mut ctx, bad).is_err());
    }

    #[test]
    fn set_offset_feeds_offset_square() {
        let reg = registry();
        let mut ctx = WorkerContext::new(0, None);
        let init = reg.get_init_hook("set_offset").unwrap();
        init(&mut ctx, &[json!(10)][..]).unwrap();
        let out = call("offset_square", &mut ctx, Kwargs::new().with("x", 3)).unwrap();
        assert_eq!(out, json!(19));

        assert!(init(&mut ctx, &[json!("ten")][..]).is_err());
    }

    #[test]
    fn count_tasks_increments_worker_state() {
        let reg = registry();
        let mut ctx = WorkerContext::new(0, None);
        let post = reg.get_post_hook("count_tasks").unwrap();
        post(&mut ctx).unwrap();
        post(&mut ctx).unwrap();
        assert_eq!(call("tasks_run", &mut ctx, Kwargs::new()).unwrap(), json!(2));
    }

    #[test]
    fn worker_info_reports_slot() {
        let mut ctx = WorkerContext::new(3, None);
        let out = call("worker_info", &mut ctx, Kwargs::new()).unwrap();
        assert_eq!(out["slot"], json!(3));
        assert_eq!(out["pinned"], Value::Null);
    }
}
