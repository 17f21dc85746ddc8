//! Driver-level advisor tests: determinism, idempotence and flags.

use std::collections::BTreeMap;

use fresco_ir::bounds::FuncValueBounds;
use fresco_ir::expr::{add, call, int, mul, var};
use fresco_ir::func::Env;
use fresco_ir::schedule::Schedule;
use fresco_ir::stmt::{DeviceApi, ForType};

use crate::advisor::{AdvisorFlags, MachineParams, auto_schedule};
use crate::test::helpers::*;

fn chain_env() -> Env {
    // Three pure stages; the middle one is a stencil so it cannot be
    // prepass-inlined.
    let a = pure_func("a", &["x", "y"], add(var("x"), var("y")));
    let b = pure_func(
        "b",
        &["x", "y"],
        add(call("a", vec![var("x"), var("y")]), call("a", vec![add(var("x"), 1), var("y")])),
    );
    let mut c = pure_func(
        "c",
        &["x", "y"],
        add(call("b", vec![var("x"), var("y")]), call("b", vec![var("x"), add(var("y"), 1)])),
    );
    c.schedule_mut().bound("x", 0, 512).bound("y", 0, 512);
    env_of(vec![a, b, c])
}

fn run(env: &mut Env, flags: AdvisorFlags) {
    let outputs = vec!["c".to_string()];
    let order = fresco_ir::callgraph::realization_order(&outputs, env).unwrap();
    auto_schedule(&outputs, &order, env, &FuncValueBounds::new(), flags, MachineParams::default())
        .unwrap();
}

fn snapshot(env: &Env) -> BTreeMap<String, Schedule> {
    env.iter().map(|(name, f)| (name.clone(), f.schedule().clone())).collect()
}

/// Calling the advisor twice in succession yields identical schedules.
#[test]
fn advisor_is_idempotent() {
    let mut env = chain_env();
    run(&mut env, AdvisorFlags::default());
    let first = snapshot(&env);
    let first_updates: BTreeMap<String, Vec<Schedule>> = env
        .iter()
        .map(|(n, f)| (n.clone(), f.updates().iter().map(|u| u.schedule.clone()).collect()))
        .collect();

    run(&mut env, AdvisorFlags::default());
    assert_eq!(snapshot(&env), first);
    let second_updates: BTreeMap<String, Vec<Schedule>> = env
        .iter()
        .map(|(n, f)| (n.clone(), f.updates().iter().map(|u| u.schedule.clone()).collect()))
        .collect();
    assert_eq!(second_updates, first_updates);
}

#[test]
fn advised_chain_lowers_end_to_end() {
    let mut env = chain_env();
    run(&mut env, AdvisorFlags::default());
    let stmt = lower(&["c"], &env);
    assert!(collect_provides(&stmt).iter().any(|(name, ..)| name == "c"));
}

/// The gpu flag tags the emitter's parallel loops; lowering then carries
/// the tag into every loop those enclose.
#[test]
fn gpu_flag_tags_emitted_parallel_loops() {
    let mut env = chain_env();
    run(&mut env, AdvisorFlags::builder().gpu(true).build());

    let tagged = env.values().any(|f| {
        f.schedule()
            .dims
            .iter()
            .any(|d| d.for_type == ForType::Parallel && d.device_api == DeviceApi::Cuda)
    });
    assert!(tagged, "the chosen parallel dim carries the device tag");

    let stmt = lower(&["c"], &env);
    let loops = collect_loops(&stmt);
    assert!(loops.iter().any(|(_, t, d)| *t == ForType::Parallel && *d == DeviceApi::Cuda));
    assert!(
        loops.iter().any(|(_, t, d)| *t != ForType::Parallel && *d == DeviceApi::Cuda),
        "loops inside the grid inherit the enclosing tag"
    );
}

#[test]
fn without_gpu_flag_loops_stay_on_the_host() {
    let mut env = chain_env();
    run(&mut env, AdvisorFlags::default());
    let stmt = lower(&["c"], &env);
    assert!(collect_loops(&stmt).iter().all(|(_, _, d)| *d == DeviceApi::Host));
}

/// Sweep mode only changes what gets logged; the decisions are identical.
#[test]
fn sweep_flag_changes_logging_not_schedules() {
    let mut swept = chain_env();
    run(&mut swept, AdvisorFlags::builder().sweep(true).build());
    let mut plain = chain_env();
    run(&mut plain, AdvisorFlags::default());
    assert_eq!(snapshot(&swept), snapshot(&plain));
}

#[test]
fn naive_flag_roots_everything() {
    let mut env = chain_env();
    run(&mut env, AdvisorFlags::builder().naive(true).build());
    for f in env.values() {
        assert!(f.schedule().store_level.is_root());
        assert!(f.schedule().compute_level.is_root());
        assert!(f.schedule().splits.is_empty());
    }
    // And the result is a legal pipeline.
    let stmt = lower(&["c"], &env);
    assert!(find_producer_consumer(&stmt, "a").is_some());
    assert!(find_producer_consumer(&stmt, "b").is_some());
}

#[test]
fn advisor_handles_reductions() {
    // A histogram-style pipeline: the update stage survives the advisor
    // and the result still lowers.
    let src = pure_func("src", &["x"], mul(var("x"), 2));
    let mut hist = fresco_ir::func::Function::new(
        "hist",
        &["x"],
        vec![int(0)],
        vec![fresco_ir::types::ElemType::Int(32)],
    )
    .unwrap();
    hist.define_update(
        vec![var("x")],
        vec![add(call("hist", vec![var("x")]), call("src", vec![var("r")]))],
        Some(fresco_ir::func::ReductionDomain {
            domain: vec![fresco_ir::func::ReductionVariable {
                var: "r".into(),
                min: int(0),
                extent: int(1024),
            }],
        }),
    )
    .unwrap();
    hist.schedule_mut().bound("x", 0, 256);
    let mut env = env_of(vec![src, hist]);

    let outputs = vec!["hist".to_string()];
    let order = fresco_ir::callgraph::realization_order(&outputs, &env).unwrap();
    auto_schedule(
        &outputs,
        &order,
        &mut env,
        &FuncValueBounds::new(),
        AdvisorFlags::default(),
        MachineParams::default(),
    )
    .unwrap();

    let stmt = lower(&["hist"], &env);
    assert!(find_producer_consumer(&stmt, "hist").is_some());
}
