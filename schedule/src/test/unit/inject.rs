//! End-to-end lowering tests: inlining, realization injection, cleanup
//! passes and the device-tag propagation invariant.

use fresco_ir::expr::{add, call, mul, var};
use fresco_ir::stmt::{DeviceApi, ForType, Stmt, evaluate, for_loop};
use fresco_ir::schedule::ROOT;

use crate::lower::inject::InjectRealization;
use crate::test::helpers::*;

/// S1: `f` inlined into `g` leaves a bare loop nest over `g` with no trace
/// of `f`.
#[test]
fn trivial_inline_leaves_single_nest() {
    let f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    let mut g = pure_func("g", &["x", "y"], mul(call("f", vec![var("x"), var("y")]), 2));
    g.schedule_mut().compute_root();
    let env = env_of(vec![f, g]);

    let stmt = lower(&["g"], &env);

    assert_eq!(loop_names(&stmt), vec!["g.s0.y", "g.s0.x"]);
    assert!(find_realize(&stmt, "f").is_none());
    assert!(find_producer_consumer(&stmt, "f").is_none());

    let provides = collect_provides(&stmt);
    assert_eq!(provides.len(), 1);
    let (name, values, _) = &provides[0];
    assert_eq!(name, "g");
    assert_eq!(values[0], mul(add(var("g.s0.x"), var("g.s0.y")), 2));
}

fn tiled_stencil_env() -> fresco_ir::func::Env {
    let g = pure_func("g", &["x", "y"], add(var("x"), var("y")));
    let mut f = pure_func(
        "f",
        &["x", "y"],
        add(call("g", vec![var("x"), var("y")]), call("g", vec![add(var("x"), 1), var("y")])),
    );
    f.schedule_mut().compute_root();
    f.schedule_mut().split("x", "xo", "xi", 4);
    f.schedule_mut().split("y", "yo", "yi", 4);
    f.schedule_mut().reorder(&["xi", "yi", "xo", "yo"]);
    let mut env = env_of(vec![f, g]);
    env.get_mut("g").unwrap().schedule_mut().store_at("f", "yo").compute_at("f", "xo");
    env
}

/// S2: a 4x4-tiled consumer with the producer stored per row-of-tiles and
/// computed per tile.
#[test]
fn tile_and_compute_at_places_realization() {
    let env = tiled_stencil_env();
    let stmt = lower(&["f"], &env);

    // Loop order: yo, xo around yi, xi.
    let names = loop_names(&stmt);
    let f_loops: Vec<&str> = names
        .iter()
        .filter(|n| n.starts_with("f.s0."))
        .map(|n| n.as_str())
        .collect();
    assert_eq!(f_loops, vec!["f.s0.yo", "f.s0.xo", "f.s0.yi", "f.s0.xi"]);

    // Storage granularity: the realize sits inside yo, outside xo.
    let yo = find_loop(&stmt, "f.s0.yo").expect("yo loop");
    let realize = find_realize(&yo, "g").expect("g realized inside yo");
    assert!(find_loop(&realize, "f.s0.xo").is_some(), "realize wraps the xo loop");
    let Stmt::Realize { bounds, .. } = &*realize else { unreachable!() };
    assert_eq!(bounds[0].0, var("g.x.min_realized"));
    assert_eq!(bounds[0].1, var("g.x.extent_realized"));

    // Compute granularity: g is produced inside xo.
    let xo = find_loop(&stmt, "f.s0.xo").expect("xo loop");
    let pc = find_producer_consumer(&xo, "g").expect("g produced inside xo");
    let Stmt::ProducerConsumer { produce, update, .. } = &*pc else { unreachable!() };
    assert!(update.is_none());
    assert_eq!(loop_names(produce), vec!["g.s0.y", "g.s0.x"]);
}

#[test]
fn injection_is_idempotent() {
    let env = tiled_stencil_env();
    let f = &env["f"];
    let g = &env["g"];

    let root = for_loop(
        format!("{ROOT}.{ROOT}"),
        0,
        1,
        ForType::Serial,
        DeviceApi::Host,
        evaluate(0),
    );
    let with_f = InjectRealization::new(f, &env, true, false).inject(&root).unwrap();
    let once = InjectRealization::new(g, &env, false, false).inject(&with_f).unwrap();
    let twice = InjectRealization::new(g, &env, false, false).inject(&once).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn output_realization_has_no_realize_wrapper() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().compute_root();
    let env = env_of(vec![f]);
    let stmt = lower(&["f"], &env);

    assert!(find_realize(&stmt, "f").is_none(), "outputs live in caller storage");
    assert!(find_producer_consumer(&stmt, "f").is_some());
}

#[test]
fn outermost_loops_are_stripped() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().compute_root();
    let env = env_of(vec![f]);
    let stmt = lower(&["f"], &env);

    assert!(loop_names(&stmt).iter().all(|n| !n.contains("__outermost")));
    assert!(
        collect_lets(&stmt).iter().all(|(n, _)| !n.contains("__outermost")),
        "outermost bound lets fold to constants"
    );
    assert!(loop_names(&stmt).iter().all(|n| !n.contains(ROOT)), "root loop is stripped");
}

/// Device propagation: every loop's tag equals the nearest enclosing
/// non-parent tag.
#[test]
fn device_api_propagates_into_parent_tagged_loops() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    f.schedule_mut().compute_root();
    // Tag the outer loop for a device; the inner loop says Parent.
    f.schedule_mut().dims[1].device_api = DeviceApi::Cuda;
    let env = env_of(vec![f]);
    let stmt = lower(&["f"], &env);

    let loops = collect_loops(&stmt);
    let y = loops.iter().find(|(n, _, _)| n == "f.s0.y").unwrap();
    let x = loops.iter().find(|(n, _, _)| n == "f.s0.x").unwrap();
    assert_eq!(y.2, DeviceApi::Cuda);
    assert_eq!(x.2, DeviceApi::Cuda, "inner Parent loop inherits the enclosing tag");
}

#[test]
fn host_is_the_default_device() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().compute_root();
    let env = env_of(vec![f]);
    let stmt = lower(&["f"], &env);
    let loops = collect_loops(&stmt);
    assert_eq!(loops[0].2, DeviceApi::Host);
}

/// A single-point loop scheduled parallel keeps its tag; nothing in the
/// core drops parallelism because an extent looks small.
#[test]
fn single_point_parallel_loop_keeps_its_tag() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    f.schedule_mut().compute_root();
    f.schedule_mut().bound("y", 0, 1);
    f.schedule_mut().parallel("y");
    let env = env_of(vec![f]);
    let stmt = lower(&["f"], &env);

    let loops = collect_loops(&stmt);
    let y = loops.iter().find(|(n, _, _)| n == "f.s0.y").unwrap();
    assert_eq!(y.1, ForType::Parallel);
}

#[test]
fn memoized_flag_is_aggregated() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().compute_root();
    f.schedule_mut().memoized = true;
    let env = env_of(vec![f]);
    let outputs = vec!["f".to_string()];
    let order = fresco_ir::callgraph::realization_order(&outputs, &env).unwrap();
    let (_, any_memoized) =
        crate::lower::schedule_functions(&outputs, &order, &env, false).unwrap();
    assert!(any_memoized);
}

/// An inlined extern stage cannot be substituted into a vector loop; its
/// realization lands around the loop instead.
#[test]
fn inline_extern_realizes_around_vector_loops() {
    use fresco_ir::func::{ExternDefinition, Function};
    use fresco_ir::types::ElemType;

    let ext = Function::new_extern(
        "ext",
        &["x"],
        vec![ElemType::Int(32)],
        ExternDefinition { name: "fill".into(), args: vec![] },
    )
    .unwrap();
    let mut out = pure_func("out", &["x"], call("ext", vec![var("x")]));
    out.schedule_mut().compute_root();
    out.schedule_mut().vectorize("x");
    let env = env_of(vec![ext, out]);

    let stmt = lower(&["out"], &env);

    let realize = find_realize(&stmt, "ext").expect("ext realized");
    assert!(
        find_loop(&realize, "out.s0.x").is_some(),
        "the realization must wrap the vector loop, not sit inside it"
    );
    let pc = find_producer_consumer(&stmt, "ext").expect("ext produced");
    let Stmt::ProducerConsumer { consume, .. } = &*pc else { unreachable!() };
    assert!(find_loop(consume, "out.s0.x").is_some());
}

/// An impure inlined function used in another function's store cannot be
/// expression-inlined; its realization wraps the consuming provide.
#[test]
fn inline_impure_function_realizes_around_the_provide() {
    let mut acc = pure_func("acc", &["x"], var("x"));
    acc.define_update(vec![var("x")], vec![add(call("acc", vec![var("x")]), 1)], None).unwrap();
    // acc stays at the default inline levels.
    let mut out = pure_func("out", &["x"], call("acc", vec![var("x")]));
    out.schedule_mut().compute_root();
    let env = env_of(vec![acc, out]);

    let stmt = lower(&["out"], &env);
    let pc = find_producer_consumer(&stmt, "acc").expect("acc realized despite inline schedule");
    let Stmt::ProducerConsumer { update, consume, .. } = &*pc else { unreachable!() };
    assert!(update.is_some());
    assert!(
        collect_provides(consume).iter().any(|(name, ..)| name == "out"),
        "the consuming provide sits inside acc's consume scope"
    );
    assert!(find_realize(&stmt, "acc").is_some());
}
