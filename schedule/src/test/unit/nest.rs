//! Unit tests for split normalization and loop-nest synthesis.

use fresco_ir::expr::{add, int, var};
use fresco_ir::schedule::{ForType, Schedule, SplitKind};
use fresco_ir::stmt::{DeviceApi, Stmt};

use crate::error::Error;
use crate::lower::nest::{build_loop_nest, normalize_splits};
use crate::lower::production::build_produce;
use crate::test::helpers::*;

fn splits_of(build: impl FnOnce(&mut Schedule)) -> Vec<fresco_ir::schedule::Split> {
    let mut s = Schedule::for_args(&["x", "y"]);
    build(&mut s);
    s.splits
}

#[test]
fn chained_splits_reassociate_outermost_first() {
    // x -> 4*xo + xi, then xo -> 2*xoo + xoi.
    let splits = splits_of(|s| {
        s.split("x", "xo", "xi", 4);
        s.split("xo", "xoo", "xoi", 2);
    });
    let normalized = normalize_splits(&splits);

    assert_eq!(normalized.len(), 2);
    // First split now derives xoo straight from x with the combined factor.
    assert_eq!(normalized[0].old, "x");
    assert_eq!(normalized[0].outer, "xoo");
    assert_eq!(normalized[0].factor, Some(int(8)));
    // Second defines the synthetic middle var, then xi.
    assert_eq!(normalized[1].old, normalized[0].inner);
    assert_eq!(normalized[1].outer, "xoi");
    assert_eq!(normalized[1].inner, "xi");
    assert_eq!(normalized[1].factor, Some(int(4)));
}

#[test]
fn normalization_is_idempotent() {
    let splits = splits_of(|s| {
        s.split("x", "xo", "xi", 4);
        s.split("xo", "xoo", "xoi", 2);
        s.split("y", "yo", "yi", 16);
    });
    let once = normalize_splits(&splits);
    let twice = normalize_splits(&once);
    assert_eq!(once, twice);
}

#[test]
fn unrelated_splits_keep_their_order() {
    let splits = splits_of(|s| {
        s.split("x", "xo", "xi", 4);
        s.split("y", "yo", "yi", 8);
    });
    let normalized = normalize_splits(&splits);
    assert_eq!(normalized, splits);
}

#[test]
fn rename_is_absorbed_into_later_split() {
    // x -> w, then w -> 4*wo + wi coalesces to x -> 4*wo + wi.
    let splits = splits_of(|s| {
        s.rename("x", "w");
        s.split("w", "wo", "wi", 4);
    });
    let normalized = normalize_splits(&splits);
    assert_eq!(normalized.len(), 1);
    assert_eq!(normalized[0].old, "x");
    assert_eq!(normalized[0].outer, "wo");
    assert_eq!(normalized[0].inner, "wi");
    assert_eq!(normalized[0].kind, SplitKind::SplitVar);
}

#[test]
#[should_panic(expected = "rename of derived variable")]
fn rename_of_derived_variable_is_an_internal_error() {
    let splits = splits_of(|s| {
        s.split("x", "xo", "xi", 4);
        s.rename("xo", "z");
    });
    normalize_splits(&splits);
}

#[test]
fn exact_split_failure_names_factor_and_extent() {
    // A variable of extent 7 split exactly by 4 cannot be proven divisible.
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().bound("x", 0, 7);
    f.schedule_mut().split_with("x", "xo", "xi", 4, true, false);

    let env = env_of(vec![]);
    let err = build_produce(&f, &env).unwrap_err();
    match &err {
        Error::ExactSplit { var, factor, extent, .. } => {
            assert_eq!(var, "x");
            assert_eq!(factor, "4");
            assert_eq!(extent, "7");
        }
        other => panic!("expected ExactSplit, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("(4)"));
    assert!(message.contains("(7)"));
}

#[test]
fn exact_split_succeeds_when_divisible() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().bound("x", 0, 8);
    f.schedule_mut().split_with("x", "xo", "xi", 4, true, false);
    let env = env_of(vec![]);
    assert!(build_produce(&f, &env).is_ok());
}

#[test]
fn split_base_is_clamped_for_pure_stages() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().split("x", "xo", "xi", 4);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    // The base let holds min(xo*4 + loop_min, loop_max + (1 - 4)).
    let base = let_value(&stmt, "f.s0.xi.base").expect("base let present");
    let display = base.to_string();
    assert!(display.starts_with("min("), "base not clamped: {display}");
    assert!(!contains_likely(&stmt), "likely marker requires a trivial inner loop");
}

#[test]
fn likely_marks_innermost_nontrivial_serial_loop() {
    // With xi vectorized, xo is the innermost non-trivial loop, so the
    // clamped base gets the partition hint.
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().split("x", "xo", "xi", 4);
    f.schedule_mut().vectorize("xi");
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();
    assert!(contains_likely(&stmt));
}

#[test]
fn update_stages_do_not_clamp() {
    let f = pure_func("f", &["x"], var("x"));
    let mut schedule = Schedule::for_args(&["x"]);
    schedule.split("x", "xo", "xi", 4);
    let site = vec![var("f.s1.x")];
    let values = vec![add(var("f.s1.x"), 1)];
    let stmt = build_loop_nest(&f, "f.s1.", &site, &values, &schedule, true).unwrap();

    let base = let_value(&stmt, "f.s1.xi.base").expect("base let present");
    assert_eq!(base.to_string(), "((f.s1.xo*4) + f.s1.x.loop_min)");
}

#[test]
fn fused_zero_extent_loops_have_division_safe_lets() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    f.schedule_mut().fuse("x", "y", "xy");
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    // inner = fused % max(inner_extent, 1) + inner_min: no divide-by-zero
    // even when the loop is never entered.
    let inner = let_value(&stmt, "f.s0.x").expect("fused inner let present");
    assert_eq!(
        inner.to_string(),
        "((f.s0.xy % max(f.s0.x.loop_extent, 1)) + f.s0.x.loop_min)"
    );
    let outer = let_value(&stmt, "f.s0.y").expect("fused outer let present");
    assert_eq!(
        outer.to_string(),
        "((f.s0.xy/max(f.s0.x.loop_extent, 1)) + f.s0.y.loop_min)"
    );
    // And the fused loop's own extent is the product.
    let extent = let_value(&stmt, "f.s0.xy.loop_extent").expect("fused extent");
    assert_eq!(extent.to_string(), "(f.s0.x.loop_extent*f.s0.y.loop_extent)");
}

#[test]
fn bounds_lets_cover_split_vars() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().split("x", "xo", "xi", 4);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    let lets: Vec<String> = collect_lets(&stmt).into_iter().map(|(n, _)| n).collect();
    for expected in [
        "f.s0.x.loop_min",
        "f.s0.x.loop_max",
        "f.s0.x.loop_extent",
        "f.s0.xi.loop_min",
        "f.s0.xi.loop_extent",
        "f.s0.xo.loop_min",
        "f.s0.xo.loop_extent",
        "f.s0.__outermost.loop_extent",
    ] {
        assert!(lets.iter().any(|n| n == expected), "missing let {expected}");
    }
    // Outer extent is the rounded-up ratio.
    let outer_extent = let_value(&stmt, "f.s0.xo.loop_extent").unwrap();
    assert_eq!(
        outer_extent.to_string(),
        "(((f.s0.x.loop_max - f.s0.x.loop_min) + 4)/4)"
    );
}

#[test]
fn partial_split_clamps_inner_extent_not_base() {
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().split_with("x", "xo", "xi", 4, false, true);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    let base = let_value(&stmt, "f.s0.xi.base").unwrap();
    assert_eq!(base.to_string(), "((f.s0.xo*4) + f.s0.x.loop_min)");
    let inner_extent = let_value(&stmt, "f.s0.xi.loop_extent").unwrap();
    assert_eq!(inner_extent.to_string(), "min(likely(4), (f.s0.x.loop_max + 1))");
}

#[test]
fn lets_migrate_outward_past_independent_loops() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    f.schedule_mut().split("x", "xo", "xi", 4);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    // The base let depends on xo but not on y, so it sits inside the xo
    // loop and outside the xi loop.
    let xo_loop = find_loop(&stmt, "f.s0.xo").expect("xo loop");
    let Stmt::For { body, .. } = &*xo_loop else { unreachable!() };
    assert!(
        matches!(&**body, Stmt::LetStmt { name, .. } if name == "f.s0.xi.base"),
        "base let should be the first thing inside the xo loop"
    );
}

#[test]
fn specialization_substitutes_boolean_scrutinee() {
    // A specialization on bare boolean v: v pinned true in the then branch
    // and false in the else branch.
    let mut f = pure_func("f", &["x"], fresco_ir::expr::select(var("v"), var("x"), int(0)));
    let spec_schedule = f.schedule().clone();
    f.schedule_mut().specialize(var("v"), spec_schedule);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    let Stmt::IfThenElse { condition, then_case, else_case } = &*stmt else {
        panic!("specialization must lower to a branch, got {stmt}");
    };
    assert_eq!(condition, &var("v"));
    let then_provides = collect_provides(then_case);
    assert_eq!(then_provides[0].1[0], var("f.s0.x"), "select folded under v == true");
    let else_provides = collect_provides(else_case.as_ref().unwrap());
    assert_eq!(else_provides[0].1[0], int(0), "select folded under v == false");
}

#[test]
fn specializations_nest_last_to_first() {
    let mut f = pure_func("f", &["x"], var("x"));
    let plain = f.schedule().clone();
    f.schedule_mut().specialize(var("a"), plain.clone());
    f.schedule_mut().specialize(var("b"), plain);
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    // The first specialization in the list wins outermost.
    let Stmt::IfThenElse { condition, else_case, .. } = &*stmt else {
        panic!("expected branch");
    };
    assert_eq!(condition, &var("a"));
    let Stmt::IfThenElse { condition, .. } = &**else_case.as_ref().unwrap() else {
        panic!("expected nested branch");
    };
    assert_eq!(condition, &var("b"));
}

#[test]
fn loop_types_and_devices_come_from_dims() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    f.schedule_mut().parallel("y");
    f.schedule_mut().dims[0].device_api = DeviceApi::Cuda;
    let env = env_of(vec![]);
    let stmt = build_produce(&f, &env).unwrap();

    let loops = collect_loops(&stmt);
    let x = loops.iter().find(|(n, _, _)| n == "f.s0.x").unwrap();
    assert_eq!(x.1, ForType::Serial);
    assert_eq!(x.2, DeviceApi::Cuda);
    let y = loops.iter().find(|(n, _, _)| n == "f.s0.y").unwrap();
    assert_eq!(y.1, ForType::Parallel);
}
