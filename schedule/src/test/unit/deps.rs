//! Unit tests for dependency-region analysis.

use fresco_ir::bounds::FuncValueBounds;
use fresco_ir::expr::{add, call, sub, var};
use fresco_ir::interval::Interval;

use crate::advisor::DependenceAnalysis;
use crate::advisor::cost::{box_area, get_extent};
use crate::test::helpers::*;

fn stencil_env() -> fresco_ir::func::Env {
    let f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    let g = pure_func(
        "g",
        &["x", "y"],
        add(call("f", vec![var("x"), var("y")]), call("f", vec![add(var("x"), 1), var("y")])),
    );
    env_of(vec![f, g])
}

#[test]
fn required_region_widens_by_the_stencil_halo() {
    let env = stencil_env();
    let analysis = DependenceAnalysis::new(&env, &FuncValueBounds::new());

    // Symbolically: g's required region of f spans [x_l, x_u + 1] on x.
    let region = &analysis.dep_regions["g"]["f"];
    assert_eq!(region.len(), 2);

    // Concretely over a 64x64 tile: x picks up the +1 halo.
    let concrete = analysis.concrete_dep_regions("g", &[true, true], &[(0, 63), (0, 63)]);
    let f_region = &concrete["f"];
    assert_eq!(f_region.0[0], Interval::new(0, 64));
    assert_eq!(f_region.0[1], Interval::new(0, 63));
}

#[test]
fn redundant_region_is_the_overlap_of_adjacent_tiles() {
    let env = stencil_env();
    let analysis = DependenceAnalysis::new(&env, &FuncValueBounds::new());

    let overlaps = analysis.concrete_overlap_regions("g", &[true, true], &[(0, 63), (0, 63)]);
    assert_eq!(overlaps.len(), 2, "one overlap map per axis");

    // Along x: tiles [0,63] and [64,127] both read f at x = 64.
    let x_overlap = &overlaps[0]["f"];
    assert_eq!(get_extent(&x_overlap.0[0]), 1);
    assert_eq!(get_extent(&x_overlap.0[1]), 64);
    assert_eq!(box_area(x_overlap), 64);

    // Along y there is no halo, so adjacent tiles share nothing.
    let y_overlap = &overlaps[1]["f"];
    assert_eq!(box_area(y_overlap), 0);
}

#[test]
fn regions_chain_through_intermediate_functions() {
    // h reads g reads f; the analysis reaches f transitively.
    let f = pure_func("f", &["x"], var("x"));
    let g = pure_func("g", &["x"], call("f", vec![add(var("x"), 1)]));
    let h = pure_func("h", &["x"], call("g", vec![add(var("x"), 2)]));
    let env = env_of(vec![f, g, h]);
    let analysis = DependenceAnalysis::new(&env, &FuncValueBounds::new());

    let concrete = analysis.concrete_dep_regions("h", &[true], &[(0, 9)]);
    assert_eq!(concrete["g"].0[0], Interval::new(2, 11));
    assert_eq!(concrete["f"].0[0], Interval::new(3, 12));
}

#[test]
fn unresolvable_bounds_fall_back_to_declared_bounds() {
    // g reads f at a parameter-shifted coordinate; the region stays
    // symbolic after substitution, so f's declared bound stands in.
    let mut f = pure_func("f", &["x"], var("x"));
    f.schedule_mut().bound("x", 0, 256);
    let g = pure_func("g", &["x"], call("f", vec![add(var("x"), var("n"))]));
    let env = env_of(vec![f, g]);
    let analysis = DependenceAnalysis::new(&env, &FuncValueBounds::new());

    let concrete = analysis.concrete_dep_regions("g", &[true], &[(0, 63)]);
    let f_region = &concrete["f"];
    assert_eq!(f_region.0[0], Interval::new(0, 255));
}

#[test]
fn negative_shift_directions_still_intersect() {
    // A backward-looking stencil: g(x) = f(x) - f(x - 1).
    let f = pure_func("f", &["x"], var("x"));
    let g = pure_func(
        "g",
        &["x"],
        sub(call("f", vec![var("x")]), call("f", vec![sub(var("x"), 1)])),
    );
    let env = env_of(vec![f, g]);
    let analysis = DependenceAnalysis::new(&env, &FuncValueBounds::new());

    let concrete = analysis.concrete_dep_regions("g", &[true], &[(0, 31)]);
    assert_eq!(concrete["f"].0[0], Interval::new(-1, 31));

    let overlaps = analysis.concrete_overlap_regions("g", &[true], &[(0, 31)]);
    assert_eq!(box_area(&overlaps[0]["f"]), 1);
}
