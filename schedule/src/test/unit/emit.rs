//! Unit tests for schedule surgery and vectorization probing.

use std::collections::BTreeMap;

use fresco_ir::expr::{add, call, var};
use fresco_ir::schedule::{ForType, OUTERMOST};
use test_case::test_case;

use crate::advisor::emit::{
    DimEstimates, fuse_dim, move_dim_to_outermost, pick_dim_to_parallelize, simple_vectorize,
    split_dim, vectorize_dim,
};
use crate::test::helpers::*;

#[test_case(4; "sse lanes")]
#[test_case(8; "avx lanes")]
fn vectorize_dim_splits_by_lane_width(width: i64) {
    let mut f = pure_func("f", &["x"], var("x"));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 256)]);
    vectorize_dim(f.schedule_mut(), &mut estimates, 0, width);

    assert_eq!(f.schedule().dims[0].var, "x.vec.in");
    assert_eq!(f.schedule().dims[0].for_type, ForType::Vectorized);
    assert_eq!(estimates["x.vec.in"], width);
    assert_eq!(estimates["x.vec.out"], 256 / width);
}

#[test]
fn split_dim_tracks_estimates() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 100), ("y".into(), 50)]);

    split_dim(f.schedule_mut(), 0, 32, &mut estimates, "tile", false);

    let dims: Vec<_> = f.schedule().dims.iter().map(|d| d.var.as_str()).collect();
    assert_eq!(dims, vec!["x.tile.in", "x.tile.out", "y", OUTERMOST]);
    assert_eq!(estimates["x.tile.in"], 32);
    assert_eq!(estimates["x.tile.out"], 4, "rounded up");
    assert!(!estimates.contains_key("x"));
}

#[test]
fn fuse_dim_multiplies_estimates() {
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 100), ("y".into(), 50)]);

    let fused = fuse_dim(f.schedule_mut(), "x", "y", &mut estimates);

    assert_eq!(fused, "x.y");
    let dims: Vec<_> = f.schedule().dims.iter().map(|d| d.var.as_str()).collect();
    assert_eq!(dims, vec!["x.y", OUTERMOST]);
    assert_eq!(estimates["x.y"], 5000);
}

#[test]
fn move_dim_keeps_outermost_last() {
    let mut f = pure_func("f", &["x", "y", "z"], add(add(var("x"), var("y")), var("z")));
    move_dim_to_outermost(f.schedule_mut(), 0);
    let dims: Vec<_> = f.schedule().dims.iter().map(|d| d.var.as_str()).collect();
    assert_eq!(dims, vec!["y", "z", "x", OUTERMOST]);
}

/// S6, vectorizable half: every load walks x at a constant stride.
#[test]
fn constant_stride_loads_vectorize() {
    let mut f = pure_func(
        "f",
        &["x", "y"],
        add(
            call("g", vec![var("x"), var("y")]),
            call("g", vec![var("x"), add(var("y"), 1)]),
        ),
    );
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 512), ("y".into(), 512)]);

    assert!(simple_vectorize(&mut f, &mut estimates, 0, 8));

    let dims = &f.schedule().dims;
    assert_eq!(dims[0].var, "x.vec.in");
    assert_eq!(dims[0].for_type, ForType::Vectorized);
    assert_eq!(estimates["x.vec.in"], 8);
}

/// S6, transposed half: reading g(y, x) moves a whole row per lane, which
/// is not a compile-time-constant stride.
#[test]
fn transposed_loads_do_not_vectorize() {
    let mut f = pure_func("f", &["x", "y"], call("g", vec![var("y"), var("x")]));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 512), ("y".into(), 512)]);

    assert!(!simple_vectorize(&mut f, &mut estimates, 0, 8));
    assert!(f.schedule().dims.iter().all(|d| d.for_type == ForType::Serial));
    assert!(f.schedule().splits.is_empty());
}

#[test]
fn data_dependent_loads_do_not_vectorize() {
    let mut f = pure_func("f", &["x"], call("g", vec![call("idx", vec![var("x")])]));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 512)]);
    assert!(!simple_vectorize(&mut f, &mut estimates, 0, 8));
}

#[test]
fn parallel_pick_fuses_small_tile_loops() {
    // Two tile loops of 8 iterations each: neither clears parallelism 8
    // alone, their fusion (64) does.
    let mut f = pure_func("f", &["x", "y"], add(var("x"), var("y")));
    let mut estimates: DimEstimates = BTreeMap::from([("x".into(), 512), ("y".into(), 512)]);
    split_dim(f.schedule_mut(), 0, 64, &mut estimates, "tile", false);
    move_dim_to_outermost(f.schedule_mut(), 1);
    let y_idx = f.schedule().dims.iter().position(|d| d.var == "y").unwrap();
    split_dim(f.schedule_mut(), y_idx, 64, &mut estimates, "tile", false);
    move_dim_to_outermost(f.schedule_mut(), y_idx + 1);

    let (outer, num_fused) = pick_dim_to_parallelize(&mut f, &mut estimates, 8, &[64, 64]);

    assert_eq!(num_fused, 1);
    let outer = outer.expect("a parallel dim was chosen");
    assert_eq!(f.schedule().dims[outer].var, "x.tile.out.y.tile.out");
    assert_eq!(estimates["x.tile.out.y.tile.out"], 64);
}

#[test]
fn parallel_pick_hoists_a_wide_serial_dim() {
    // Untiled: the first non-innermost dim (scanning outside in) wider
    // than the parallelism target is hoisted outermost. The innermost dim
    // is never taken; it is the vectorization candidate.
    let mut f = pure_func("f", &["x", "y", "z"], add(add(var("x"), var("y")), var("z")));
    let mut estimates: DimEstimates =
        BTreeMap::from([("x".into(), 512), ("y".into(), 512), ("z".into(), 4)]);

    let (outer, num_fused) = pick_dim_to_parallelize(&mut f, &mut estimates, 8, &[-1, -1, -1]);

    assert_eq!(num_fused, 0);
    let outer = outer.expect("a parallel dim was chosen");
    let dims: Vec<_> = f.schedule().dims.iter().map(|d| d.var.as_str()).collect();
    assert_eq!(dims, vec!["x", "z", "y", OUTERMOST]);
    assert_eq!(f.schedule().dims[outer].var, "y");
}
