// tests/test_histopyramid_union.rs
// Integration tests for the HistoPyramid engine on the host device
// This file exists to validate union/split/intersection results, hole handling, batching and pyramid counts.
// RELEVANT FILES:src/histopyramid/mod.rs,src/histopyramid/host.rs,src/histopyramid/reconstruct.rs,src/histopyramid/pyramid.rs

use anyhow::Result;
use approx::assert_relative_eq;
use glam::Vec2;
use polyforge::geometry::signed_area;
use polyforge::histopyramid::holes::assign_holes;
use polyforge::histopyramid::pyramid::{is_survivor, HostPyramid, PyramidLayout};
use polyforge::histopyramid::reconstruct::{format_new_shapes, EdgeLink, ExtractedShapes};
use polyforge::{Bounds, EngineConfig, Geometry, HistoPyramidEngine, HostDevice, PolyError, Shape, ShapePack};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn host_engine(config: EngineConfig) -> HistoPyramidEngine<HostDevice> {
    HistoPyramidEngine::host(config)
}

/// Rotation- and order-independent form of a geometry: each loop's vertices
/// rounded and sorted, loops sorted.
fn canonical(geometry: &Geometry) -> Vec<(Vec<(i64, i64)>, usize)> {
    let round = |p: &Vec2| ((p.x * 1e4).round() as i64, (p.y * 1e4).round() as i64);
    let mut loops: Vec<(Vec<(i64, i64)>, usize)> = geometry
        .iter()
        .map(|shape| {
            let mut nodes: Vec<(i64, i64)> = shape.nodes.iter().map(round).collect();
            nodes.sort_unstable();
            (nodes, shape.holes.len())
        })
        .collect();
    loops.sort();
    loops
}

/// Squares overlapping their neighbour without sharing edges or vertices.
fn staircase(count: usize) -> Geometry {
    (0..count)
        .map(|i| {
            let min = Vec2::new(0.7 * i as f32, 0.3 * i as f32);
            Shape::rect(min, min + Vec2::ONE)
        })
        .collect()
}

#[tokio::test]
async fn test_overlapping_squares_union_to_one_polygon() -> Result<()> {
    init_logging();
    let engine = host_engine(EngineConfig::default());
    let input = vec![
        Shape::rect(Vec2::ZERO, Vec2::ONE),
        Shape::rect(Vec2::splat(0.5), Vec2::splat(1.5)),
    ];
    let output = engine.union(&input).await?;

    assert_eq!(output.len(), 1);
    assert!(output[0].holes.is_empty());
    assert_eq!(output[0].nodes.len(), 8);
    assert_relative_eq!(output[0].signed_area(), 1.75, epsilon = 1e-4);
    let bounds = output[0].bounds().unwrap();
    assert_relative_eq!(bounds.min.x, 0.0);
    assert_relative_eq!(bounds.max.y, 1.5);
    Ok(())
}

#[tokio::test]
async fn test_disjoint_squares_pass_through() -> Result<()> {
    init_logging();
    let engine = host_engine(EngineConfig::default());
    let input: Geometry = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)]
        .iter()
        .map(|&(x, y)| Shape::rect(Vec2::new(x, y), Vec2::new(x + 1.0, y + 1.0)))
        .collect();
    let output = engine.union(&input).await?;

    assert_eq!(output.len(), 4);
    assert!(output.iter().all(|shape| shape.holes.is_empty()));
    assert_eq!(canonical(&output), canonical(&input));
    for shape in &output {
        assert_relative_eq!(shape.signed_area(), 1.0, epsilon = 1e-5);
    }
    Ok(())
}

#[tokio::test]
async fn test_batched_union_matches_single_pass() -> Result<()> {
    init_logging();
    let input = staircase(6);

    let wide = host_engine(EngineConfig::default());
    let narrow = host_engine(EngineConfig::default().with_max_layers(4));

    let single = wide.union(&input).await?;
    let batched = narrow.union(&input).await?;

    assert_eq!(wide.last_stats().unwrap().plan.batch_count, 1);
    let stats = narrow.last_stats().unwrap();
    assert_eq!(stats.layers, 4);
    assert_eq!(stats.plan.batch_count, 3);
    assert_eq!(stats.survivors_per_batch.len(), 3);

    assert_eq!(single.len(), 1);
    assert!(single[0].holes.is_empty());
    assert_eq!(canonical(&batched), canonical(&single));
    Ok(())
}

#[tokio::test]
async fn test_chunked_passes_match_wide_passes() -> Result<()> {
    let input = staircase(4);
    let wide = host_engine(EngineConfig::default());
    let chunked = host_engine(EngineConfig {
        workgroup_size: 8,
        max_workgroups: 4,
        ..EngineConfig::default()
    });
    let a = wide.union(&input).await?;
    let b = chunked.union(&input).await?;
    assert_eq!(canonical(&a), canonical(&b));
    Ok(())
}

#[tokio::test]
async fn test_union_keeps_input_holes() -> Result<()> {
    init_logging();
    let hole = vec![
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 3.0),
        Vec2::new(3.0, 3.0),
        Vec2::new(3.0, 1.0),
    ];
    let input = vec![
        Shape::rect(Vec2::ZERO, Vec2::splat(4.0)).with_hole(hole),
        Shape::rect(Vec2::new(10.0, 0.0), Vec2::new(11.0, 1.0)),
    ];
    let engine = host_engine(EngineConfig::default());
    let output = engine.union(&input).await?;

    assert_eq!(output.len(), 2);
    let framed: Vec<&Shape> = output.iter().filter(|shape| !shape.holes.is_empty()).collect();
    assert_eq!(framed.len(), 1);
    assert_relative_eq!(framed[0].bounds().unwrap().max.x, 4.0);
    assert_eq!(framed[0].holes[0].len(), 4);

    let stats = engine.last_stats().unwrap();
    assert_eq!(stats.holes, 1);
    assert_eq!(stats.holes_assigned, 1);
    Ok(())
}

#[tokio::test]
async fn test_frame_of_bars_unions_to_shape_with_hole() -> Result<()> {
    init_logging();
    let bars = vec![
        Shape::rect(Vec2::ZERO, Vec2::new(4.0, 1.0)),
        Shape::rect(Vec2::new(3.0, 0.0), Vec2::splat(4.0)),
        Shape::rect(Vec2::new(0.0, 3.0), Vec2::splat(4.0)),
        Shape::rect(Vec2::ZERO, Vec2::new(1.0, 4.0)),
    ];

    for config in [EngineConfig::default(), EngineConfig::default().with_max_layers(4)] {
        let engine = host_engine(config);
        let output = engine.union(&bars).await?;

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].holes.len(), 1);
        let area = output[0].signed_area() - signed_area(&output[0].holes[0]).abs();
        assert_relative_eq!(area, 12.0, epsilon = 1e-4);
        let hole_bounds = Bounds::from_points(output[0].holes[0].iter().copied()).unwrap();
        assert_relative_eq!(hole_bounds.min.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(hole_bounds.max.y, 3.0, epsilon = 1e-5);

        let stats = engine.last_stats().unwrap();
        assert_eq!(stats.holes_assigned, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_inner_reversed_loop_is_hole() -> Result<()> {
    // Outer CCW square with an enclosed CW loop, linked in pack order.
    let outer = vec![Vec2::ZERO, Vec2::new(4.0, 0.0), Vec2::splat(4.0), Vec2::new(0.0, 4.0)];
    let inner = vec![Vec2::ONE, Vec2::new(1.0, 3.0), Vec2::splat(3.0), Vec2::new(3.0, 1.0)];
    let pack = ShapePack::pack(&[Shape::new(outer).with_hole(inner)]);

    let mut extracted = ExtractedShapes::default();
    for i in 0..pack.line_count() {
        extracted.push(
            EdgeLink {
                id: i as u32,
                next: pack.successor(i) as u32,
            },
            pack.point(i),
        );
    }
    let formatted = format_new_shapes(&extracted, 10_000);
    assert_eq!(formatted.shapes.len(), 1);
    assert_eq!(formatted.holes.len(), 1);

    let (shapes, assigned) = assign_holes(&HostDevice::default(), formatted).await?;
    assert_eq!(assigned, 1);
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].holes.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_split_keeps_covered_edges() -> Result<()> {
    let input = vec![
        Shape::rect(Vec2::ZERO, Vec2::ONE),
        Shape::rect(Vec2::splat(0.5), Vec2::splat(1.5)),
    ];
    let engine = host_engine(EngineConfig::default());
    engine.union(&input).await?;
    let union_survivors: u32 = engine.last_stats().unwrap().survivors_per_batch.iter().sum();

    let split = engine.split(&input).await?;
    let stats = engine.last_stats().unwrap();
    let split_survivors: u32 = stats.survivors_per_batch.iter().sum();

    // every edge crossed once is cut in two and nothing is filtered
    assert_eq!(union_survivors, 8);
    assert_eq!(split_survivors, 12);
    assert_eq!(stats.mode, polyforge::PassMode::Split);
    assert!(!split.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_intersection_points_of_staircase() -> Result<()> {
    let engine = host_engine(EngineConfig::default());
    let points = engine.intersection(&staircase(3)).await?;
    // two crossings per overlapping neighbour pair
    assert_eq!(points.len(), 4);
    let expected = [
        Vec2::new(0.7, 1.0),
        Vec2::new(1.0, 0.3),
        Vec2::new(1.4, 1.3),
        Vec2::new(1.7, 0.6),
    ];
    for target in expected {
        assert!(
            points.iter().any(|p| p.distance(target) < 1e-4),
            "missing crossing {:?} in {:?}",
            target,
            points
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_oversized_input_is_rejected() {
    // 300 lines need a 512-wide row; a 4-layer base only holds 256 cells
    let input: Geometry = (0..75)
        .map(|i| Shape::square(Vec2::new(3.0 * i as f32, 0.0), 1.0))
        .collect();
    let engine = host_engine(EngineConfig::default().with_max_layers(4));
    let err = engine.union(&input).await.unwrap_err();
    assert!(matches!(err, PolyError::BufferContractViolation(_)));
}

#[tokio::test]
async fn test_union_many_matches_individual_unions() -> Result<()> {
    let engine = host_engine(EngineConfig::default());
    for n in [1usize, 2, 5] {
        let inputs: Vec<Geometry> = (0..n).map(|i| staircase(2 + i % 3)).collect();
        let batched = engine.union_many(&inputs).await?;
        assert_eq!(batched.len(), n);
        for (input, result) in inputs.iter().zip(&batched) {
            let single = engine.union(input).await?;
            assert_eq!(canonical(result), canonical(&single));
        }
    }
    Ok(())
}

#[test]
fn test_pyramid_top_counts_survivors() {
    let mut state = 0x2545_f491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    for layers in 4..=7 {
        let mut pyramid = HostPyramid::new(PyramidLayout { layers });
        for cell in pyramid.base.iter_mut() {
            let value = match next() % 4 {
                0 => -10.0,
                1 => (next() % 1000) as f32 / 1000.0,
                2 => 1.0,
                _ => 0.5,
            };
            let angle = if next() % 5 == 0 { 20.0 } else { 1.0 };
            *cell = [angle, value];
        }
        let expected = pyramid.base.iter().filter(|&&cell| is_survivor(cell)).count() as u32;
        assert_eq!(pyramid.build(), expected, "layers {}", layers);
        if expected > 0 {
            let last = pyramid.traverse(expected - 1).unwrap();
            assert!(is_survivor(pyramid.base[last as usize]));
        }
        assert_eq!(pyramid.traverse(expected), None);
    }
}

#[test]
fn test_pack_sentinels_match_shape_lengths() {
    let geometry = staircase(3);
    let pack = ShapePack::pack(&geometry);
    assert_eq!(pack.line_count(), 12);
    assert_eq!(pack.loop_lengths(), vec![4, 4, 4]);
    let sentinels: Vec<usize> = (0..pack.line_count()).filter(|&i| pack.shape_info[i] < 0).collect();
    assert_eq!(sentinels, vec![3, 7, 11]);
    assert_eq!(pack.shape_of(7), 1);
}
