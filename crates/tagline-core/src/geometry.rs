//! Geometry sampling and closest-point resolution.
//!
//! Given a stroke's native shape and its local→absolute transform, find the
//! point on the rendered outline nearest to an arbitrary absolute target.
//! Straight segments are projected exactly. Curves and paths are expanded
//! into a finite list of samples and the nearest sample wins; connector
//! endpoints do not need sub-sample precision.

use crate::model::{Geometry, Part};
use kurbo::{Affine, BezPath, Line, ParamCurve, PathEl, Point, Rect, Shape};

/// Sample density used by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDensity {
    /// Points taken along a standalone quadratic/cubic curve.
    pub curve: usize,
    /// Subdivisions per `LineTo` inside a path.
    pub path_line: usize,
    /// Subdivisions per curve command inside a path.
    pub path_curve: usize,
}

impl Default for SampleDensity {
    fn default() -> Self {
        Self {
            curve: 30,
            path_line: 5,
            path_curve: 10,
        }
    }
}

/// A stroke as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct StrokeShape<'a> {
    /// `None` when the drawing layer has no usable geometry for the stroke.
    pub geometry: Option<&'a Geometry>,
    /// Local → absolute, including any enclosing group transform.
    pub to_world: Affine,
    /// Absolute axis-aligned bounds, used when geometry is unusable.
    pub bounds: Rect,
}

// ─── Sampler ─────────────────────────────────────────────────────────────

/// Expand a shape into ordered absolute sample points.
pub fn sample(geometry: &Geometry, to_world: Affine, density: SampleDensity) -> Vec<Point> {
    let mut out = Vec::new();
    sample_into(geometry, to_world, density, &mut out);
    out
}

fn sample_into(geometry: &Geometry, to_world: Affine, density: SampleDensity, out: &mut Vec<Point>) {
    match geometry {
        Geometry::Segment(line) => sample_curve(line, density.path_line + 1, to_world, out),
        Geometry::Polyline(points) => out.extend(points.iter().map(|p| to_world * *p)),
        Geometry::Quad(quad) => sample_curve(quad, density.curve, to_world, out),
        Geometry::Cubic(cubic) => sample_curve(cubic, density.curve, to_world, out),
        Geometry::Path(path) => sample_path(path, to_world, density, out),
        Geometry::Compound(parts) => {
            for Part {
                transform,
                geometry,
            } in parts
            {
                sample_into(geometry, to_world * *transform, density, out);
            }
        }
    }
}

/// Evaluate `count` evenly spaced parameters over `[0, 1]`, endpoints included.
fn sample_curve<C: ParamCurve>(curve: &C, count: usize, to_world: Affine, out: &mut Vec<Point>) {
    match count {
        0 => {}
        1 => out.push(to_world * curve.eval(0.0)),
        n => {
            let last = (n - 1) as f64;
            out.extend((0..n).map(|i| to_world * curve.eval(i as f64 / last)));
        }
    }
}

fn sample_path(path: &BezPath, to_world: Affine, density: SampleDensity, out: &mut Vec<Point>) {
    let mut current = Point::ZERO;
    let mut subpath_start = Point::ZERO;
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => {
                out.push(to_world * p);
                current = p;
                subpath_start = p;
            }
            PathEl::LineTo(p) => {
                sample_curve(&Line::new(current, p), density.path_line + 1, to_world, out);
                current = p;
            }
            PathEl::QuadTo(c, p) => {
                let seg = kurbo::QuadBez::new(current, c, p);
                sample_curve(&seg, density.path_curve + 1, to_world, out);
                current = p;
            }
            PathEl::CurveTo(c1, c2, p) => {
                let seg = kurbo::CubicBez::new(current, c1, c2, p);
                sample_curve(&seg, density.path_curve + 1, to_world, out);
                current = p;
            }
            PathEl::ClosePath => {
                let seg = Line::new(current, subpath_start);
                sample_curve(&seg, density.path_line + 1, to_world, out);
                current = subpath_start;
            }
        }
    }
}

// ─── Resolver ────────────────────────────────────────────────────────────

/// Nearest point on the stroke's outline to `target` (absolute coordinates).
///
/// Never fails: shapes without usable geometry resolve against their
/// bounding box.
pub fn closest_point(shape: &StrokeShape<'_>, target: Point, density: SampleDensity) -> Point {
    let resolved = match shape.geometry {
        Some(Geometry::Segment(line)) => Some(project_onto_segment(
            shape.to_world * line.p0,
            shape.to_world * line.p1,
            target,
        )),
        Some(Geometry::Compound(parts)) => closest_in_group(parts, shape.to_world, target, density),
        Some(other) => closest_sample(&sample(other, shape.to_world, density), target),
        None => None,
    };

    resolved.unwrap_or_else(|| {
        log::warn!("closest_point: no usable geometry, using bounding box {:?}", shape.bounds);
        closest_on_bounds(shape.bounds, target)
    })
}

/// Compound strokes: project onto the group's segment in the group's own
/// frame, then map back. Groups without a segment fall back to sampling.
fn closest_in_group(
    parts: &[Part],
    to_world: Affine,
    target: Point,
    density: SampleDensity,
) -> Option<Point> {
    let segment = parts.iter().find_map(|part| match &part.geometry {
        Geometry::Segment(line) => Some((part.transform, *line)),
        _ => None,
    });

    if let Some((part_transform, line)) = segment
        && to_world.determinant().abs() > f64::EPSILON
    {
        let local_target = to_world.inverse() * target;
        let local = project_onto_segment(
            part_transform * line.p0,
            part_transform * line.p1,
            local_target,
        );
        return Some(to_world * local);
    }

    let mut samples = Vec::new();
    for part in parts {
        sample_into(&part.geometry, to_world * part.transform, density, &mut samples);
    }
    closest_sample(&samples, target)
}

/// Orthogonal projection of `target` onto segment `a`–`b`, clamped to the
/// endpoints. A zero-length segment resolves to `a`.
pub fn project_onto_segment(a: Point, b: Point, target: Point) -> Point {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq == 0.0 {
        return a;
    }
    let t = (target - a).dot(ab) / len_sq;
    if t < 0.0 {
        a
    } else if t > 1.0 {
        b
    } else {
        a + ab * t
    }
}

/// Nearest of `points` to `target`. Ties keep the earliest sample.
pub fn closest_sample(points: &[Point], target: Point) -> Option<Point> {
    let (first, rest) = points.split_first()?;
    let mut best = *first;
    let mut best_dist = first.distance_squared(target);
    for p in rest {
        let d = p.distance_squared(target);
        if d < best_dist {
            best = *p;
            best_dist = d;
        }
    }
    Some(best)
}

/// Nearest of the four edge midpoints of `bounds`.
pub fn closest_on_bounds(bounds: Rect, target: Point) -> Point {
    let center = bounds.center();
    let edges = [
        Point::new(bounds.x0, center.y),
        Point::new(bounds.x1, center.y),
        Point::new(center.x, bounds.y0),
        Point::new(center.x, bounds.y1),
    ];
    closest_sample(&edges, target).unwrap_or(center)
}

// ─── Bounds ──────────────────────────────────────────────────────────────

/// Axis-aligned bounds of a shape in its own frame. Empty shapes give
/// `Rect::ZERO`.
pub fn local_bounds(geometry: &Geometry) -> Rect {
    match geometry {
        Geometry::Segment(line) => Shape::bounding_box(line),
        Geometry::Polyline(points) => match points.split_first() {
            Some((first, rest)) => rest
                .iter()
                .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p)),
            None => Rect::ZERO,
        },
        Geometry::Quad(quad) => Shape::bounding_box(quad),
        Geometry::Cubic(cubic) => Shape::bounding_box(cubic),
        Geometry::Path(path) => Shape::bounding_box(path),
        Geometry::Compound(parts) => parts
            .iter()
            .map(|part| part.transform.transform_rect_bbox(local_bounds(&part.geometry)))
            .reduce(|a, b| a.union(b))
            .unwrap_or(Rect::ZERO),
    }
}
