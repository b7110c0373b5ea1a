//! Reference MLAA fragment kernels.
//!
//! Same math as the techniques in `shaders/mlaa.wgsl`, evaluated per pixel on
//! the CPU. Edge map: `r` marks an edge on the left border of the pixel, `g` on
//! its top border. Blend map: `xy` are the weights of the top edge, `zw` those
//! of the left edge.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::program::FragmentContext;
use crate::shader::params;

const LUMA_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Depth deltas are an order of magnitude smaller than color deltas
const DEPTH_THRESHOLD_SCALE: f32 = 0.1;

fn step(edge: Vec2, x: Vec2) -> Vec2 {
    Vec2::new(
        if x.x >= edge.x { 1.0 } else { 0.0 },
        if x.y >= edge.y { 1.0 } else { 0.0 },
    )
}

/// Edge output, discarding pixels without any edge
fn edges_or_discard(edges: Vec2) -> Option<Vec4> {
    if edges.x + edges.y == 0.0 {
        None
    } else {
        Some(Vec4::new(edges.x, edges.y, 0.0, 0.0))
    }
}

fn neighbors(ctx: &FragmentContext, uv: Vec2) -> [Vec2; 3] {
    let p = ctx.pixel_size();
    [uv, uv - Vec2::new(p.x, 0.0), uv - Vec2::new(0.0, p.y)]
}

pub fn luma_edge_detection(ctx: &FragmentContext, uv: Vec2) -> Option<Vec4> {
    let [center, left, top] =
        neighbors(ctx, uv).map(|at| ctx.sample_point(params::COLOR_TEX, at).xyz().dot(LUMA_WEIGHTS));
    let delta = Vec2::new((center - left).abs(), (center - top).abs());
    let threshold = Vec2::splat(ctx.float(params::THRESHOLD));
    edges_or_discard(step(threshold, delta))
}

pub fn color_edge_detection(ctx: &FragmentContext, uv: Vec2) -> Option<Vec4> {
    let [center, left, top] =
        neighbors(ctx, uv).map(|at| ctx.sample_point(params::COLOR_TEX, at).xyz());
    let delta = Vec2::new((center - left).abs().max_element(), (center - top).abs().max_element());
    let threshold = Vec2::splat(ctx.float(params::THRESHOLD));
    edges_or_discard(step(threshold, delta))
}

pub fn depth_edge_detection(ctx: &FragmentContext, uv: Vec2) -> Option<Vec4> {
    let [center, left, top] = neighbors(ctx, uv).map(|at| ctx.sample_point(params::DEPTH_TEX, at).x);
    let delta = Vec2::new((center - left).abs(), (center - top).abs());
    let threshold = Vec2::splat(ctx.float(params::THRESHOLD) * DEPTH_THRESHOLD_SCALE);
    edges_or_discard(step(threshold, delta))
}

/// Steps the edge walk may take, bounded by `maxSearchSteps` and by the first
/// search-table texel below one half.
fn search_limit(ctx: &FragmentContext) -> u32 {
    let max_steps = ctx.float(params::MAX_SEARCH_STEPS).max(0.0).round() as u32;
    let Some(table) = ctx.texture(params::SEARCH_TEX) else {
        return max_steps;
    };
    let last = table.width() - 1;
    (1..=max_steps)
        .take_while(|&k| table.texel((k - 1).min(last), 0).x >= 0.5)
        .count() as u32
}

/// Edge-map value at `uv`; off-target reads are edge-free
fn edge_at(ctx: &FragmentContext, uv: Vec2) -> Vec4 {
    if ctx.in_bounds(uv) {
        ctx.sample_point(params::EDGES_TEX, uv)
    } else {
        Vec4::ZERO
    }
}

/// Number of consecutive pixels past `uv` in direction `dir` whose `channel`
/// still carries the edge
fn search(ctx: &FragmentContext, uv: Vec2, dir: Vec2, channel: usize, limit: u32) -> u32 {
    let mut distance = 0;
    while distance < limit {
        let next = uv + dir * (distance + 1) as f32;
        if !ctx.in_bounds(next) || ctx.sample_point(params::EDGES_TEX, next)[channel] < 0.5 {
            break;
        }
        distance += 1;
    }
    distance
}

/// Crossing pattern at the end of an edge: 0, 1, 3 or 4
fn crossing(current: f32, other: f32) -> f32 {
    (4.0 * (0.75 * current + 0.25 * other)).round()
}

/// Coverage weights for an edge of length `distance` with crossings `pattern`
fn area(ctx: &FragmentContext, pattern: Vec2, distance: Vec2) -> Vec2 {
    let Some(table) = ctx.texture(params::AREA_TEX) else {
        return Vec2::ZERO;
    };
    let per_pattern = (table.width() / 5).max(1) as f32;
    let d = distance.min(Vec2::splat(per_pattern - 1.0));
    let coords = per_pattern * pattern + d;
    let max = Vec2::new(table.width() as f32 - 1.0, table.height() as f32 - 1.0);
    let coords = coords.min(max);
    let texel = table.texel(coords.x as u32, coords.y as u32);
    Vec2::new(texel.x, texel.w)
}

pub fn blend_weight_calculation(ctx: &FragmentContext, uv: Vec2) -> Option<Vec4> {
    let e = edge_at(ctx, uv);
    if e.x <= 0.5 && e.y <= 0.5 {
        return None;
    }

    let p = ctx.pixel_size();
    let limit = search_limit(ctx);
    let mut areas = Vec4::ZERO;

    if e.y > 0.5 {
        // Top edge: walk left and right along g
        let left = search(ctx, uv, Vec2::new(-p.x, 0.0), 1, limit);
        let right = search(ctx, uv, Vec2::new(p.x, 0.0), 1, limit);

        let left_end = uv - Vec2::new(left as f32 * p.x, 0.0);
        let right_end = uv + Vec2::new((right + 1) as f32 * p.x, 0.0);
        let above = Vec2::new(0.0, p.y);
        let pattern = Vec2::new(
            crossing(edge_at(ctx, left_end).x, edge_at(ctx, left_end - above).x),
            crossing(edge_at(ctx, right_end).x, edge_at(ctx, right_end - above).x),
        );
        let weights = area(ctx, pattern, Vec2::new(left as f32, right as f32));
        areas.x = weights.x;
        areas.y = weights.y;
    }

    if e.x > 0.5 {
        // Left edge: walk up and down along r
        let up = search(ctx, uv, Vec2::new(0.0, -p.y), 0, limit);
        let down = search(ctx, uv, Vec2::new(0.0, p.y), 0, limit);

        let top_end = uv - Vec2::new(0.0, up as f32 * p.y);
        let bottom_end = uv + Vec2::new(0.0, (down + 1) as f32 * p.y);
        let beside = Vec2::new(p.x, 0.0);
        let pattern = Vec2::new(
            crossing(edge_at(ctx, top_end).y, edge_at(ctx, top_end - beside).y),
            crossing(edge_at(ctx, bottom_end).y, edge_at(ctx, bottom_end - beside).y),
        );
        let weights = area(ctx, pattern, Vec2::new(up as f32, down as f32));
        areas.z = weights.x;
        areas.w = weights.y;
    }

    Some(areas)
}

/// Blend-map value at `uv`; off-target reads carry no weight
fn blend_at(ctx: &FragmentContext, uv: Vec2) -> Vec4 {
    if ctx.in_bounds(uv) {
        ctx.sample_point(params::BLEND_TEX, uv)
    } else {
        Vec4::ZERO
    }
}

pub fn neighborhood_blending(ctx: &FragmentContext, uv: Vec2) -> Option<Vec4> {
    let p = ctx.pixel_size();
    let here = blend_at(ctx, uv);
    let below = blend_at(ctx, uv + Vec2::new(0.0, p.y)).y;
    let right = blend_at(ctx, uv + Vec2::new(p.x, 0.0)).w;

    // Weights towards the pixel above, below, left and right
    let a = Vec4::new(here.x, below, here.z, right);
    let sum = a.x + a.y + a.z + a.w;
    if sum <= 0.0 {
        return Some(ctx.sample_linear(params::COLOR_TEX, uv));
    }

    let o = a * Vec4::new(p.y, p.y, p.x, p.x);
    let mut color = ctx.sample_linear(params::COLOR_TEX, uv + Vec2::new(0.0, -o.x)) * a.x;
    color += ctx.sample_linear(params::COLOR_TEX, uv + Vec2::new(0.0, o.y)) * a.y;
    color += ctx.sample_linear(params::COLOR_TEX, uv + Vec2::new(-o.z, 0.0)) * a.z;
    color += ctx.sample_linear(params::COLOR_TEX, uv + Vec2::new(o.w, 0.0)) * a.w;
    Some(color / sum)
}
