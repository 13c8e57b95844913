// src/geometry.rs
//
// Geometry primitives shared by the zone classifier and the trackers.
// Coordinates are pixel-space f64 throughout; boxes are [x1, y1, x2, y2].

use tracing::debug;

/// Result of a point-in-polygon test. Boundary counts as inside
/// (distance 0.0); inside points have positive distance.
#[derive(Debug, Clone, Copy)]
pub struct PointTest {
    pub inside: bool,
    pub signed_distance: f64,
}

/// Ray-casting point-in-polygon test with signed distance to the nearest
/// edge (positive inside, negative outside).
pub fn point_in_polygon(point: [f64; 2], polygon: &[[f64; 2]]) -> PointTest {
    if polygon.len() < 3 {
        return PointTest {
            inside: false,
            signed_distance: f64::NEG_INFINITY,
        };
    }

    let [px, py] = point;
    let mut inside = false;
    let mut min_dist = f64::INFINITY;

    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];

        // Edge crossing test for the horizontal ray from `point`
        if (yi > py) != (yj > py) {
            let x_cross = xj + (py - yj) / (yi - yj) * (xi - xj);
            if px < x_cross {
                inside = !inside;
            }
        }

        min_dist = min_dist.min(point_segment_distance(point, polygon[i], polygon[j]));
        j = i;
    }

    // On-boundary points report distance 0 and count as inside
    if min_dist < f64::EPSILON {
        return PointTest {
            inside: true,
            signed_distance: 0.0,
        };
    }

    PointTest {
        inside,
        signed_distance: if inside { min_dist } else { -min_dist },
    }
}

fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let [px, py] = p;
    let [ax, ay] = a;
    let [bx, by] = b;
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Approximate intersection area of two polygons by rasterizing both onto a
/// shared pixel grid and counting pixels covered by both. Adequate for
/// pixel-scale parking zones; degenerate inputs yield 0.0.
pub fn polygon_intersection_area(
    poly_a: &[[f64; 2]],
    poly_b: &[[f64; 2]],
    mask_width: usize,
    mask_height: usize,
) -> f64 {
    if poly_a.len() < 3 || poly_b.len() < 3 {
        debug!(
            "Degenerate polygon in intersection ({} / {} vertices), treating as no overlap",
            poly_a.len(),
            poly_b.len()
        );
        return 0.0;
    }

    let mut overlap = 0u64;
    let mut spans_a = Vec::new();
    let mut spans_b = Vec::new();

    for row in 0..mask_height {
        let y = row as f64 + 0.5;
        scanline_spans(poly_a, y, mask_width, &mut spans_a);
        if spans_a.is_empty() {
            continue;
        }
        scanline_spans(poly_b, y, mask_width, &mut spans_b);

        for &(a0, a1) in &spans_a {
            for &(b0, b1) in &spans_b {
                let lo = a0.max(b0);
                let hi = a1.min(b1);
                if hi > lo {
                    overlap += (hi - lo) as u64;
                }
            }
        }
    }

    overlap as f64
}

/// Pixel spans [start, end) covered by `polygon` on the scanline at `y`,
/// even-odd rule, clipped to [0, width).
fn scanline_spans(polygon: &[[f64; 2]], y: f64, width: usize, spans: &mut Vec<(usize, usize)>) {
    spans.clear();
    let mut crossings: Vec<f64> = Vec::new();

    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];
        if (yi > y) != (yj > y) {
            crossings.push(xj + (y - yj) / (yi - yj) * (xi - xj));
        }
        j = i;
    }

    crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    for pair in crossings.chunks_exact(2) {
        let start = pair[0].max(0.0).round() as usize;
        let end = (pair[1].min(width as f64).round() as usize).max(start);
        if end > start {
            spans.push((start, end));
        }
    }
}

/// Exact polygon area (shoelace formula).
pub fn polygon_area(polygon: &[[f64; 2]]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        sum += polygon[j][0] * polygon[i][1] - polygon[i][0] * polygon[j][1];
        j = i;
    }
    sum.abs() / 2.0
}

/// IoU of an axis-aligned box (as a quad) against an arbitrary polygon.
/// Intersection is raster-approximate; union uses the exact areas.
pub fn iou_with_polygon(
    bbox: &[f64; 4],
    bbox_area: f64,
    polygon: &[[f64; 2]],
    mask_width: usize,
    mask_height: usize,
) -> f64 {
    let [x1, y1, x2, y2] = *bbox;
    let quad = [[x1, y1], [x2, y1], [x2, y2], [x1, y2]];

    let intersection = polygon_intersection_area(&quad, polygon, mask_width, mask_height);
    if intersection <= 0.0 {
        return 0.0;
    }

    let union = bbox_area + polygon_area(polygon) - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Axis-aligned intersection-over-union. 0.0 for disjoint or degenerate boxes.
pub fn iou(box_a: &[f64; 4], box_b: &[f64; 4]) -> f64 {
    let x1 = box_a[0].max(box_b[0]);
    let y1 = box_a[1].max(box_b[1]);
    let x2 = box_a[2].min(box_b[2]);
    let y2 = box_a[3].min(box_b[3]);

    if x2 < x1 || y2 < y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (box_a[2] - box_a[0]) * (box_a[3] - box_a[1]);
    let area_b = (box_b[2] - box_b[0]) * (box_b[3] - box_b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
