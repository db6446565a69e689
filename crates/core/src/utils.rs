//! Geometric primitives shared across the engine.
//!
//! Provides the Point/Rect/Matrix tuple types and the affine transform
//! helpers used by the content preprocessor, the evaluator, and the page
//! geometry code.

/// A 2D point (x, y).
pub type Point = (f64, f64);

/// A rectangle defined by (x0, y0, x1, y1) where (x0, y0) is typically
/// bottom-left and (x1, y1) is top-right.
pub type Rect = (f64, f64, f64, f64);

/// A 6-element affine transformation matrix (a, b, c, d, e, f).
/// Transforms point (x, y) to (ax + cy + e, bx + dy + f).
pub type Matrix = (f64, f64, f64, f64, f64, f64);

/// Identity transformation matrix.
pub const MATRIX_IDENTITY: Matrix = (1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

/// Multiplies two matrices: result = m1 * m0.
/// This applies m0 first, then m1.
pub fn mult_matrix(m1: Matrix, m0: Matrix) -> Matrix {
    let (a1, b1, c1, d1, e1, f1) = m1;
    let (a0, b0, c0, d0, e0, f0) = m0;
    (
        a0 * a1 + c0 * b1,
        b0 * a1 + d0 * b1,
        a0 * c1 + c0 * d1,
        b0 * c1 + d0 * d1,
        a0 * e1 + c0 * f1 + e0,
        b0 * e1 + d0 * f1 + f0,
    )
}

/// Translates a matrix by (x, y) inside the projection.
///
/// The matrix is changed so that its origin is at the specified point in its
/// own coordinate system, not in the original coordinate system.
pub fn translate_matrix(m: Matrix, v: Point) -> Matrix {
    let (a, b, c, d, e, f) = m;
    let (x, y) = v;
    (a, b, c, d, x * a + y * c + e, x * b + y * d + f)
}

/// Applies a matrix to a point.
pub fn apply_matrix_pt(m: Matrix, v: Point) -> Point {
    let (a, b, c, d, e, f) = m;
    let (x, y) = v;
    (a * x + c * y + e, b * x + d * y + f)
}

/// Applies a matrix to a rectangle.
///
/// The result is not a rotated rectangle but the axis-aligned rectangle that
/// tightly fits the transformed corners.
pub fn apply_matrix_rect(m: Matrix, rect: Rect) -> Rect {
    let (x0, y0, x1, y1) = rect;
    let (ax, ay) = apply_matrix_pt(m, (x0, y0));
    let (bx, by) = apply_matrix_pt(m, (x1, y0));
    let (cx, cy) = apply_matrix_pt(m, (x1, y1));
    let (dx, dy) = apply_matrix_pt(m, (x0, y1));
    (
        ax.min(bx).min(cx).min(dx),
        ay.min(by).min(cy).min(dy),
        ax.max(bx).max(cx).max(dx),
        ay.max(by).max(cy).max(dy),
    )
}

/// Intersects two rectangles. Returns `None` when the intersection is empty
/// or degenerate (zero width or height).
pub fn intersect_rect(a: Rect, b: Rect) -> Option<Rect> {
    let x0 = a.0.max(b.0);
    let y0 = a.1.max(b.1);
    let x1 = a.2.min(b.2);
    let y1 = a.3.min(b.3);
    if x0 < x1 && y0 < y1 {
        Some((x0, y0, x1, y1))
    } else {
        None
    }
}

/// Open-interval overlap test between two rectangles.
///
/// Two rectangles do NOT overlap when one's left edge is at or past the
/// other's right edge, or one's bottom edge is at or past the other's top
/// edge. Touching edges therefore do not count as overlap.
pub fn rects_overlap(a: Rect, b: Rect) -> bool {
    !(a.0 >= b.2 || b.0 >= a.2 || a.1 >= b.3 || b.1 >= a.3)
}

/// Normalizes a rectangle so x0 <= x1 and y0 <= y1.
pub fn normalize_rect(r: Rect) -> Rect {
    (r.0.min(r.2), r.1.min(r.3), r.0.max(r.2), r.1.max(r.3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mult_matrix_identity() {
        let m = (2.0, 0.0, 0.0, 2.0, 10.0, 20.0);
        assert_eq!(mult_matrix(MATRIX_IDENTITY, m), m);
        assert_eq!(mult_matrix(m, MATRIX_IDENTITY), m);
    }

    #[test]
    fn test_mult_matrix_order() {
        // Scale by 2 applied first, then translate by (5, 7).
        let translate = (1.0, 0.0, 0.0, 1.0, 5.0, 7.0);
        let scale = (2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let m = mult_matrix(translate, scale);
        assert_eq!(apply_matrix_pt(m, (1.0, 1.0)), (12.0, 16.0));
    }

    #[test]
    fn test_apply_matrix_rect_rotation() {
        // 90 degree rotation maps (0,0,2,1) onto (-1,0,0,2).
        let rot = (0.0, 1.0, -1.0, 0.0, 0.0, 0.0);
        let r = apply_matrix_rect(rot, (0.0, 0.0, 2.0, 1.0));
        assert_eq!(r, (-1.0, 0.0, 0.0, 2.0));
    }

    #[test]
    fn test_intersect_rect() {
        assert_eq!(
            intersect_rect((0.0, 0.0, 10.0, 10.0), (5.0, 5.0, 15.0, 15.0)),
            Some((5.0, 5.0, 10.0, 10.0))
        );
        // Disjoint and touching-edge intersections are both degenerate.
        assert_eq!(intersect_rect((0.0, 0.0, 1.0, 1.0), (2.0, 2.0, 3.0, 3.0)), None);
        assert_eq!(intersect_rect((0.0, 0.0, 1.0, 1.0), (1.0, 0.0, 2.0, 1.0)), None);
    }

    #[test]
    fn test_rects_overlap_open() {
        assert!(rects_overlap((0.0, 0.0, 10.0, 10.0), (5.0, 5.0, 15.0, 15.0)));
        assert!(!rects_overlap((0.0, 0.0, 10.0, 10.0), (20.0, 20.0, 30.0, 30.0)));
        // Shared edge only: not an overlap.
        assert!(!rects_overlap((0.0, 0.0, 10.0, 10.0), (10.0, 0.0, 20.0, 10.0)));
    }
}
