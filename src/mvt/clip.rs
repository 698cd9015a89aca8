//! Clipping of tile-local geometry to the buffered tile square.
use geo::{coord, Coord};

/// Axis aligned square `[min, max]` on both axes, in tile extent units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipBox {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Copy, Debug)]
enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

impl ClipBox {
    /// The tile square `[0, extent]` grown by `buffer` units on each side.
    pub fn new(extent: u32, buffer: f64) -> ClipBox {
        ClipBox {
            min: -buffer,
            max: f64::from(extent) + buffer,
        }
    }

    pub fn contains(&self, c: Coord<f64>) -> bool {
        c.x >= self.min && c.x <= self.max && c.y >= self.min && c.y <= self.max
    }

    /// Liang-Barsky clipping of the segment `a -> b`. Clipped ends are snapped
    /// onto the edge they were cut at.
    fn segment(&self, a: Coord<f64>, b: Coord<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let mut t0 = 0.0_f64;
        let mut t1 = 1.0_f64;
        let mut cut0 = None;
        let mut cut1 = None;

        for (p, q, edge) in [
            (-dx, a.x - self.min, Edge::Left),
            (dx, self.max - a.x, Edge::Right),
            (-dy, a.y - self.min, Edge::Top),
            (dy, self.max - a.y, Edge::Bottom),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }

            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                if r > t0 {
                    t0 = r;
                    cut0 = Some(edge);
                }
            } else {
                if r < t0 {
                    return None;
                }
                if r < t1 {
                    t1 = r;
                    cut1 = Some(edge);
                }
            }
        }

        // Unclipped ends are passed through untouched so that pieces chain up exactly
        let start = match cut0 {
            Some(edge) => edge.snap(coord! { x: a.x + t0 * dx, y: a.y + t0 * dy }, self),
            None => a,
        };
        let end = match cut1 {
            Some(edge) => edge.snap(coord! { x: a.x + t1 * dx, y: a.y + t1 * dy }, self),
            None => b,
        };
        Some((start, end))
    }
}

impl Edge {
    const ALL: [Edge; 4] = [Edge::Left, Edge::Right, Edge::Top, Edge::Bottom];

    fn inside(self, c: Coord<f64>, clip: &ClipBox) -> bool {
        match self {
            Edge::Left => c.x >= clip.min,
            Edge::Right => c.x <= clip.max,
            Edge::Top => c.y >= clip.min,
            Edge::Bottom => c.y <= clip.max,
        }
    }

    fn snap(self, c: Coord<f64>, clip: &ClipBox) -> Coord<f64> {
        match self {
            Edge::Left => coord! { x: clip.min, y: c.y },
            Edge::Right => coord! { x: clip.max, y: c.y },
            Edge::Top => coord! { x: c.x, y: clip.min },
            Edge::Bottom => coord! { x: c.x, y: clip.max },
        }
    }

    fn intersect(self, a: Coord<f64>, b: Coord<f64>, clip: &ClipBox) -> Coord<f64> {
        match self {
            Edge::Left | Edge::Right => {
                let x = if matches!(self, Edge::Left) { clip.min } else { clip.max };
                let t = (x - a.x) / (b.x - a.x);
                coord! { x: x, y: a.y + t * (b.y - a.y) }
            }
            Edge::Top | Edge::Bottom => {
                let y = if matches!(self, Edge::Top) { clip.min } else { clip.max };
                let t = (y - a.y) / (b.y - a.y);
                coord! { x: a.x + t * (b.x - a.x), y: y }
            }
        }
    }
}

/// Clips a line string, returning the pieces that lie within the box.
pub fn clip_line(points: &[Coord<f64>], clip: &ClipBox) -> Vec<Vec<Coord<f64>>> {
    fn flush(pieces: &mut Vec<Vec<Coord<f64>>>, current: &mut Vec<Coord<f64>>) {
        if current.len() >= 2 {
            pieces.push(std::mem::take(current));
        } else {
            current.clear();
        }
    }

    let mut pieces = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        match clip.segment(a, b) {
            Some((start, end)) => {
                if current.last() != Some(&start) {
                    flush(&mut pieces, &mut current);
                    current.push(start);
                }
                current.push(end);
                if end != b {
                    flush(&mut pieces, &mut current);
                }
            }
            None => flush(&mut pieces, &mut current),
        }
    }
    flush(&mut pieces, &mut current);

    pieces
}

/// Sutherland-Hodgman clipping of a polygon ring. The result is an open ring
/// (the closing point is not repeated) and may be empty.
pub fn clip_ring(ring: &[Coord<f64>], clip: &ClipBox) -> Vec<Coord<f64>> {
    let mut output: Vec<Coord<f64>> = ring.to_vec();
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }

    for edge in Edge::ALL {
        let input = std::mem::take(&mut output);
        let Some(&last) = input.last() else {
            break;
        };

        let mut previous = last;
        for &current in &input {
            let current_inside = edge.inside(current, clip);
            if current_inside {
                if !edge.inside(previous, clip) {
                    output.push(edge.intersect(previous, current, clip));
                }
                output.push(current);
            } else if edge.inside(previous, clip) {
                output.push(edge.intersect(previous, current, clip));
            }
            previous = current;
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord<f64> {
        coord! { x: x, y: y }
    }

    const BOX: ClipBox = ClipBox { min: 0.0, max: 10.0 };

    #[test]
    fn test_line_inside_is_untouched() {
        let line = vec![c(1.0, 1.0), c(5.0, 5.0), c(9.0, 1.0)];
        assert_eq!(vec![line.clone()], clip_line(&line, &BOX));
    }

    #[test]
    fn test_line_crossing_the_box() {
        let line = vec![c(-5.0, 5.0), c(15.0, 5.0)];
        assert_eq!(vec![vec![c(0.0, 5.0), c(10.0, 5.0)]], clip_line(&line, &BOX));
    }

    #[test]
    fn test_line_leaving_and_reentering_is_split() {
        let line = vec![c(2.0, 2.0), c(2.0, 20.0), c(8.0, 20.0), c(8.0, 2.0)];
        let pieces = clip_line(&line, &BOX);

        assert_eq!(
            vec![
                vec![c(2.0, 2.0), c(2.0, 10.0)],
                vec![c(8.0, 10.0), c(8.0, 2.0)],
            ],
            pieces
        );
    }

    #[test]
    fn test_line_outside_is_dropped() {
        let line = vec![c(-5.0, -5.0), c(-1.0, 20.0)];
        assert!(clip_line(&line, &BOX).is_empty());
    }

    #[test]
    fn test_ring_crossing_the_box() {
        let ring = vec![c(5.0, 5.0), c(15.0, 5.0), c(15.0, 8.0), c(5.0, 8.0), c(5.0, 5.0)];
        let clipped = clip_ring(&ring, &BOX);

        assert_eq!(4, clipped.len());
        assert!(clipped.iter().all(|p| BOX.contains(*p)));
        assert!(clipped.contains(&c(10.0, 5.0)));
        assert!(clipped.contains(&c(10.0, 8.0)));
    }

    #[test]
    fn test_ring_covering_the_box_becomes_the_box() {
        let ring = vec![c(-5.0, -5.0), c(20.0, -5.0), c(20.0, 20.0), c(-5.0, 20.0), c(-5.0, -5.0)];
        let clipped = clip_ring(&ring, &BOX);

        assert_eq!(4, clipped.len());
        for corner in [c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0), c(0.0, 10.0)] {
            assert!(clipped.contains(&corner));
        }
    }

    #[test]
    fn test_ring_outside_is_empty() {
        let ring = vec![c(20.0, 20.0), c(30.0, 20.0), c(30.0, 30.0), c(20.0, 20.0)];
        assert!(clip_ring(&ring, &BOX).is_empty());
    }
}
