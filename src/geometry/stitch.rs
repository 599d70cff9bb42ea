use super::Position;

/// Concatenates line segments into one vertex sequence.
///
/// When a segment starts at the very vertex the accumulated path ends on, that
/// leading vertex is dropped so the connecting point appears once. Only the
/// immediate boundary is inspected; the rest of the path is left untouched.
/// Empty segments are ignored.
pub fn stitch_segments<'a, I>(segments: I) -> Vec<Position>
where
    I: IntoIterator<Item = &'a [Position]>,
{
    let mut path: Vec<Position> = Vec::new();
    for segment in segments {
        let Some(first) = segment.first() else {
            continue;
        };
        let skip = match path.last() {
            Some(last) if last == first => 1,
            _ => 0,
        };
        path.extend_from_slice(&segment[skip..]);
    }
    path
}

/// Whether each segment's last vertex equals the next segment's first vertex.
pub fn is_contiguous<'a, I>(segments: I) -> bool
where
    I: IntoIterator<Item = &'a [Position]>,
{
    let segments: Vec<&[Position]> = segments.into_iter().collect();
    segments
        .windows(2)
        .all(|pair| match (pair[0].last(), pair[1].first()) {
            (Some(end), Some(start)) => end == start,
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Position = [103.80, 1.30];
    const B: Position = [103.81, 1.31];
    const V: Position = [103.82, 1.32];
    const C: Position = [103.83, 1.33];
    const D: Position = [103.84, 1.34];

    #[test]
    fn shared_boundary_vertex_appears_once() {
        let first = vec![A, B, V];
        let second = vec![V, C, D];
        let path = stitch_segments([first.as_slice(), second.as_slice()]);
        assert_eq!(path, vec![A, B, V, C, D]);
        assert_eq!(path.iter().filter(|p| **p == V).count(), 1);
    }

    #[test]
    fn restitching_is_idempotent() {
        let first = vec![A, B, V];
        let second = vec![V, C, D];
        let once = stitch_segments([first.as_slice(), second.as_slice()]);
        let twice = stitch_segments([once.as_slice()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn disjoint_segments_are_kept_whole() {
        let first = vec![A, B];
        let second = vec![C, D];
        let path = stitch_segments([first.as_slice(), second.as_slice()]);
        assert_eq!(path, vec![A, B, C, D]);
    }

    #[test]
    fn only_the_adjacent_boundary_is_deduplicated() {
        // A path revisiting an earlier vertex keeps it.
        let first = vec![A, B];
        let second = vec![B, A, C];
        let path = stitch_segments([first.as_slice(), second.as_slice()]);
        assert_eq!(path, vec![A, B, A, C]);
    }

    #[test]
    fn empty_segments_are_skipped() {
        let first = vec![A, V];
        let empty: Vec<Position> = vec![];
        let second = vec![V, D];
        let path = stitch_segments([first.as_slice(), empty.as_slice(), second.as_slice()]);
        assert_eq!(path, vec![A, V, D]);
    }

    #[test]
    fn contiguity() {
        let first = vec![A, V];
        let second = vec![V, C];
        let third = vec![D, A];
        assert!(is_contiguous([first.as_slice(), second.as_slice()]));
        assert!(!is_contiguous([first.as_slice(), second.as_slice(), third.as_slice()]));
        assert!(is_contiguous([first.as_slice()]));
    }
}
