use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub(crate) fn distance_sq(self, other: TilePos) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        dx * dx + dy * dy
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned tile rectangle, inclusive on both corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    min: TilePos,
    max: TilePos,
}

impl TileRect {
    /// Builds the rectangle spanned by two opposite corners in any order.
    pub fn spanning(a: TilePos, b: TilePos) -> Self {
        Self {
            min: TilePos::new(a.x.min(b.x), a.y.min(b.y)),
            max: TilePos::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Rectangle of `width` x `height` tiles whose top-left tile is `origin`.
    /// Returns `None` for an empty extent.
    pub fn from_origin(origin: TilePos, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = (origin.x as i64 + width as i64 - 1).min(i32::MAX as i64) as i32;
        let max_y = (origin.y as i64 + height as i64 - 1).min(i32::MAX as i64) as i32;
        Some(Self {
            min: origin,
            max: TilePos::new(max_x, max_y),
        })
    }

    pub fn min(&self) -> TilePos {
        self.min
    }

    pub fn max(&self) -> TilePos {
        self.max
    }

    pub fn width(&self) -> u64 {
        (self.max.x as i64 - self.min.x as i64 + 1) as u64
    }

    pub fn height(&self) -> u64 {
        (self.max.y as i64 - self.min.y as i64 + 1) as u64
    }

    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }

    pub fn is_on_perimeter(&self, pos: TilePos) -> bool {
        self.contains(pos)
            && (pos.x == self.min.x
                || pos.x == self.max.x
                || pos.y == self.min.y
                || pos.y == self.max.y)
    }

    /// Column-major walk: every y of the leftmost column first, then the next column.
    pub fn positions(&self) -> impl Iterator<Item = TilePos> {
        let (min, max) = (self.min, self.max);
        (min.x..=max.x).flat_map(move |x| (min.y..=max.y).map(move |y| TilePos::new(x, y)))
    }

    /// Row-major walk, used for rectangle placement requests.
    pub fn positions_row_major(&self) -> impl Iterator<Item = TilePos> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| TilePos::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanning_normalizes_corner_order() {
        let rect = TileRect::spanning(TilePos::new(5, -1), TilePos::new(2, 3));
        assert_eq!(rect.min(), TilePos::new(2, -1));
        assert_eq!(rect.max(), TilePos::new(5, 3));
        assert_eq!(rect.width(), 4);
        assert_eq!(rect.height(), 5);
        assert_eq!(rect.area(), 20);
    }

    #[test]
    fn single_point_rect_has_area_one() {
        let rect = TileRect::spanning(TilePos::new(7, 7), TilePos::new(7, 7));
        assert_eq!(rect.area(), 1);
        assert_eq!(rect.positions().collect::<Vec<_>>(), vec![TilePos::new(7, 7)]);
    }

    #[test]
    fn positions_walk_columns_first() {
        let rect = TileRect::spanning(TilePos::new(0, 0), TilePos::new(1, 1));
        assert_eq!(
            rect.positions().collect::<Vec<_>>(),
            vec![
                TilePos::new(0, 0),
                TilePos::new(0, 1),
                TilePos::new(1, 0),
                TilePos::new(1, 1),
            ]
        );
        assert_eq!(
            rect.positions_row_major().collect::<Vec<_>>(),
            vec![
                TilePos::new(0, 0),
                TilePos::new(1, 0),
                TilePos::new(0, 1),
                TilePos::new(1, 1),
            ]
        );
    }

    #[test]
    fn perimeter_excludes_interior() {
        let rect = TileRect::spanning(TilePos::new(0, 0), TilePos::new(2, 2));
        assert!(rect.is_on_perimeter(TilePos::new(0, 1)));
        assert!(rect.is_on_perimeter(TilePos::new(2, 2)));
        assert!(!rect.is_on_perimeter(TilePos::new(1, 1)));
        assert!(!rect.is_on_perimeter(TilePos::new(3, 1)));
    }

    #[test]
    fn from_origin_rejects_empty_extent() {
        assert!(TileRect::from_origin(TilePos::new(0, 0), 0, 4).is_none());
        let rect = TileRect::from_origin(TilePos::new(10, 20), 3, 2).expect("rect");
        assert_eq!(rect.max(), TilePos::new(12, 21));
    }
}
