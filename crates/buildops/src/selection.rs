use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{TilePos, TileRect};

const MAX_PREVIEW_SEGMENTS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    #[default]
    Cuboid,
    Sphere,
}

impl SelectionKind {
    /// Accepts the mode names and aliases typed by players.
    pub fn parse_mode(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "cuboid" | "cube" | "box" | "rect" | "rectangle" => Some(Self::Cuboid),
            "sphere" | "circle" | "round" => Some(Self::Sphere),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Cuboid => "Cuboid",
            Self::Sphere => "Sphere",
        }
    }
}

/// A player's pending region.
///
/// Cuboid corners and sphere center/radius are stored independently, so switching
/// the kind back and forth keeps whatever each geometry family last held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    kind: SelectionKind,
    point1: Option<TilePos>,
    point2: Option<TilePos>,
    center: Option<TilePos>,
    radius: Option<u32>,
}

impl Selection {
    pub fn cuboid(point1: TilePos, point2: TilePos) -> Self {
        let mut selection = Self::default();
        selection.set_point1(point1);
        selection.set_point2(point2);
        selection
    }

    pub fn sphere(center: TilePos, radius: u32) -> Self {
        let mut selection = Self::default();
        selection.set_center(center);
        selection.set_radius(radius);
        selection
    }

    pub fn kind(&self) -> SelectionKind {
        self.kind
    }

    pub fn point1(&self) -> Option<TilePos> {
        self.point1
    }

    pub fn point2(&self) -> Option<TilePos> {
        self.point2
    }

    pub fn center(&self) -> Option<TilePos> {
        self.center
    }

    pub fn radius(&self) -> Option<u32> {
        self.radius
    }

    pub fn set_point1(&mut self, pos: TilePos) {
        self.point1 = Some(pos);
        self.kind = SelectionKind::Cuboid;
    }

    pub fn set_point2(&mut self, pos: TilePos) {
        self.point2 = Some(pos);
        self.kind = SelectionKind::Cuboid;
    }

    pub fn set_center(&mut self, pos: TilePos) {
        self.center = Some(pos);
        self.kind = SelectionKind::Sphere;
    }

    pub fn set_radius(&mut self, radius: u32) {
        self.radius = Some(radius);
        self.kind = SelectionKind::Sphere;
    }

    pub fn set_kind(&mut self, kind: SelectionKind) {
        self.kind = kind;
    }

    /// Forgets every stored coordinate. The current kind is kept.
    pub fn clear(&mut self) {
        self.point1 = None;
        self.point2 = None;
        self.center = None;
        self.radius = None;
    }

    pub fn is_valid(&self) -> bool {
        match self.kind {
            SelectionKind::Cuboid => self.point1.is_some() && self.point2.is_some(),
            SelectionKind::Sphere => self.center.is_some() && matches!(self.radius, Some(r) if r > 0),
        }
    }

    pub fn bounds(&self) -> Option<TileRect> {
        match self.kind {
            SelectionKind::Cuboid => {
                let (a, b) = (self.point1?, self.point2?);
                Some(TileRect::spanning(a, b))
            }
            SelectionKind::Sphere => {
                let center = self.center?;
                let radius = self.radius.filter(|r| *r > 0)?;
                let r = radius.min(i32::MAX as u32) as i32;
                Some(TileRect::spanning(
                    TilePos::new(center.x.saturating_sub(r), center.y.saturating_sub(r)),
                    TilePos::new(center.x.saturating_add(r), center.y.saturating_add(r)),
                ))
            }
        }
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        if !self.is_valid() {
            return false;
        }
        match (self.kind, self.center, self.radius) {
            (SelectionKind::Sphere, Some(center), Some(radius)) => {
                let r = radius as i64;
                pos.distance_sq(center) <= r * r
            }
            _ => self.bounds().is_some_and(|rect| rect.contains(pos)),
        }
    }

    /// Every selected coordinate in planner order (columns of the bounding box, left to right).
    pub fn positions(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.bounds()
            .into_iter()
            .flat_map(|rect| rect.positions())
            .filter(move |pos| self.contains(*pos))
    }

    pub fn tile_count(&self) -> u64 {
        match self.kind {
            SelectionKind::Cuboid => self.bounds().map_or(0, |rect| rect.area()),
            SelectionKind::Sphere => self.positions().count() as u64,
        }
    }

    /// Corner tiles for a cuboid, circumference samples for a sphere.
    /// Empty for an invalid selection.
    pub fn preview_markers(&self) -> Vec<TilePos> {
        if !self.is_valid() {
            return Vec::new();
        }
        match (self.kind, self.point1, self.point2, self.center, self.radius) {
            (SelectionKind::Cuboid, Some(p1), Some(p2), _, _) => vec![
                p1,
                p2,
                TilePos::new(p1.x, p2.y),
                TilePos::new(p2.x, p1.y),
            ],
            (SelectionKind::Sphere, _, _, Some(center), Some(radius)) => {
                let segments = MAX_PREVIEW_SEGMENTS.min(radius.saturating_mul(4));
                (0..segments)
                    .map(|i| {
                        let angle = i as f64 * 2.0 * PI / segments as f64;
                        TilePos::new(
                            center.x.saturating_add((angle.cos() * radius as f64) as i32),
                            center.y.saturating_add((angle.sin() * radius as f64) as i32),
                        )
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Rough circle area used to reject a radius before it is committed to a selection.
pub fn estimate_circle_area(radius: u32) -> u64 {
    let r = radius as f64;
    (r * r * PI).floor() as u64
}

/// Per-player selections. Entries are created on first access.
#[derive(Debug, Default)]
pub struct SelectionRegistry {
    selections: HashMap<PlayerId, Selection>,
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, player: PlayerId) -> &mut Selection {
        self.selections.entry(player).or_default()
    }

    pub fn peek(&self, player: PlayerId) -> Option<&Selection> {
        self.selections.get(&player)
    }

    pub fn clear(&mut self, player: PlayerId) {
        if let Some(selection) = self.selections.get_mut(&player) {
            selection.clear();
        }
    }

    /// Drops all state held for a player. Returns whether anything was stored.
    pub fn forget(&mut self, player: PlayerId) -> bool {
        self.selections.remove(&player).is_some()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}
