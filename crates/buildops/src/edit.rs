use thiserror::Error;

use crate::catalog::{TileTypeId, WallTypeId};
use crate::geometry::TilePos;
use crate::world::TileWorld;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    PlaceTile(TileTypeId),
    RemoveTile,
    PlaceWall(WallTypeId),
    RemoveWall,
}

/// Smallest unit of world mutation: one tile or wall change at one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementaryEdit {
    pub pos: TilePos,
    pub op: EditOp,
}

impl ElementaryEdit {
    pub fn place_tile(pos: TilePos, tile: TileTypeId) -> Self {
        Self {
            pos,
            op: EditOp::PlaceTile(tile),
        }
    }

    pub fn remove_tile(pos: TilePos) -> Self {
        Self {
            pos,
            op: EditOp::RemoveTile,
        }
    }

    pub fn place_wall(pos: TilePos, wall: WallTypeId) -> Self {
        Self {
            pos,
            op: EditOp::PlaceWall(wall),
        }
    }

    pub fn remove_wall(pos: TilePos) -> Self {
        Self {
            pos,
            op: EditOp::RemoveWall,
        }
    }

    pub fn apply(&self, world: &mut dyn TileWorld) -> bool {
        match self.op {
            EditOp::PlaceTile(tile) => world.place_tile(self.pos, tile),
            EditOp::RemoveTile => world.remove_tile(self.pos),
            EditOp::PlaceWall(wall) => world.place_wall(self.pos, wall),
            EditOp::RemoveWall => world.remove_wall(self.pos),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("no valid selection; set both corners or a center and radius first")]
    InvalidSelection,
    #[error("selection too large ({count} tiles, max: {max})")]
    SelectionTooLarge { count: u64, max: u64 },
    #[error("radius too large (~{estimated} tiles, max: {max})")]
    RadiusTooLarge { estimated: u64, max: u64 },
    #[error("radius must be a positive number")]
    NonPositiveRadius,
    #[error("world edits must be requested from the authoritative side")]
    NotAuthoritative,
}
