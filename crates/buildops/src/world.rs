use thiserror::Error;

use crate::catalog::{TileTypeId, WallTypeId};
use crate::geometry::TilePos;

/// What the planner can observe about one cell before deciding on an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSnapshot {
    pub has_tile: bool,
    pub tile_type: TileTypeId,
    pub wall_type: WallTypeId,
}

impl CellSnapshot {
    pub const EMPTY: CellSnapshot = CellSnapshot {
        has_tile: false,
        tile_type: TileTypeId(0),
        wall_type: WallTypeId::NONE,
    };
}

/// Authoritative world state as seen by the edit pipeline.
///
/// Mutators report whether the world accepted the change. A rejected change has no
/// retry contract; the caller simply moves on.
pub trait TileWorld {
    fn is_in_world(&self, pos: TilePos) -> bool;
    fn read_cell(&self, pos: TilePos) -> CellSnapshot;
    fn place_tile(&mut self, pos: TilePos, tile: TileTypeId) -> bool;
    fn remove_tile(&mut self, pos: TilePos) -> bool;
    fn place_wall(&mut self, pos: TilePos, wall: WallTypeId) -> bool;
    fn remove_wall(&mut self, pos: TilePos) -> bool;
}

/// Receives one notification per applied edit so observers of that area can resync.
pub trait RegionObserver {
    fn notify_region_changed(&mut self, pos: TilePos, size: u32);
}

/// Observer that records every notification, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeLog {
    changes: Vec<(TilePos, u32)>,
}

impl ChangeLog {
    pub fn changes(&self) -> &[(TilePos, u32)] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn take(&mut self) -> Vec<(TilePos, u32)> {
        std::mem::take(&mut self.changes)
    }
}

impl RegionObserver for ChangeLog {
    fn notify_region_changed(&mut self, pos: TilePos, size: u32) {
        self.changes.push((pos, size));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cell {
    tile: Option<TileTypeId>,
    wall: WallTypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TileGridError {
    #[error("grid dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

/// Dense in-memory world. Tile (0,0) is the top-left cell.
///
/// Placing the type a cell already holds is rejected, as is removing from an empty
/// cell, so only real changes are reported as applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl TileGrid {
    pub fn new(width: u32, height: u32) -> Result<Self, TileGridError> {
        if width == 0 || height == 0 {
            return Err(TileGridError::EmptyDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            cells: vec![Cell::default(); width as usize * height as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index_of(&self, pos: TilePos) -> Option<usize> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        let (x, y) = (pos.x as u32, pos.y as u32);
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn tile_at(&self, pos: TilePos) -> Option<TileTypeId> {
        self.index_of(pos).and_then(|index| self.cells[index].tile)
    }

    pub fn wall_at(&self, pos: TilePos) -> WallTypeId {
        self.index_of(pos)
            .map_or(WallTypeId::NONE, |index| self.cells[index].wall)
    }

    pub fn occupied_tile_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.tile.is_some()).count()
    }

    fn cell_mut(&mut self, pos: TilePos) -> Option<&mut Cell> {
        let index = self.index_of(pos)?;
        self.cells.get_mut(index)
    }
}

impl TileWorld for TileGrid {
    fn is_in_world(&self, pos: TilePos) -> bool {
        self.index_of(pos).is_some()
    }

    fn read_cell(&self, pos: TilePos) -> CellSnapshot {
        match self.index_of(pos) {
            Some(index) => {
                let cell = self.cells[index];
                CellSnapshot {
                    has_tile: cell.tile.is_some(),
                    tile_type: cell.tile.unwrap_or(TileTypeId(0)),
                    wall_type: cell.wall,
                }
            }
            None => CellSnapshot::EMPTY,
        }
    }

    fn place_tile(&mut self, pos: TilePos, tile: TileTypeId) -> bool {
        match self.cell_mut(pos) {
            Some(cell) if cell.tile != Some(tile) => {
                cell.tile = Some(tile);
                true
            }
            _ => false,
        }
    }

    fn remove_tile(&mut self, pos: TilePos) -> bool {
        match self.cell_mut(pos) {
            Some(cell) => cell.tile.take().is_some(),
            None => false,
        }
    }

    fn place_wall(&mut self, pos: TilePos, wall: WallTypeId) -> bool {
        match self.cell_mut(pos) {
            Some(cell) if wall != WallTypeId::NONE && cell.wall != wall => {
                cell.wall = wall;
                true
            }
            _ => false,
        }
    }

    fn remove_wall(&mut self, pos: TilePos) -> bool {
        match self.cell_mut(pos) {
            Some(cell) if cell.wall != WallTypeId::NONE => {
                cell.wall = WallTypeId::NONE;
                true
            }
            _ => false,
        }
    }
}
