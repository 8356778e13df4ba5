use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{TileTypeId, WallTypeId};
use crate::edit::{EditError, ElementaryEdit};
use crate::geometry::{TilePos, TileRect};
use crate::selection::{estimate_circle_area, Selection, SelectionKind};
use crate::world::{CellSnapshot, TileWorld};

/// Bulk operation applied across a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    SetTile { tile: TileTypeId },
    ReplaceTile { from: TileTypeId, to: TileTypeId },
    RemoveTile,
    /// Hollow outline: box perimeter for a cuboid, a ring one tile either side of the radius for a sphere.
    Outline { tile: TileTypeId },
    SetWall { wall: WallTypeId },
    ReplaceWall { from: WallTypeId, to: WallTypeId },
    RemoveWall,
    SetBoth { tile: TileTypeId, wall: WallTypeId },
}

impl EditOperation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetTile { .. } => "set",
            Self::ReplaceTile { .. } => "replace",
            Self::RemoveTile => "remove",
            Self::Outline { .. } => "walls",
            Self::SetWall { .. } => "setwall",
            Self::ReplaceWall { .. } => "replacewall",
            Self::RemoveWall => "removewall",
            Self::SetBoth { .. } => "setboth",
        }
    }

    fn reads_world(&self) -> bool {
        matches!(
            self,
            Self::ReplaceTile { .. } | Self::RemoveTile | Self::ReplaceWall { .. } | Self::RemoveWall
        )
    }
}

/// Destination for planned edits.
pub trait EditSink {
    fn push_edit(&mut self, edit: ElementaryEdit);
}

impl EditSink for Vec<ElementaryEdit> {
    fn push_edit(&mut self, edit: ElementaryEdit) {
        self.push(edit);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Coordinates that produced at least one edit.
    pub coordinates: u64,
    pub edits: u64,
}

/// Tile-type tally over a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillOfMaterials {
    counts: BTreeMap<TileTypeId, u64>,
}

impl BillOfMaterials {
    pub fn record(&mut self, tile: TileTypeId) {
        *self.counts.entry(tile).or_insert(0) += 1;
    }

    pub fn count_of(&self, tile: TileTypeId) -> u64 {
        self.counts.get(&tile).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn distinct_types(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Highest count first; ties ordered by ascending type id.
    pub fn sorted_by_count(&self) -> Vec<(TileTypeId, u64)> {
        let mut entries = self
            .counts
            .iter()
            .map(|(tile, count)| (*tile, *count))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }

    pub fn as_map(&self) -> &BTreeMap<TileTypeId, u64> {
        &self.counts
    }
}

/// All-or-nothing size check run before any planning or counting. Returns the
/// selection's tile count.
///
/// A sphere is first checked against its estimated area so an oversized radius is
/// rejected without walking its bounding box.
pub fn admit(selection: &Selection, max_selection_size: u64) -> Result<u64, EditError> {
    if !selection.is_valid() {
        return Err(EditError::InvalidSelection);
    }
    if let (SelectionKind::Sphere, Some(radius)) = (selection.kind(), selection.radius()) {
        let estimated = estimate_circle_area(radius);
        if estimated > max_selection_size {
            return Err(EditError::RadiusTooLarge {
                estimated,
                max: max_selection_size,
            });
        }
    }
    let count = selection.tile_count();
    if count > max_selection_size {
        return Err(EditError::SelectionTooLarge {
            count,
            max: max_selection_size,
        });
    }
    Ok(count)
}

/// Walks the selection and pushes the edits `operation` calls for into `sink`.
///
/// Coordinates outside the world are skipped without being counted.
pub fn plan_operation(
    selection: &Selection,
    operation: EditOperation,
    world: &dyn TileWorld,
    sink: &mut dyn EditSink,
) -> Result<PlanSummary, EditError> {
    if !selection.is_valid() {
        return Err(EditError::InvalidSelection);
    }
    let bounds = selection.bounds().ok_or(EditError::InvalidSelection)?;

    let mut summary = PlanSummary::default();
    for pos in bounds.positions() {
        if !world.is_in_world(pos) {
            continue;
        }
        if !covers(selection, operation, pos, &bounds) {
            continue;
        }
        let cell = if operation.reads_world() {
            world.read_cell(pos)
        } else {
            CellSnapshot::EMPTY
        };
        let before = summary.edits;
        emit_edits(operation, pos, cell, sink, &mut summary.edits);
        if summary.edits > before {
            summary.coordinates += 1;
        }
    }
    Ok(summary)
}

/// Tallies existing tiles by type without producing edits.
pub fn count_tiles(
    selection: &Selection,
    world: &dyn TileWorld,
) -> Result<BillOfMaterials, EditError> {
    if !selection.is_valid() {
        return Err(EditError::InvalidSelection);
    }
    let mut bill = BillOfMaterials::default();
    for pos in selection.positions() {
        if !world.is_in_world(pos) {
            continue;
        }
        let cell = world.read_cell(pos);
        if cell.has_tile {
            bill.record(cell.tile_type);
        }
    }
    Ok(bill)
}

fn covers(
    selection: &Selection,
    operation: EditOperation,
    pos: TilePos,
    bounds: &TileRect,
) -> bool {
    let EditOperation::Outline { .. } = operation else {
        return selection.contains(pos);
    };
    match (selection.kind(), selection.center(), selection.radius()) {
        (SelectionKind::Sphere, Some(center), Some(radius)) => {
            // Integer form of `radius - 1 <= dist <= radius + 1`.
            let inner = radius as i64 - 1;
            let outer = radius as i64 + 1;
            let dist_sq = pos.distance_sq(center);
            dist_sq >= inner * inner && dist_sq <= outer * outer
        }
        _ => bounds.is_on_perimeter(pos),
    }
}

fn emit_edits(
    operation: EditOperation,
    pos: TilePos,
    cell: CellSnapshot,
    sink: &mut dyn EditSink,
    edits: &mut u64,
) {
    let mut push = |edit: ElementaryEdit| {
        sink.push_edit(edit);
        *edits += 1;
    };
    match operation {
        EditOperation::SetTile { tile } | EditOperation::Outline { tile } => {
            push(ElementaryEdit::place_tile(pos, tile));
        }
        EditOperation::ReplaceTile { from, to } => {
            if cell.has_tile && cell.tile_type == from {
                push(ElementaryEdit::place_tile(pos, to));
            }
        }
        EditOperation::RemoveTile => {
            if cell.has_tile {
                push(ElementaryEdit::remove_tile(pos));
            }
        }
        EditOperation::SetWall { wall } => {
            push(ElementaryEdit::place_wall(pos, wall));
        }
        EditOperation::ReplaceWall { from, to } => {
            if cell.wall_type == from {
                push(ElementaryEdit::place_wall(pos, to));
            }
        }
        EditOperation::RemoveWall => {
            if cell.wall_type != WallTypeId::NONE {
                push(ElementaryEdit::remove_wall(pos));
            }
        }
        EditOperation::SetBoth { tile, wall } => {
            push(ElementaryEdit::place_tile(pos, tile));
            push(ElementaryEdit::place_wall(pos, wall));
        }
    }
}
