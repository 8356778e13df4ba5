use std::collections::VecDeque;

use tracing::debug;

use crate::catalog::TileTypeId;
use crate::edit::{EditError, ElementaryEdit};
use crate::geometry::{TilePos, TileRect};
use crate::planner::EditSink;
use crate::world::{RegionObserver, TileWorld};

pub const DEFAULT_TILES_PER_TICK: u32 = 64;

/// Which side of a session this process plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Authority {
    /// Owns world state; may enqueue and drain.
    #[default]
    Authoritative,
    /// Sees world state but must relay every mutation request.
    Observer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dequeued: usize,
    pub applied: usize,
    pub failed: usize,
}

/// FIFO of pending elementary edits, drained by a per-tick budget.
///
/// There is no cap on pending entries; each request is bounded only by admission.
#[derive(Debug)]
pub struct PlacementQueue {
    entries: VecDeque<ElementaryEdit>,
    budget: u32,
    authority: Authority,
}

impl Default for PlacementQueue {
    fn default() -> Self {
        Self::new(Authority::Authoritative, DEFAULT_TILES_PER_TICK)
    }
}

impl PlacementQueue {
    pub fn new(authority: Authority, budget: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            budget,
            authority,
        }
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Takes effect on the next drain. Zero pauses draining without dropping work.
    pub fn set_budget(&mut self, budget: u32) {
        self.budget = budget;
    }

    pub fn enqueue(&mut self, edit: ElementaryEdit) -> Result<(), EditError> {
        self.writer()?.push_edit(edit);
        Ok(())
    }

    /// Enqueues a `width` x `height` block of `tile` placements, row by row from `origin`.
    /// Returns the number of entries added.
    pub fn enqueue_rect(
        &mut self,
        origin: TilePos,
        width: u32,
        height: u32,
        tile: TileTypeId,
    ) -> Result<usize, EditError> {
        let mut writer = self.writer()?;
        let Some(rect) = TileRect::from_origin(origin, width, height) else {
            return Ok(0);
        };
        let before = writer.queue.entries.len();
        for pos in rect.positions_row_major() {
            writer.push_edit(ElementaryEdit::place_tile(pos, tile));
        }
        Ok(writer.queue.entries.len() - before)
    }

    /// Drops every pending entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Sink handle for the planner. Only the authoritative side may obtain one.
    pub fn writer(&mut self) -> Result<QueueWriter<'_>, EditError> {
        match self.authority {
            Authority::Authoritative => Ok(QueueWriter { queue: self }),
            Authority::Observer => Err(EditError::NotAuthoritative),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementaryEdit> {
        self.entries.iter()
    }

    /// Runs one tick's worth of edits with the current budget.
    pub fn drain_tick(
        &mut self,
        world: &mut dyn TileWorld,
        observer: &mut dyn RegionObserver,
    ) -> DrainReport {
        if self.authority != Authority::Authoritative {
            return DrainReport::default();
        }
        drain_one_tick(&mut self.entries, self.budget, world, observer)
    }
}

pub struct QueueWriter<'a> {
    queue: &'a mut PlacementQueue,
}

impl EditSink for QueueWriter<'_> {
    fn push_edit(&mut self, edit: ElementaryEdit) {
        self.queue.entries.push_back(edit);
    }
}

/// Pops up to `budget` entries in order and applies each to `world`.
///
/// A rejected edit is dropped and counted as failed; it never blocks the entries behind it.
/// Every applied edit produces one single-tile change notification.
pub fn drain_one_tick(
    entries: &mut VecDeque<ElementaryEdit>,
    budget: u32,
    world: &mut dyn TileWorld,
    observer: &mut dyn RegionObserver,
) -> DrainReport {
    let take = entries.len().min(budget as usize);
    let mut report = DrainReport::default();
    for edit in entries.drain(..take) {
        report.dequeued += 1;
        if edit.apply(world) {
            observer.notify_region_changed(edit.pos, 1);
            report.applied += 1;
        } else {
            report.failed += 1;
        }
    }
    if report.dequeued > 0 {
        debug!(
            dequeued = report.dequeued,
            applied = report.applied,
            failed = report.failed,
            remaining = entries.len(),
            "queue_drained"
        );
    }
    report
}
