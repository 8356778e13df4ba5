use tracing::{debug, info, warn};

use crate::catalog::{TileTypeId, TypeCatalog};
use crate::config::BuilderSettings;
use crate::edit::{EditError, ElementaryEdit};
use crate::geometry::TilePos;
use crate::planner::{admit, count_tiles, plan_operation, BillOfMaterials, EditOperation, PlanSummary};
use crate::queue::{Authority, DrainReport, PlacementQueue};
use crate::relay::{RegionDescriptor, RelayRequest};
use crate::selection::{estimate_circle_area, PlayerId, Selection, SelectionRegistry};
use crate::world::{RegionObserver, TileWorld};

/// What happened to a mutation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Enqueued(PlanSummary),
    Cleared(usize),
    /// Forwarded to the authoritative side through the outbox.
    Relayed,
}

/// Owns every piece of builder state for one world: selections, the placement queue,
/// current settings and the type catalog.
#[derive(Debug)]
pub struct WorldService {
    selections: SelectionRegistry,
    queue: PlacementQueue,
    settings: BuilderSettings,
    catalog: TypeCatalog,
    outbox: Vec<RelayRequest>,
    ticks: u64,
}

impl WorldService {
    pub fn new(authority: Authority, settings: BuilderSettings, catalog: TypeCatalog) -> Self {
        Self {
            selections: SelectionRegistry::new(),
            queue: PlacementQueue::new(authority, settings.tiles_per_tick),
            settings,
            catalog,
            outbox: Vec::new(),
            ticks: 0,
        }
    }

    pub fn authoritative(settings: BuilderSettings, catalog: TypeCatalog) -> Self {
        Self::new(Authority::Authoritative, settings, catalog)
    }

    pub fn observer(settings: BuilderSettings, catalog: TypeCatalog) -> Self {
        Self::new(Authority::Observer, settings, catalog)
    }

    pub fn authority(&self) -> Authority {
        self.queue.authority()
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn selections(&self) -> &SelectionRegistry {
        &self.selections
    }

    pub fn selection(&self, player: PlayerId) -> Option<&Selection> {
        self.selections.peek(player)
    }

    pub fn selection_mut(&mut self, player: PlayerId) -> &mut Selection {
        self.selections.get(player)
    }

    pub fn queue(&self) -> &PlacementQueue {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn budget(&self) -> u32 {
        self.queue.budget()
    }

    pub fn set_budget(&mut self, budget: u32) {
        self.queue.set_budget(budget);
        info!(budget, "budget_changed");
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Replaces the settings; the budget switches over at the next drain.
    pub fn apply_settings(&mut self, settings: BuilderSettings) {
        self.settings = settings;
        self.queue.set_budget(settings.tiles_per_tick);
        info!(
            tiles_per_tick = settings.tiles_per_tick,
            max_selection_size = settings.max_selection_size,
            selection_particles = settings.selection_particles,
            "config_applied"
        );
    }

    /// Sets a sphere radius after checking its estimated area against the size ceiling.
    /// A rejected radius leaves the selection untouched. Returns the estimate.
    pub fn set_radius(&mut self, player: PlayerId, radius: i64) -> Result<u64, EditError> {
        if radius <= 0 {
            return Err(EditError::NonPositiveRadius);
        }
        let radius = u32::try_from(radius).unwrap_or(u32::MAX);
        let estimated = estimate_circle_area(radius);
        let max = u64::from(self.settings.max_selection_size);
        if estimated > max {
            return Err(EditError::RadiusTooLarge { estimated, max });
        }
        self.selections.get(player).set_radius(radius);
        Ok(estimated)
    }

    /// Preview coordinates for a player's selection, or `None` while previews are disabled.
    pub fn preview_markers(&self, player: PlayerId) -> Option<Vec<TilePos>> {
        if !self.settings.selection_particles {
            return None;
        }
        Some(
            self.selections
                .peek(player)
                .map(Selection::preview_markers)
                .unwrap_or_default(),
        )
    }

    /// Plans `operation` over the player's selection and enqueues the result.
    ///
    /// An observer runs the same admission check and then relays the region instead.
    pub fn apply(
        &mut self,
        player: PlayerId,
        operation: EditOperation,
        world: &dyn TileWorld,
    ) -> Result<Dispatch, EditError> {
        let selection = self.selections.get(player).clone();
        let result = self.apply_selection(&selection, operation, world);
        if let Err(error) = &result {
            warn!(%player, operation = operation.label(), %error, "operation_rejected");
        }
        result
    }

    /// Bill of materials for the player's selection, under the same size ceiling as edits.
    pub fn count(&self, player: PlayerId, world: &dyn TileWorld) -> Result<BillOfMaterials, EditError> {
        let selection = self
            .selections
            .peek(player)
            .ok_or(EditError::InvalidSelection)?;
        admit(selection, u64::from(self.settings.max_selection_size))?;
        count_tiles(selection, world)
    }

    /// Enqueues a `width` x `height` block of `tile` starting at `origin`, bypassing selections.
    pub fn place_rect(
        &mut self,
        origin: TilePos,
        width: u32,
        height: u32,
        tile: TileTypeId,
    ) -> Result<Dispatch, EditError> {
        if self.authority() == Authority::Observer {
            self.relay(RelayRequest::EnqueueRect {
                x: origin.x,
                y: origin.y,
                width,
                height,
                tile_type: tile,
            });
            return Ok(Dispatch::Relayed);
        }
        let added = self.queue.enqueue_rect(origin, width, height, tile)? as u64;
        info!(%origin, width, height, %tile, queue_len = self.queue.len(), "rect_enqueued");
        Ok(Dispatch::Enqueued(PlanSummary {
            coordinates: added,
            edits: added,
        }))
    }

    pub fn place_single(&mut self, pos: TilePos, tile: TileTypeId) -> Result<Dispatch, EditError> {
        if self.authority() == Authority::Observer {
            self.relay(RelayRequest::PlaceSingleTile {
                x: pos.x,
                y: pos.y,
                tile_type: tile,
            });
            return Ok(Dispatch::Relayed);
        }
        self.queue.enqueue(ElementaryEdit::place_tile(pos, tile))?;
        Ok(Dispatch::Enqueued(PlanSummary {
            coordinates: 1,
            edits: 1,
        }))
    }

    /// Drops all queued work. Edits applied in earlier ticks stay applied.
    pub fn stop(&mut self) -> Dispatch {
        if self.authority() == Authority::Observer {
            self.relay(RelayRequest::ClearQueue);
            return Dispatch::Relayed;
        }
        let removed = self.queue.clear();
        info!(removed, "queue_cleared");
        Dispatch::Cleared(removed)
    }

    /// One simulation step: drains the queue once with the current budget.
    pub fn tick(
        &mut self,
        world: &mut dyn TileWorld,
        observer: &mut dyn RegionObserver,
    ) -> DrainReport {
        self.ticks = self.ticks.saturating_add(1);
        self.queue.drain_tick(world, observer)
    }

    /// Executes a request relayed from an observer. Only the authoritative side accepts these.
    pub fn handle_relay(
        &mut self,
        request: RelayRequest,
        world: &dyn TileWorld,
    ) -> Result<Dispatch, EditError> {
        if self.authority() != Authority::Authoritative {
            return Err(EditError::NotAuthoritative);
        }
        debug!(?request, "relay_request_received");
        match request {
            RelayRequest::PlaceSingleTile { x, y, tile_type } => {
                self.place_single(TilePos::new(x, y), tile_type)
            }
            RelayRequest::EnqueueRect {
                x,
                y,
                width,
                height,
                tile_type,
            } => self.place_rect(TilePos::new(x, y), width, height, tile_type),
            RelayRequest::ClearQueue => Ok(self.stop()),
            RelayRequest::ApplyRegion { region, operation } => {
                let selection = region.to_selection();
                self.apply_selection(&selection, operation, world)
            }
        }
    }

    pub fn take_outbox(&mut self) -> Vec<RelayRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Discards everything held for a departed player.
    pub fn player_left(&mut self, player: PlayerId) -> bool {
        let had_selection = self.selections.forget(player);
        if had_selection {
            debug!(%player, "selection_discarded");
        }
        had_selection
    }

    fn apply_selection(
        &mut self,
        selection: &Selection,
        operation: EditOperation,
        world: &dyn TileWorld,
    ) -> Result<Dispatch, EditError> {
        admit(selection, u64::from(self.settings.max_selection_size))?;
        if self.authority() == Authority::Observer {
            let region = RegionDescriptor::from_selection(selection).ok_or(EditError::InvalidSelection)?;
            self.relay(RelayRequest::ApplyRegion { region, operation });
            return Ok(Dispatch::Relayed);
        }
        let mut writer = self.queue.writer()?;
        let summary = plan_operation(selection, operation, world, &mut writer)?;
        info!(
            operation = operation.label(),
            coordinates = summary.coordinates,
            edits = summary.edits,
            queue_len = self.queue.len(),
            "operation_enqueued"
        );
        Ok(Dispatch::Enqueued(summary))
    }

    fn relay(&mut self, request: RelayRequest) {
        debug!(?request, "relay_request_queued");
        self.outbox.push(request);
    }
}
