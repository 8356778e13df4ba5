pub mod catalog;
pub mod config;
pub mod console;
pub mod edit;
pub mod geometry;
pub mod loop_runner;
pub mod metrics;
pub mod planner;
pub mod queue;
pub mod relay;
pub mod selection;
pub mod service;
pub mod world;

pub use catalog::{CatalogError, Resolved, SourceLocation, TileTypeId, TypeCatalog, WallTypeId};
pub use config::{
    BuilderSettings, ConfigError, SettingsSource, CONFIG_PATH_ENV_VAR, DEFAULT_CONFIG_FILE,
    MAX_SELECTION_SIZE_ENV_VAR, TILES_PER_TICK_ENV_VAR,
};
pub use console::{BuilderCommand, BuilderConsole, CommandParseError, CommandRegistry};
pub use edit::{EditError, EditOp, ElementaryEdit};
pub use geometry::{TilePos, TileRect};
pub use loop_runner::{
    clamp_frame_delta, normalize_non_zero_duration, plan_sim_steps, FixedStepClock, LoopConfig,
    StepPlan,
};
pub use metrics::{LoopMetricsSnapshot, MetricsAccumulator, MetricsHandle};
pub use planner::{
    admit, count_tiles, plan_operation, BillOfMaterials, EditOperation, EditSink, PlanSummary,
};
pub use queue::{drain_one_tick, Authority, DrainReport, PlacementQueue, QueueWriter};
pub use relay::{is_relay_line, RegionDescriptor, RelayError, RelayRequest, RELAY_LINE_PREFIX};
pub use selection::{estimate_circle_area, PlayerId, Selection, SelectionKind, SelectionRegistry};
pub use service::{Dispatch, WorldService};
pub use world::{CellSnapshot, ChangeLog, RegionObserver, TileGrid, TileGridError, TileWorld};
