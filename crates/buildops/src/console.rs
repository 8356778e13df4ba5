use std::collections::HashMap;
use std::fmt;

use tracing::{info, warn};

use crate::catalog::{TileTypeId, TypeCatalog, WallTypeId};
use crate::config::{SettingsSource, TILES_PER_TICK_RANGE};
use crate::edit::EditError;
use crate::geometry::TilePos;
use crate::planner::{BillOfMaterials, EditOperation};
use crate::selection::{PlayerId, SelectionKind};
use crate::service::{Dispatch, WorldService};
use crate::world::TileWorld;

const BOM_REPORT_LIMIT: usize = 10;
const DEFAULT_PLACE_WIDTH: u32 = 12;
const DEFAULT_PLACE_HEIGHT: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderCommand {
    Help,
    Pos1(TilePos),
    Pos2(TilePos),
    Center(TilePos),
    Radius(i64),
    Sel(Option<SelectionKind>),
    Desel,
    Show,
    Set { tile: String },
    Replace { from: String, to: String },
    Remove,
    Walls { tile: String },
    Count,
    SetWall { wall: String },
    ReplaceWall { from: String, to: String },
    RemoveWall,
    SetBoth { tile: String, wall: String },
    Place {
        origin: TilePos,
        width: u32,
        height: u32,
        tile: Option<String>,
    },
    Stop,
    Status,
    Budget(u32),
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParseError {
    reason: String,
    usage: String,
}

impl CommandParseError {
    fn new(reason: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            usage: usage.into(),
        }
    }
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. usage: {}", self.reason, self.usage)
    }
}

pub type ParseFn = fn(&[String]) -> Result<BuilderCommand, CommandParseError>;

pub struct CommandSpec {
    name: String,
    help: String,
    arg_schema: String,
    parse: ParseFn,
}

pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

const BUILDER_COMMANDS: &[(&str, &str, &str, ParseFn)] = &[
    ("bo_help", "List commands", "", parse_help),
    ("bo_pos1", "Set first corner of cuboid selection", "<x> <y>", parse_pos1),
    ("bo_pos2", "Set second corner of cuboid selection", "<x> <y>", parse_pos2),
    ("bo_center", "Set center point for sphere selection", "<x> <y>", parse_center),
    ("bo_radius", "Set radius for sphere selection", "<blocks>", parse_radius),
    ("bo_sel", "Show or change selection mode", "[cuboid|sphere]", parse_sel),
    ("bo_desel", "Clear current selection", "", parse_desel),
    ("bo_show", "List selection preview markers", "", parse_show),
    ("bo_set", "Fill selection with tile type", "<tile>", parse_set),
    ("bo_replace", "Replace tiles in selection", "<from> <to>", parse_replace),
    ("bo_remove", "Remove all tiles in selection", "", parse_remove),
    ("bo_walls", "Create hollow outline of tiles", "<tile>", parse_walls),
    ("bo_count", "Count tiles in selection (bill of materials)", "", parse_count),
    ("bo_setwall", "Fill selection with wall type", "<wall>", parse_setwall),
    ("bo_replacewall", "Replace walls in selection", "<from> <to>", parse_replacewall),
    ("bo_removewall", "Remove all walls in selection", "", parse_removewall),
    ("bo_setboth", "Set both tile and wall", "<tile> <wall>", parse_setboth),
    ("bo_place", "Place rectangle of tiles", "<x> <y> [w] [h] [tile]", parse_place),
    ("bo_stop", "Clear placement queue", "", parse_stop),
    ("bo_status", "Show queue status", "", parse_status),
    ("bo_budget", "Set tiles placed per tick", "<tiles>", parse_budget),
    ("bo_reload", "Reload builder settings from disk", "", parse_reload),
];

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builder_commands()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub fn with_builder_commands() -> Self {
        let mut registry = Self::new();
        for (name, help, arg_schema, parse) in BUILDER_COMMANDS {
            // Built-in names are unique.
            let _ = registry.register(*name, *help, *arg_schema, *parse);
        }
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: ParseFn,
    ) -> Result<(), String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("command name cannot be empty".to_string());
        }
        let lower = name.to_ascii_lowercase();
        if self.lookup_by_lower_name.contains_key(&lower) {
            return Err(format!("duplicate command registration: {name}"));
        }

        self.specs.push(CommandSpec {
            name,
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse,
        });
        self.lookup_by_lower_name.insert(lower, self.specs.len() - 1);
        Ok(())
    }

    pub fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let lower = input_name.to_ascii_lowercase();
        let index = self.lookup_by_lower_name.get(&lower)?;
        self.specs.get(*index)
    }

    /// Registration order.
    pub fn iter_specs_in_order(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.specs.iter().map(|spec| {
            (
                spec.name.as_str(),
                spec.help.as_str(),
                spec.arg_schema.as_str(),
            )
        })
    }
}

/// Parses console lines into builder commands and runs them against a [`WorldService`].
#[derive(Default)]
pub struct BuilderConsole {
    registry: CommandRegistry,
    settings_source: Option<SettingsSource>,
}

impl BuilderConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings_source(settings_source: SettingsSource) -> Self {
        Self {
            registry: CommandRegistry::with_builder_commands(),
            settings_source: Some(settings_source),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// `Ok(None)` for a blank line.
    pub fn parse_line(&self, line: &str) -> Result<Option<BuilderCommand>, String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let tokens =
            tokenize_line(trimmed).map_err(|reason| format!("{reason}. usage: bo_help"))?;
        let Some((command_name, args)) = tokens.split_first() else {
            return Ok(None);
        };
        let command_name = command_name
            .strip_prefix('/')
            .unwrap_or(command_name.as_str());
        let spec = self
            .registry
            .lookup(command_name)
            .ok_or_else(|| format!("unknown command '{command_name}'. try: bo_help"))?;
        (spec.parse)(args).map(Some).map_err(|error| error.to_string())
    }

    pub fn execute_line(
        &self,
        service: &mut WorldService,
        world: &dyn TileWorld,
        player: PlayerId,
        line: &str,
    ) -> Vec<String> {
        match self.parse_line(line) {
            Ok(Some(command)) => self.execute(service, world, player, command),
            Ok(None) => Vec::new(),
            Err(message) => vec![format!("error: {message}")],
        }
    }

    pub fn execute(
        &self,
        service: &mut WorldService,
        world: &dyn TileWorld,
        player: PlayerId,
        command: BuilderCommand,
    ) -> Vec<String> {
        let mut out = Vec::new();
        match command {
            BuilderCommand::Help => {
                for (name, help, arg_schema) in self.registry.iter_specs_in_order() {
                    out.push(if arg_schema.is_empty() {
                        format!("{name} - {help}")
                    } else {
                        format!("{name} {arg_schema} - {help}")
                    });
                }
            }
            BuilderCommand::Pos1(pos) => {
                service.selection_mut(player).set_point1(pos);
                out.push(format!("position 1 set to {pos}"));
                push_selection_summary(service, player, &mut out);
            }
            BuilderCommand::Pos2(pos) => {
                service.selection_mut(player).set_point2(pos);
                out.push(format!("position 2 set to {pos}"));
                push_selection_summary(service, player, &mut out);
            }
            BuilderCommand::Center(pos) => {
                service.selection_mut(player).set_center(pos);
                out.push(format!("sphere center set to {pos}"));
                push_selection_summary(service, player, &mut out);
            }
            BuilderCommand::Radius(radius) => match service.set_radius(player, radius) {
                Ok(_) => {
                    let selection = service.selection_mut(player);
                    if selection.is_valid() {
                        out.push(format!(
                            "sphere radius set to {radius} blocks (~{} tiles)",
                            selection.tile_count()
                        ));
                    } else {
                        out.push(format!(
                            "sphere radius set to {radius} blocks. use bo_center to set the center point"
                        ));
                    }
                }
                Err(error) => out.push(format!("error: {error}")),
            },
            BuilderCommand::Sel(None) => {
                let kind = service
                    .selection(player)
                    .map(|selection| selection.kind())
                    .unwrap_or_default();
                out.push(format!("selection mode: {}", kind.label()));
            }
            BuilderCommand::Sel(Some(kind)) => {
                service.selection_mut(player).set_kind(kind);
                out.push(format!("selection mode set to {}", kind.label()));
            }
            BuilderCommand::Desel => {
                service.selection_mut(player).clear();
                out.push("selection cleared".to_string());
            }
            BuilderCommand::Show => match service.preview_markers(player) {
                None => out.push("selection previews are disabled".to_string()),
                Some(markers) if markers.is_empty() => {
                    out.push(format!("error: {}", EditError::InvalidSelection))
                }
                Some(markers) => {
                    let listed = markers
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" ");
                    out.push(format!("preview ({} markers): {listed}", markers.len()));
                }
            },
            BuilderCommand::Set { tile } => {
                let tile = resolve_tile(service.catalog(), &tile, &mut out);
                let label = service.catalog().tile_name(tile).to_string();
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::SetTile { tile },
                    &mut out,
                    |n| format!("enqueued {n} tiles to set to {label} ({tile})"),
                );
            }
            BuilderCommand::Replace { from, to } => {
                let from = resolve_tile(service.catalog(), &from, &mut out);
                let to = resolve_tile(service.catalog(), &to, &mut out);
                let labels = (
                    service.catalog().tile_name(from).to_string(),
                    service.catalog().tile_name(to).to_string(),
                );
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::ReplaceTile { from, to },
                    &mut out,
                    |n| format!("replacing {n} tiles ({} -> {})", labels.0, labels.1),
                );
            }
            BuilderCommand::Remove => {
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::RemoveTile,
                    &mut out,
                    |n| format!("removing {n} tiles"),
                );
            }
            BuilderCommand::Walls { tile } => {
                let tile = resolve_tile(service.catalog(), &tile, &mut out);
                let label = service.catalog().tile_name(tile).to_string();
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::Outline { tile },
                    &mut out,
                    |n| format!("outlining selection with {n} tiles of {label}"),
                );
            }
            BuilderCommand::Count => match service.count(player, world) {
                Ok(bill) => push_bill_of_materials(service.catalog(), &bill, &mut out),
                Err(error) => out.push(format!("error: {error}")),
            },
            BuilderCommand::SetWall { wall } => {
                let wall = resolve_wall(service.catalog(), &wall, &mut out);
                let label = service.catalog().wall_name(wall).to_string();
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::SetWall { wall },
                    &mut out,
                    |n| format!("setting {n} walls to {label}"),
                );
            }
            BuilderCommand::ReplaceWall { from, to } => {
                let from = resolve_wall(service.catalog(), &from, &mut out);
                let to = resolve_wall(service.catalog(), &to, &mut out);
                let labels = (
                    service.catalog().wall_name(from).to_string(),
                    service.catalog().wall_name(to).to_string(),
                );
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::ReplaceWall { from, to },
                    &mut out,
                    |n| format!("replacing {n} walls ({} -> {})", labels.0, labels.1),
                );
            }
            BuilderCommand::RemoveWall => {
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::RemoveWall,
                    &mut out,
                    |n| format!("removing {n} walls"),
                );
            }
            BuilderCommand::SetBoth { tile, wall } => {
                let tile = resolve_tile(service.catalog(), &tile, &mut out);
                let wall = resolve_wall(service.catalog(), &wall, &mut out);
                let labels = (
                    service.catalog().tile_name(tile).to_string(),
                    service.catalog().wall_name(wall).to_string(),
                );
                run_operation(
                    service,
                    world,
                    player,
                    EditOperation::SetBoth { tile, wall },
                    &mut out,
                    |n| format!("setting {n} tiles to {} with wall {}", labels.0, labels.1),
                );
            }
            BuilderCommand::Place {
                origin,
                width,
                height,
                tile,
            } => {
                let tile = match tile {
                    Some(token) => resolve_tile(service.catalog(), &token, &mut out),
                    None => service.catalog().default_tile(),
                };
                let label = service.catalog().tile_name(tile).to_string();
                match service.place_rect(origin, width, height, tile) {
                    Ok(Dispatch::Relayed) => out.push(format!(
                        "requested {width}x{height} of {label} at {origin} from the authoritative side"
                    )),
                    Ok(_) => out.push(format!("enqueued {width}x{height} of {label} at {origin}")),
                    Err(error) => out.push(format!("error: {error}")),
                }
            }
            BuilderCommand::Stop => match service.stop() {
                Dispatch::Cleared(removed) => {
                    out.push(format!("queue cleared ({removed} operations removed)"))
                }
                _ => out.push("requested queue clear from the authoritative side".to_string()),
            },
            BuilderCommand::Status => {
                let digest = service.catalog().digest_hex();
                out.push(format!(
                    "queue: {} operations | budget: {} tiles/tick | catalog: {}",
                    service.queue_len(),
                    service.budget(),
                    &digest[..digest.len().min(12)]
                ));
            }
            BuilderCommand::Budget(budget) => {
                service.set_budget(budget);
                out.push(format!("budget set to {budget} tiles/tick"));
            }
            BuilderCommand::Reload => match &self.settings_source {
                None => out.push("error: no settings file configured".to_string()),
                Some(source) => match source.load() {
                    Ok(settings) => {
                        service.apply_settings(settings);
                        info!(path = %source.path().display(), "config_reloaded");
                        out.push(format!(
                            "settings reloaded: tiles_per_tick={} max_selection_size={} selection_particles={}",
                            settings.tiles_per_tick,
                            settings.max_selection_size,
                            settings.selection_particles
                        ));
                    }
                    Err(error) => {
                        warn!(error = %error, "config_reload_failed");
                        out.push(format!("error: {error}"));
                    }
                },
            },
        }
        out
    }
}

fn run_operation<F>(
    service: &mut WorldService,
    world: &dyn TileWorld,
    player: PlayerId,
    operation: EditOperation,
    out: &mut Vec<String>,
    describe: F,
) where
    F: FnOnce(u64) -> String,
{
    match service.apply(player, operation, world) {
        Ok(Dispatch::Enqueued(summary)) => out.push(describe(summary.coordinates)),
        Ok(_) => out.push(format!(
            "requested {} from the authoritative side",
            operation.label()
        )),
        Err(error) => out.push(format!("error: {error}")),
    }
}

fn push_selection_summary(service: &WorldService, player: PlayerId, out: &mut Vec<String>) {
    let Some(selection) = service.selection(player) else {
        return;
    };
    if let Some(bounds) = selection.bounds().filter(|_| selection.is_valid()) {
        out.push(format!(
            "selection: {} {}x{} ({} tiles)",
            selection.kind().label(),
            bounds.width(),
            bounds.height(),
            selection.tile_count()
        ));
    }
}

fn resolve_tile(catalog: &TypeCatalog, token: &str, out: &mut Vec<String>) -> TileTypeId {
    let resolved = catalog.resolve_tile(token);
    if resolved.fallback {
        out.push(format!(
            "note: unknown tile '{token}', using {}",
            catalog.tile_name(resolved.id)
        ));
    }
    resolved.id
}

fn resolve_wall(catalog: &TypeCatalog, token: &str, out: &mut Vec<String>) -> WallTypeId {
    let resolved = catalog.resolve_wall(token);
    if resolved.fallback {
        out.push(format!(
            "note: unknown wall '{token}', using {}",
            catalog.wall_name(resolved.id)
        ));
    }
    resolved.id
}

fn push_bill_of_materials(catalog: &TypeCatalog, bill: &BillOfMaterials, out: &mut Vec<String>) {
    if bill.is_empty() {
        out.push("selection contains no tiles".to_string());
        return;
    }
    out.push(format!("bill of materials ({} total tiles):", bill.total()));
    for (tile, count) in bill.sorted_by_count().into_iter().take(BOM_REPORT_LIMIT) {
        out.push(format!("  {} (id {tile}): {count}", catalog.tile_name(tile)));
    }
    if bill.distinct_types() > BOM_REPORT_LIMIT {
        out.push(format!(
            "  ... and {} more tile types",
            bill.distinct_types() - BOM_REPORT_LIMIT
        ));
    }
}

fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending_token = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending_token {
                    tokens.push(std::mem::take(&mut current));
                    pending_token = false;
                }
            }
            _ => {
                current.push(ch);
                pending_token = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if pending_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError::new("unexpected extra arguments", usage))
    }
}

fn require_arg_count(
    args: &[String],
    count: usize,
    schema: &str,
    usage: &str,
) -> Result<(), CommandParseError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(CommandParseError::new(
            format!("expected {schema}"),
            usage,
        ))
    }
}

fn parse_coord(raw: &str, axis: &str, usage: &str) -> Result<i32, CommandParseError> {
    raw.parse::<i32>().map_err(|_| {
        CommandParseError::new(format!("invalid {axis} coordinate '{raw}' (expected i32)"), usage)
    })
}

fn parse_position(args: &[String], usage: &str) -> Result<TilePos, CommandParseError> {
    require_arg_count(args, 2, "<x> <y>", usage)?;
    Ok(TilePos::new(
        parse_coord(&args[0], "x", usage)?,
        parse_coord(&args[1], "y", usage)?,
    ))
}

fn parse_help(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_help")?;
    Ok(BuilderCommand::Help)
}

fn parse_pos1(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    parse_position(args, "bo_pos1 <x> <y>").map(BuilderCommand::Pos1)
}

fn parse_pos2(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    parse_position(args, "bo_pos2 <x> <y>").map(BuilderCommand::Pos2)
}

fn parse_center(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    parse_position(args, "bo_center <x> <y>").map(BuilderCommand::Center)
}

fn parse_radius(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    let usage = "bo_radius <blocks>";
    require_arg_count(args, 1, "<blocks>", usage)?;
    let radius = args[0].parse::<i64>().map_err(|_| {
        CommandParseError::new(format!("invalid radius '{}' (expected integer)", args[0]), usage)
    })?;
    Ok(BuilderCommand::Radius(radius))
}

fn parse_sel(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    let usage = "bo_sel [cuboid|sphere]";
    match args {
        [] => Ok(BuilderCommand::Sel(None)),
        [mode] => SelectionKind::parse_mode(mode)
            .map(|kind| BuilderCommand::Sel(Some(kind)))
            .ok_or_else(|| {
                CommandParseError::new(
                    format!("unknown selection mode '{mode}' (expected cuboid|sphere)"),
                    usage,
                )
            }),
        _ => Err(CommandParseError::new("unexpected extra arguments", usage)),
    }
}

fn parse_desel(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_desel")?;
    Ok(BuilderCommand::Desel)
}

fn parse_show(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_show")?;
    Ok(BuilderCommand::Show)
}

fn parse_set(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 1, "<tile>", "bo_set <tile>")?;
    Ok(BuilderCommand::Set {
        tile: args[0].clone(),
    })
}

fn parse_replace(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 2, "<from> <to>", "bo_replace <from> <to>")?;
    Ok(BuilderCommand::Replace {
        from: args[0].clone(),
        to: args[1].clone(),
    })
}

fn parse_remove(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_remove")?;
    Ok(BuilderCommand::Remove)
}

fn parse_walls(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 1, "<tile>", "bo_walls <tile>")?;
    Ok(BuilderCommand::Walls {
        tile: args[0].clone(),
    })
}

fn parse_count(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_count")?;
    Ok(BuilderCommand::Count)
}

fn parse_setwall(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 1, "<wall>", "bo_setwall <wall>")?;
    Ok(BuilderCommand::SetWall {
        wall: args[0].clone(),
    })
}

fn parse_replacewall(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 2, "<from> <to>", "bo_replacewall <from> <to>")?;
    Ok(BuilderCommand::ReplaceWall {
        from: args[0].clone(),
        to: args[1].clone(),
    })
}

fn parse_removewall(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_removewall")?;
    Ok(BuilderCommand::RemoveWall)
}

fn parse_setboth(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_arg_count(args, 2, "<tile> <wall>", "bo_setboth <tile> <wall>")?;
    Ok(BuilderCommand::SetBoth {
        tile: args[0].clone(),
        wall: args[1].clone(),
    })
}

fn parse_place(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    let usage = "bo_place <x> <y> [w] [h] [tile]";
    if !(2..=5).contains(&args.len()) {
        return Err(CommandParseError::new("expected <x> <y> [w] [h] [tile]", usage));
    }
    let origin = parse_position(&args[..2], usage)?;
    let parse_extent = |index: usize, label: &str, fallback: u32| -> Result<u32, CommandParseError> {
        match args.get(index) {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                CommandParseError::new(format!("invalid {label} '{raw}' (expected u32)"), usage)
            }),
            None => Ok(fallback),
        }
    };
    Ok(BuilderCommand::Place {
        origin,
        width: parse_extent(2, "width", DEFAULT_PLACE_WIDTH)?,
        height: parse_extent(3, "height", DEFAULT_PLACE_HEIGHT)?,
        tile: args.get(4).cloned(),
    })
}

fn parse_stop(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_stop")?;
    Ok(BuilderCommand::Stop)
}

fn parse_status(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_status")?;
    Ok(BuilderCommand::Status)
}

fn parse_budget(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    let usage = "bo_budget <tiles>";
    require_arg_count(args, 1, "<tiles>", usage)?;
    let (_, max) = TILES_PER_TICK_RANGE;
    match args[0].parse::<u32>() {
        Ok(budget) if budget <= max => Ok(BuilderCommand::Budget(budget)),
        _ => Err(CommandParseError::new(
            format!("invalid budget '{}' (expected 0..={max})", args[0]),
            usage,
        )),
    }
}

fn parse_reload(args: &[String]) -> Result<BuilderCommand, CommandParseError> {
    require_no_args(args, "bo_reload")?;
    Ok(BuilderCommand::Reload)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::BuilderSettings;
    use crate::world::{ChangeLog, TileGrid};

    const PLAYER: PlayerId = PlayerId(1);

    fn setup() -> (BuilderConsole, WorldService, TileGrid) {
        (
            BuilderConsole::new(),
            WorldService::authoritative(BuilderSettings::default(), TypeCatalog::builtin()),
            TileGrid::new(64, 64).expect("grid"),
        )
    }

    fn run(
        console: &BuilderConsole,
        service: &mut WorldService,
        world: &TileGrid,
        line: &str,
    ) -> Vec<String> {
        console.execute_line(service, world, PLAYER, line)
    }

    #[test]
    fn help_lists_commands_in_registration_order() {
        let (console, mut service, world) = setup();
        let lines = run(&console, &mut service, &world, "bo_help");

        assert_eq!(lines.len(), BUILDER_COMMANDS.len());
        assert_eq!(lines[0], "bo_help - List commands");
        assert_eq!(lines[1], "bo_pos1 <x> <y> - Set first corner of cuboid selection");
        assert_eq!(
            lines[17],
            "bo_place <x> <y> [w] [h] [tile] - Place rectangle of tiles"
        );
        assert_eq!(lines[21], "bo_reload - Reload builder settings from disk");
    }

    #[test]
    fn unknown_command_and_bad_args_report_usage() {
        let (console, mut service, world) = setup();
        assert_eq!(
            run(&console, &mut service, &world, "nope"),
            vec!["error: unknown command 'nope'. try: bo_help"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_pos1 4 west"),
            vec!["error: invalid y coordinate 'west' (expected i32). usage: bo_pos1 <x> <y>"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_sel blob"),
            vec![
                "error: unknown selection mode 'blob' (expected cuboid|sphere). usage: bo_sel [cuboid|sphere]"
            ]
        );
        assert!(run(&console, &mut service, &world, "   ").is_empty());
    }

    #[test]
    fn corners_then_set_enqueues_selection() {
        let (console, mut service, world) = setup();
        run(&console, &mut service, &world, "bo_pos1 0 0");
        let lines = run(&console, &mut service, &world, "/bo_pos2 2 2");
        assert_eq!(
            lines,
            vec!["position 2 set to (2, 2)", "selection: Cuboid 3x3 (9 tiles)"]
        );

        let lines = run(&console, &mut service, &world, "bo_set grass");
        assert_eq!(lines, vec!["enqueued 9 tiles to set to Grass (2)"]);
        assert_eq!(service.queue_len(), 9);
    }

    #[test]
    fn unknown_type_falls_back_with_note() {
        let (console, mut service, world) = setup();
        run(&console, &mut service, &world, "bo_pos1 0 0");
        run(&console, &mut service, &world, "bo_pos2 1 0");
        assert_eq!(
            run(&console, &mut service, &world, "bo_set marble"),
            vec![
                "note: unknown tile 'marble', using Stone",
                "enqueued 2 tiles to set to Stone (1)"
            ]
        );
    }

    #[test]
    fn operations_without_selection_report_error() {
        let (console, mut service, world) = setup();
        let lines = run(&console, &mut service, &world, "bo_remove");
        assert_eq!(lines, vec![format!("error: {}", EditError::InvalidSelection)]);
        assert_eq!(service.queue_len(), 0);
    }

    #[test]
    fn radius_reports_estimate_and_rejections() {
        let (console, mut service, world) = setup();
        assert_eq!(
            run(&console, &mut service, &world, "bo_radius 3"),
            vec!["sphere radius set to 3 blocks. use bo_center to set the center point"]
        );
        run(&console, &mut service, &world, "bo_center 10 10");
        assert_eq!(
            run(&console, &mut service, &world, "bo_radius 2"),
            vec!["sphere radius set to 2 blocks (~13 tiles)"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_radius -1"),
            vec![format!("error: {}", EditError::NonPositiveRadius)]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_radius 100"),
            vec![format!(
                "error: {}",
                EditError::RadiusTooLarge {
                    estimated: 31415,
                    max: 10_000
                }
            )]
        );
        assert_eq!(service.selection(PLAYER).and_then(|s| s.radius()), Some(2));
    }

    #[test]
    fn sel_reports_and_switches_mode() {
        let (console, mut service, world) = setup();
        assert_eq!(
            run(&console, &mut service, &world, "bo_sel"),
            vec!["selection mode: Cuboid"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_sel circle"),
            vec!["selection mode set to Sphere"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_sel"),
            vec!["selection mode: Sphere"]
        );
    }

    #[test]
    fn count_report_lists_top_ten_and_remainder() {
        let (console, mut service, mut world) = setup();
        for x in 0..12 {
            for y in 0..=x {
                world.place_tile(TilePos::new(x, y), TileTypeId(100 + x as u16));
            }
        }
        world.place_tile(TilePos::new(0, 20), TileTypeId(1));
        run(&console, &mut service, &world, "bo_pos1 0 0");
        run(&console, &mut service, &world, "bo_pos2 11 11");

        let lines = run(&console, &mut service, &world, "bo_count");
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], "bill of materials (78 total tiles):");
        assert_eq!(lines[1], "  Unknown (id 111): 12");
        assert_eq!(lines[10], "  Unknown (id 102): 3");
        assert_eq!(lines[11], "  ... and 2 more tile types");
    }

    #[test]
    fn count_on_empty_selection() {
        let (console, mut service, world) = setup();
        run(&console, &mut service, &world, "bo_pos1 0 0");
        run(&console, &mut service, &world, "bo_pos2 3 3");
        assert_eq!(
            run(&console, &mut service, &world, "bo_count"),
            vec!["selection contains no tiles"]
        );
    }

    #[test]
    fn place_uses_defaults_and_stop_clears() {
        let (console, mut service, world) = setup();
        assert_eq!(
            run(&console, &mut service, &world, "bo_place 5 6"),
            vec!["enqueued 12x6 of Stone at (5, 6)"]
        );
        assert_eq!(
            run(&console, &mut service, &world, "bo_place 0 0 2 2 WoodBlock"),
            vec!["enqueued 2x2 of WoodBlock at (0, 0)"]
        );
        assert_eq!(service.queue_len(), 76);
        assert!(run(&console, &mut service, &world, "bo_status")[0]
            .starts_with("queue: 76 operations | budget: 64 tiles/tick | catalog: "));
        assert_eq!(
            run(&console, &mut service, &world, "bo_stop"),
            vec!["queue cleared (76 operations removed)"]
        );
    }

    #[test]
    fn budget_command_changes_next_drain() {
        let (console, mut service, mut world) = setup();
        run(&console, &mut service, &world, "bo_place 0 0 4 4");
        assert_eq!(
            run(&console, &mut service, &world, "bo_budget 3"),
            vec!["budget set to 3 tiles/tick"]
        );
        assert_eq!(service.tick(&mut world, &mut ChangeLog::default()).applied, 3);
        assert!(run(&console, &mut service, &world, "bo_budget 9000")[0].starts_with("error: "));
    }

    #[test]
    fn show_lists_preview_markers() {
        let (console, mut service, world) = setup();
        run(&console, &mut service, &world, "bo_pos1 0 0");
        run(&console, &mut service, &world, "bo_pos2 2 1");
        assert_eq!(
            run(&console, &mut service, &world, "bo_show"),
            vec!["preview (4 markers): (0, 0) (2, 1) (0, 1) (2, 0)"]
        );
        run(&console, &mut service, &world, "bo_desel");
        assert_eq!(
            run(&console, &mut service, &world, "bo_show"),
            vec![format!("error: {}", EditError::InvalidSelection)]
        );
    }

    #[test]
    fn reload_applies_file_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("buildops.json");
        fs::write(&path, r#"{ "tiles_per_tick": 10, "selection_particles": false }"#)
            .expect("write");
        let console = BuilderConsole::with_settings_source(SettingsSource::new(&path));
        let mut service =
            WorldService::authoritative(BuilderSettings::default(), TypeCatalog::builtin());
        let world = TileGrid::new(8, 8).expect("grid");

        let lines = console.execute_line(&mut service, &world, PLAYER, "bo_reload");
        assert_eq!(
            lines,
            vec!["settings reloaded: tiles_per_tick=10 max_selection_size=10000 selection_particles=false"]
        );
        assert_eq!(service.budget(), 10);
        assert_eq!(
            console.execute_line(&mut service, &world, PLAYER, "bo_show"),
            vec!["selection previews are disabled"]
        );

        let (bare, mut other, _) = setup();
        assert_eq!(
            bare.execute_line(&mut other, &world, PLAYER, "bo_reload"),
            vec!["error: no settings file configured"]
        );
    }

    #[test]
    fn observer_console_relays_requests() {
        let console = BuilderConsole::new();
        let mut service = WorldService::observer(BuilderSettings::default(), TypeCatalog::builtin());
        let world = TileGrid::new(8, 8).expect("grid");
        console.execute_line(&mut service, &world, PLAYER, "bo_pos1 0 0");
        console.execute_line(&mut service, &world, PLAYER, "bo_pos2 1 1");

        assert_eq!(
            console.execute_line(&mut service, &world, PLAYER, "bo_setwall wood"),
            vec!["requested setwall from the authoritative side"]
        );
        assert_eq!(
            console.execute_line(&mut service, &world, PLAYER, "bo_stop"),
            vec!["requested queue clear from the authoritative side"]
        );
        assert_eq!(service.take_outbox().len(), 2);
    }

    #[test]
    fn tokenizer_handles_quotes_and_errors() {
        assert_eq!(
            tokenize_line("bo_set \"Wood Block\" x").expect("tokens"),
            vec!["bo_set", "Wood Block", "x"]
        );
        assert_eq!(tokenize_line("a \"\" b").expect("tokens"), vec!["a", "", "b"]);
        assert!(tokenize_line("bo_set \"oops").is_err());
    }

    #[test]
    fn registry_rejects_duplicates_case_insensitively() {
        let mut registry = CommandRegistry::with_builder_commands();
        assert!(registry
            .register("BO_SET", "dup", "", parse_set)
            .is_err());
        assert!(registry.register(" ", "blank", "", parse_set).is_err());
        assert!(registry.lookup("Bo_Status").is_some());
    }
}
