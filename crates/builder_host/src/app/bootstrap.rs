use std::path::Path;

use buildops::{
    BuilderConsole, CatalogError, LoopConfig, SettingsSource, TileGrid, TypeCatalog, WorldService,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::buildport::Buildport;
use super::loop_runner::AppError;

const CATALOG_PATH_ENV_VAR: &str = "BUILDOPS_CATALOG";
const WORLD_SIZE_ENV_VAR: &str = "BUILDOPS_WORLD_SIZE";

pub(crate) struct HostWiring {
    pub(crate) config: LoopConfig,
    pub(crate) service: WorldService,
    pub(crate) world: TileGrid,
    pub(crate) console: BuilderConsole,
    pub(crate) buildport: Buildport,
}

pub(crate) fn build_host() -> Result<HostWiring, AppError> {
    init_tracing();
    info!("=== BuildOps Host Startup ===");

    let settings_source = SettingsSource::from_env();
    let settings = settings_source.load()?;
    let catalog = load_catalog(std::env::var(CATALOG_PATH_ENV_VAR).ok().as_deref())?;

    let mut config = LoopConfig::default();
    if let Some((width, height)) =
        parse_world_size(std::env::var(WORLD_SIZE_ENV_VAR).ok().as_deref())
    {
        config.world_width = width;
        config.world_height = height;
    }
    let config = config.normalized();
    let world = TileGrid::new(config.world_width, config.world_height)?;

    info!(
        config_path = %settings_source.path().display(),
        tiles_per_tick = settings.tiles_per_tick,
        max_selection_size = settings.max_selection_size,
        selection_particles = settings.selection_particles,
        catalog_digest = %catalog.digest_hex(),
        tile_types = catalog.tile_count(),
        wall_types = catalog.wall_count(),
        world_width = config.world_width,
        world_height = config.world_height,
        "host_configured"
    );

    Ok(HostWiring {
        config,
        service: WorldService::authoritative(settings, catalog),
        world,
        console: BuilderConsole::with_settings_source(settings_source),
        buildport: Buildport::from_env(),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn load_catalog(raw_path: Option<&str>) -> Result<TypeCatalog, CatalogError> {
    match raw_path.map(str::trim).filter(|path| !path.is_empty()) {
        Some(path) => {
            let catalog = TypeCatalog::load_xml_file(Path::new(path))?;
            info!(path, "catalog_loaded_from_file");
            Ok(catalog)
        }
        None => Ok(TypeCatalog::builtin()),
    }
}

/// `"<width>x<height>"`; anything else warns and keeps the default size.
fn parse_world_size(raw: Option<&str>) -> Option<(u32, u32)> {
    let value = raw?.trim();
    let parsed = value
        .split_once(['x', 'X'])
        .and_then(|(width, height)| {
            Some((width.trim().parse::<u32>().ok()?, height.trim().parse::<u32>().ok()?))
        })
        .filter(|(width, height)| *width > 0 && *height > 0);
    if parsed.is_none() {
        warn!(value, "world_size_invalid_using_default");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn world_size_parses_dimensions() {
        assert_eq!(parse_world_size(None), None);
        assert_eq!(parse_world_size(Some("200x100")), Some((200, 100)));
        assert_eq!(parse_world_size(Some(" 64 X 32 ")), Some((64, 32)));
        assert_eq!(parse_world_size(Some("0x10")), None);
        assert_eq!(parse_world_size(Some("wide")), None);
    }

    #[test]
    fn catalog_defaults_to_builtin() {
        let catalog = load_catalog(None).expect("builtin");
        assert_eq!(catalog.digest_hex(), TypeCatalog::builtin().digest_hex());
        let blank = load_catalog(Some("  ")).expect("builtin");
        assert_eq!(blank.tile_count(), catalog.tile_count());
    }

    #[test]
    fn catalog_loads_from_xml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"<Catalog><Tile name="Stone" id="1"/><Tile name="Marble" id="357"/><Wall name="Marble" id="179"/></Catalog>"#
        )
        .expect("write");
        let path = file.path().to_string_lossy().to_string();

        let catalog = load_catalog(Some(&path)).expect("catalog");
        assert_eq!(catalog.tile_count(), 2);
        assert_eq!(catalog.resolve_tile("marble").id.0, 357);
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.xml");
        assert!(load_catalog(path.to_str()).is_err());
    }
}
