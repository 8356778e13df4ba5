use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const UNKNOWN_TYPE_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileTypeId(pub u16);

/// Wall type id. The zero value is [`WallTypeId::NONE`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WallTypeId(pub u16);

impl WallTypeId {
    pub const NONE: WallTypeId = WallTypeId(0);
}

impl fmt::Display for TileTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WallTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const BUILTIN_TILES: &[(&str, u16)] = &[
    ("Dirt", 0),
    ("Stone", 1),
    ("Grass", 2),
    ("Iron", 6),
    ("Copper", 7),
    ("Gold", 8),
    ("Silver", 9),
    ("Platforms", 19),
    ("WoodBlock", 30),
    ("GrayBrick", 38),
    ("RedBrick", 39),
    ("ClayBlock", 40),
    ("Sand", 53),
    ("Glass", 54),
    ("Obsidian", 56),
    ("Ash", 57),
    ("Mud", 59),
    ("SnowBlock", 147),
    ("IceBlock", 161),
];

const BUILTIN_WALLS: &[(&str, u16)] = &[
    ("Stone", 1),
    ("DirtUnsafe", 2),
    ("Wood", 4),
    ("GrayBrick", 5),
    ("RedBrick", 6),
    ("Dirt", 16),
    ("Glass", 21),
    ("Planked", 27),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed catalog XML at line {}, column {}: {message}", .location.line, .location.column)]
    XmlMalformed {
        message: String,
        location: SourceLocation,
    },
    #[error("{message} (line {}, column {})", .location.line, .location.column)]
    InvalidEntry {
        message: String,
        location: SourceLocation,
    },
}

/// Outcome of resolving a player-supplied type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<T> {
    pub id: T,
    /// Set when the token did not name a known type and the default was used instead.
    pub fallback: bool,
}

#[derive(Debug, Clone, Default)]
struct TypeTable {
    names_by_id: BTreeMap<u16, String>,
    ids_by_lower_name: HashMap<String, u16>,
    default_id: u16,
}

impl TypeTable {
    fn insert(&mut self, name: &str, id: u16) -> Result<(), String> {
        let lower = name.to_ascii_lowercase();
        if self.ids_by_lower_name.contains_key(&lower) {
            return Err(format!("duplicate type name '{name}'"));
        }
        if self.names_by_id.contains_key(&id) {
            return Err(format!("duplicate type id {id}"));
        }
        self.ids_by_lower_name.insert(lower, id);
        self.names_by_id.insert(id, name.to_string());
        Ok(())
    }

    fn resolve(&self, token: &str) -> (u16, bool) {
        let trimmed = token.trim();
        if let Ok(id) = trimmed.parse::<u16>() {
            return (id, false);
        }
        match self.ids_by_lower_name.get(&trimmed.to_ascii_lowercase()) {
            Some(id) => (*id, false),
            None => (self.default_id, true),
        }
    }

    fn name_of(&self, id: u16) -> &str {
        self.names_by_id
            .get(&id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_TYPE_NAME)
    }

    fn feed_digest(&self, label: &str, hasher: &mut Sha256) {
        hasher.update(label.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.default_id.to_le_bytes());
        for (id, name) in &self.names_by_id {
            hasher.update(id.to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
    }
}

/// Name/id tables for tile and wall types, built once at startup.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    tiles: TypeTable,
    walls: TypeTable,
    digest_hex: String,
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TypeCatalog {
    pub fn builtin() -> Self {
        let mut tiles = TypeTable::default();
        for (name, id) in BUILTIN_TILES {
            // Built-in tables are unique by construction.
            let _ = tiles.insert(name, *id);
        }
        let mut walls = TypeTable::default();
        for (name, id) in BUILTIN_WALLS {
            let _ = walls.insert(name, *id);
        }
        tiles.default_id = 1;
        walls.default_id = 1;
        Self::from_tables(tiles, walls)
    }

    pub fn load_xml_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_xml(&raw)
    }

    /// Parses `<Catalog defaultTile=".." defaultWall=".."><Tile name=".." id=".."/>...</Catalog>`.
    pub fn parse_xml(raw: &str) -> Result<Self, CatalogError> {
        let doc = Document::parse(raw).map_err(|error| CatalogError::XmlMalformed {
            message: error.to_string(),
            location: SourceLocation {
                line: error.pos().row as usize,
                column: error.pos().col as usize,
            },
        })?;

        let root = doc.root_element();
        if root.tag_name().name() != "Catalog" {
            return Err(invalid_at(&doc, root, "root element must be <Catalog>"));
        }

        let mut tiles = TypeTable::default();
        let mut walls = TypeTable::default();
        for child in root.children().filter(|node| node.is_element()) {
            let table = match child.tag_name().name() {
                "Tile" => &mut tiles,
                "Wall" => &mut walls,
                other => {
                    return Err(invalid_at(
                        &doc,
                        child,
                        format!("unsupported entry <{other}>; expected <Tile> or <Wall>"),
                    ))
                }
            };
            let name = required_attribute(&doc, child, "name")?;
            let raw_id = required_attribute(&doc, child, "id")?;
            let id = raw_id.parse::<u16>().map_err(|_| {
                invalid_at(&doc, child, format!("id '{raw_id}' is not a valid u16"))
            })?;
            table
                .insert(name, id)
                .map_err(|message| invalid_at(&doc, child, message))?;
        }

        tiles.default_id = resolve_default(&doc, root, &tiles, "defaultTile")?;
        walls.default_id = resolve_default(&doc, root, &walls, "defaultWall")?;
        Ok(Self::from_tables(tiles, walls))
    }

    fn from_tables(tiles: TypeTable, walls: TypeTable) -> Self {
        let mut hasher = Sha256::new();
        tiles.feed_digest("tiles", &mut hasher);
        walls.feed_digest("walls", &mut hasher);
        let digest_hex = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Self {
            tiles,
            walls,
            digest_hex,
        }
    }

    /// Numeric ids are taken as-is; names match case-insensitively.
    pub fn resolve_tile(&self, token: &str) -> Resolved<TileTypeId> {
        let (id, fallback) = self.tiles.resolve(token);
        Resolved {
            id: TileTypeId(id),
            fallback,
        }
    }

    pub fn resolve_wall(&self, token: &str) -> Resolved<WallTypeId> {
        let (id, fallback) = self.walls.resolve(token);
        Resolved {
            id: WallTypeId(id),
            fallback,
        }
    }

    pub fn tile_name(&self, id: TileTypeId) -> &str {
        self.tiles.name_of(id.0)
    }

    pub fn wall_name(&self, id: WallTypeId) -> &str {
        self.walls.name_of(id.0)
    }

    pub fn default_tile(&self) -> TileTypeId {
        TileTypeId(self.tiles.default_id)
    }

    pub fn default_wall(&self) -> WallTypeId {
        WallTypeId(self.walls.default_id)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.names_by_id.len()
    }

    pub fn wall_count(&self) -> usize {
        self.walls.names_by_id.len()
    }

    pub fn digest_hex(&self) -> &str {
        &self.digest_hex
    }
}

fn resolve_default(
    doc: &Document<'_>,
    root: Node<'_, '_>,
    table: &TypeTable,
    attribute: &str,
) -> Result<u16, CatalogError> {
    match root.attribute(attribute) {
        None => Ok(table.names_by_id.keys().next().copied().unwrap_or(0)),
        Some(token) => {
            let (id, fallback) = table.resolve(token);
            if fallback {
                Err(invalid_at(
                    doc,
                    root,
                    format!("{attribute} '{token}' does not name a catalog entry"),
                ))
            } else {
                Ok(id)
            }
        }
    }
}

fn required_attribute<'a>(
    doc: &Document<'_>,
    node: Node<'a, '_>,
    attribute: &str,
) -> Result<&'a str, CatalogError> {
    match node.attribute(attribute).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(invalid_at(
            doc,
            node,
            format!(
                "missing required attribute '{attribute}' on <{}>",
                node.tag_name().name()
            ),
        )),
    }
}

fn invalid_at(doc: &Document<'_>, node: Node<'_, '_>, message: impl Into<String>) -> CatalogError {
    let pos = doc.text_pos_at(node.range().start);
    CatalogError::InvalidEntry {
        message: message.into(),
        location: SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn builtin_resolves_names_case_insensitively() {
        let catalog = TypeCatalog::builtin();
        assert_eq!(
            catalog.resolve_tile("stone"),
            Resolved {
                id: TileTypeId(1),
                fallback: false
            }
        );
        assert_eq!(catalog.resolve_tile("WOODBLOCK").id, TileTypeId(30));
        assert_eq!(catalog.resolve_wall("glass").id, WallTypeId(21));
    }

    #[test]
    fn numeric_tokens_bypass_name_lookup() {
        let catalog = TypeCatalog::builtin();
        let resolved = catalog.resolve_tile("412");
        assert_eq!(resolved.id, TileTypeId(412));
        assert!(!resolved.fallback);
        assert_eq!(catalog.tile_name(resolved.id), "Unknown");
    }

    #[test]
    fn unknown_names_fall_back_to_stone() {
        let catalog = TypeCatalog::builtin();
        let tile = catalog.resolve_tile("unobtainium");
        assert_eq!(tile.id, TileTypeId(1));
        assert!(tile.fallback);
        let wall = catalog.resolve_wall("nope");
        assert_eq!(wall.id, WallTypeId(1));
        assert!(wall.fallback);
    }

    #[test]
    fn xml_catalog_parses_tables_and_defaults() {
        let catalog = TypeCatalog::parse_xml(
            r#"<Catalog defaultTile="Brick" defaultWall="Plank">
                <Tile name="Loam" id="0"/>
                <Tile name="Brick" id="5"/>
                <Wall name="Plank" id="3"/>
            </Catalog>"#,
        )
        .expect("catalog");

        assert_eq!(catalog.tile_count(), 2);
        assert_eq!(catalog.wall_count(), 1);
        assert_eq!(catalog.default_tile(), TileTypeId(5));
        assert_eq!(catalog.resolve_tile("whatever").id, TileTypeId(5));
        assert_eq!(catalog.wall_name(WallTypeId(3)), "Plank");
    }

    #[test]
    fn xml_catalog_rejects_duplicates_with_location() {
        let error = TypeCatalog::parse_xml(
            "<Catalog>\n<Tile name=\"A\" id=\"1\"/>\n<Tile name=\"B\" id=\"1\"/>\n</Catalog>",
        )
        .expect_err("duplicate id");
        match error {
            CatalogError::InvalidEntry { message, location } => {
                assert!(message.contains("duplicate type id 1"));
                assert_eq!(location.line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn xml_catalog_rejects_bad_root_and_ids() {
        assert!(matches!(
            TypeCatalog::parse_xml("<Defs/>"),
            Err(CatalogError::InvalidEntry { .. })
        ));
        assert!(matches!(
            TypeCatalog::parse_xml(r#"<Catalog><Tile name="A" id="-4"/></Catalog>"#),
            Err(CatalogError::InvalidEntry { .. })
        ));
        assert!(matches!(
            TypeCatalog::parse_xml("<Catalog>"),
            Err(CatalogError::XmlMalformed { .. })
        ));
    }

    #[test]
    fn digest_changes_with_contents() {
        let builtin = TypeCatalog::builtin();
        assert_eq!(builtin.digest_hex().len(), 64);
        assert_eq!(builtin.digest_hex(), TypeCatalog::builtin().digest_hex());

        let custom =
            TypeCatalog::parse_xml(r#"<Catalog><Tile name="A" id="1"/></Catalog>"#).expect("xml");
        assert_ne!(builtin.digest_hex(), custom.digest_hex());
    }

    #[test]
    fn load_xml_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"<Catalog><Wall name="Moss" id="9"/></Catalog>"#).expect("write");
        let catalog = TypeCatalog::load_xml_file(file.path()).expect("catalog");
        assert_eq!(catalog.resolve_wall("moss").id, WallTypeId(9));
    }
}
