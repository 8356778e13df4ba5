use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::TileTypeId;
use crate::geometry::TilePos;
use crate::planner::EditOperation;
use crate::selection::{Selection, SelectionKind};

/// A relayed request travels as one line: this prefix followed by the JSON body.
pub const RELAY_LINE_PREFIX: &str = "relay ";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay line must start with 'relay '")]
    MissingPrefix,
    #[error("decode relay message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("encode relay message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Compact description of a selection, enough to rebuild it on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionDescriptor {
    Cuboid { corner1: TilePos, corner2: TilePos },
    Sphere { center: TilePos, radius: u32 },
}

impl RegionDescriptor {
    /// `None` for a selection that is not yet complete.
    pub fn from_selection(selection: &Selection) -> Option<Self> {
        if !selection.is_valid() {
            return None;
        }
        match selection.kind() {
            SelectionKind::Cuboid => Some(Self::Cuboid {
                corner1: selection.point1()?,
                corner2: selection.point2()?,
            }),
            SelectionKind::Sphere => Some(Self::Sphere {
                center: selection.center()?,
                radius: selection.radius()?,
            }),
        }
    }

    pub fn to_selection(self) -> Selection {
        match self {
            Self::Cuboid { corner1, corner2 } => Selection::cuboid(corner1, corner2),
            Self::Sphere { center, radius } => Selection::sphere(center, radius),
        }
    }
}

/// Mutation request sent by a non-authoritative participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    PlaceSingleTile {
        x: i32,
        y: i32,
        #[serde(default = "default_relay_tile")]
        tile_type: TileTypeId,
    },
    EnqueueRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        tile_type: TileTypeId,
    },
    ClearQueue,
    ApplyRegion {
        region: RegionDescriptor,
        operation: EditOperation,
    },
}

impl RelayRequest {
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }

    pub fn from_json(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(RelayError::Decode)
    }

    pub fn encode_line(&self) -> Result<String, RelayError> {
        Ok(format!("{RELAY_LINE_PREFIX}{}", self.to_json()?))
    }

    pub fn decode_line(line: &str) -> Result<Self, RelayError> {
        let body = line
            .trim()
            .strip_prefix(RELAY_LINE_PREFIX.trim_end())
            .ok_or(RelayError::MissingPrefix)?;
        Self::from_json(body.trim_start())
    }
}

/// Single-tile requests with no type carry the default placement type (Stone).
fn default_relay_tile() -> TileTypeId {
    TileTypeId(1)
}

pub fn is_relay_line(line: &str) -> bool {
    line.trim_start().starts_with(RELAY_LINE_PREFIX)
}
