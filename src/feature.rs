//! Feature and feature-set records shared by every store.

use crate::attributes::AttributeSet;
use crate::codec;
use crate::error::Result;
use crate::geometry::{self, Envelope};
use geo::Geometry;
use serde::{Deserialize, Serialize};

/// Persistent feature identifier, unique within one store instance.
pub type FeatureId = i64;

/// Feature-set identifier, unique within one store instance.
pub type FeatureSetId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AltitudeMode {
    #[default]
    ClampToGround,
    Relative,
    Absolute,
}

/// A materialized feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: FeatureId,
    pub fsid: FeatureSetId,
    pub name: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    pub altitude_mode: AltitudeMode,
    pub extrude: f64,
    pub style: Option<String>,
    pub attributes: AttributeSet,
    pub version: i64,
}

impl Feature {
    pub fn envelope(&self) -> Option<Envelope> {
        self.geometry.as_ref().and_then(Envelope::of)
    }
}

/// A named group of features from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub fsid: FeatureSetId,
    pub provider: String,
    #[serde(rename = "type")]
    pub set_type: String,
    pub name: String,
    /// Coarsest resolution (meters/pixel) at which the set is relevant, `0`
    /// for unbounded.
    pub min_resolution: f64,
    /// Finest resolution (meters/pixel) at which the set is relevant, `0`
    /// for unbounded.
    pub max_resolution: f64,
    pub version: i64,
}

impl FeatureSet {
    /// Whether the set is relevant at resolution `r`.
    pub fn is_relevant_at(&self, r: f64) -> bool {
        (self.min_resolution == 0.0 || r <= self.min_resolution)
            && (self.max_resolution == 0.0 || r >= self.max_resolution)
    }
}

/// A geometry in one of the accepted encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum RawGeometry {
    Wkt(String),
    Wkb(Vec<u8>),
    Blob(Vec<u8>),
    Geometry(Geometry<f64>),
}

impl RawGeometry {
    pub fn decode(&self) -> Result<Geometry<f64>> {
        match self {
            RawGeometry::Wkt(text) => geometry::parse_wkt(text),
            RawGeometry::Wkb(data) => codec::read_wkb(data),
            RawGeometry::Blob(data) => codec::read_blob(data).map(|(g, _)| g),
            RawGeometry::Geometry(g) => Ok(geometry::canonicalize(g.clone())),
        }
    }
}

/// The caller-supplied content of a feature to insert or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDefinition {
    pub name: Option<String>,
    pub geometry: Option<RawGeometry>,
    pub altitude_mode: AltitudeMode,
    pub extrude: f64,
    pub style: Option<String>,
    pub attributes: AttributeSet,
}

impl FeatureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_geometry(mut self, geometry: RawGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_wkt(self, wkt: impl Into<String>) -> Self {
        self.with_geometry(RawGeometry::Wkt(wkt.into()))
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_altitude(mut self, mode: AltitudeMode, extrude: f64) -> Self {
        self.altitude_mode = mode;
        self.extrude = extrude;
        self
    }

    /// Decode the geometry and stamp identity onto the definition.
    pub(crate) fn materialize(
        &self,
        fid: FeatureId,
        fsid: FeatureSetId,
        version: i64,
    ) -> Result<Feature> {
        let geometry = self.geometry.as_ref().map(RawGeometry::decode).transpose()?;
        Ok(Feature {
            fid,
            fsid,
            name: self.name.clone(),
            geometry,
            altitude_mode: self.altitude_mode,
            extrude: self.extrude,
            style: self.style.clone(),
            attributes: self.attributes.clone(),
            version,
        })
    }
}
