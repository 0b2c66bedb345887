//! # Spatio Features - An embedded geospatial feature query engine
//!
//! Spatio Features stores and queries map features: named, attributed
//! geometries grouped into feature sets. It ships two stores behind one
//! [`FeatureDataStore`] trait and a handle-based geometry workspace for
//! boolean operations and predicates.
//!
//! ## Features
//!
//! - **Geometry Workspace**: handle-based arena with WKT, WKB and SpatiaLite blob I/O,
//!   boolean operations, simplification, buffering and commit/rollback batches
//! - **Spatial Filters**: include/exclude geometry sets evaluated through a private workspace
//! - **In-Memory Store**: fully mutable, R-tree indexed, with bulk modification and rollback
//! - **Tiled Store**: read-only queries over MBTiles archives of Mapbox Vector Tiles with
//!   persistent feature ids and persisted feature-set visibility
//! - **Pull Cursors**: every query streams through a cursor with limit/offset support
//!
//! ## Quick Start
//!
//! ```rust
//! use spatio_features::{GeometryClass, GeometryWorkspace};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ws = GeometryWorkspace::new();
//! let one = ws.create_geometry_from_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))")?;
//! let two = ws.create_geometry_from_wkt("POLYGON((5 0, 25 0, 25 10, 5 10, 5 0))")?;
//!
//! assert!(ws.intersects(one, two)?);
//! let overlap = ws.create_intersection(one, two)?;
//! assert_eq!(ws.geometry_type(overlap)?, GeometryClass::Polygon);
//! # Ok(())
//! # }
//! ```
//!
//! ## Querying a Store
//!
//! ```rust
//! use spatio_features::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let store = RuntimeFeatureDataStore::new();
//! let parks = store.insert_feature_set("city", "parks", "parks", 0.0, 0.0)?;
//! store.insert_feature(
//!     parks.fsid,
//!     &FeatureDefinition::new("central").with_wkt("POLYGON((0 0, 4 0, 4 4, 0 4, 0 0))"),
//! )?;
//!
//! let params = FeatureQueryParameters::new().with_names(["cent%"]);
//! let mut cursor = store.query_features(&params)?;
//! while cursor.move_to_next()? {
//!     println!("{} -> {:?}", cursor.fid()?, cursor.feature()?.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod attributes;
mod batch;
pub mod builder;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod feature;
pub mod filter;
pub mod geometry;
pub mod identity;
pub mod index;
pub mod mbtiles;
pub mod mvt;
pub mod ops;
pub mod persistence;
pub mod query;
pub mod runtime;
pub mod store;
pub mod tile_grid;
pub mod tiled;
pub mod types;
pub mod workspace;

// Re-export error types
pub use error::{ErrorKind, FeatureError, Result};

// Re-export geometry workspace types
pub use codec::{BlobInfo, ByteOrder};
pub use geometry::{Envelope, GeometryClass};
pub use workspace::{GeometryHandle, GeometryWorkspace};

// Re-export spatial filter types
pub use filter::{FilterKind, SpatialFilter, SpatialFilterSet};

// Re-export feature model types
pub use attributes::{AttributeSet, AttributeType, AttributeValue};
pub use feature::{
    AltitudeMode, Feature, FeatureDefinition, FeatureId, FeatureSet, FeatureSetId, RawGeometry,
};
pub use query::{FeatureQueryParameters, FeatureSetQueryParameters};

// Re-export store types
pub use cursor::{FeatureCursor, FeatureSetCursor};
pub use runtime::RuntimeFeatureDataStore;
pub use store::{
    ContentChangedCallback, FeatureDataStore, ListenerId, ModificationFlags, VisibilityFlags,
};
pub use tiled::{SessionState, TiledFeatureDataStore};

// Re-export configuration types
pub use builder::TiledStoreBuilder;
pub use types::Config;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        Envelope, Feature, FeatureCursor, FeatureDataStore, FeatureDefinition, FeatureError,
        FeatureQueryParameters, FeatureSet, FeatureSetCursor, FeatureSetQueryParameters,
        GeometryHandle, GeometryWorkspace, Result, RuntimeFeatureDataStore, SpatialFilter,
        SpatialFilterSet, TiledFeatureDataStore, TiledStoreBuilder,
    };
}
