//! Include/exclude spatial filters evaluated through a private geometry
//! workspace.

use crate::error::{FeatureError, Result};
use crate::feature::Feature;
use crate::geometry::Envelope;
use crate::workspace::{GeometryHandle, GeometryWorkspace};
use geo::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
pub struct SpatialFilter {
    pub kind: FilterKind,
    pub geometry: Geometry<f64>,
}

impl SpatialFilter {
    pub fn include(geometry: Geometry<f64>) -> Self {
        Self {
            kind: FilterKind::Include,
            geometry,
        }
    }

    pub fn exclude(geometry: Geometry<f64>) -> Self {
        Self {
            kind: FilterKind::Exclude,
            geometry,
        }
    }
}

/// Deletes a temporary workspace handle when it goes out of scope.
struct HandleGuard<'a> {
    workspace: &'a GeometryWorkspace,
    handle: GeometryHandle,
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.workspace.delete_geometry(self.handle) {
            tracing::warn!(error = %e, "failed to release filter candidate geometry");
        }
    }
}

/// A set of include and exclude geometries.
///
/// A candidate passes when it touches (is contained by or intersects) at
/// least one include geometry, or there are no include geometries, and it
/// touches no exclude geometry.
///
/// # Examples
///
/// ```rust
/// use spatio_features::{SpatialFilter, SpatialFilterSet, geometry::parse_wkt};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut filters = SpatialFilterSet::new();
/// filters.set_filters(&[SpatialFilter::include(parse_wkt(
///     "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))",
/// )?)])?;
///
/// assert!(filters.accept(&parse_wkt("POINT(5 5)")?)?);
/// assert!(!filters.accept(&parse_wkt("POINT(50 50)")?)?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SpatialFilterSet {
    workspace: GeometryWorkspace,
    includes: Vec<GeometryHandle>,
    excludes: Vec<GeometryHandle>,
    include_bounds: Option<Envelope>,
}

impl SpatialFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every installed filter.
    ///
    /// Include geometries must be non-empty. An empty exclude geometry
    /// touches nothing and is dropped. On error the previously installed
    /// filters stay in place.
    pub fn set_filters(&mut self, filters: &[SpatialFilter]) -> Result<()> {
        for (i, filter) in filters.iter().enumerate() {
            if filter.kind == FilterKind::Include && Envelope::of(&filter.geometry).is_none() {
                return Err(FeatureError::invalid(format!(
                    "spatial filter {} has an empty geometry",
                    i
                )));
            }
        }

        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        let mut include_bounds: Option<Envelope> = None;
        for filter in filters {
            if filter.kind == FilterKind::Exclude && Envelope::of(&filter.geometry).is_none() {
                continue;
            }
            let handle = match self.workspace.create_geometry(filter.geometry.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    self.release(includes.iter().chain(excludes.iter()));
                    return Err(e);
                }
            };
            match filter.kind {
                FilterKind::Include => {
                    if let Some(env) = Envelope::of(&filter.geometry) {
                        include_bounds = Some(match include_bounds {
                            Some(bounds) => bounds.union(&env),
                            None => env,
                        });
                    }
                    includes.push(handle);
                }
                FilterKind::Exclude => excludes.push(handle),
            }
        }

        let old_includes = std::mem::replace(&mut self.includes, includes);
        let old_excludes = std::mem::replace(&mut self.excludes, excludes);
        self.include_bounds = include_bounds;
        self.release(old_includes.iter().chain(old_excludes.iter()));
        Ok(())
    }

    fn release<'a>(&self, handles: impl Iterator<Item = &'a GeometryHandle>) {
        for handle in handles {
            if let Err(e) = self.workspace.delete_geometry(*handle) {
                tracing::warn!(error = %e, "failed to release spatial filter geometry");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Evaluate a candidate geometry against the installed filters.
    pub fn accept(&self, candidate: &Geometry<f64>) -> Result<bool> {
        if self.is_empty() {
            return Ok(true);
        }

        let guard = HandleGuard {
            workspace: &self.workspace,
            handle: self.workspace.create_geometry(candidate.clone())?,
        };
        let ws = guard.workspace;
        let h = guard.handle;

        let mut included = self.includes.is_empty();
        for filter in &self.includes {
            if ws.contains(*filter, h)? || ws.intersects(*filter, h)? {
                included = true;
                break;
            }
        }
        if !included {
            return Ok(false);
        }

        for filter in &self.excludes {
            if ws.contains(*filter, h)? || ws.intersects(*filter, h)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a feature; features without geometry only pass when no
    /// include filter is installed.
    pub fn accept_feature(&self, feature: &Feature) -> Result<bool> {
        match &feature.geometry {
            Some(geometry) => self.accept(geometry),
            None => Ok(self.includes.is_empty()),
        }
    }

    /// Union of the include geometries' envelopes, or the whole world when no
    /// include filter is installed.
    pub fn include_bounding_box(&self) -> Envelope {
        self.include_bounds.unwrap_or_else(Envelope::world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_wkt;

    fn square() -> Geometry<f64> {
        parse_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))").unwrap()
    }

    #[test]
    fn test_include_only() {
        let mut filters = SpatialFilterSet::new();
        filters.set_filters(&[SpatialFilter::include(square())]).unwrap();

        assert!(filters.accept(&parse_wkt("POLYGON((2 2, 3 2, 3 3, 2 2))").unwrap()).unwrap());
        assert!(!filters.accept(&parse_wkt("POLYGON((20 20, 30 20, 30 30, 20 20))").unwrap()).unwrap());
        assert!(filters.accept(&parse_wkt("LINESTRING(-5 5, 5 5)").unwrap()).unwrap());
        // the candidate handle is released after every evaluation
        assert_eq!(filters.workspace.len(), 1);
    }

    #[test]
    fn test_exclude_wins() {
        let mut filters = SpatialFilterSet::new();
        filters
            .set_filters(&[
                SpatialFilter::include(square()),
                SpatialFilter::exclude(parse_wkt("POLYGON((0 0, 2 0, 2 2, 0 2, 0 0))").unwrap()),
            ])
            .unwrap();

        assert!(!filters.accept(&parse_wkt("POINT(1 1)").unwrap()).unwrap());
        assert!(filters.accept(&parse_wkt("POINT(8 8)").unwrap()).unwrap());
    }

    #[test]
    fn test_exclude_only() {
        let mut filters = SpatialFilterSet::new();
        filters.set_filters(&[SpatialFilter::exclude(square())]).unwrap();
        assert!(filters.accept(&parse_wkt("POINT(50 50)").unwrap()).unwrap());
        assert!(!filters.accept(&parse_wkt("POINT(5 5)").unwrap()).unwrap());
        assert_eq!(filters.include_bounding_box(), Envelope::world());
    }

    #[test]
    fn test_empty_set_accepts_everything() {
        let filters = SpatialFilterSet::new();
        assert!(filters.accept(&parse_wkt("POINT(500 500)").unwrap()).unwrap());
        assert_eq!(filters.include_bounding_box(), Envelope::world());
    }

    #[test]
    fn test_include_bounds_union() {
        let mut filters = SpatialFilterSet::new();
        filters
            .set_filters(&[
                SpatialFilter::include(square()),
                SpatialFilter::include(parse_wkt("POINT(20 -5)").unwrap()),
            ])
            .unwrap();
        assert_eq!(filters.include_bounding_box(), Envelope::new(0.0, -5.0, 20.0, 10.0));
    }

    #[test]
    fn test_failed_replacement_keeps_old_filters() {
        let mut filters = SpatialFilterSet::new();
        filters.set_filters(&[SpatialFilter::include(square())]).unwrap();

        let empty = crate::geometry::empty();
        assert!(filters
            .set_filters(&[SpatialFilter::exclude(square()), SpatialFilter::include(empty)])
            .is_err());

        assert_eq!(filters.includes.len(), 1);
        assert!(filters.excludes.is_empty());
        assert!(!filters.accept(&parse_wkt("POINT(50 50)").unwrap()).unwrap());
    }

    #[test]
    fn test_empty_exclude_is_accepted() {
        let mut filters = SpatialFilterSet::new();
        filters
            .set_filters(&[
                SpatialFilter::include(square()),
                SpatialFilter::exclude(crate::geometry::empty()),
            ])
            .unwrap();
        assert!(filters.excludes.is_empty());
        assert!(filters.accept(&parse_wkt("POINT(5 5)").unwrap()).unwrap());
        assert!(!filters.accept(&parse_wkt("POINT(50 50)").unwrap()).unwrap());
    }

    #[test]
    fn test_replacement_releases_old_handles() {
        let mut filters = SpatialFilterSet::new();
        filters.set_filters(&[SpatialFilter::include(square())]).unwrap();
        filters
            .set_filters(&[SpatialFilter::exclude(square()), SpatialFilter::exclude(square())])
            .unwrap();
        assert_eq!(filters.workspace.len(), 2);
        filters.set_filters(&[]).unwrap();
        assert!(filters.workspace.is_empty());
    }
}
