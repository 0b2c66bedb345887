//! Query parameter records and the predicates every store shares.

use crate::feature::{Feature, FeatureId, FeatureSet, FeatureSetId};
use crate::geometry::Envelope;
use crate::ops;
use geo::Geometry;
use std::collections::BTreeSet;

/// Parameters of a feature query.
///
/// When `ids` is set the lookup is exact and neither the spatial filter nor
/// the resolution is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureQueryParameters {
    pub spatial_filter: Option<Geometry<f64>>,
    /// Target resolution in meters/pixel
    pub max_resolution: Option<f64>,
    pub visible_only: bool,
    pub ids: Option<BTreeSet<FeatureId>>,
    /// Feature name patterns; `%` and `*` match any run of characters
    pub names: Option<BTreeSet<String>>,
    pub feature_set_ids: Option<BTreeSet<FeatureSetId>>,
    pub feature_set_names: Option<BTreeSet<String>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FeatureQueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatial_filter(mut self, geometry: Geometry<f64>) -> Self {
        self.spatial_filter = Some(geometry);
        self
    }

    pub fn with_max_resolution(mut self, resolution: f64) -> Self {
        self.max_resolution = Some(resolution);
        self
    }

    pub fn with_visible_only(mut self, visible_only: bool) -> Self {
        self.visible_only = visible_only;
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = FeatureId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_feature_set_ids(mut self, ids: impl IntoIterator<Item = FeatureSetId>) -> Self {
        self.feature_set_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_feature_set_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.feature_set_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Envelope of the spatial filter, if one is set and non-empty.
    pub fn spatial_envelope(&self) -> Option<Envelope> {
        self.spatial_filter.as_ref().and_then(Envelope::of)
    }
}

/// Parameters of a feature-set query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSetQueryParameters {
    pub ids: Option<BTreeSet<FeatureSetId>>,
    pub names: Option<BTreeSet<String>>,
    pub providers: Option<BTreeSet<String>>,
    pub types: Option<BTreeSet<String>>,
    pub visible_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FeatureSetQueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = FeatureSetId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_providers<S: Into<String>>(mut self, providers: impl IntoIterator<Item = S>) -> Self {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_visible_only(mut self, visible_only: bool) -> Self {
        self.visible_only = visible_only;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Wildcard match where `%` and `*` stand for any run of characters.
pub fn pattern_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['%', '*']) {
        return pattern == text;
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '%' || p[pi] == '*') {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '%' || *c == '*')
}

fn any_pattern(patterns: &BTreeSet<String>, text: &str) -> bool {
    patterns.iter().any(|p| pattern_match(p, text))
}

/// Feature-set id/name restrictions of a feature query.
pub fn matches_feature_set(params: &FeatureQueryParameters, fsid: FeatureSetId, name: &str) -> bool {
    if let Some(ids) = &params.feature_set_ids {
        if !ids.contains(&fsid) {
            return false;
        }
    }
    if let Some(names) = &params.feature_set_names {
        if !any_pattern(names, name) {
            return false;
        }
    }
    true
}

/// Feature-level restrictions of a feature query, excluding visibility and
/// the spatial filter.
pub fn matches_feature(params: &FeatureQueryParameters, feature: &Feature) -> bool {
    if let Some(ids) = &params.ids {
        if !ids.contains(&feature.fid) {
            return false;
        }
    }
    if let Some(names) = &params.names {
        match &feature.name {
            Some(name) if any_pattern(names, name) => {}
            _ => return false,
        }
    }
    true
}

/// Exact spatial predicate: features without geometry never match a filter.
pub fn matches_spatial_filter(filter: Option<&Geometry<f64>>, feature: &Feature) -> bool {
    match (filter, &feature.geometry) {
        (None, _) => true,
        (Some(filter), Some(geometry)) => ops::intersects(filter, geometry),
        (Some(_), None) => false,
    }
}

/// Restrictions of a feature-set query, excluding visibility.
pub fn matches_set(params: &FeatureSetQueryParameters, set: &FeatureSet) -> bool {
    if let Some(ids) = &params.ids {
        if !ids.contains(&set.fsid) {
            return false;
        }
    }
    if let Some(names) = &params.names {
        if !any_pattern(names, &set.name) {
            return false;
        }
    }
    if let Some(providers) = &params.providers {
        if !providers.contains(&set.provider) {
            return false;
        }
    }
    if let Some(types) = &params.types {
        if !types.contains(&set.set_type) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_match() {
        assert!(pattern_match("roads", "roads"));
        assert!(!pattern_match("roads", "Roads"));
        assert!(pattern_match("%", "anything"));
        assert!(pattern_match("water%", "waterway"));
        assert!(pattern_match("*way", "waterway"));
        assert!(pattern_match("w%t%y", "waterway"));
        assert!(!pattern_match("w%x", "waterway"));
        assert!(pattern_match("%", ""));
    }

    #[test]
    fn test_feature_set_restrictions() {
        let params = FeatureQueryParameters::new()
            .with_feature_set_ids([1, 2])
            .with_feature_set_names(["water%"]);
        assert!(matches_feature_set(&params, 1, "water"));
        assert!(!matches_feature_set(&params, 3, "water"));
        assert!(!matches_feature_set(&params, 2, "roads"));
    }

    #[test]
    fn test_set_query_restrictions() {
        let set = FeatureSet {
            fsid: 4,
            provider: "MVT".into(),
            set_type: "MVT".into(),
            name: "poi".into(),
            min_resolution: 0.0,
            max_resolution: 0.0,
            version: 1,
        };
        assert!(matches_set(&FeatureSetQueryParameters::new(), &set));
        assert!(matches_set(
            &FeatureSetQueryParameters::new().with_providers(["MVT"]).with_names(["p%"]),
            &set
        ));
        assert!(!matches_set(&FeatureSetQueryParameters::new().with_types(["KML"]), &set));
        assert!(!matches_set(&FeatureSetQueryParameters::new().with_ids([5]), &set));
    }
}
