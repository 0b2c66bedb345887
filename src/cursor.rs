//! Pull-style cursors over query results.
//!
//! A cursor starts before its first row. [`FeatureCursor::move_to_next`]
//! returns `Ok(false)` once exhausted; per-row failures are reported as
//! errors, never conflated with exhaustion.

use crate::error::{FeatureError, Result};
use crate::feature::{Feature, FeatureId, FeatureSet, FeatureSetId};

pub trait FeatureCursor: Send {
    /// Advance to the next row, `Ok(false)` when there is none.
    fn move_to_next(&mut self) -> Result<bool>;

    /// The current row. `IllegalState` before the first `move_to_next` or
    /// after exhaustion.
    fn feature(&self) -> Result<&Feature>;

    fn fid(&self) -> Result<FeatureId> {
        self.feature().map(|f| f.fid)
    }

    fn fsid(&self) -> Result<FeatureSetId> {
        self.feature().map(|f| f.fsid)
    }

    fn version(&self) -> Result<i64> {
        self.feature().map(|f| f.version)
    }
}

pub trait FeatureSetCursor: Send {
    fn move_to_next(&mut self) -> Result<bool>;

    fn feature_set(&self) -> Result<&FeatureSet>;
}

fn not_positioned() -> FeatureError {
    FeatureError::illegal_state("cursor is not positioned on a row")
}

/// Cursor over an already materialized result list.
#[derive(Debug)]
pub struct VecCursor<T> {
    items: std::vec::IntoIter<T>,
    current: Option<T>,
}

impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
            current: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn advance(&mut self) -> bool {
        self.current = self.items.next();
        self.current.is_some()
    }
}

impl FeatureCursor for VecCursor<Feature> {
    fn move_to_next(&mut self) -> Result<bool> {
        Ok(self.advance())
    }

    fn feature(&self) -> Result<&Feature> {
        self.current.as_ref().ok_or_else(not_positioned)
    }
}

impl FeatureSetCursor for VecCursor<FeatureSet> {
    fn move_to_next(&mut self) -> Result<bool> {
        Ok(self.advance())
    }

    fn feature_set(&self) -> Result<&FeatureSet> {
        self.current.as_ref().ok_or_else(not_positioned)
    }
}

/// Applies offset and limit to an inner cursor.
pub struct PagedCursor<C> {
    inner: C,
    skip: usize,
    remaining: Option<usize>,
    exhausted: bool,
}

impl<C> PagedCursor<C> {
    pub fn new(inner: C, limit: Option<usize>, offset: usize) -> Self {
        Self {
            inner,
            skip: offset,
            remaining: limit,
            exhausted: false,
        }
    }

    fn step(&mut self, mut next: impl FnMut(&mut C) -> Result<bool>) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.remaining == Some(0) {
            self.exhausted = true;
            return Ok(false);
        }
        while self.skip > 0 {
            if !next(&mut self.inner)? {
                self.exhausted = true;
                return Ok(false);
            }
            self.skip -= 1;
        }
        if !next(&mut self.inner)? {
            self.exhausted = true;
            return Ok(false);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(true)
    }
}

impl FeatureCursor for PagedCursor<Box<dyn FeatureCursor>> {
    fn move_to_next(&mut self) -> Result<bool> {
        self.step(|c| c.move_to_next())
    }

    fn feature(&self) -> Result<&Feature> {
        if self.exhausted {
            return Err(not_positioned());
        }
        self.inner.feature()
    }
}

impl FeatureSetCursor for PagedCursor<Box<dyn FeatureSetCursor>> {
    fn move_to_next(&mut self) -> Result<bool> {
        self.step(|c| c.move_to_next())
    }

    fn feature_set(&self) -> Result<&FeatureSet> {
        if self.exhausted {
            return Err(not_positioned());
        }
        self.inner.feature_set()
    }
}

/// Wrap `cursor` in a [`PagedCursor`] when paging was requested.
pub fn paginate_features(
    cursor: Box<dyn FeatureCursor>,
    limit: Option<usize>,
    offset: usize,
) -> Box<dyn FeatureCursor> {
    if limit.is_none() && offset == 0 {
        cursor
    } else {
        Box::new(PagedCursor::new(cursor, limit, offset))
    }
}

pub fn paginate_feature_sets(
    cursor: Box<dyn FeatureSetCursor>,
    limit: Option<usize>,
    offset: usize,
) -> Box<dyn FeatureSetCursor> {
    if limit.is_none() && offset == 0 {
        cursor
    } else {
        Box::new(PagedCursor::new(cursor, limit, offset))
    }
}

/// Drain a feature cursor into owned rows.
pub fn collect_features(cursor: &mut dyn FeatureCursor) -> Result<Vec<Feature>> {
    let mut out = Vec::new();
    while cursor.move_to_next()? {
        out.push(cursor.feature()?.clone());
    }
    Ok(out)
}

pub fn collect_feature_sets(cursor: &mut dyn FeatureSetCursor) -> Result<Vec<FeatureSet>> {
    let mut out = Vec::new();
    while cursor.move_to_next()? {
        out.push(cursor.feature_set()?.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeSet;
    use crate::error::ErrorKind;
    use crate::feature::AltitudeMode;

    fn feature(fid: FeatureId) -> Feature {
        Feature {
            fid,
            fsid: 1,
            name: None,
            geometry: None,
            altitude_mode: AltitudeMode::ClampToGround,
            extrude: 0.0,
            style: None,
            attributes: AttributeSet::new(),
            version: 1,
        }
    }

    fn cursor(n: i64) -> Box<dyn FeatureCursor> {
        Box::new(VecCursor::new((1..=n).map(feature).collect()))
    }

    #[test]
    fn test_accessor_before_move() {
        let mut c = cursor(1);
        assert_eq!(c.feature().unwrap_err().kind(), ErrorKind::IllegalState);
        assert!(c.move_to_next().unwrap());
        assert_eq!(c.fid().unwrap(), 1);
        assert!(!c.move_to_next().unwrap());
        assert_eq!(c.fid().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_limit_and_offset() {
        let mut paged = paginate_features(cursor(10), Some(3), 4);
        let fids: Vec<_> = collect_features(paged.as_mut())
            .unwrap()
            .into_iter()
            .map(|f| f.fid)
            .collect();
        assert_eq!(fids, vec![5, 6, 7]);
        assert!(!paged.move_to_next().unwrap());
    }

    #[test]
    fn test_offset_past_end() {
        let mut paged = paginate_features(cursor(2), None, 5);
        assert!(!paged.move_to_next().unwrap());
        assert!(paged.feature().is_err());
    }
}
