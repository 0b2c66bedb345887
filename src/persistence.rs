use crate::error::Result;
use crate::feature::FeatureSetId;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Size of one `(fsid: i64, visible: i32)` record, big-endian.
const RECORD_LEN: usize = 12;

/// Append-only log of feature-set visibility.
///
/// Replay applies records in order so the most recent record for a set wins.
/// A truncated trailing record is ignored.
#[derive(Debug)]
pub struct VisibilityLog {
    path: PathBuf,
}

impl VisibilityLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the log. A missing file is an empty map.
    pub fn replay(&self) -> Result<BTreeMap<FeatureSetId, bool>> {
        let mut data = Vec::new();
        match File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        }

        let mut buf = data.as_slice();
        let mut visibility = BTreeMap::new();
        while buf.remaining() >= RECORD_LEN {
            let fsid = buf.get_i64();
            let visible = buf.get_i32();
            visibility.insert(fsid, visible != 0);
        }
        if buf.has_remaining() {
            tracing::warn!(
                path = %self.path.display(),
                trailing = buf.remaining(),
                "ignoring truncated visibility record"
            );
        }
        Ok(visibility)
    }

    /// Replace the log with exactly one record per entry of `visibility`.
    ///
    /// The new content is written to a sibling temp file, synced, then
    /// renamed over the log.
    pub fn rewrite(&self, visibility: &BTreeMap<FeatureSetId, bool>) -> Result<()> {
        let rewrite_path = self.path.with_extension("rewrite");
        let result = (|| -> Result<()> {
            let mut file = File::create(&rewrite_path)?;
            file.write_all(&encode_records(visibility.iter().map(|(k, v)| (*k, *v))))?;
            file.sync_all()?;
            std::fs::rename(&rewrite_path, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&rewrite_path);
        }
        result
    }
}

fn encode_records(records: impl Iterator<Item = (FeatureSetId, bool)>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for (fsid, visible) in records {
        buf.put_i64(fsid);
        buf.put_i32(i32::from(visible));
    }
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn append(log: &VisibilityLog, fsid: FeatureSetId, visible: bool) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log.path())
            .unwrap();
        file.write_all(&encode_records(std::iter::once((fsid, visible))))
            .unwrap();
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = VisibilityLog::new(dir.path().join("fsvis"));
        assert!(log.replay().unwrap().is_empty());
    }

    #[test]
    fn test_most_recent_record_wins() {
        let dir = TempDir::new().unwrap();
        let log = VisibilityLog::new(dir.path().join("fsvis"));
        append(&log, 1, false);
        append(&log, 2, false);
        append(&log, 1, true);

        let replayed = log.replay().unwrap();
        assert_eq!(replayed.get(&1), Some(&true));
        assert_eq!(replayed.get(&2), Some(&false));
        assert_eq!(std::fs::metadata(log.path()).unwrap().len(), 3 * RECORD_LEN as u64);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let log = VisibilityLog::new(dir.path().join("fsvis"));
        append(&log, 5, false);

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(&[0, 0, 0, 0, 0, 0, 0, 6, 0]).unwrap();

        let replayed = log.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed.get(&5), Some(&false));
    }

    #[test]
    fn test_rewrite_compacts() {
        let dir = TempDir::new().unwrap();
        let log = VisibilityLog::new(dir.path().join("fsvis"));
        for _ in 0..10 {
            append(&log, 1, false);
            append(&log, 1, true);
        }

        let state = log.replay().unwrap();
        log.rewrite(&state).unwrap();
        assert_eq!(std::fs::metadata(log.path()).unwrap().len(), RECORD_LEN as u64);
        assert_eq!(log.replay().unwrap(), state);
        assert!(!dir.path().join("fsvis.rewrite").exists());
    }

    #[test]
    fn test_big_endian_layout() {
        let bytes = encode_records(std::iter::once((0x0102, true)));
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 0, 1]);
    }
}
