use crate::snapshot::ManifestEntry;
use crate::{Error, HashAlgorithm, Result, Snapshot, SnapshotId, SnapshotKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Why a snapshot folder could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum IncompleteReason {
    /// The run never committed its manifest.
    MissingManifest,
    /// The manifest exists but could not be parsed or validated.
    Corrupt(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct IncompleteSnapshot {
    pub dir_name: String,
    pub snapshot_id: Option<SnapshotId>,
    pub reason: IncompleteReason,
}

/// A file of an effective file set together with the snapshot that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub entry: ManifestEntry,
    pub stored_in: SnapshotId,
    pub hash_algorithm: HashAlgorithm,
}

/// Complete file set a snapshot represents, keyed by relative path.
pub type FileSet = BTreeMap<String, ResolvedFile>;

/// Every snapshot found under a destination root, rebuilt from disk on each scan.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
    incomplete: Vec<IncompleteSnapshot>,
}

impl SnapshotHistory {
    pub fn new(mut snapshots: Vec<Snapshot>, mut incomplete: Vec<IncompleteSnapshot>) -> Self {
        snapshots.sort_by(|a, b| a.snapshot_id.cmp(&b.snapshot_id));
        incomplete.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Self {
            snapshots,
            incomplete,
        }
    }

    /// Complete snapshots, oldest first.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn incomplete(&self) -> &[IncompleteSnapshot] {
        &self.incomplete
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.incomplete.is_empty()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn get(&self, id: &SnapshotId) -> Option<&Snapshot> {
        self.snapshots
            .binary_search_by(|s| s.snapshot_id.cmp(id))
            .ok()
            .map(|i| &self.snapshots[i])
    }

    fn incomplete_entry(&self, id: &SnapshotId) -> Option<&IncompleteSnapshot> {
        self.incomplete
            .iter()
            .find(|s| s.snapshot_id.as_ref() == Some(id))
    }

    /// Looks up a snapshot by bare id, folder name, or `latest`.
    pub fn find(&self, query: &str) -> Result<&Snapshot> {
        let not_found = || Error::SnapshotNotFound {
            id: query.to_string(),
        };

        if query == "latest" {
            return self.latest().ok_or_else(not_found);
        }

        let id = SnapshotId::parse(query).ok_or_else(not_found)?;
        self.require(&id)
    }

    /// Like [`get`](Self::get) but distinguishes missing from incomplete snapshots.
    pub fn require(&self, id: &SnapshotId) -> Result<&Snapshot> {
        if let Some(snapshot) = self.get(id) {
            return Ok(snapshot);
        }
        match self.incomplete_entry(id) {
            Some(IncompleteSnapshot {
                reason: IncompleteReason::MissingManifest,
                ..
            }) => Err(Error::IncompleteSnapshot { id: id.to_string() }),
            Some(IncompleteSnapshot {
                reason: IncompleteReason::Corrupt(reason),
                ..
            }) => Err(Error::InvalidManifest {
                id: id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(Error::SnapshotNotFound { id: id.to_string() }),
        }
    }

    /// The snapshot followed by its base chain, ending at a full snapshot.
    pub fn chain(&self, id: &SnapshotId) -> Result<Vec<&Snapshot>> {
        let mut current = self.require(id)?;
        let mut chain = vec![current];
        let mut visited = HashSet::from([current.snapshot_id.clone()]);

        while current.kind == SnapshotKind::Incremental {
            let Some(base_id) = current.base_snapshot_id.as_ref() else {
                return Err(Error::ChainBroken {
                    id: current.snapshot_id.to_string(),
                    reason: "incremental snapshot has no base".to_string(),
                });
            };

            if !visited.insert(base_id.clone()) {
                return Err(Error::ChainBroken {
                    id: base_id.to_string(),
                    reason: "cycle in base chain".to_string(),
                });
            }

            let base = self.get(base_id).ok_or_else(|| {
                let reason = match self.incomplete_entry(base_id) {
                    Some(entry) => match &entry.reason {
                        IncompleteReason::MissingManifest => {
                            "base snapshot is incomplete".to_string()
                        }
                        IncompleteReason::Corrupt(reason) => {
                            format!("base snapshot manifest is corrupt: {}", reason)
                        }
                    },
                    None => "base snapshot is missing".to_string(),
                };
                Error::ChainBroken {
                    id: base_id.to_string(),
                    reason,
                }
            })?;

            chain.push(base);
            current = base;
        }

        Ok(chain)
    }

    /// Resolves the effective file set of `id`: newest occurrence of each path wins and
    /// `removed` records hide older occurrences.
    pub fn resolve(&self, id: &SnapshotId) -> Result<FileSet> {
        let chain = self.chain(id)?;
        let mut decided: HashSet<&str> = HashSet::new();
        let mut files = FileSet::new();

        for snapshot in chain {
            for path in &snapshot.removed {
                decided.insert(path.as_str());
            }
            for entry in &snapshot.manifest {
                if decided.insert(entry.relative_path.as_str()) {
                    files.insert(
                        entry.relative_path.clone(),
                        ResolvedFile {
                            entry: entry.clone(),
                            stored_in: snapshot.snapshot_id.clone(),
                            hash_algorithm: snapshot.hash_algorithm,
                        },
                    );
                }
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_data;
    use chrono::Utc;
    use std::path::PathBuf;

    fn id(n: u32) -> SnapshotId {
        SnapshotId::parse(&format!("20261016_1200{:02}_000000", n)).unwrap()
    }

    fn entry(path: &str, data: &str) -> ManifestEntry {
        ManifestEntry {
            relative_path: path.to_string(),
            content_hash: hash_data(HashAlgorithm::Md5, data.as_bytes()),
            size_bytes: data.len() as u64,
            modified_time: Utc::now(),
        }
    }

    fn snapshot(n: u32, base: Option<u32>, files: &[(&str, &str)], removed: &[&str]) -> Snapshot {
        let kind = if base.is_some() {
            SnapshotKind::Incremental
        } else {
            SnapshotKind::Full
        };
        let mut snapshot = Snapshot::new(id(n), kind, PathBuf::from("/src"), HashAlgorithm::Md5);
        if let Some(base) = base {
            snapshot = snapshot.with_base(id(base));
        }
        snapshot.manifest = files.iter().map(|(p, d)| entry(p, d)).collect();
        snapshot.removed = removed.iter().map(|p| p.to_string()).collect();
        snapshot
    }

    #[test]
    fn test_history_orders_snapshots_and_finds_latest() {
        let history = SnapshotHistory::new(
            vec![snapshot(2, Some(1), &[], &[]), snapshot(1, None, &[], &[])],
            vec![],
        );

        let ids: Vec<_> = history.snapshots().iter().map(|s| s.snapshot_id.clone()).collect();
        assert_eq!(ids, vec![id(1), id(2)]);
        assert_eq!(history.latest().unwrap().snapshot_id, id(2));
        assert_eq!(history.find("latest").unwrap().snapshot_id, id(2));
        assert_eq!(history.find(&id(1).dir_name()).unwrap().snapshot_id, id(1));
        assert!(matches!(
            history.find("20300101_000000_000000"),
            Err(Error::SnapshotNotFound { .. })
        ));
        assert!(matches!(history.find("bogus"), Err(Error::SnapshotNotFound { .. })));
    }

    #[test]
    fn test_resolve_walks_chain_with_removals() {
        let history = SnapshotHistory::new(
            vec![
                snapshot(1, None, &[("a.txt", "a1"), ("b.txt", "b1"), ("c.txt", "c1")], &[]),
                snapshot(2, Some(1), &[("a.txt", "a2")], &["c.txt"]),
                snapshot(3, Some(2), &[("d.txt", "d3")], &[]),
            ],
            vec![],
        );

        let files = history.resolve(&id(3)).unwrap();
        let keys: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a.txt", "b.txt", "d.txt"]);
        assert_eq!(files["a.txt"].stored_in, id(2));
        assert_eq!(files["a.txt"].entry.content_hash, hash_data(HashAlgorithm::Md5, b"a2"));
        assert_eq!(files["b.txt"].stored_in, id(1));
        assert_eq!(files["d.txt"].stored_in, id(3));

        let files = history.resolve(&id(1)).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_removed_then_readded_file_resolves_to_newest() {
        let history = SnapshotHistory::new(
            vec![
                snapshot(1, None, &[("a.txt", "a1")], &[]),
                snapshot(2, Some(1), &[], &["a.txt"]),
                snapshot(3, Some(2), &[("a.txt", "a3")], &[]),
            ],
            vec![],
        );

        assert!(history.resolve(&id(2)).unwrap().is_empty());
        assert_eq!(history.resolve(&id(3)).unwrap()["a.txt"].stored_in, id(3));
    }

    #[test]
    fn test_chain_broken_when_base_missing() {
        let history = SnapshotHistory::new(
            vec![snapshot(3, Some(2), &[("a.txt", "a")], &[])],
            vec![],
        );

        let err = history.resolve(&id(3)).unwrap_err();
        assert!(matches!(err, Error::ChainBroken { ref id, .. } if id == "20261016_120002_000000"));
    }

    #[test]
    fn test_chain_broken_when_base_incomplete() {
        let history = SnapshotHistory::new(
            vec![snapshot(2, Some(1), &[], &[])],
            vec![IncompleteSnapshot {
                dir_name: id(1).dir_name(),
                snapshot_id: Some(id(1)),
                reason: IncompleteReason::MissingManifest,
            }],
        );

        match history.chain(&id(2)) {
            Err(Error::ChainBroken { reason, .. }) => assert!(reason.contains("incomplete")),
            other => panic!("expected ChainBroken, got {:?}", other.map(|c| c.len())),
        }
        assert!(matches!(
            history.require(&id(1)),
            Err(Error::IncompleteSnapshot { .. })
        ));
    }

    #[test]
    fn test_chain_detects_cycles() {
        let history = SnapshotHistory::new(
            vec![snapshot(1, Some(2), &[], &[]), snapshot(2, Some(1), &[], &[])],
            vec![],
        );
        assert!(matches!(history.chain(&id(2)), Err(Error::ChainBroken { .. })));
    }
}
