// source.rs — Where CVRs come from and where hand records go to.
//
// The audit never parses vendor exports itself. A `CvrSource` hands it
// already-parsed records, and an `MvrCollector` stands in for the people
// pulling and reading paper ballots.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rla_core::{Cvr, Mvr};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// A restartable sequence of CVRs. Each call to `cards` starts from the
/// beginning, in export order.
pub trait CvrSource {
    fn cards(&self) -> Box<dyn Iterator<Item = Result<Cvr, AuditError>> + '_>;
}

/// CVRs held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecCvrSource {
    cvrs: Vec<Cvr>,
}

impl VecCvrSource {
    pub fn new(cvrs: Vec<Cvr>) -> Self {
        Self { cvrs }
    }
}

impl CvrSource for VecCvrSource {
    fn cards(&self) -> Box<dyn Iterator<Item = Result<Cvr, AuditError>> + '_> {
        Box::new(self.cvrs.iter().cloned().map(Ok))
    }
}

/// CVRs stored one JSON object per line. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesCvrSource {
    path: PathBuf,
}

impl JsonLinesCvrSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CvrSource for JsonLinesCvrSource {
    fn cards(&self) -> Box<dyn Iterator<Item = Result<Cvr, AuditError>> + '_> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(source) => {
                return Box::new(std::iter::once(Err(AuditError::IoError {
                    path: self.path.clone(),
                    source,
                })))
            }
        };
        let path = self.path.clone();
        Box::new(
            BufReader::new(file)
                .lines()
                .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
                .map(move |line| -> Result<Cvr, AuditError> {
                    let line = line.map_err(|source| AuditError::IoError {
                        path: path.clone(),
                        source,
                    })?;
                    Ok(serde_json::from_str(&line)?)
                }),
        )
    }
}

/// Read every record of a JSON-lines file. Used for MVR files, which have
/// the same shape as CVRs.
pub fn read_json_lines(path: &Path) -> Result<Vec<Cvr>, AuditError> {
    JsonLinesCvrSource::new(path).cards().collect()
}

/// Result of asking for one card's hand record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lookup", rename_all = "snake_case")]
pub enum MvrLookup {
    Found(Mvr),
    /// The card could not be located or read (yet).
    NotFound,
}

/// Supplies hand records for sampled cards.
pub trait MvrCollector {
    /// Look up each id. Ids missing from the returned map count as
    /// `NotFound`.
    fn collect(&mut self, card_ids: &[String]) -> Result<HashMap<String, MvrLookup>, AuditError>;
}

/// Hand records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapMvrCollector {
    mvrs: HashMap<String, Mvr>,
}

impl MapMvrCollector {
    pub fn new(mvrs: impl IntoIterator<Item = Mvr>) -> Self {
        Self {
            mvrs: mvrs.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn insert(&mut self, mvr: Mvr) {
        self.mvrs.insert(mvr.id.clone(), mvr);
    }

    pub fn len(&self) -> usize {
        self.mvrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mvrs.is_empty()
    }
}

impl MvrCollector for MapMvrCollector {
    fn collect(&mut self, card_ids: &[String]) -> Result<HashMap<String, MvrLookup>, AuditError> {
        Ok(card_ids
            .iter()
            .map(|id| {
                let lookup = match self.mvrs.get(id) {
                    Some(m) => MvrLookup::Found(m.clone()),
                    None => MvrLookup::NotFound,
                };
                (id.clone(), lookup)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn vec_source_restarts() {
        let source = VecCvrSource::new(vec![Cvr::new("a"), Cvr::new("b")]);
        let first: Vec<String> = source.cards().map(|c| c.unwrap().id).collect();
        let second: Vec<String> = source.cards().map(|c| c.unwrap().id).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn json_lines_source_reads_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cvrs.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, r#"{{"id":"a","votes":{{"1":[0]}}}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"id":"b","votes":{{"1":[]}},"pool":3}}"#).unwrap();
        drop(f);

        let source = JsonLinesCvrSource::new(&path);
        let cvrs: Vec<Cvr> = source.cards().collect::<Result<_, _>>().unwrap();
        assert_eq!(cvrs.len(), 2);
        assert_eq!(cvrs[0].votes.get(&1), Some(&vec![0]));
        assert_eq!(cvrs[1].pool, Some(3));
        assert_eq!(source.cards().count(), 2);
        assert_eq!(read_json_lines(&path).unwrap(), cvrs);
    }

    #[test]
    fn json_lines_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let missing = JsonLinesCvrSource::new(dir.path().join("none.jsonl"));
        let first = missing.cards().next().unwrap();
        assert!(matches!(first, Err(AuditError::IoError { .. })));

        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let err = read_json_lines(&path).unwrap_err();
        assert!(matches!(err, AuditError::SerializationError(_)));
    }

    #[test]
    fn map_collector_reports_not_found() {
        let mut collector = MapMvrCollector::new(vec![Cvr::new("a").with_votes(1, vec![0])]);
        let got = collector
            .collect(&["a".to_string(), "zzz".to_string()])
            .unwrap();
        assert!(matches!(got.get("a"), Some(MvrLookup::Found(m)) if m.id == "a"));
        assert_eq!(got.get("zzz"), Some(&MvrLookup::NotFound));
    }
}
