//! The record store: a JSON file holding a `metadata` object and the
//! `mountains` array. [`Store::merge`] folds incoming records into it by `id`
//! and [`Store::save`] writes it back in full, atomically.

use crate::mountain::{Mountain, ValidationError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The version an absent store starts from.
pub const INITIAL_VERSION: &str = "1.0.0";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub mountains: Vec<Mountain>,

    /// Top-level keys maintained by other tools (`regions`, `search_tags`,
    /// ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default = "initial_version")]
    pub version: String,

    #[serde(default, alias = "last_updated")]
    pub last_updated: Option<String>,

    #[serde(default, alias = "total_mountains")]
    pub total_count: usize,

    /// Provenance names, without duplicates, in the order first seen.
    #[serde(default)]
    pub source_list: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn initial_version() -> String {
    INITIAL_VERSION.to_owned()
}

impl Metadata {
    /// The calendar date `last_updated` starts with, if any. Both RFC 3339
    /// timestamps and bare `YYYY-MM-DD` dates are accepted.
    pub fn last_updated_date(&self) -> Option<NaiveDate> {
        let stamp = self.last_updated.as_deref()?;
        NaiveDate::parse_from_str(stamp.get(..10)?, "%Y-%m-%d").ok()
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            version: initial_version(),
            last_updated: None,
            total_count: 0,
            source_list: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// What happened to one incoming record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merged {
    Added,
    Updated,
    Unchanged,
}

impl fmt::Display for Merged {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(match self {
            Merged::Added => "added",
            Merged::Updated => "updated",
            Merged::Unchanged => "unchanged",
        })
    }
}

/// The outcome for the incoming record at `index`. `id` is `None` when the
/// record did not even carry a usable identifier.
#[derive(Debug)]
pub struct Outcome {
    pub index: usize,
    pub id: Option<String>,
    pub result: std::result::Result<Merged, ValidationError>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let id = self.id.as_deref().unwrap_or("?");
        match &self.result {
            Ok(merged) => write!(f, "{:<9} {}", merged, id),
            Err(err) => write!(f, "{:<9} #{} {}: {}", "skipped", self.index, id, err),
        }
    }
}

#[derive(Debug, Default)]
pub struct MergeReport {
    pub outcomes: Vec<Outcome>,
}

impl MergeReport {
    fn count(&self, wanted: Merged) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(m) if m == wanted))
            .count()
    }

    pub fn added(&self) -> usize {
        self.count(Merged::Added)
    }

    pub fn updated(&self) -> usize {
        self.count(Merged::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(Merged::Unchanged)
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn changed(&self) -> bool {
        self.added() + self.updated() > 0
    }

    pub fn succeeded(&self) -> bool {
        self.skipped() == 0
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} records: {} added, {} updated, {} unchanged, {} skipped",
            self.outcomes.len(),
            self.added(),
            self.updated(),
            self.unchanged(),
            self.skipped()
        )
    }
}

impl Store {
    /// Loads the store at `path`. A missing file is an empty store; anything
    /// else that goes wrong is an error.
    pub fn load(path: &Path) -> Result<Store> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "record store absent; starting empty");
                return Ok(Store::default());
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::Json {
            path: path.to_owned(),
            err: e,
        })
    }

    /// Writes the whole store to `path` through a temporary file in the same
    /// directory which is then renamed over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, self).map_err(|e| Error::Json {
            path: path.to_owned(),
            err: e,
        })?;
        tmp.write_all(b"\n").map_err(|e| Error::io(path, e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        debug!(path = %path.display(), "record store written");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Mountain> {
        self.mountains.iter().find(|m| m.id == id)
    }

    /// Folds `incoming` into the store. Each record either overwrites the
    /// fields of the existing record with the same `id` or is appended; a
    /// record failing validation is skipped without affecting the rest.
    /// Afterwards the mountains are sorted by elevation (stable) and the
    /// metadata is brought up to date. The version, timestamp, and source
    /// list only move when something actually changed.
    pub fn merge(
        &mut self,
        incoming: Vec<Value>,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for (index, raw) in incoming.into_iter().enumerate() {
            let (id, result) = self.merge_one(raw);
            report.outcomes.push(Outcome { index, id, result });
        }

        self.mountains.sort_by_key(|m| m.elevation);
        self.metadata.total_count = self.mountains.len();
        if report.changed() {
            self.metadata.version = bump_version(&self.metadata.version);
            self.metadata.last_updated = Some(now.to_rfc3339());
            if let Some(source) = source {
                if !self.metadata.source_list.iter().any(|s| s == source) {
                    self.metadata.source_list.push(source.to_owned());
                }
            }
        }
        report
    }

    fn merge_one(
        &mut self,
        raw: Value,
    ) -> (Option<String>, std::result::Result<Merged, ValidationError>) {
        let id = match Mountain::validate(&raw) {
            Ok(id) => id.to_owned(),
            Err(e) => {
                let id = raw.get("id").and_then(Value::as_str).map(str::to_owned);
                return (id, Err(e));
            }
        };
        let result = self.apply(&id, raw);
        (Some(id), result)
    }

    fn apply(&mut self, id: &str, raw: Value) -> std::result::Result<Merged, ValidationError> {
        let fields = match raw {
            Value::Object(fields) => fields,
            _ => return Err(ValidationError::NotAnObject),
        };

        match self.mountains.iter().position(|m| m.id == id) {
            Some(i) => {
                let mut merged = match serde_json::to_value(&self.mountains[i])? {
                    Value::Object(existing) => existing,
                    _ => return Err(ValidationError::NotAnObject),
                };
                for (key, value) in fields {
                    // the serialized form only knows the canonical name
                    let key = match key.as_str() {
                        "bepal_reference" => "externalReference".to_owned(),
                        _ => key,
                    };
                    merged.insert(key, value);
                }
                let merged: Mountain = serde_json::from_value(Value::Object(merged))?;
                if merged == self.mountains[i] {
                    return Ok(Merged::Unchanged);
                }
                self.mountains[i] = merged;
                Ok(Merged::Updated)
            }
            None => {
                let mut mountain: Mountain = serde_json::from_value(Value::Object(fields))?;
                mountain.fill_defaults();
                self.mountains.push(mountain);
                Ok(Merged::Added)
            }
        }
    }
}

/// Increments the last dotted component of `version`. A version whose last
/// component is not a number gets `.1` appended.
pub fn bump_version(version: &str) -> String {
    let version = match version.trim() {
        "" => INITIAL_VERSION,
        v => v,
    };
    let (head, last) = match version.rfind('.') {
        Some(i) => (&version[..=i], &version[i + 1..]),
        None => ("", version),
    };
    match last.parse::<u64>() {
        Ok(n) => format!("{}{}", head, n + 1),
        Err(_) => format!("{}.1", version),
    }
}

/// Reads a file of incoming records: either a bare array or an object with a
/// `mountains` (or `new_mountains`) array.
pub fn read_incoming(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let value: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::Json {
        path: path.to_owned(),
        err: e,
    })?;
    match value {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => {
            match obj.remove("mountains").or_else(|| obj.remove("new_mountains")) {
                Some(Value::Array(records)) => Ok(records),
                _ => Err(Error::IncomingShape(path.to_owned())),
            }
        }
        _ => Err(Error::IncomingShape(path.to_owned())),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reading or writing store files. Per-record problems are not errors
/// at this level; they are reported through [`MergeReport`].
#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems on a store or incoming file.
    Io { path: PathBuf, err: std::io::Error },

    /// Returned when a file is not valid JSON for its purpose.
    Json { path: PathBuf, err: serde_json::Error },

    /// Returned when an incoming file holds neither an array of records nor
    /// an object with a `mountains` array.
    IncomingShape(PathBuf),
}

impl Error {
    fn io(path: &Path, err: std::io::Error) -> Error {
        Error::Io {
            path: path.to_owned(),
            err,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, err } => write!(f, "{}: {}", path.display(), err),
            Error::Json { path, err } => write!(f, "{}: {}", path.display(), err),
            Error::IncomingShape(path) => write!(
                f,
                "{}: expected an array of records or an object with a `mountains` array",
                path.display()
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { err, .. } => Some(err),
            Error::Json { err, .. } => Some(err),
            Error::IncomingShape(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mountain::{DEFAULT_DIFFICULTY, TO_BE_CONFIRMED};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.ymd(2025, 8, 1).and_hms(9, 30, 0)
    }

    fn record(id: &str, name: &str, elevation: i64) -> Value {
        json!({"id": id, "name": name, "elevation": elevation})
    }

    fn store_of(records: Vec<Value>) -> Store {
        let mut store = Store::default();
        store.merge(records, None, now());
        store
    }

    #[test]
    fn test_merge_into_empty_store() {
        let mut store = Store::default();
        let report = store.merge(vec![record("mt_x", "X山", 100)], Some("BE-PAL"), now());

        assert_eq!(1, report.added());
        assert_eq!(0, report.skipped());
        assert_eq!(1, store.metadata.total_count);
        assert_eq!("1.0.1", store.metadata.version);
        assert_eq!(Some(now().to_rfc3339()), store.metadata.last_updated);
        assert_eq!(
            Some(now().naive_utc().date()),
            store.metadata.last_updated_date()
        );
        assert_eq!(vec!["BE-PAL".to_owned()], store.metadata.source_list);
        assert_eq!(1, store.mountains.len());

        let mountain = &store.mountains[0];
        assert_eq!("mt_x", mountain.id);
        assert_eq!("X山", mountain.name);
        assert_eq!(100, mountain.elevation);
        assert_eq!(Some(DEFAULT_DIFFICULTY), mountain.difficulty.level.as_deref());
        assert_eq!(
            Some(TO_BE_CONFIRMED),
            mountain
                .location
                .as_ref()
                .and_then(|l| l.nearest_station.as_deref())
        );
    }

    #[test]
    fn test_merge_existing_ids_preserves_count() {
        let mut store = store_of(vec![
            record("mt_a", "A", 300),
            record("mt_b", "B", 200),
            record("mt_c", "C", 100),
        ]);
        let version = store.metadata.version.clone();
        let report = store.merge(
            vec![
                json!({"id": "mt_a", "name": "A'", "elevation": 301}),
                json!({"id": "mt_c", "name": "C", "elevation": 100, "features": ["駅近"]}),
            ],
            None,
            now(),
        );
        assert_eq!(3, store.mountains.len());
        assert_eq!(3, store.metadata.total_count);
        assert_eq!(2, report.updated());
        assert_eq!(bump_version(&version), store.metadata.version);
    }

    #[test]
    fn test_merge_new_ids_is_additive() {
        let mut store = store_of(vec![record("mt_a", "A", 300), record("mt_b", "B", 200)]);
        let incoming = vec![
            record("mt_c", "C", 100),
            record("mt_d", "D", 400),
            record("mt_e", "E", 50),
        ];
        let report = store.merge(incoming, None, now());
        assert_eq!(3, report.added());
        assert_eq!(5, store.mountains.len());
    }

    #[test]
    fn test_merge_is_field_level() {
        let mut store = store_of(vec![json!({
            "id": "mt_a",
            "name": "A",
            "elevation": 300,
            "prefecture": "東京都",
            "features": ["ケーブルカー"],
            "name_en": "Mt. A",
        })]);
        store.merge(
            vec![json!({"id": "mt_a", "name": "A山", "elevation": 310})],
            None,
            now(),
        );
        let mountain = store.get("mt_a").unwrap();
        assert_eq!("A山", mountain.name);
        assert_eq!(310, mountain.elevation);
        assert_eq!(Some("東京都"), mountain.prefecture.as_deref());
        assert_eq!(vec!["ケーブルカー".to_owned()], mountain.features);
        assert_eq!(Some(&json!("Mt. A")), mountain.extra.get("name_en"));
    }

    #[test]
    fn test_merge_update_with_legacy_reference_key() {
        let reference = json!({
            "source_name": "BE-PAL",
            "description": "d",
            "url": "https://www.bepal.net/archives/536937",
            "attribution": "出典: BE-PAL",
        });
        let mut store = store_of(vec![json!({
            "id": "mt_a", "name": "A", "elevation": 300, "bepal_reference": reference,
        })]);
        let mut updated = reference.clone();
        updated["description"] = json!("新しい紹介");
        let report = store.merge(
            vec![json!({"id": "mt_a", "name": "A", "elevation": 300, "bepal_reference": updated})],
            None,
            now(),
        );
        assert_eq!(1, report.updated());
        let mountain = store.get("mt_a").unwrap();
        assert_eq!(
            "新しい紹介",
            mountain.external_reference.as_ref().unwrap().description
        );
    }

    #[test]
    fn test_merge_identity_is_id_not_name() {
        let mut store = store_of(vec![json!({"id": "mt_fuji_a", "name": "富士山", "elevation": 100, "prefecture": "A"})]);
        let report = store.merge(
            vec![json!({"id": "mt_fuji_b", "name": "富士山", "elevation": 90, "prefecture": "B"})],
            None,
            now(),
        );
        assert_eq!(1, report.added());
        assert_eq!(2, store.mountains.len());
    }

    #[test]
    fn test_merge_skips_invalid_records() {
        let mut store = Store::default();
        let report = store.merge(
            vec![
                record("mt_a", "A", 300),
                json!({"id": "mt_bad", "elevation": 10}),
                json!({"id": "mt_worse", "name": "W", "elevation": 10, "features": "not a list"}),
                record("mt_b", "B", 200),
            ],
            None,
            now(),
        );
        assert_eq!(2, report.added());
        assert_eq!(2, report.skipped());
        assert_eq!(Some("mt_bad"), report.outcomes[1].id.as_deref());
        assert!(matches!(
            report.outcomes[1].result,
            Err(ValidationError::MissingField("name"))
        ));
        assert!(matches!(
            report.outcomes[2].result,
            Err(ValidationError::Malformed(_))
        ));
        assert_eq!(2, store.metadata.total_count);

        assert_eq!("added     mt_a", report.outcomes[0].to_string());
        assert_eq!(
            "skipped   #1 mt_bad: missing or invalid required field `name`",
            report.outcomes[1].to_string()
        );
        assert_eq!(
            "4 records: 2 added, 0 updated, 0 unchanged, 2 skipped",
            report.to_string()
        );
        assert!(!report.succeeded());
    }

    #[test]
    fn test_unchanged_merge_keeps_metadata() {
        let mut store = store_of(vec![record("mt_a", "A", 300)]);
        let before = store.metadata.clone();
        let report = store.merge(vec![record("mt_a", "A", 300)], Some("again"), now());
        assert_eq!(1, report.unchanged());
        assert_eq!(before, store.metadata);
    }

    #[test]
    fn test_merge_sorts_by_elevation_stably() {
        let store = store_of(vec![
            record("mt_a", "A", 599),
            record("mt_b", "B", 334),
            record("mt_c", "C", 877),
            record("mt_d", "D", 334),
        ]);
        let ids: Vec<&str> = store.mountains.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(vec!["mt_b", "mt_d", "mt_a", "mt_c"], ids);
    }

    #[test]
    fn test_source_list_is_a_set() {
        let mut store = Store::default();
        store.merge(vec![record("mt_a", "A", 1)], Some("BE-PAL"), now());
        store.merge(vec![record("mt_b", "B", 2)], Some("BE-PAL"), now());
        store.merge(vec![record("mt_c", "C", 3)], Some("CMS"), now());
        assert_eq!(
            vec!["BE-PAL".to_owned(), "CMS".to_owned()],
            store.metadata.source_list
        );
        assert_eq!("1.0.3", store.metadata.version);
    }

    #[test]
    fn test_bump_version() {
        assert_eq!("1.0.1", bump_version("1.0.0"));
        assert_eq!("5.1", bump_version("5.0"));
        assert_eq!("1.2.10", bump_version("1.2.9"));
        assert_eq!("8", bump_version("7"));
        assert_eq!("1.0-beta.1", bump_version("1.0-beta"));
        assert_eq!("1.0.1", bump_version(""));
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::io(Path::new("."), e))?;
        let path = dir.path().join("data").join("mountains.json");
        assert_eq!(Store::default(), Store::load(&path)?);

        let mut store = store_of(vec![record("mt_x", "X山", 100)]);
        store.extra.insert("search_tags".to_owned(), json!({"夜景": ["mt_x"]}));
        store.save(&path)?;

        let contents = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        assert!(contents.contains("X山"), "non-ASCII text should be written as-is");
        assert_eq!(store, Store::load(&path)?);
        Ok(())
    }

    #[test]
    fn test_load_original_metadata_keys() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::io(Path::new("."), e))?;
        let path = dir.path().join("mountains.json");
        std::fs::write(
            &path,
            r#"{"metadata": {"version": "5.0", "last_updated": "2025-07-01", "total_mountains": 0, "description": "d"}, "mountains": []}"#,
        )
        .map_err(|e| Error::io(&path, e))?;
        let store = Store::load(&path)?;
        assert_eq!("5.0", store.metadata.version);
        assert_eq!(Some("2025-07-01"), store.metadata.last_updated.as_deref());
        assert_eq!(
            NaiveDate::from_ymd_opt(2025, 7, 1),
            store.metadata.last_updated_date()
        );
        assert_eq!(Some(&json!("d")), store.metadata.extra.get("description"));
        Ok(())
    }

    #[test]
    fn test_read_incoming_shapes() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::io(Path::new("."), e))?;
        for (name, body, wanted) in vec![
            ("array.json", r#"[{"id": "a"}]"#, Some(1)),
            ("object.json", r#"{"mountains": [{"id": "a"}, {"id": "b"}]}"#, Some(2)),
            ("additions.json", r#"{"new_mountains": []}"#, Some(0)),
            ("scalar.json", "3", None),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).map_err(|e| Error::io(&path, e))?;
            match (read_incoming(&path), wanted) {
                (Ok(records), Some(n)) => assert_eq!(n, records.len()),
                (Err(Error::IncomingShape(_)), None) => {}
                (other, _) => panic!("{}: unexpected {:?}", name, other),
            }
        }
        Ok(())
    }
}
