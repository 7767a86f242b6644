//! Defines [`Mountain`], one record of the mountain database, along with its
//! sub-records. Fields the site does not interpret (English names, seasons,
//! trail lists and so on) are carried through untouched in `extra`, so a load
//! followed by a save never loses data written by other tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

/// Shown wherever a record has no value yet ("to be confirmed").
pub const TO_BE_CONFIRMED: &str = "要確認";

/// The difficulty assumed for records that do not state one.
pub const DEFAULT_DIFFICULTY: &str = "初級";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mountain {
    pub id: String,
    pub name: String,

    /// Height in meters.
    pub elevation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub location: Option<Location>,

    #[serde(
        default,
        rename = "externalReference",
        alias = "bepal_reference",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_reference: Option<ExternalReference>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Difficulty {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub hiking_time: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub nearest_station: Option<String>,
    #[serde(default)]
    pub access_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Provenance for records whose content was derived from an external
/// editorial source. `attribution` must be reproduced verbatim on the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    #[serde(alias = "source_name")]
    pub source_name: String,
    #[serde(default)]
    pub description: String,
    pub url: Url,
    #[serde(default, alias = "expert_comment", skip_serializing_if = "Option::is_none")]
    pub expert_comment: Option<String>,
    pub attribution: String,
}

impl Mountain {
    /// Checks that a raw JSON value carries the fields every record must
    /// have before it may enter the store.
    pub fn validate(raw: &Value) -> Result<&str, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;
        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(ValidationError::MissingField("id")),
        };
        match obj.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingField("name")),
        }
        if obj.get("elevation").and_then(Value::as_i64).is_none() {
            return Err(ValidationError::MissingField("elevation"));
        }
        Ok(id)
    }

    /// Fills in the placeholder values a freshly imported record is given.
    pub fn fill_defaults(&mut self) {
        if self.difficulty.level.is_none() {
            self.difficulty.level = Some(DEFAULT_DIFFICULTY.to_owned());
        }
        let location = self.location.get_or_insert_with(Location::default);
        if location.nearest_station.is_none() {
            location.nearest_station = Some(TO_BE_CONFIRMED.to_owned());
        }
    }

    pub fn difficulty_level(&self) -> &str {
        self.difficulty.level.as_deref().unwrap_or(DEFAULT_DIFFICULTY)
    }

    pub fn nearest_station(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|l| l.nearest_station.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(TO_BE_CONFIRMED)
    }

    pub fn access_time(&self) -> &str {
        self.location
            .as_ref()
            .and_then(|l| l.access_time.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(TO_BE_CONFIRMED)
    }
}

/// Returned when an incoming record is missing something the store requires.
#[derive(Debug)]
pub enum ValidationError {
    /// The record is not a JSON object.
    NotAnObject,

    /// A required field is absent, empty, or of the wrong type.
    MissingField(&'static str),

    /// The record has the required fields but the rest does not fit the
    /// record schema.
    Malformed(serde_json::Error),

    /// The record has no prefecture and the site is configured to reject
    /// such records rather than file them as unclassified.
    MissingPrefecture(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationError::NotAnObject => write!(f, "record is not a JSON object"),
            ValidationError::MissingField(field) => {
                write!(f, "missing or invalid required field `{}`", field)
            }
            ValidationError::Malformed(err) => write!(f, "malformed record: {}", err),
            ValidationError::MissingPrefecture(id) => {
                write!(f, "record `{}` has no prefecture", id)
            }
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValidationError::Malformed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> ValidationError {
        ValidationError::Malformed(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate() {
        assert_eq!(
            "mt_x",
            Mountain::validate(&json!({"id": "mt_x", "name": "X山", "elevation": 100})).unwrap()
        );
        for (raw, field) in vec![
            (json!({"name": "X山", "elevation": 100}), "id"),
            (json!({"id": "", "name": "X山", "elevation": 100}), "id"),
            (json!({"id": "mt_x", "elevation": 100}), "name"),
            (json!({"id": "mt_x", "name": "X山", "elevation": "100m"}), "elevation"),
        ] {
            match Mountain::validate(&raw) {
                Err(ValidationError::MissingField(f)) => assert_eq!(field, f),
                other => panic!("wanted missing `{}`; found {:?}", field, other),
            }
        }
        assert!(matches!(
            Mountain::validate(&json!([1])),
            Err(ValidationError::NotAnObject)
        ));
    }

    #[test]
    fn test_unknown_fields_round_trip() -> serde_json::Result<()> {
        let raw = json!({
            "id": "mt_takao",
            "name": "高尾山",
            "name_en": "Mt. Takao",
            "elevation": 599,
            "difficulty": {"level": "初級", "elevation_gain": "400m"},
            "seasons": {"best": ["秋"]},
            "location": null,
        });
        let mountain: Mountain = serde_json::from_value(raw)?;
        assert_eq!(Some(&json!("Mt. Takao")), mountain.extra.get("name_en"));
        assert_eq!(TO_BE_CONFIRMED, mountain.nearest_station());

        let back = serde_json::to_value(&mountain)?;
        assert_eq!(json!("400m"), back["difficulty"]["elevation_gain"]);
        assert_eq!(json!({"best": ["秋"]}), back["seasons"]);
        Ok(())
    }

    #[test]
    fn test_external_reference_alias() -> serde_json::Result<()> {
        let mountain: Mountain = serde_json::from_value(json!({
            "id": "mt_a",
            "name": "A",
            "elevation": 1,
            "bepal_reference": {
                "source_name": "BE-PAL",
                "description": "d",
                "url": "https://www.bepal.net/archives/536937",
                "expert_comment": "c",
                "attribution": "出典: BE-PAL",
            }
        }))?;
        let reference = mountain.external_reference.unwrap();
        assert_eq!("BE-PAL", reference.source_name);
        assert_eq!(Some("c".to_owned()), reference.expert_comment);
        Ok(())
    }

    #[test]
    fn test_fill_defaults() -> serde_json::Result<()> {
        let mut mountain: Mountain =
            serde_json::from_value(json!({"id": "mt_x", "name": "X山", "elevation": 100}))?;
        mountain.fill_defaults();
        assert_eq!(Some(DEFAULT_DIFFICULTY), mountain.difficulty.level.as_deref());
        assert_eq!(
            Some(TO_BE_CONFIRMED),
            mountain.location.as_ref().and_then(|l| l.nearest_station.as_deref())
        );
        Ok(())
    }
}
