//! Scene, scene item and audio source models mirrored from the remote.
//!
//! Each model names the fields the relay relies on and keeps everything else
//! the remote sends in `extra`, so merged updates round-trip unknown fields.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Read an identifier the remote may send as a JSON string or number.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value)
        .ok_or_else(|| D::Error::custom(format!("expected a string or number id, got {value}")))
}

fn deserialize_optional_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    id_from_value(&value)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("expected a string or number id, got {value}")))
}

/// An entity addressed by a stable identifier inside a mirrored list.
pub trait Keyed: Serialize + DeserializeOwned {
    /// Wire name of the identifier field
    const KEY_FIELD: &'static str;

    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Local flag, never sent by the remote
    #[serde(default)]
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_id: None,
            is_active: false,
            extra: Map::new(),
        }
    }

    /// Resource addressing this scene's own service, e.g. `Scene["scene_1"]`.
    pub fn resource(&self) -> String {
        self.resource_id
            .clone()
            .unwrap_or_else(|| format!("Scene[\"{}\"]", self.id))
    }
}

impl Keyed for Scene {
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub scene_item_id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub scene_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for SceneItem {
    const KEY_FIELD: &'static str = "sceneItemId";

    fn key(&self) -> &str {
        &self.scene_item_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    #[serde(deserialize_with = "deserialize_id")]
    pub source_id: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for AudioSource {
    const KEY_FIELD: &'static str = "sourceId";

    fn key(&self) -> &str {
        &self.source_id
    }
}

/// Overlay `patch` onto `current`. Fields present in the patch win, all other
/// fields of `current` are kept. The result is re-validated against `T`.
pub fn merge_fields<T>(current: &T, patch: &Map<String, Value>) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = match serde_json::to_value(current)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(merged))
}
