//! Local mirror of the remote's scenes, scene items and audio sources.
//!
//! Scene items and audio sources only exist after the first fetch for the
//! active scene. Until then they are `None`, and incremental updates against
//! them are reported as [`MirrorAnomaly::NotPopulated`].

use scenerelay_shared::{id_from_value, merge_fields, AudioSource, Keyed, Scene, SceneItem};
use serde_json::Value;
use thiserror::Error;

/// An incremental update that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorAnomaly {
    #[error("{0} list has not been fetched yet")]
    NotPopulated(&'static str),
    #[error("{kind} update is missing its `{field}` identifier")]
    MissingKey {
        kind: &'static str,
        field: &'static str,
    },
    #[error("no {kind} with id {key}")]
    UnknownEntity { kind: &'static str, key: String },
    #[error("{kind} update does not fit the model: {reason}")]
    InvalidPatch { kind: &'static str, reason: String },
    #[error("item {item} belongs to scene {scene}, not the active scene")]
    ForeignScene { item: String, scene: String },
}

const SCENE_ITEMS: &str = "scene item";
const AUDIO_SOURCES: &str = "audio source";

#[derive(Debug, Default)]
pub struct SceneMirror {
    scenes: Vec<Scene>,
    scene_items: Option<Vec<SceneItem>>,
    audio_sources: Option<Vec<AudioSource>>,
}

impl SceneMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.scenes.clear();
        self.scene_items = None;
        self.audio_sources = None;
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene_items(&self) -> Option<&[SceneItem]> {
        self.scene_items.as_deref()
    }

    pub fn audio_sources(&self) -> Option<&[AudioSource]> {
        self.audio_sources.as_deref()
    }

    pub fn active_scene(&self) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.is_active)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.name == name)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id == id)
    }

    /// Append a scene as inactive. A scene whose id is already known is
    /// refreshed in place and keeps its active flag.
    pub fn add_scene(&mut self, mut scene: Scene) {
        if let Some(existing) = self.scenes.iter_mut().find(|s| s.id == scene.id) {
            tracing::debug!(scene = %scene.id, "scene already known, refreshing it");
            scene.is_active = existing.is_active;
            *existing = scene;
            return;
        }
        scene.is_active = false;
        self.scenes.push(scene);
    }

    /// Remove a scene by id. Unknown ids are a no-op.
    pub fn remove_scene(&mut self, id: &str) -> Option<Scene> {
        let index = self.scenes.iter().position(|scene| scene.id == id)?;
        Some(self.scenes.remove(index))
    }

    /// Mark the scene with `id` as the only active one.
    /// Leaves the mirror untouched and returns `None` if the id is unknown.
    pub fn mark_active(&mut self, id: &str) -> Option<Scene> {
        self.find_by_id(id)?;
        for scene in &mut self.scenes {
            scene.is_active = scene.id == id;
        }
        self.active_scene().cloned()
    }

    pub fn replace_scene_items(&mut self, items: Vec<SceneItem>) {
        self.scene_items = Some(items);
    }

    pub fn replace_audio_sources(&mut self, sources: Vec<AudioSource>) {
        self.audio_sources = Some(sources);
    }

    /// Add an item to the active scene's list, replacing one with the same id.
    pub fn add_scene_item(&mut self, item: SceneItem) -> Result<(), MirrorAnomaly> {
        let active_id = self.active_scene().map(|scene| scene.id.clone());
        let items = self
            .scene_items
            .as_mut()
            .ok_or(MirrorAnomaly::NotPopulated(SCENE_ITEMS))?;

        if let (Some(scene), Some(active)) = (item.scene_id.as_ref(), active_id.as_ref()) {
            if scene != active {
                return Err(MirrorAnomaly::ForeignScene {
                    item: item.scene_item_id.clone(),
                    scene: scene.clone(),
                });
            }
        }

        match items
            .iter_mut()
            .find(|existing| existing.scene_item_id == item.scene_item_id)
        {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Ok(())
    }

    pub fn update_scene_item(&mut self, patch: &Value) -> Result<(), MirrorAnomaly> {
        apply_patch(self.scene_items.as_mut(), SCENE_ITEMS, patch)
    }

    pub fn update_audio_source(&mut self, patch: &Value) -> Result<(), MirrorAnomaly> {
        apply_patch(self.audio_sources.as_mut(), AUDIO_SOURCES, patch)
    }
}

/// Merge `patch` into the entry of `list` that carries the same key.
fn apply_patch<T: Keyed>(
    list: Option<&mut Vec<T>>,
    kind: &'static str,
    patch: &Value,
) -> Result<(), MirrorAnomaly> {
    let list = list.ok_or(MirrorAnomaly::NotPopulated(kind))?;
    let fields = patch.as_object().ok_or_else(|| MirrorAnomaly::InvalidPatch {
        kind,
        reason: "expected a JSON object".to_string(),
    })?;
    let key = fields
        .get(T::KEY_FIELD)
        .and_then(id_from_value)
        .ok_or(MirrorAnomaly::MissingKey {
            kind,
            field: T::KEY_FIELD,
        })?;

    let target = list
        .iter_mut()
        .find(|entry| entry.key() == key)
        .ok_or_else(|| MirrorAnomaly::UnknownEntity {
            kind,
            key: key.clone(),
        })?;

    *target = merge_fields(&*target, fields).map_err(|e| MirrorAnomaly::InvalidPatch {
        kind,
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mirror_with_scenes() -> SceneMirror {
        let mut mirror = SceneMirror::new();
        mirror.add_scene(Scene::new("1", "A"));
        mirror.add_scene(Scene::new("2", "B"));
        mirror.add_scene(Scene::new("3", "C"));
        mirror
    }

    fn source(id: &str, muted: bool) -> AudioSource {
        serde_json::from_value(json!({"sourceId": id, "muted": muted, "name": id})).unwrap()
    }

    fn item(id: &str, scene: &str) -> SceneItem {
        serde_json::from_value(json!({"sceneItemId": id, "sceneId": scene, "visible": true}))
            .unwrap()
    }

    #[test]
    fn added_scenes_start_inactive() {
        let mut mirror = SceneMirror::new();
        let mut scene = Scene::new("1", "A");
        scene.is_active = true;
        mirror.add_scene(scene);
        assert!(mirror.active_scene().is_none());
    }

    #[test]
    fn mark_active_keeps_exactly_one_active_scene() {
        let mut mirror = mirror_with_scenes();
        mirror.mark_active("1");
        let active = mirror.mark_active("3").unwrap();
        assert_eq!(active.name, "C");

        let active: Vec<_> = mirror.scenes().iter().filter(|s| s.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "3");
    }

    #[test]
    fn mark_active_ignores_unknown_scene() {
        let mut mirror = mirror_with_scenes();
        mirror.mark_active("2");
        assert!(mirror.mark_active("nope").is_none());
        assert_eq!(mirror.active_scene().unwrap().id, "2");
    }

    #[test]
    fn duplicate_scene_is_refreshed_in_place() {
        let mut mirror = mirror_with_scenes();
        mirror.mark_active("2");
        mirror.add_scene(Scene::new("2", "B renamed"));
        assert_eq!(mirror.scenes().len(), 3);
        assert_eq!(mirror.scenes()[1].name, "B renamed");
        assert!(mirror.scenes()[1].is_active);
    }

    #[test]
    fn removing_unknown_scene_is_a_no_op() {
        let mut mirror = mirror_with_scenes();
        assert!(mirror.remove_scene("42").is_none());
        assert_eq!(mirror.scenes().len(), 3);
        assert_eq!(mirror.remove_scene("2").unwrap().name, "B");
        let names: Vec<_> = mirror.scenes().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["A", "C"]);
    }

    #[test]
    fn updates_before_first_fetch_are_anomalies() {
        let mut mirror = mirror_with_scenes();
        assert_eq!(
            mirror.update_audio_source(&json!({"sourceId": "mic", "muted": true})),
            Err(MirrorAnomaly::NotPopulated("audio source"))
        );
        assert_eq!(
            mirror.update_scene_item(&json!({"sceneItemId": "i"})),
            Err(MirrorAnomaly::NotPopulated("scene item"))
        );
        assert_eq!(
            mirror.add_scene_item(item("i", "1")),
            Err(MirrorAnomaly::NotPopulated("scene item"))
        );
    }

    #[test]
    fn source_update_for_unknown_source_leaves_list_unchanged() {
        let mut mirror = mirror_with_scenes();
        mirror.replace_audio_sources(vec![source("mic", false)]);
        let before = mirror.audio_sources().unwrap().to_vec();

        let result = mirror.update_audio_source(&json!({"sourceId": "ghost", "muted": true}));
        assert_eq!(
            result,
            Err(MirrorAnomaly::UnknownEntity {
                kind: "audio source",
                key: "ghost".to_string()
            })
        );
        assert_eq!(mirror.audio_sources().unwrap(), before.as_slice());
    }

    #[test]
    fn source_update_merges_fields() {
        let mut mirror = mirror_with_scenes();
        mirror.replace_audio_sources(vec![source("mic", false), source("desktop", false)]);
        mirror
            .update_audio_source(&json!({"sourceId": "mic", "muted": true}))
            .unwrap();

        let sources = mirror.audio_sources().unwrap();
        assert!(sources[0].muted);
        assert_eq!(sources[0].extra.get("name"), Some(&json!("mic")));
        assert!(!sources[1].muted);
    }

    #[test]
    fn patch_without_key_is_reported() {
        let mut mirror = mirror_with_scenes();
        mirror.replace_audio_sources(vec![source("mic", false)]);
        assert_eq!(
            mirror.update_audio_source(&json!({"muted": true})),
            Err(MirrorAnomaly::MissingKey {
                kind: "audio source",
                field: "sourceId"
            })
        );
        assert!(matches!(
            mirror.update_audio_source(&json!("mic")),
            Err(MirrorAnomaly::InvalidPatch { .. })
        ));
    }

    #[test]
    fn items_are_added_and_updated_for_the_active_scene() {
        let mut mirror = mirror_with_scenes();
        mirror.mark_active("1");
        mirror.replace_scene_items(vec![item("a", "1")]);

        mirror.add_scene_item(item("b", "1")).unwrap();
        assert_eq!(
            mirror.add_scene_item(item("c", "2")),
            Err(MirrorAnomaly::ForeignScene {
                item: "c".to_string(),
                scene: "2".to_string()
            })
        );

        mirror
            .update_scene_item(&json!({"sceneItemId": "b", "visible": false}))
            .unwrap();
        let items = mirror.scene_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].extra.get("visible"), Some(&json!(false)));
        assert_eq!(items[1].scene_id.as_deref(), Some("1"));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut mirror = mirror_with_scenes();
        mirror.replace_scene_items(vec![]);
        mirror.replace_audio_sources(vec![]);
        mirror.reset();
        assert!(mirror.scenes().is_empty());
        assert!(mirror.scene_items().is_none());
        assert!(mirror.audio_sources().is_none());
    }
}
