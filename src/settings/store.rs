use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::locks::LockMap;
use crate::client::BackendApi;
use crate::config::SettingsCatalog;
use crate::types::{EditRejected, Setting, SettingValue, SettingsPatch, SettingsSnapshot};

#[derive(Debug, Default)]
struct StoreState {
    snapshot: SettingsSnapshot,
    locks: LockMap,
    /// Sequence number of the newest update sent for each key.
    latest_seq: HashMap<String, u64>,
}

/// An update that has been applied locally and handed to the network.
///
/// Dropping it detaches the request; awaiting `request` waits for the
/// backend to answer (the outcome is only logged either way).
#[derive(Debug)]
pub struct PendingUpdate {
    pub seq: u64,
    pub patch: SettingsPatch,
    pub request: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    #[serde(flatten)]
    pub setting: Setting,
    pub locked: bool,
    /// Lock toggle state; checked means unlocked.
    pub checked: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsPanel {
    pub numeric: Vec<FieldView>,
    pub boolean: Vec<FieldView>,
    pub enumerated: Vec<FieldView>,
    /// Keys the operator has locked, sorted.
    pub locked: Vec<String>,
}

/// Editable copy of the backend's runtime settings for one settings view.
///
/// Loaded once; after that the console is the merge authority. Edits are
/// optimistic and fire-and-forget: the local value changes immediately and
/// a failed update is logged, never rolled back.
pub struct SettingsStore {
    api: Arc<dyn BackendApi>,
    catalog: Arc<SettingsCatalog>,
    state: Arc<RwLock<StoreState>>,
    next_seq: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl SettingsStore {
    /// Reads the settings resource once. Any failure leaves an empty set.
    pub async fn load(api: Arc<dyn BackendApi>, catalog: Arc<SettingsCatalog>) -> Self {
        let snapshot = match api.fetch_settings().await {
            Ok(raw) => {
                let snapshot = SettingsSnapshot::derive(&catalog, &raw);
                info!(
                    "Settings loaded: {} fields ({} reported by backend)",
                    snapshot.len(),
                    raw.len()
                );
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Settings load failed, showing an empty set");
                SettingsSnapshot::default()
            }
        };

        Self {
            api,
            catalog,
            state: Arc::new(RwLock::new(StoreState {
                snapshot,
                ..StoreState::default()
            })),
            next_seq: Arc::new(AtomicU64::new(1)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn snapshot(&self) -> SettingsSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn panel(&self) -> SettingsPanel {
        let state = self.state.read().await;
        let mut panel = SettingsPanel::default();

        for setting in state.snapshot.iter() {
            let locked = state.locks.is_locked(setting.key());
            let field = FieldView {
                setting: setting.clone(),
                locked,
                checked: state.locks.checked(setting.key()),
                disabled: locked,
            };
            match setting {
                Setting::Numeric(_) => panel.numeric.push(field),
                Setting::Boolean(_) => panel.boolean.push(field),
                Setting::Enumerated(_) => panel.enumerated.push(field),
            }
        }
        panel.locked = state.locks.locked_keys().map(str::to_string).collect();
        panel.locked.sort();
        panel
    }

    /// Flips the edit lock for `key`; returns the new locked state. Only
    /// fields present in the snapshot can be locked.
    pub async fn toggle_lock(&self, key: &str) -> Result<bool, EditRejected> {
        let mut state = self.state.write().await;
        if state.snapshot.get(key).is_none() {
            return Err(EditRejected::UnknownKey {
                key: key.to_string(),
            });
        }
        let locked = state.locks.toggle(key);
        info!(key, locked, "Field lock toggled");
        Ok(locked)
    }

    pub async fn is_locked(&self, key: &str) -> bool {
        self.state.read().await.locks.is_locked(key)
    }

    /// The single mutation path for a field. Locked fields and invalid
    /// values are rejected before anything is sent.
    pub async fn edit(&self, key: &str, value: SettingValue) -> Result<PendingUpdate, EditRejected> {
        let mut state = self.state.write().await;

        if state.locks.is_locked(key) {
            debug!(key, "Edit ignored, field is locked");
            return Err(EditRejected::Locked {
                key: key.to_string(),
            });
        }

        let setting = state
            .snapshot
            .get_mut(key)
            .ok_or_else(|| EditRejected::UnknownKey {
                key: key.to_string(),
            })?;
        let wire = setting.assign(value)?;

        let mut patch = SettingsPatch::new();
        patch.insert(key.to_string(), wire);
        let seq = self.stamp(&mut state, &patch);
        drop(state);

        Ok(self.dispatch(patch, seq))
    }

    /// Sends a partial update as-is, without touching local state.
    pub async fn apply(&self, patch: SettingsPatch) -> PendingUpdate {
        let seq = {
            let mut state = self.state.write().await;
            self.stamp(&mut state, &patch)
        };
        self.dispatch(patch, seq)
    }

    /// Puts every unlocked field back to its catalog default and sends the
    /// fields that actually changed in one update. `None` if nothing changed.
    pub async fn reset_to_defaults(&self) -> Option<PendingUpdate> {
        let mut state = self.state.write().await;
        let mut patch = SettingsPatch::new();

        for def in self.catalog.settings() {
            if state.locks.is_locked(&def.key) {
                continue;
            }
            let Some(default) = def.default_value() else {
                continue;
            };
            let Some(setting) = state.snapshot.get_mut(&def.key) else {
                continue;
            };
            let before = setting.wire_value();
            match setting.assign(default) {
                Ok(after) if after != before => {
                    patch.insert(def.key.clone(), after);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Catalog default rejected"),
            }
        }

        let skipped: Vec<&str> = state.locks.locked_keys().collect();
        if !skipped.is_empty() {
            debug!(?skipped, "Reset leaves locked settings alone");
        }

        if patch.is_empty() {
            debug!("Reset to defaults: nothing to change");
            return None;
        }

        info!("Resetting {} settings to defaults", patch.len());
        let seq = self.stamp(&mut state, &patch);
        drop(state);
        Some(self.dispatch(patch, seq))
    }

    /// Marks the view as gone. Late responses are still logged but no longer
    /// consult local state.
    pub fn unmount(&self) {
        self.alive.store(false, Ordering::Release);
        info!("Settings view unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn stamp(&self, state: &mut StoreState, patch: &SettingsPatch) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        for key in patch.keys() {
            state.latest_seq.insert(key.clone(), seq);
        }
        seq
    }

    fn dispatch(&self, patch: SettingsPatch, seq: u64) -> PendingUpdate {
        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);
        let alive = Arc::clone(&self.alive);
        let body = patch.clone();

        let request = tokio::spawn(async move {
            let keys: Vec<String> = body.keys().cloned().collect();
            match api.update_settings(body, seq).await {
                Ok(()) => debug!(seq, ?keys, "Settings update accepted"),
                Err(e) => {
                    if !alive.load(Ordering::Acquire) {
                        debug!(seq, ?keys, error = %e, "Settings update failed after unmount");
                        return;
                    }
                    let superseded = {
                        let state = state.read().await;
                        keys.iter()
                            .all(|k| state.latest_seq.get(k).is_some_and(|latest| *latest > seq))
                    };
                    if superseded {
                        debug!(seq, ?keys, error = %e, "Superseded settings update failed");
                    } else {
                        warn!(seq, ?keys, error = %e, "Settings update failed, keeping local value");
                    }
                }
            }
        });

        PendingUpdate {
            seq,
            patch,
            request,
        }
    }
}

impl Clone for SettingsStore {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            catalog: Arc::clone(&self.catalog),
            state: Arc::clone(&self.state),
            next_seq: Arc::clone(&self.next_seq),
            alive: Arc::clone(&self.alive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeBackend;
    use crate::client::{ApiError, HttpBackend, MockBackendApi};
    use serde_json::json;

    fn catalog() -> Arc<SettingsCatalog> {
        Arc::new(SettingsCatalog::builtin())
    }

    fn mock_with_settings(settings: serde_json::Value) -> MockBackendApi {
        let mut mock = MockBackendApi::new();
        let raw = settings.as_object().cloned().unwrap();
        mock.expect_fetch_settings().times(1).returning(move || Ok(raw.clone()));
        mock
    }

    #[tokio::test]
    async fn test_load_scenario() {
        let mock = mock_with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45}));
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;

        let panel = store.panel().await;
        assert_eq!(panel.numeric.len(), 1);
        match &panel.numeric[0].setting {
            Setting::Numeric(n) => {
                assert_eq!(n.label, "AI Cool-down (Open)");
                assert_eq!(n.value, 45.0);
                assert_eq!((n.min, n.max), (10.0, 300.0));
            }
            other => panic!("expected numeric, got {other:?}"),
        }
        assert!(!panel.numeric[0].disabled);
        assert!(panel.numeric[0].checked);
    }

    #[tokio::test]
    async fn test_load_failure_gives_empty_set() {
        let mut mock = MockBackendApi::new();
        mock.expect_fetch_settings().times(1).returning(|| {
            Err(ApiError::Status {
                path: "/settings".into(),
                status: 503,
            })
        });
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_issues_no_request() {
        let backend = HttpBackend::new(None, "/settings", None).unwrap();
        let store = SettingsStore::load(Arc::new(backend), catalog()).await;
        assert!(store.snapshot().await.is_empty());
        assert!(matches!(
            store.edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(60.0)).await,
            Err(EditRejected::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_locked_field_sends_nothing() {
        let mut mock = mock_with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45}));
        mock.expect_update_settings().times(0);
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;

        assert_eq!(store.toggle_lock("AI_COOLDOWN_SEC_OPEN").await, Ok(true));
        let result = store.edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(120.0)).await;
        assert_eq!(
            result.unwrap_err(),
            EditRejected::Locked {
                key: "AI_COOLDOWN_SEC_OPEN".into()
            }
        );

        let panel = store.panel().await;
        assert!(panel.numeric[0].locked);
        assert!(panel.numeric[0].disabled);
        assert!(!panel.numeric[0].checked);
        assert_eq!(
            store.snapshot().await.get("AI_COOLDOWN_SEC_OPEN").unwrap().wire_value(),
            json!(45)
        );
    }

    #[tokio::test]
    async fn test_unknown_keys_cannot_be_locked() {
        let mock = mock_with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45}));
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;

        assert_eq!(
            store.toggle_lock("NOT_A_SETTING").await,
            Err(EditRejected::UnknownKey {
                key: "NOT_A_SETTING".into()
            })
        );
        // Known to the catalog but not reported by the backend.
        assert!(store.toggle_lock("TRAIL_ENABLED").await.is_err());
        assert!(store.panel().await.locked.is_empty());
        assert!(!store.is_locked("NOT_A_SETTING").await);
    }

    #[tokio::test]
    async fn test_unlocked_edit_sends_exactly_one_update() {
        let mut mock = mock_with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45}));
        mock.expect_update_settings()
            .withf(|patch: &SettingsPatch, _seq: &u64| {
                patch.len() == 1 && patch["AI_COOLDOWN_SEC_OPEN"] == json!(120)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;

        store.toggle_lock("AI_COOLDOWN_SEC_OPEN").await.unwrap();
        assert_eq!(store.toggle_lock("AI_COOLDOWN_SEC_OPEN").await, Ok(false));

        let pending = store
            .edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(120.0))
            .await
            .unwrap();
        pending.request.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_update_keeps_optimistic_value() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45}))
                .failing_updates(),
        );
        let store = SettingsStore::load(backend.clone(), catalog()).await;

        let pending = store
            .edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(200.0))
            .await
            .unwrap();
        assert!(pending.request.await.is_ok());

        assert_eq!(backend.updates().len(), 1);
        assert_eq!(
            store.snapshot().await.get("AI_COOLDOWN_SEC_OPEN").unwrap().wire_value(),
            json!(200)
        );
    }

    #[tokio::test]
    async fn test_rapid_edits_are_not_coalesced() {
        // Each edit goes out on its own; the sequence number is the only
        // ordering signal the backend gets.
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let store = SettingsStore::load(backend.clone(), catalog()).await;

        let first = store.edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(50.0)).await.unwrap();
        let second = store.edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(55.0)).await.unwrap();
        assert!(second.seq > first.seq);
        first.request.await.unwrap();
        second.request.await.unwrap();

        let mut updates = backend.updates();
        updates.sort_by_key(|(_, seq)| *seq);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0["AI_COOLDOWN_SEC_OPEN"], json!(50));
        assert_eq!(updates[1].0["AI_COOLDOWN_SEC_OPEN"], json!(55));
        assert_eq!(updates[1].1, second.seq);
    }

    #[tokio::test]
    async fn test_edit_clamps_to_range() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let store = SettingsStore::load(backend.clone(), catalog()).await;

        let pending = store.edit("AI_COOLDOWN_SEC_OPEN", SettingValue::Number(1.0)).await.unwrap();
        assert_eq!(pending.patch["AI_COOLDOWN_SEC_OPEN"], json!(10));
        pending.request.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_edits_send_nothing() {
        let mut mock = mock_with_settings(json!({"AI_MODEL": "gpt-4o", "TRAIL_ENABLED": true}));
        mock.expect_update_settings().times(0);
        let store = SettingsStore::load(Arc::new(mock), catalog()).await;

        assert!(matches!(
            store.edit("AI_MODEL", SettingValue::Choice("davinci".into())).await,
            Err(EditRejected::NotAnOption { .. })
        ));
        assert!(matches!(
            store.edit("TRAIL_ENABLED", SettingValue::Number(1.0)).await,
            Err(EditRejected::KindMismatch { .. })
        ));
        assert!(matches!(
            store.edit("NOPE", SettingValue::Flag(true)).await,
            Err(EditRejected::UnknownKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_skips_locked_fields() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({
            "AI_COOLDOWN_SEC_OPEN": 45,
            "AI_COOLDOWN_SEC_FLAT": 90,
            "TRAIL_ENABLED": true,
            "AI_MODEL": "gpt-4o",
        })));
        let store = SettingsStore::load(backend.clone(), catalog()).await;
        store.toggle_lock("AI_COOLDOWN_SEC_FLAT").await.unwrap();
        assert_eq!(store.panel().await.locked, vec!["AI_COOLDOWN_SEC_FLAT".to_string()]);

        let pending = store.reset_to_defaults().await.unwrap();
        pending.request.await.unwrap();

        let updates = backend.updates();
        assert_eq!(updates.len(), 1);
        let patch = &updates[0].0;
        assert_eq!(patch.len(), 2);
        assert_eq!(patch["AI_COOLDOWN_SEC_OPEN"], json!(30));
        assert_eq!(patch["AI_MODEL"], json!("gpt-4.1-nano"));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.get("AI_COOLDOWN_SEC_FLAT").unwrap().wire_value(), json!(90));

        // Second reset has nothing left to change.
        assert!(store.reset_to_defaults().await.is_none());
    }

    #[tokio::test]
    async fn test_apply_sends_patch_untouched() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let store = SettingsStore::load(backend.clone(), catalog()).await;

        let mut patch = SettingsPatch::new();
        patch.insert("AI_COOLDOWN_SEC_OPEN".into(), json!(75));
        store.apply(patch).await.request.await.unwrap();

        assert_eq!(backend.updates().len(), 1);
        assert_eq!(
            store.snapshot().await.get("AI_COOLDOWN_SEC_OPEN").unwrap().wire_value(),
            json!(45)
        );
    }
}
