use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use netcfg_core::{ClassId, OboActor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub component_id: String,
    pub class_id: ClassId,
    pub installed_by: OboActor,
    pub installed_at: String,
}

/// Committed component set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
}

impl Registry {
    pub fn get(&self, component_id: &str) -> Option<&ComponentRecord> {
        self.components
            .iter()
            .find(|c| c.component_id.eq_ignore_ascii_case(component_id))
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.get(component_id).is_some()
    }

    pub fn insert(&mut self, record: ComponentRecord) {
        self.remove(&record.component_id);
        self.components.push(record);
        self.components
            .sort_by(|a, b| a.component_id.cmp(&b.component_id));
    }

    pub fn remove(&mut self, component_id: &str) -> Option<ComponentRecord> {
        let idx = self
            .components
            .iter()
            .position(|c| c.component_id.eq_ignore_ascii_case(component_id))?;
        Some(self.components.remove(idx))
    }
}

/// Reads and atomically rewrites `components.json`.
pub struct ComponentRegistry {
    layout: StoreLayout,
}

impl ComponentRegistry {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// A missing registry file is an empty store.
    pub fn load(&self) -> Result<Registry, StoreError> {
        let path = self.layout.registry_file();
        if !path.exists() {
            return Ok(Registry::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(registry)?;
        let dir = self.layout.root();
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.registry_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ComponentRecord {
        ComponentRecord {
            component_id: id.to_owned(),
            class_id: ClassId::NET_SERVICE,
            installed_by: OboActor::User,
            installed_at: "2024-01-01T00:00:00+00:00".to_owned(),
        }
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ComponentRegistry::new(StoreLayout::new(dir.path()));
        assert!(registry.load().unwrap().components.is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ComponentRegistry::new(StoreLayout::new(dir.path()));
        let mut reg = Registry::default();
        reg.insert(record("ms_server"));
        reg.insert(record("ms_pacer"));
        store.save(&reg).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, reg);
        assert_eq!(loaded.components[0].component_id, "ms_pacer");
    }

    #[test]
    fn lookups_ignore_case() {
        let mut reg = Registry::default();
        reg.insert(record("MS_TCPIP"));
        assert!(reg.contains("ms_tcpip"));
        assert!(reg.remove("Ms_TcpIp").is_some());
        assert!(!reg.contains("ms_tcpip"));
    }

    #[test]
    fn corrupt_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        fs::write(layout.registry_file(), "{not json").unwrap();
        let err = ComponentRegistry::new(layout).load().unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
