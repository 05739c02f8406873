//! Room configuration document
//!
//! The document is JSON:
//! ```json
//! {
//!   "information": { "guid": "...", "building": "...", "floor": "...", "support": "..." },
//!   "sources": [ { "name": "...", "icon": 1, "input": 1, "rtsp_url": "...", "preview_url": "...", "ipid": 17 } ],
//!   "screens": [ { "name": "...", "output": 1, "ipid": 33 } ],
//!   "last_update": "..."
//! }
//! ```
//! Unknown fields are ignored and missing optional fields default to empty.
//! A room identity is generated on the first load and written back.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::devices::DeviceAddress;
use crate::error::RoomError;

/// Timestamp format written to `last_update`
const LAST_UPDATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Site information block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomInformation {
    /// Room identity. Empty or absent means "not yet assigned".
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub floor: Option<String>,
    /// Support contact (phone number or mail)
    #[serde(default)]
    pub support: Option<String>,
}

/// A video source (transmitter)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "icon")]
    pub icon_id: Option<i32>,
    #[serde(default, rename = "input")]
    pub input_index: i32,
    #[serde(default, rename = "rtsp_url")]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default, rename = "ipid")]
    pub device_address: DeviceAddress,
}

/// A display output (receiver)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "output")]
    pub output_index: i32,
    #[serde(default, rename = "ipid")]
    pub device_address: DeviceAddress,
}

/// The persisted room configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(default)]
    pub information: RoomInformation,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default, rename = "screens")]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub last_update: Option<String>,
}

impl RoomConfig {
    /// Room identity, if one has been assigned
    pub fn identity(&self) -> Option<&str> {
        self.information
            .guid
            .as_deref()
            .filter(|guid| !guid.trim().is_empty())
    }

    /// Assign a fresh identity if none is set. Returns true if one was generated.
    pub fn ensure_identity(&mut self) -> bool {
        if self.identity().is_some() {
            return false;
        }
        self.information.guid = Some(Uuid::new_v4().to_string());
        true
    }

    /// Reject duplicate input or output indices
    pub fn validate(&self) -> Result<(), RoomError> {
        check_unique_indices(&self.sources, &self.outputs)
    }

    pub fn source(&self, input_index: i32) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.input_index == input_index)
    }
}

/// Input indices must be unique among sources, output indices among outputs
pub fn check_unique_indices(sources: &[SourceSpec], outputs: &[OutputSpec]) -> Result<(), RoomError> {
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.input_index) {
            return Err(RoomError::ConfigurationConflict(format!(
                "duplicate input index {}",
                source.input_index
            )));
        }
    }

    let mut seen = HashSet::new();
    for output in outputs {
        if !seen.insert(output.output_index) {
            return Err(RoomError::ConfigurationConflict(format!(
                "duplicate output index {}",
                output.output_index
            )));
        }
    }

    Ok(())
}

/// Held for every load/persist cycle in the process
static CONFIG_LOCK: Mutex<()> = Mutex::new(());

/// Loads and persists the room configuration.
///
/// All stores share one process-wide lock, so at most one load/persist cycle
/// runs at a time no matter how many stores exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigStore;

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, parse and validate the configuration at `path`.
    ///
    /// If the document has no identity one is generated and the file is
    /// rewritten before returning. A failed rewrite is logged and the
    /// in-memory identity is still returned.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<RoomConfig, RoomError> {
        let path = path.as_ref();
        info!("Loading room config: {}", path.display());

        if path.as_os_str().is_empty() {
            warn!("No room config file name given");
            return Err(RoomError::ConfigNotFound(String::new()));
        }
        if !path.is_file() {
            warn!("Room config file doesn't exist: {}", path.display());
            return Err(RoomError::ConfigNotFound(path.display().to_string()));
        }

        let _guard = CONFIG_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let content = fs::read_to_string(path).map_err(|e| {
            error!("Failed to read room config {}: {}", path.display(), e);
            RoomError::ConfigNotFound(format!("{}: {}", path.display(), e))
        })?;

        let mut config: RoomConfig = serde_json::from_str(&content).map_err(|e| {
            error!("Room config {} is malformed: {}", path.display(), e);
            RoomError::MalformedConfig(e.to_string())
        })?;

        config.validate()?;

        if config.ensure_identity() {
            info!(
                "Room config has no identity, assigned {}",
                config.identity().unwrap_or_default()
            );
            if let Err(e) = write_document(&mut config, path) {
                error!("Failed to persist new room identity: {}", e);
            }
        }

        info!(
            "Room config loaded: {} source(s), {} screen(s)",
            config.sources.len(),
            config.outputs.len()
        );
        Ok(config)
    }

    /// Stamp `last_update` and write the full document to `path`
    pub fn persist(&self, config: &mut RoomConfig, path: impl AsRef<Path>) -> Result<(), RoomError> {
        let _guard = CONFIG_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        write_document(config, path.as_ref()).inspect_err(|e| {
            error!("Failed to persist room config: {}", e);
        })
    }
}

/// Write via a sibling temp file and rename so readers never see a partial document
fn write_document(config: &mut RoomConfig, path: &Path) -> Result<(), RoomError> {
    debug!("Writing room config: {}", path.display());

    config.last_update = Some(Local::now().format(LAST_UPDATE_FORMAT).to_string());

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| RoomError::WriteFailed(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| RoomError::WriteFailed(format!("{}: {}", parent.display(), e)))?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, json)
        .map_err(|e| RoomError::WriteFailed(format!("{}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        RoomError::WriteFailed(format!("{}: {}", path.display(), e))
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "information": { "building": "HQ", "floor": "3", "support": "+46 8 123 45" },
        "sources": [
            { "name": "Laptop", "icon": 2, "input": 1, "rtsp_url": "rtsp://tx1/live", "preview_url": "rtsp://tx1/preview", "ipid": 17 },
            { "name": "Camera", "input": 2, "ipid": 18 }
        ],
        "screens": [ { "name": "Main", "output": 1, "ipid": 33 } ],
        "vendor_extension": { "ignored": true }
    }"#;

    fn write_sample(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_with_defaults_and_unknown_fields() {
        let config: RoomConfig = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(config.information.building.as_deref(), Some("HQ"));
        assert_eq!(config.identity(), None);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].icon_id, Some(2));
        assert_eq!(config.sources[1].preview_url, None);
        assert_eq!(config.sources[1].stream_url, None);
        assert_eq!(config.outputs[0].device_address, 33);
        assert_eq!(config.source(2).map(|s| s.name.as_str()), Some("Camera"));
    }

    #[test]
    fn test_missing_indices_default_to_zero() {
        let config: RoomConfig = serde_json::from_str(
            r#"{ "sources": [ { "name": "Laptop", "ipid": 17 } ], "screens": [ { "name": "Main" } ] }"#,
        )
        .unwrap();

        assert_eq!(config.sources[0].input_index, 0);
        assert_eq!(config.outputs[0].output_index, 0);
        assert_eq!(config.outputs[0].device_address, 0);
        assert!(config.validate().is_ok());

        let twice: RoomConfig =
            serde_json::from_str(r#"{ "sources": [ { "ipid": 17 }, { "ipid": 18 } ] }"#).unwrap();
        assert!(matches!(
            twice.validate(),
            Err(RoomError::ConfigurationConflict(_))
        ));
    }

    #[test]
    fn test_empty_guid_counts_as_missing() {
        let mut config = RoomConfig::default();
        config.information.guid = Some("  ".to_string());
        assert_eq!(config.identity(), None);
        assert!(config.ensure_identity());
        assert!(!config.ensure_identity());
    }

    #[test]
    fn test_load_missing_file() {
        let store = ConfigStore::new();
        assert!(matches!(
            store.load("/nonexistent/room/config.json"),
            Err(RoomError::ConfigNotFound(_))
        ));
        assert!(matches!(store.load(""), Err(RoomError::ConfigNotFound(_))));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, "{ \"sources\": [ { \"input\": \"one\" } ] }");

        assert!(matches!(
            ConfigStore::new().load(&path),
            Err(RoomError::MalformedConfig(_))
        ));
    }

    #[test]
    fn test_load_rejects_duplicate_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(
            &dir,
            r#"{ "sources": [ { "input": 1, "ipid": 17 }, { "input": 1, "ipid": 18 } ] }"#,
        );

        assert!(matches!(
            ConfigStore::new().load(&path),
            Err(RoomError::ConfigurationConflict(_))
        ));
    }

    #[test]
    fn test_identity_is_generated_persisted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let store = ConfigStore::new();

        let first = store.load(&path).unwrap();
        let guid = first.identity().unwrap().to_string();
        assert!(Uuid::parse_str(&guid).is_ok());
        assert!(first.last_update.is_some());

        let on_disk: RoomConfig =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.identity(), Some(guid.as_str()));

        let second = store.load(&path).unwrap();
        assert_eq!(second.identity(), Some(guid.as_str()));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_existing_identity_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(
            &dir,
            r#"{ "information": { "guid": "0b7e1a6c-6f6e-4f5e-9d59-3d4f1b1b0c11" } }"#,
        );

        let config = ConfigStore::new().load(&path).unwrap();
        assert_eq!(
            config.identity(),
            Some("0b7e1a6c-6f6e-4f5e-9d59-3d4f1b1b0c11")
        );
        assert_eq!(config.last_update, None);
    }

    #[test]
    fn test_persist_stamps_last_update_and_keeps_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config: RoomConfig = serde_json::from_str(SAMPLE).unwrap();

        ConfigStore::new().persist(&mut config, &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"screens\""));
        assert!(written.contains("\"rtsp_url\""));
        assert!(written.contains("\"ipid\": 17"));
        assert!(written.contains("\"last_update\""));
        assert!(config.last_update.is_some());
    }

    #[test]
    fn test_persist_to_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();
        let mut config = RoomConfig::default();

        let result = ConfigStore::new().persist(&mut config, blocker.join("config.json"));
        assert!(matches!(result, Err(RoomError::WriteFailed(_))));
    }
}
