//! Config/plan/mask loading (C9): the disk-facing collaborator spec.md §1
//! assigns to the host rather than the engine.
//!
//! Grounded on the original harness's `getConfig`/`getMask` helpers: a small
//! `server.yaml` carries the process-wide `ActionContext` seed values, and a
//! `learned-mask.json`/`configured-mask.json` pair is merged per-resource
//! (spec.md §6).

use std::collections::HashMap;
use std::path::Path;

use coord_core::mask::{merge_mask, ConfiguredMask, FieldMask};
use coord_core::plan::{MaskResolver, RawPlan};
use coord_core::resource::ResourceKey;
use serde::Deserialize;

use crate::error::Error;

/// `server.yaml`: the process-wide values `ActionContext::new` is seeded
/// with, plus where to listen.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub namespace: String,
    #[serde(rename = "leadingAPIServer")]
    pub leading_api_server: String,
    #[serde(rename = "followingAPIServer")]
    pub following_api_server: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:6443".to_string()
}

fn read_to_string(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_server_config(path: &Path) -> Result<ServerConfig, Error> {
    let text = read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_plan(path: &Path) -> Result<RawPlan, Error> {
    let text = read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
        path: path.display().to_string(),
        source,
    })
}

/// A resolved mask set: `learned-mask.json`'s per-`ResourceKey` paths merged
/// with `configured-mask.json`'s global keys/paths.
pub struct MaskTable {
    learned: HashMap<ResourceKey, Vec<String>>,
    configured: ConfiguredMask,
}

impl MaskTable {
    pub fn load(learned_path: &Path, configured_path: &Path) -> Result<Self, Error> {
        let learned_text = read_to_string(learned_path)?;
        let learned_raw: HashMap<String, Vec<String>> =
            serde_json::from_str(&learned_text).map_err(|source| Error::Json {
                path: learned_path.display().to_string(),
                source,
            })?;
        let learned = learned_raw
            .into_iter()
            .map(|(k, v)| (ResourceKey::from_raw(k), v))
            .collect();

        let configured_text = read_to_string(configured_path)?;
        let configured = serde_json::from_str(&configured_text).map_err(|source| Error::Json {
            path: configured_path.display().to_string(),
            source,
        })?;

        Ok(MaskTable { learned, configured })
    }

    pub fn resolve(&self, resource_key: &ResourceKey) -> FieldMask {
        let empty = Vec::new();
        let learned_paths = self.learned.get(resource_key).unwrap_or(&empty);
        merge_mask(learned_paths, &self.configured)
    }
}

impl MaskResolver for MaskTable {
    fn resolve(&self, resource_key: &ResourceKey) -> FieldMask {
        MaskTable::resolve(self, resource_key)
    }
}
