//! Field masks: sets of field keys/paths ignored by the masked diff engine.
//!
//! A mask is merged per-[`ResourceKey`][crate::resource::ResourceKey] from a
//! "learned" mask (discovered by an external learning pass, not this crate's
//! concern) and a "configured" mask (hand-written by the plan author), per
//! spec.md §3/§6. Loading the raw JSON files is `coord-server`'s job
//! (spec.md §1 lists disk/environment loading as an external collaborator);
//! this module only models the merged result and the lookup the diff engine
//! needs.

use std::collections::HashSet;

/// The two mask sets that apply to a single `ResourceKey`, optionally mirrored
/// for the "API form" of an object (spec.md §3's `FieldMask`).
#[derive(Clone, Debug, Default)]
pub struct FieldMask {
    pub field_key_mask: HashSet<String>,
    pub field_path_mask: HashSet<String>,
    pub field_key_mask_api_form: HashSet<String>,
    pub field_path_mask_api_form: HashSet<String>,
}

impl FieldMask {
    /// `true` if `path` (already masked-checked as a dotted string) or the
    /// leaf key at the end of `path` should be ignored by the diff engine.
    pub fn is_masked(&self, path: &[String], api_form: bool) -> bool {
        let (key_mask, path_mask) = if api_form {
            (&self.field_key_mask_api_form, &self.field_path_mask_api_form)
        } else {
            (&self.field_key_mask, &self.field_path_mask)
        };
        if let Some(leaf) = path.last() {
            if key_mask.contains(leaf) {
                return true;
            }
        }
        let dotted = path.join(".");
        path_mask.contains(&dotted)
    }
}

/// Raw mask files as loaded from disk: `learned-mask.json` maps
/// `ResourceKey -> [dotted paths]`; `configured-mask.json` has `keys` and
/// `paths` lists that apply to every resource.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct ConfiguredMask {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Merges a resource's learned paths with the global configured mask, per
/// spec.md §3's `mergeAndRefineMask` contract.
///
/// The API-form mask pair mirrors the plain one: a masked field name or
/// dotted path (`resourceVersion`, `metadata.generation`, ...) identifies the
/// same field whether the object was read off the informer cache or off the
/// wire, so there is no separate key-transform step to apply here.
pub fn merge_mask(learned_paths: &[String], configured: &ConfiguredMask) -> FieldMask {
    let mut field_path_mask: HashSet<String> = learned_paths.iter().cloned().collect();
    field_path_mask.extend(configured.paths.iter().cloned());
    let field_key_mask: HashSet<String> = configured.keys.iter().cloned().collect();
    let field_key_mask_api_form = field_key_mask.clone();
    let field_path_mask_api_form = field_path_mask.clone();
    FieldMask {
        field_key_mask,
        field_path_mask,
        field_key_mask_api_form,
        field_path_mask_api_form,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_by_key_anywhere_in_tree() {
        let mask = FieldMask {
            field_key_mask: ["resourceVersion".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(mask.is_masked(&["metadata".into(), "resourceVersion".into()], false));
        assert!(!mask.is_masked(&["metadata".into(), "name".into()], false));
    }

    #[test]
    fn masks_by_dotted_path() {
        let mask = FieldMask {
            field_path_mask: ["metadata.resourceVersion".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(mask.is_masked(&["metadata".into(), "resourceVersion".into()], false));
        assert!(!mask.is_masked(&["status".into(), "resourceVersion".into()], false));
    }

    #[test]
    fn merges_learned_and_configured() {
        let configured = ConfiguredMask {
            keys: vec!["uid".into()],
            paths: vec!["metadata.generation".into()],
        };
        let mask = merge_mask(&["status.lastUpdate".to_string()], &configured);
        assert!(mask.field_path_mask.contains("status.lastUpdate"));
        assert!(mask.field_path_mask.contains("metadata.generation"));
        assert!(mask.field_key_mask.contains("uid"));
        assert_eq!(mask.field_key_mask_api_form, mask.field_key_mask);
        assert_eq!(mask.field_path_mask_api_form, mask.field_path_mask);
    }
}
