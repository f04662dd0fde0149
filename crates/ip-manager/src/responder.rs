//! Admission patch computation.
//!
//! Only the output networks annotation is diffed. When it changed, the whole
//! annotations map is replaced in a single JSON Patch operation; changes to
//! any other key on their own never produce a patch.

use crate::error::IpManagerError;
use crate::request::NETWORKS_ANNOTATION;
use serde_json::json;
use std::collections::BTreeMap;

/// Path of the annotations subtree in an object's JSON form.
pub const ANNOTATIONS_PATH: &str = "/metadata/annotations";

/// Returns the patch turning `original` annotations into `current`, or
/// `None` if the networks annotation is unchanged.
///
/// The operation is a `replace`, except when the original object had no
/// annotations map at all, where RFC 6902 requires an `add`.
pub fn patch_annotation_changes(
    original: Option<&BTreeMap<String, String>>,
    current: Option<&BTreeMap<String, String>>,
) -> Result<Option<json_patch::Patch>, IpManagerError> {
    let before = original.and_then(|a| a.get(NETWORKS_ANNOTATION));
    let after = current.and_then(|a| a.get(NETWORKS_ANNOTATION));
    if before == after {
        return Ok(None);
    }

    let op = if original.is_some() { "replace" } else { "add" };
    let value = current.cloned().unwrap_or_default();
    let patch = serde_json::from_value(json!([{
        "op": op,
        "path": ANNOTATIONS_PATH,
        "value": value,
    }]))?;
    Ok(Some(patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TRANSACTION_TIMESTAMP_ANNOTATION;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn as_json(patch: &json_patch::Patch) -> serde_json::Value {
        serde_json::to_value(patch).unwrap()
    }

    #[test]
    fn test_unchanged_networks_annotation_gives_no_patch() {
        let original = annotations(&[("a", "1")]);
        let mut current = original.clone();
        current.insert("b".to_string(), "2".to_string());
        current.insert(TRANSACTION_TIMESTAMP_ANNOTATION.to_string(), "t".to_string());

        assert!(patch_annotation_changes(Some(&original), Some(&current)).unwrap().is_none());
        assert!(patch_annotation_changes(None, None).unwrap().is_none());
    }

    #[test]
    fn test_changed_networks_annotation_replaces_whole_map() {
        let original = annotations(&[("a", "1")]);
        let current = annotations(&[
            ("a", "1"),
            (NETWORKS_ANNOTATION, r#"[{"name":"net1","namespace":"ns1"}]"#),
        ]);

        let patch = patch_annotation_changes(Some(&original), Some(&current)).unwrap().unwrap();

        assert_eq!(
            as_json(&patch),
            json!([{
                "op": "replace",
                "path": "/metadata/annotations",
                "value": {
                    "a": "1",
                    "k8s.v1.cni.cncf.io/networks": r#"[{"name":"net1","namespace":"ns1"}]"#,
                },
            }])
        );
    }

    #[test]
    fn test_missing_annotations_map_is_added() {
        let current = annotations(&[(NETWORKS_ANNOTATION, "[]")]);

        let patch = patch_annotation_changes(None, Some(&current)).unwrap().unwrap();

        assert_eq!(as_json(&patch)[0]["op"], "add");
    }

    #[test]
    fn test_patch_applies_to_object() {
        let original = annotations(&[("a", "1")]);
        let current = annotations(&[("a", "1"), (NETWORKS_ANNOTATION, "[]")]);
        let patch = patch_annotation_changes(Some(&original), Some(&current)).unwrap().unwrap();

        let mut object = json!({"metadata": {"name": "p", "annotations": {"a": "1"}}});
        json_patch::patch(&mut object, &patch.0).unwrap();

        assert_eq!(object["metadata"]["annotations"][NETWORKS_ANNOTATION], "[]");
        assert_eq!(object["metadata"]["name"], "p");
    }
}
