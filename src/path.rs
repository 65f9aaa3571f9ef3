//! Device path addressing
//!
//! RIO addresses devices with dotted, optionally indexed segments such as
//! `C[1].Z[2]` or `S[3]`. This module builds those strings and maps
//! notification paths onto the nested state tree, where an indexed segment
//! `C[1]` becomes the two levels `"C"` → `"1"`.

use serde_json::{Map, Value};

/// Path of a controller, e.g. `C[1]`
pub fn controller_path(controller_id: u32) -> String {
    format!("C[{}]", controller_id)
}

/// Path of a zone on a controller, e.g. `C[1].Z[2]`
pub fn zone_path(controller_id: u32, zone_id: u32) -> String {
    format!("C[{}].Z[{}]", controller_id, zone_id)
}

/// Path of a source, e.g. `S[2]`
pub fn source_path(source_id: u32) -> String {
    format!("S[{}]", source_id)
}

/// Maximum number of zones a controller model provides
pub fn max_zones_for_model(model: &str) -> u32 {
    match model {
        "MCA-88" | "MCA-88X" | "MCA-C5" => 8,
        "MCA-66" | "MCA-C3" => 6,
        _ => 1,
    }
}

/// Maximum number of zone favorites a controller model provides
pub fn max_zone_favorites_for_model(model: &str) -> u32 {
    match model {
        "MCA-88" | "MCA-88X" | "MCA-C5" | "MCA-66" | "MCA-C3" | "MBX-AMP" | "MBX-PRE" => 4,
        "XSource" | "XZone4" | "XZone70V" => 2,
        _ => 0,
    }
}

/// Whether a controller model can daisy-chain further controllers over RNET
pub fn is_daisy_chain_capable(model: &str) -> bool {
    matches!(model, "MCA-88X" | "MCA-88" | "MCA-66" | "MCA-C5" | "MCA-C3")
}

/// One segment of a device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub key: String,
    pub index: Option<u32>,
}

/// Split a device path into its segments
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let indexed = part
                .split_once('[')
                .and_then(|(key, rest)| Some((key, rest.strip_suffix(']')?.parse::<u32>().ok()?)));
            match indexed {
                Some((key, index)) => PathSegment {
                    key: key.to_string(),
                    index: Some(index),
                },
                None => PathSegment {
                    key: part.to_string(),
                    index: None,
                },
            }
        })
        .collect()
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut().expect("node is an object")
}

fn descend<'a>(node: &'a mut Value, key: &str) -> &'a mut Value {
    ensure_object(node)
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
}

/// Set `leaf` to `value` under `branch`, creating intermediate levels
///
/// Reapplying the same update leaves the tree unchanged.
pub fn merge_into_tree(tree: &mut Value, branch: &str, leaf: &str, value: Option<&str>) {
    let mut node = tree;
    for segment in parse_path(branch) {
        node = descend(node, &segment.key);
        if let Some(index) = segment.index {
            node = descend(node, &index.to_string());
        }
    }
    let value = value.map_or(Value::Null, |v| Value::String(v.to_string()));
    ensure_object(node).insert(leaf.to_string(), value);
}

/// Look up the subtree stored for `path`
pub fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = tree;
    for segment in parse_path(path) {
        node = node.get(segment.key.as_str())?;
        if let Some(index) = segment.index {
            node = node.get(index.to_string())?;
        }
    }
    Some(node)
}

/// Mutable access to the subtree for `path`, creating it when missing
pub fn lookup_or_create<'a>(tree: &'a mut Value, path: &str) -> &'a mut Map<String, Value> {
    let mut node = tree;
    for segment in parse_path(path) {
        node = descend(node, &segment.key);
        if let Some(index) = segment.index {
            node = descend(node, &index.to_string());
        }
    }
    ensure_object(node)
}

/// Remove the subtree stored for `path`, returning it
pub fn prune_from_tree(tree: &mut Value, path: &str) -> Option<Value> {
    let mut segments = parse_path(path);
    let last = segments.pop()?;
    let mut node = tree;
    for segment in &segments {
        node = node.get_mut(segment.key.as_str())?;
        if let Some(index) = segment.index {
            node = node.get_mut(index.to_string())?;
        }
    }
    match last.index {
        Some(index) => node
            .get_mut(last.key.as_str())?
            .as_object_mut()?
            .remove(&index.to_string()),
        None => node.as_object_mut()?.remove(&last.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_builders() {
        assert_eq!(controller_path(1), "C[1]");
        assert_eq!(controller_path(6), "C[6]");
        assert_eq!(zone_path(1, 2), "C[1].Z[2]");
        assert_eq!(zone_path(6, 3), "C[6].Z[3]");
        assert_eq!(source_path(1), "S[1]");
        assert_eq!(source_path(2), "S[2]");
    }

    #[test]
    fn test_model_tables() {
        assert_eq!(max_zones_for_model("MCA-88"), 8);
        assert_eq!(max_zones_for_model("MCA-C3"), 6);
        assert_eq!(max_zones_for_model("unknown-model"), 1);
        assert_eq!(max_zone_favorites_for_model("MBX-PRE"), 4);
        assert_eq!(max_zone_favorites_for_model("XZone4"), 2);
        assert_eq!(max_zone_favorites_for_model("unknown-model"), 0);
        assert!(is_daisy_chain_capable("MCA-66"));
        assert!(!is_daisy_chain_capable("MBX-AMP"));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("C[1].Z[2].favorite[3]"),
            vec![
                PathSegment { key: "C".into(), index: Some(1) },
                PathSegment { key: "Z".into(), index: Some(2) },
                PathSegment { key: "favorite".into(), index: Some(3) },
            ]
        );
        assert_eq!(
            parse_path("System"),
            vec![PathSegment { key: "System".into(), index: None }]
        );
        assert!(parse_path("").is_empty());
    }

    #[test]
    fn test_merge_builds_nested_levels() {
        let mut tree = json!({});
        merge_into_tree(&mut tree, "C[1].Z[2]", "volume", Some("30"));
        merge_into_tree(&mut tree, "C[1].Z[2]", "name", Some("Kitchen"));
        merge_into_tree(&mut tree, "System", "status", None);

        assert_eq!(
            tree,
            json!({
                "C": { "1": { "Z": { "2": { "volume": "30", "name": "Kitchen" } } } },
                "System": { "status": null }
            })
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = json!({});
        merge_into_tree(&mut once, "S[4]", "songName", Some("Song"));

        let mut twice = json!({});
        merge_into_tree(&mut twice, "S[4]", "songName", Some("Song"));
        merge_into_tree(&mut twice, "S[4]", "songName", Some("Song"));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_lookup_and_prune() {
        let mut tree = json!({});
        merge_into_tree(&mut tree, "C[1].Z[1]", "name", Some("Den"));
        merge_into_tree(&mut tree, "C[1].Z[2]", "name", Some("Patio"));

        assert_eq!(lookup(&tree, "C[1].Z[2]"), Some(&json!({ "name": "Patio" })));
        assert!(lookup(&tree, "C[2]").is_none());

        let removed = prune_from_tree(&mut tree, "C[1].Z[2]");
        assert_eq!(removed, Some(json!({ "name": "Patio" })));
        assert!(lookup(&tree, "C[1].Z[2]").is_none());
        assert!(lookup(&tree, "C[1].Z[1]").is_some());
        assert!(prune_from_tree(&mut tree, "S[9]").is_none());
    }

    #[test]
    fn test_lookup_or_create() {
        let mut tree = json!({});
        lookup_or_create(&mut tree, "C[1].Z[1]").insert("enabled_sources".into(), json!([1, 3]));
        assert_eq!(tree["C"]["1"]["Z"]["1"]["enabled_sources"], json!([1, 3]));
    }
}
