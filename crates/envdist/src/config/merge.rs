//! Key based merge rules for argument lists and property maps

use super::dist_file::ArgumentEntry;
use std::collections::HashMap;

/// Apply `overrides` to a copy of `original`, one override at a time.
///
/// - key present, value missing or empty: every entry with that key is removed
/// - key present, value set: the first entry with that key takes the value
/// - key absent: the override is appended as is, even with an empty value
pub fn merge(original: &[ArgumentEntry], overrides: &[ArgumentEntry]) -> Vec<ArgumentEntry> {
    let mut result = original.to_vec();

    for entry in overrides {
        match result.iter().position(|e| e.key == entry.key) {
            Some(_) if entry.is_empty() => result.retain(|e| e.key != entry.key),
            Some(index) => result[index].value = entry.value.clone(),
            None => result.push(entry.clone()),
        }
    }

    result
}

/// Union of `base` and `overlay`. Overlay keys with an empty value are removed
/// from the result, whether or not `base` had them.
pub fn merge_defaults(
    base: &HashMap<String, String>,
    overlay: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut result = base.clone();

    for (key, value) in overlay {
        if value.is_empty() {
            result.remove(key);
        } else {
            result.insert(key.clone(), value.clone());
        }
    }

    result
}

/// Layer `overrides2` over `layer1` while honouring the defaults of the second layer.
///
/// Keys of `defaults2` are dropped from `layer1` when their default is empty or
/// when `layer1` sets them itself. The cleaned map is then merged with
/// `overrides2` through [`merge_defaults`].
pub fn merge_overrides(
    layer1: &HashMap<String, String>,
    defaults2: &HashMap<String, String>,
    overrides2: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut cleaned = layer1.clone();

    for (key, value) in defaults2 {
        if value.is_empty() || layer1.contains_key(key) {
            cleaned.remove(key);
        }
    }

    merge_defaults(&cleaned, overrides2)
}
