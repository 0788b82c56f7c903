//! The masked diff engine (C2): deciding whether a `(prev, cur)` state
//! transition matches a declared `(wantPrev, wantCur)` pattern under field
//! masks, and whether any unmasked field named in a pattern changed at all.
//!
//! Both entry points are pure functions: same inputs always produce the same
//! output (spec.md §4.1, tested as property P5 in `tests/properties.rs`).

use crate::mask::FieldMask;
use crate::value::Value;

/// `isDesiredUpdate`: walks `want_prev`/`want_cur` over `prev`/`cur`.
///
/// The transition counts iff `prev` matches `want_prev` *and* `cur` matches
/// `want_cur` *and* `want_prev != want_cur` at some unmasked location (the
/// declared diff is non-trivial). `exact_match` is forced to `false` by the
/// caller at the two API-server observation points, since API-server-
/// delivered objects carry ambient fields the plan cannot know about.
pub fn is_desired_update(
    prev: &Value,
    cur: &Value,
    want_prev: &Value,
    want_cur: &Value,
    mask: &FieldMask,
    api_form: bool,
    exact_match: bool,
) -> bool {
    let mut path = Vec::new();
    matches_want(prev, want_prev, mask, api_form, exact_match, &mut path)
        && matches_want(cur, want_cur, mask, api_form, exact_match, &mut path)
        && wants_differ(want_prev, want_cur, mask, api_form, &mut path)
}

/// `isAnyFieldModified`: true iff any unmasked path present in `want_prev`
/// has a different value in `cur`, or has been removed from `cur` entirely.
pub fn is_any_field_modified(cur: &Value, want_prev: &Value, mask: &FieldMask, api_form: bool) -> bool {
    let mut path = Vec::new();
    any_field_modified(cur, want_prev, mask, api_form, &mut path)
}

/// Recursively checks that `actual` matches the partial shape described by
/// `want`. `want` only ever names the fields the plan author cares about;
/// fields of `actual` it doesn't mention are ignored in partial
/// (`exact_match == false`) mode. In exact mode, a `Map` node additionally
/// requires `actual` to have no unmasked keys beyond those named in `want`.
fn matches_want(
    actual: &Value,
    want: &Value,
    mask: &FieldMask,
    api_form: bool,
    exact_match: bool,
    path: &mut Vec<String>,
) -> bool {
    match want {
        Value::Map(want_map) => {
            let empty = std::collections::BTreeMap::new();
            let actual_map = actual.as_map().unwrap_or(&empty);
            if exact_match {
                let mut keys: Vec<&String> = want_map.keys().chain(actual_map.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    path.push(key.clone());
                    if !mask.is_masked(path, api_form) {
                        let want_val = want_map.get(key).cloned().unwrap_or(Value::Null);
                        let actual_val = actual_map.get(key).cloned().unwrap_or(Value::Null);
                        if !matches_want(&actual_val, &want_val, mask, api_form, exact_match, path) {
                            path.pop();
                            return false;
                        }
                    }
                    path.pop();
                }
                true
            } else {
                for (key, want_val) in want_map {
                    path.push(key.clone());
                    if !mask.is_masked(path, api_form) {
                        let actual_val = actual_map.get(key).cloned().unwrap_or(Value::Null);
                        if !matches_want(&actual_val, want_val, mask, api_form, exact_match, path) {
                            path.pop();
                            return false;
                        }
                    }
                    path.pop();
                }
                true
            }
        }
        // A `null` leaf in a declared diff means "this field must be absent
        // (or null) here" -- the deletion marker spec.md §4.1 refers to.
        Value::Null => actual.is_null(),
        leaf => actual == leaf,
    }
}

/// True iff `want_prev` and `want_cur` disagree at some unmasked location.
/// Used to reject triggers whose declared prev/cur shapes are identical,
/// which would otherwise never represent a real diff.
fn wants_differ(
    want_prev: &Value,
    want_cur: &Value,
    mask: &FieldMask,
    api_form: bool,
    path: &mut Vec<String>,
) -> bool {
    match (want_prev, want_cur) {
        (Value::Map(a), Value::Map(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(key.clone());
                let masked = mask.is_masked(path, api_form);
                let differs = if masked {
                    false
                } else {
                    let av = a.get(key).cloned().unwrap_or(Value::Null);
                    let bv = b.get(key).cloned().unwrap_or(Value::Null);
                    wants_differ(&av, &bv, mask, api_form, path)
                };
                path.pop();
                if differs {
                    return true;
                }
            }
            false
        }
        (a, b) => a != b,
    }
}

/// Recursive walk for `isAnyFieldModified`: true as soon as any unmasked
/// leaf of `want_prev` differs from (or is missing from) `cur`.
fn any_field_modified(
    cur: &Value,
    want_prev: &Value,
    mask: &FieldMask,
    api_form: bool,
    path: &mut Vec<String>,
) -> bool {
    match want_prev {
        Value::Map(want_map) => {
            for (key, want_val) in want_map {
                path.push(key.clone());
                let modified = if mask.is_masked(path, api_form) {
                    false
                } else {
                    let cur_val = cur.get(key);
                    any_field_modified(&cur_val, want_val, mask, api_form, path)
                };
                path.pop();
                if modified {
                    return true;
                }
            }
            false
        }
        leaf => cur != leaf,
    }
}
