//! Workspace name matching for autoscaling target selectors.

/// Match `name` against a selector that may carry a leading and/or trailing `*`.
///
/// - `*suffix` matches names ending in `suffix`
/// - `prefix*` matches names starting with `prefix`
/// - `*infix*` matches names containing `infix`
/// - no `*` matches only the identical string
pub fn match_wildcard_name(pattern: &str, name: &str) -> bool {
    let leading = pattern.starts_with('*');
    let trailing = pattern.len() > 1 && pattern.ends_with('*');
    let core = pattern.trim_start_matches('*').trim_end_matches('*');

    match (leading, trailing) {
        (true, true) => name.contains(core),
        (true, false) => name.ends_with(core),
        (false, true) => name.starts_with(core),
        (false, false) => pattern == name,
    }
}
