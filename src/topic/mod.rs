//! Topic names, filters and namespace prefixes
//!
//! Key rules for the bridge:
//! - Topic names are non-empty slash-delimited paths without wildcards
//! - Filters may contain `+` (whole level) and a trailing `#`
//! - A namespace prefix is a leading topic segment plus its `/`, e.g. `from-cloud/`

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }

    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }

    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }

    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let level_count = filter.split('/').count();
    for (i, level) in filter.split('/').enumerate() {
        if level.contains('#') {
            if level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != level_count - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// - `+` matches exactly one level
/// - `#` matches zero or more remaining levels
/// - `$`-topics don't match filters starting with a wildcard
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(level) if filter_level == "+" || filter_level == level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

/// First slash-delimited segment of a topic
#[inline]
pub fn first_segment(topic: &str) -> &str {
    topic.split('/').next().unwrap_or(topic)
}

/// Remove a namespace prefix once, if present
#[inline]
pub fn strip_namespace<'a>(topic: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return topic;
    }
    topic.strip_prefix(prefix).unwrap_or(topic)
}

/// Prepend a namespace prefix, inserting a separator if the prefix lacks one
pub fn with_namespace(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        return topic.to_string();
    }
    if prefix.ends_with('/') {
        format!("{}{}", prefix, topic)
    } else {
        format!("{}/{}", prefix, topic)
    }
}
