//! Loop prevention for the local -> cloud direction
//!
//! Messages the bridge republishes locally carry the inbound namespace as
//! their first topic segment. If they were picked up again by the outbound
//! subscription they would bounce between the bus and the cloud forever, so
//! any topic whose first segment is excluded is never forwarded.

use std::collections::HashSet;

use crate::config::BridgeConfig;
use crate::topic::first_segment;

/// Pure first-segment filter
#[derive(Debug, Clone, Default)]
pub struct LoopGuard {
    excluded: HashSet<String>,
}

impl LoopGuard {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Configured segments plus the namespace the bridge republishes under
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut guard = Self::new(config.excluded_segments.iter().cloned());
        let inbound = first_segment(&config.inbound_prefix);
        if !inbound.is_empty() {
            guard.excluded.insert(inbound.to_string());
        }
        guard
    }

    #[inline]
    pub fn is_forwardable(&self, topic: &str) -> bool {
        !self.excluded.contains(first_segment(topic))
    }

    pub fn is_excluded(&self, segment: &str) -> bool {
        self.excluded.contains(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn guard() -> LoopGuard {
        LoopGuard::new(["from-cloud", "bluetooth"])
    }

    #[test_case("from-cloud/echo", false ; "cloud namespace")]
    #[test_case("from-cloud", false ; "bare namespace")]
    #[test_case("bluetooth/beacon/1", false ; "internal namespace")]
    #[test_case("out/sensors/livingroom", true ; "outbound topic")]
    #[test_case("from-cloudy/x", true ; "similar prefix")]
    #[test_case("sensors/from-cloud", true ; "excluded segment not first")]
    fn test_is_forwardable(topic: &str, expected: bool) {
        assert_eq!(guard().is_forwardable(topic), expected);
    }

    #[test]
    fn test_from_config_adds_inbound_namespace() {
        let config = BridgeConfig {
            inbound_prefix: "cloud-in/".to_string(),
            excluded_segments: vec!["azure".to_string()],
            ..BridgeConfig::default()
        };
        let guard = LoopGuard::from_config(&config);
        assert!(guard.is_excluded("cloud-in"));
        assert!(guard.is_excluded("azure"));
        assert!(!guard.is_forwardable("cloud-in/lamp"));
    }

    #[test]
    fn test_empty_guard_forwards_everything() {
        assert!(LoopGuard::default().is_forwardable("from-cloud/x"));
    }

    proptest! {
        #[test]
        fn prop_excluded_first_segment_never_forwarded(
            first in prop::sample::select(vec!["from-cloud", "bluetooth"]),
            rest in "(/[a-z0-9]{1,6}){0,4}",
        ) {
            let topic = format!("{}{}", first, rest);
            prop_assert!(!guard().is_forwardable(&topic));
        }

        #[test]
        fn prop_other_topics_forwarded(topic in "[a-z0-9]{1,8}(/[a-z0-9-]{1,8}){0,4}") {
            let segment = topic.split('/').next().unwrap();
            prop_assume!(segment != "bluetooth");
            prop_assert!(guard().is_forwardable(&topic));
        }
    }
}
