//! Serde helpers shared by configuration types

/// `Duration` as a whole number of seconds.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Timeouts {
///     #[serde(with = "ng_core::config::serde_utils::duration_secs")]
///     forward: Duration,
/// }
/// ```
///
/// Sub-second precision is dropped on serialization.
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        forward: Duration,
    }

    #[test]
    fn test_toml_seconds() {
        let parsed: Timeouts = toml::from_str("forward = 12").unwrap();
        assert_eq!(parsed.forward, Duration::from_secs(12));

        let text = toml::to_string(&parsed).unwrap();
        assert_eq!(text.trim(), "forward = 12");
    }

    #[test]
    fn test_subsecond_truncated() {
        let value = Timeouts {
            forward: Duration::from_millis(2500),
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"forward":2}"#);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(toml::from_str::<Timeouts>("forward = -1").is_err());
    }
}
