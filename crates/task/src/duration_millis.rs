//! Serde support for Duration as milliseconds

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    // u64 keeps the wire format readable by deserialize below; saturates
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_saturates() {
        let value = serialize(&Duration::MAX, serde_json::value::Serializer).unwrap();
        assert_eq!(value, serde_json::json!(u64::MAX));
    }

    #[test]
    fn test_serialize_millis() {
        let value = serialize(&Duration::from_secs(3), serde_json::value::Serializer).unwrap();
        assert_eq!(value, serde_json::json!(3000));
    }
}
