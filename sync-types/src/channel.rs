//! Channel name derivation.
//!
//! A channel is either type-level (`todo`) or instance-level (`todo:7`).

/// Separator between type and id in an instance channel.
pub const SEPARATOR: char = ':';

/// The instance-level channel for a record.
pub fn instance_channel(record_type: &str, id: &str) -> String {
    format!("{record_type}{SEPARATOR}{id}")
}

/// The channel a request addresses: instance-level when an id is present,
/// type-level otherwise.
pub fn derive_channel(record_type: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => instance_channel(record_type, id),
        None => record_type.to_string(),
    }
}

/// The type-level part of a channel name.
pub fn channel_type(channel: &str) -> &str {
    channel
        .split_once(SEPARATOR)
        .map(|(record_type, _)| record_type)
        .unwrap_or(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_instance_and_type_channels() {
        assert_eq!(derive_channel("todo", Some("1")), "todo:1");
        assert_eq!(derive_channel("todo", None), "todo");
    }

    #[test]
    fn channel_type_strips_id() {
        assert_eq!(channel_type("todo:1"), "todo");
        assert_eq!(channel_type("todo"), "todo");
    }
}
