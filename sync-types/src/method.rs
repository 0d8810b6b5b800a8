//! Operation kinds carried in `options.method`.

use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// The recognized inbound operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Store a new record.
    Create,
    /// Fetch one record or a collection.
    Read,
    /// Overwrite an existing record.
    Update,
    /// Remove a record and its index entries.
    Delete,
    /// Broadcast a packet without touching storage.
    Publish,
    /// Join a channel.
    Subscribe,
    /// Leave a channel.
    Unsubscribe,
}

impl Method {
    /// Every recognized method, in dispatch-table order.
    pub const ALL: [Method; 7] = [
        Method::Create,
        Method::Read,
        Method::Update,
        Method::Delete,
        Method::Publish,
        Method::Subscribe,
        Method::Unsubscribe,
    ];

    /// The wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::Publish => "publish",
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
        }
    }

    /// The name written into `options.method` on outbound packets.
    pub fn notification_name(&self) -> &'static str {
        match self {
            Method::Create => "created",
            Method::Read => "read",
            Method::Update => "updated",
            Method::Delete => "destroyed",
            Method::Publish => "published",
            Method::Subscribe => "subscribed",
            Method::Unsubscribe => "unsubscribed",
        }
    }

    /// Whether the method acts on transport membership rather than storage.
    pub fn is_membership(&self) -> bool {
        matches!(self, Method::Subscribe | Method::Unsubscribe)
    }
}

impl FromStr for Method {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SyncError::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_names() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert_eq!(
            "save".parse::<Method>(),
            Err(SyncError::UnknownMethod("save".into()))
        );
        // Notification names are outbound only.
        assert!("created".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn past_tense_names() {
        assert_eq!(Method::Create.notification_name(), "created");
        assert_eq!(Method::Update.notification_name(), "updated");
        assert_eq!(Method::Delete.notification_name(), "destroyed");
    }

    #[test]
    fn membership_methods() {
        assert!(Method::Subscribe.is_membership());
        assert!(Method::Unsubscribe.is_membership());
        assert!(!Method::Publish.is_membership());
    }
}
