//! Key codec: storage keys and index key prefixes.
//!
//! | key                              | holds                                |
//! |----------------------------------|--------------------------------------|
//! | `type:id`                        | serialized record body               |
//! | `type`                           | membership set of `type:id` keys     |
//! | `type::prop::id`                 | sort-index value of `prop`           |
//! | `type::extKey:value::id`         | external-key entry                   |
//! | `next.type.id`                   | per-type id counter                  |
//!
//! Callers must reject records lacking a type before calling in here, and
//! must check client-supplied types, ids and property names with
//! [`is_valid_type`], [`is_valid_id`] and [`is_valid_property`]. A `:` in
//! any of them would let one key alias another (type `todo::rank:` with
//! id `1` is the sort-index key `todo::rank::1`).

/// Separator between the parts of an index key.
pub const INDEX_SEPARATOR: &str = "::";

/// Storage key of a record body.
pub fn record_key(record_type: &str, id: &str) -> String {
    format!("{record_type}:{id}")
}

/// Prefix of every sort-index key for `property`; append the id.
pub fn sort_key(record_type: &str, property: &str) -> String {
    format!("{record_type}{INDEX_SEPARATOR}{property}{INDEX_SEPARATOR}")
}

/// Prefix of every external-key entry for `name = value`; append the id.
pub fn external_key(record_type: &str, ext_key_name: &str, value: &str) -> String {
    format!("{record_type}{INDEX_SEPARATOR}{ext_key_name}:{value}{INDEX_SEPARATOR}")
}

/// A record type usable in keys: non-empty, no `:`, no whitespace or
/// control characters.
pub fn is_valid_type(record_type: &str) -> bool {
    !record_type.is_empty()
        && !record_type
            .chars()
            .any(|c| c == ':' || c.is_whitespace() || c.is_control())
}

/// A record id usable in keys: non-empty and free of `:`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(':')
}

/// An index or external-key property name usable in keys.
pub fn is_valid_property(name: &str) -> bool {
    !name.is_empty() && !name.contains(':')
}

/// Key of the per-type id counter.
pub fn counter_key(record_type: &str) -> String {
    format!("next.{record_type}.id")
}

/// Recover the id from a full index key given its prefix.
pub fn id_from_index_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|id| !id.is_empty())
}

/// Recover the id from a record storage key (`type:id`).
pub fn id_from_record_key<'a>(record_type: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(record_type)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|id| !id.is_empty())
}
