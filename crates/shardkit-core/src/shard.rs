//! Shard identifiers
//!
//! Shard groups and shard names are interned, normalized identifiers.
//! A [`ShardKey`] pairs the two and names exactly one physical database.
//! A selection that leaves either part blank means "master".

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Separator used when rendering a key as `group:name`
pub const KEY_SEPARATOR: char = ':';

fn interner() -> &'static Mutex<HashSet<Arc<str>>> {
    static INTERNER: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(HashSet::new()))
}

fn intern(value: &str) -> Arc<str> {
    let mut set = interner().lock();
    if let Some(existing) = set.get(value) {
        return existing.clone();
    }
    let interned: Arc<str> = Arc::from(value);
    set.insert(interned.clone());
    interned
}

/// Normalize a raw identifier.
///
/// Surrounding whitespace is dropped and ASCII letters are lowercased.
/// Returns `None` when nothing is left, which callers treat as "no selection".
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

macro_rules! shard_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Parse and intern an identifier. Blank input yields `None`.
            pub fn parse(raw: impl AsRef<str>) -> Option<Self> {
                normalize(raw.as_ref()).map(|value| Self(intern(&value)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), &*self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).ok_or_else(|| {
                    serde::de::Error::custom(concat!(stringify!($name), " must not be blank"))
                })
            }
        }
    };
}

shard_identifier!(
    /// Name of a shard group (a set of shards sharing one schema)
    ShardGroupName
);

shard_identifier!(
    /// Name of one shard inside a shard group
    ShardName
);

/// Anything that can be read as one half of a shard selection.
///
/// `Option::None` and blank strings both read as "absent".
pub trait ShardPart {
    fn shard_part(&self) -> Option<&str>;
}

impl ShardPart for str {
    fn shard_part(&self) -> Option<&str> {
        Some(self)
    }
}

impl ShardPart for String {
    fn shard_part(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl ShardPart for ShardGroupName {
    fn shard_part(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl ShardPart for ShardName {
    fn shard_part(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl<T: ShardPart> ShardPart for Option<T> {
    fn shard_part(&self) -> Option<&str> {
        self.as_ref().and_then(ShardPart::shard_part)
    }
}

impl<T: ShardPart + ?Sized> ShardPart for &T {
    fn shard_part(&self) -> Option<&str> {
        (**self).shard_part()
    }
}

/// Identifies one physical shard database: `(group, name)`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey {
    pub group: ShardGroupName,
    pub name: ShardName,
}

impl ShardKey {
    pub fn new(group: ShardGroupName, name: ShardName) -> Self {
        Self { group, name }
    }

    /// Build a key from caller input.
    ///
    /// Returns `None` ("master") if either part is absent or blank.
    pub fn select(group: impl ShardPart, name: impl ShardPart) -> Option<Self> {
        let group = group.shard_part().and_then(ShardGroupName::parse)?;
        let name = name.shard_part().and_then(ShardName::parse)?;
        Some(Self { group, name })
    }

    /// The `group:name` tag used for pool names and query-log annotation
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, KEY_SEPARATOR, self.name)
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_normalization() {
        let group = ShardGroupName::parse("  Alpha ").unwrap();
        assert_eq!(group.as_str(), "alpha");

        assert!(ShardGroupName::parse("").is_none());
        assert!(ShardName::parse("   ").is_none());
    }

    #[test]
    fn test_identifiers_are_interned() {
        let a = ShardName::parse("shard1").unwrap();
        let b = ShardName::parse("SHARD1").unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_select_blank_means_master() {
        assert!(ShardKey::select("", "").is_none());
        assert!(ShardKey::select("alpha", "").is_none());
        assert!(ShardKey::select(None::<&str>, Some("shard1")).is_none());

        let key = ShardKey::select("alpha", Some("shard1")).unwrap();
        assert_eq!(key.tag(), "alpha:shard1");
    }

    #[test]
    fn test_key_serde() {
        let key = ShardKey::select("alpha", "shard2").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"group":"alpha","name":"shard2"}"#);

        let blank: Result<ShardKey, _> = serde_json::from_str(r#"{"group":" ","name":"x"}"#);
        assert!(blank.is_err());
    }
}
