//! Newtype wrappers for the identifiers derived from a registration request.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Ansible host group: the hostname without its trailing `-NNN` ordinal.
    HostGroup
);

string_newtype!(
    /// Lock owner, `<id>__<ip>`. Two requests own the same lock iff their tokens are equal.
    OwnerToken
);

string_newtype!(
    /// Key-value store key holding the lock for one hostname, `LOCK__<hostname>`.
    LockKey
);

/// Prefix of every lock key in the store.
pub const LOCK_KEY_PREFIX: &str = "LOCK__";

/// Hash field that stores the owner token under a lock key.
pub const OWNER_FIELD: &str = "id__ip";

impl OwnerToken {
    pub fn from_parts(id: &str, address: &str) -> Self {
        Self(format!("{id}__{address}"))
    }
}

impl LockKey {
    pub fn for_hostname(hostname: &str) -> Self {
        Self(format!("{LOCK_KEY_PREFIX}{hostname}"))
    }
}

impl HostGroup {
    /// Strip the last `-segment` from a hostname. A hostname without a hyphen
    /// is its own group.
    pub fn from_hostname(hostname: &str) -> Self {
        match hostname.rsplit_once('-') {
            Some((group, _ordinal)) => Self(group.to_owned()),
            None => Self(hostname.to_owned()),
        }
    }
}
