//! Macros for the two ID families.

/// Defines an ID minted by the optimizer, rendered as `{prefix}_{ulid}`.
///
/// ULIDs sort by creation time, so cycle IDs in logs sort the same way the
/// cycles ran.
///
/// ```ignore
/// define_id!(CycleId, "cyc");
///
/// let id = CycleId::new();
/// let parsed: CycleId = "cyc_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[doc = concat!("Generated `", $prefix, "_` ID.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mints a fresh ID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let (prefix, rest) = match s.split_once('_') {
                    Some(parts) => parts,
                    None if s.is_empty() => return Err($crate::IdError::Empty),
                    None => return Err($crate::IdError::MissingSeparator),
                };
                if prefix != $prefix {
                    return Err($crate::IdError::InvalidPrefix {
                        expected: $prefix,
                        actual: prefix.to_string(),
                    });
                }
                rest.parse::<$crate::Ulid>()
                    .map(Self)
                    .map_err(|e| $crate::IdError::InvalidUlid(e.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = std::borrow::Cow::<str>::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Defines an integer key issued by an external system.
///
/// The key serializes as a bare JSON number and displays as the number, so it
/// round-trips through the platform API and the assignment table unchanged.
#[macro_export]
macro_rules! define_int_key {
    ($name:ident, $label:literal) => {
        #[doc = concat!("Externally issued ", $label, " key.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Human-readable label used in error messages.
            pub const LABEL: &'static str = $label;

            /// Wraps a raw key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw key.
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                trimmed
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|e| $crate::IdError::InvalidInteger {
                        value: trimmed.to_string(),
                        message: e.to_string(),
                    })
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_i64(self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                i64::deserialize(deserializer).map(Self)
            }
        }
    };
}

/// Defines an opaque string key issued by an external system.
///
/// Keys must be non-empty, at most [`MAX_STR_KEY_LEN`](crate::MAX_STR_KEY_LEN)
/// bytes, and free of control characters.
#[macro_export]
macro_rules! define_str_key {
    ($name:ident, $label:literal) => {
        #[doc = concat!("Externally issued ", $label, " key.")]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable label used in error messages.
            pub const LABEL: &'static str = $label;

            /// Validates and wraps a raw key.
            pub fn parse(s: impl Into<String>) -> Result<Self, $crate::IdError> {
                let s = s.into();
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                if s.len() > $crate::MAX_STR_KEY_LEN {
                    return Err($crate::IdError::InvalidFormat {
                        message: format!(
                            "{} key longer than {} bytes",
                            Self::LABEL,
                            $crate::MAX_STR_KEY_LEN
                        ),
                    });
                }
                if s.chars().any(char::is_control) {
                    return Err($crate::IdError::InvalidFormat {
                        message: format!("{} key contains control characters", Self::LABEL),
                    });
                }
                Ok(Self(s))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
