//! Core data models for the document service.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`. Enumerated columns are stored as lowercase text.

use std::fmt;

/// Returned when a string does not name a variant of a text-backed enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a valid {}", self.value, self.kind)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares an enum stored as TEXT, with matching serde and sqlx names,
/// an `ALL` table in declaration order, `as_str`, `Display` and `FromStr`.
/// Textually scoped: the model modules declared below use it directly.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize, sqlx::Type,
        )]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                #[sqlx(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod access_log;
pub mod client;
pub mod document;
pub mod job;
pub mod page;
pub mod user;

#[cfg(test)]
mod tests {
    use super::document::{DocumentStatus, DocumentType};

    #[test]
    fn text_enums_parse_their_own_names() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(*status));
        }
        let err = "shredded".parse::<DocumentStatus>().unwrap_err();
        assert_eq!(err.kind, "DocumentStatus");
        assert!(DocumentType::ALL.len() >= 18);
    }

    #[test]
    fn serde_names_match_column_names() {
        let json = serde_json::to_string(&DocumentType::BankStatement).unwrap();
        assert_eq!(json, "\"bank_statement\"");
    }
}
