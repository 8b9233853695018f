use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BzError, BzResult};

const MAX_KEY_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    User,
    BlogPost,
    BlogCategory,
    BlogTag,
    BlogLike,
    BlogComment,
    BlogBookmark,
    BlogMedia,
    ShopCategory,
    ShopOrder,
    ShopOrderDetails,
    ShopPayment,
    ShopProduct,
    ShopDiscount,
    ShopCart,
    ShopReview,
    ChatUser,
    Chat,
    Message,
}

impl Table {
    pub const ALL: [Table; 19] = [
        Self::User,
        Self::BlogPost,
        Self::BlogCategory,
        Self::BlogTag,
        Self::BlogLike,
        Self::BlogComment,
        Self::BlogBookmark,
        Self::BlogMedia,
        Self::ShopCategory,
        Self::ShopOrder,
        Self::ShopOrderDetails,
        Self::ShopPayment,
        Self::ShopProduct,
        Self::ShopDiscount,
        Self::ShopCart,
        Self::ShopReview,
        Self::ChatUser,
        Self::Chat,
        Self::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::BlogPost => "BlogPost",
            Self::BlogCategory => "BlogCategory",
            Self::BlogTag => "BlogTag",
            Self::BlogLike => "BlogLike",
            Self::BlogComment => "BlogComment",
            Self::BlogBookmark => "BlogBookmark",
            Self::BlogMedia => "BlogMedia",
            Self::ShopCategory => "ShopCategory",
            Self::ShopOrder => "ShopOrder",
            Self::ShopOrderDetails => "ShopOrderDetails",
            Self::ShopPayment => "ShopPayment",
            Self::ShopProduct => "ShopProduct",
            Self::ShopDiscount => "ShopDiscount",
            Self::ShopCart => "ShopCart",
            Self::ShopReview => "ShopReview",
            Self::ChatUser => "ChatUser",
            Self::Chat => "Chat",
            Self::Message => "Message",
        }
    }

    /// Human-facing name used in error messages ("Post with ID x not found.").
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::BlogPost => "Post",
            Self::BlogCategory | Self::ShopCategory => "Category",
            Self::BlogTag => "Tag",
            Self::BlogLike => "Like",
            Self::BlogComment => "Comment",
            Self::BlogBookmark => "Bookmark",
            Self::BlogMedia => "Media",
            Self::ShopOrder => "Order",
            Self::ShopOrderDetails => "Order detail",
            Self::ShopPayment => "Payment",
            Self::ShopProduct => "Product",
            Self::ShopDiscount => "Discount",
            Self::ShopCart => "Cart",
            Self::ShopReview => "Review",
            Self::ChatUser => "Chat user",
            Self::Chat => "Chat",
            Self::Message => "Message",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = BzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == value)
            .ok_or_else(|| BzError::InvalidInput(format!("unknown table: {value}")))
    }
}

// Tables travel on the wire under their database name.
impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Table {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Record references
// ---------------------------------------------------------------------------

/// Typed reference to one record: table plus key. Serialized as `Table:key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    table: Table,
    key: String,
}

impl RecordId {
    pub fn generate(table: Table) -> Self {
        Self {
            table,
            key: Uuid::now_v7().simple().to_string(),
        }
    }

    /// Parse a key supplied by a client. Both the bare key and the full
    /// `Table:key` form are accepted, as long as the table matches.
    pub fn parse_key(table: Table, raw: &str) -> BzResult<Self> {
        let raw = raw.trim();
        let key = match raw.split_once(':') {
            Some((prefix, key)) if prefix == table.as_str() => key,
            Some(_) => return Err(invalid_id(table)),
            None => raw,
        };

        if !is_valid_key(key) {
            return Err(invalid_id(table));
        }

        Ok(Self {
            table,
            key: key.to_string(),
        })
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

fn invalid_id(table: Table) -> BzError {
    BzError::InvalidInput(format!("invalid {} id", table.label().to_lowercase()))
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}

impl FromStr for RecordId {
    type Err = BzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (table, _) = value
            .split_once(':')
            .ok_or_else(|| BzError::InvalidInput(format!("not a record reference: {value}")))?;
        let table = Table::from_str(table)?;
        Self::parse_key(table, value)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl From<RecordId> for serde_json::Value {
    fn from(id: RecordId) -> Self {
        serde_json::Value::String(id.to_string())
    }
}

impl From<&RecordId> for serde_json::Value {
    fn from(id: &RecordId) -> Self {
        serde_json::Value::String(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_accepts_bare_and_prefixed_forms() {
        let bare = RecordId::parse_key(Table::BlogPost, "abc123").unwrap();
        let full = RecordId::parse_key(Table::BlogPost, "BlogPost:abc123").unwrap();
        assert_eq!(bare, full);
        assert_eq!(bare.to_string(), "BlogPost:abc123");
    }

    #[test]
    fn parse_key_rejects_foreign_table_prefix() {
        let err = RecordId::parse_key(Table::BlogPost, "User:abc").unwrap_err();
        assert!(err.to_string().contains("invalid post id"));
    }

    #[test]
    fn parse_key_rejects_injection_characters() {
        assert!(RecordId::parse_key(Table::User, "x' OR 1=1").is_err());
        assert!(RecordId::parse_key(Table::User, "").is_err());
        assert!(RecordId::parse_key(Table::User, &"a".repeat(129)).is_err());
    }

    #[test]
    fn generated_keys_are_valid_and_distinct() {
        let a = RecordId::generate(Table::Message);
        let b = RecordId::generate(Table::Message);
        assert_ne!(a, b);
        assert!(RecordId::parse_key(Table::Message, a.key()).is_ok());
    }

    #[test]
    fn full_reference_round_trips_through_serde() {
        let id = RecordId::parse_key(Table::ShopCart, "cart_1").unwrap();
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!("ShopCart:cart_1"));
        let back: RecordId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn table_names_parse_case_sensitively() {
        assert_eq!("ShopOrderDetails".parse::<Table>().unwrap(), Table::ShopOrderDetails);
        assert!("shoporderdetails".parse::<Table>().is_err());
    }
}
