//! Serde helpers encoding byte fields as standard base64 strings.
//!
//! Use with `#[serde(with = "vmb_types::b64")]` or, for optional fields,
//! `#[serde(with = "vmb_types::b64::option")]`; `option_list` covers batched
//! lookups where each slot may be absent.

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(s)
        .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64_STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| {
            BASE64_STANDARD
                .decode(s)
                .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
        })
        .transpose()
    }
}

pub mod option_list {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(
        items: &[Option<Vec<u8>>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&item.as_ref().map(|b| BASE64_STANDARD.encode(b)))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Option<Vec<u8>>>, D::Error> {
        let items = Vec::<Option<String>>::deserialize(deserializer)?;
        items
            .into_iter()
            .map(|item| {
                item.map(|s| {
                    BASE64_STANDARD
                        .decode(s)
                        .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
                })
                .transpose()
            })
            .collect()
    }
}
