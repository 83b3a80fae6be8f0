//! Wire record schema.
//!
//! Each record is one JSON object terminated by `\n`:
//! ```text
//! {"Time":1700000000000,"ID":256,"DLC":8,"Data":[0,1,2,3,4,5,6,7]}
//! ```
//!
//! | Field  | Type          | Notes                                          |
//! |--------|---------------|------------------------------------------------|
//! | `Time` | integer, ms   | since UNIX epoch; defaults to 0 when absent    |
//! | `ID`   | unsigned int  | required                                       |
//! | `DLC`  | integer       | inferred from `Data` when absent               |
//! | `Data` | byte array    | also accepts a base64 string or `null`         |
//! | `RTR`  | bool          | optional, omitted when false                   |
//!
//! The base64 form is what Json.NET produces for `byte[]`, so peers written
//! against that serializer work unchanged. Field names are also accepted in
//! lower case.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BridgeError, Result};

/// Record separator between wire messages.
pub const RECORD_SEPARATOR: u8 = b'\n';

/// Default upper bound for a single record, separator excluded.
pub const DEFAULT_MAX_RECORD_LEN: usize = 4096;

/// Serialized form of one CAN frame exchanged with the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Milliseconds since the UNIX epoch.
    #[serde(rename = "Time", alias = "time", default)]
    pub time: i64,
    #[serde(rename = "ID", alias = "id", alias = "Id")]
    pub id: u32,
    /// Declared data length; `None` only for incoming records that omit it.
    #[serde(
        rename = "DLC",
        alias = "dlc",
        alias = "Dlc",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dlc: Option<i32>,
    #[serde(
        rename = "Data",
        alias = "data",
        default,
        deserialize_with = "deserialize_data"
    )]
    pub data: Vec<u8>,
    #[serde(
        rename = "RTR",
        alias = "rtr",
        default,
        skip_serializing_if = "is_false"
    )]
    pub rtr: bool,
}

impl WireMessage {
    /// Create a data record; `dlc` is the payload length.
    pub fn new(time: i64, id: u32, data: Vec<u8>) -> Self {
        Self {
            time,
            id,
            dlc: Some(data.len() as i32),
            data,
            rtr: false,
        }
    }

    /// Create a remote-request record with a declared length and no data.
    pub fn remote(time: i64, id: u32, dlc: u8) -> Self {
        Self {
            time,
            id,
            dlc: Some(dlc as i32),
            data: Vec::new(),
            rtr: true,
        }
    }

    /// Serialize into one newline-terminated record.
    pub fn to_line(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(96).writer();
        serde_json::to_writer(&mut buf, self)?;
        let mut buf = buf.into_inner();
        buf.put_u8(RECORD_SEPARATOR);
        Ok(buf.freeze())
    }

    /// Parse one record. A trailing `\n` or `\r\n` is tolerated.
    pub fn from_line(line: &[u8]) -> Result<Self> {
        let line = trim_line(line);
        let text = std::str::from_utf8(line)
            .map_err(|e| BridgeError::Decoding(format!("record is not UTF-8: {}", e)))?;

        serde_json::from_str(text)
            .map_err(|e| BridgeError::Decoding(format!("malformed record: {}", e)))
    }
}

/// Strip trailing line terminators.
pub(crate) fn trim_line(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataRepr {
    Bytes(Vec<u8>),
    Base64(String),
}

fn deserialize_data<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DataRepr>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(DataRepr::Bytes(bytes)) => Ok(bytes),
        Some(DataRepr::Base64(text)) => STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom),
    }
}
