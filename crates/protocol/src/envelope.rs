use serde::{Deserialize, Serialize};

use crate::constants::{CODE_OK, MessageType};

/// Request message sent by a client as JSON text.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the handler knows which type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: to_raw(payload)?,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates a success response for this request.
    pub fn reply<T: Serialize>(
        &self,
        message: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Envelope, serde_json::Error> {
        Envelope::success(&self.id, message, data)
    }

    /// Creates a failure response for this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Envelope {
        Envelope::failure(&self.id, code, message)
    }
}

/// Response envelope sent by the server for every request.
///
/// `code` is 0 on success and non-zero on failure; `data` is present only
/// on success (and even then may be absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub code: i32,
    pub message: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Envelope {
    /// Creates a success envelope carrying `data`.
    pub fn success<T: Serialize>(
        id: impl Into<String>,
        message: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            code: CODE_OK,
            message: message.into(),
            success: true,
            data: to_raw(data)?,
        })
    }

    /// Creates a failure envelope.
    pub fn failure(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code,
            message: message.into(),
            success: false,
            data: None,
        }
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }
}

fn to_raw<T: Serialize>(
    value: Option<&T>,
) -> Result<Option<Box<serde_json::value::RawValue>>, serde_json::Error> {
    match value {
        Some(v) => {
            let json = serde_json::to_string(v)?;
            Ok(Some(serde_json::value::RawValue::from_string(json)?))
        }
        None => Ok(None),
    }
}
