use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{Operation, RecordId},
    error::ProtocolError,
};

pub const EVENT_PERFORM_CALCULATION: &str = "performCalculation";
pub const EVENT_CALCULATION_RESULT: &str = "calculationResult";
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_CONNECT_ERROR: &str = "connect_error";

/// Named-event envelope carried as one text frame on the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Operands travel through this adapter so non-finite values survive JSON:
/// NaN serializes as `null` and `null` deserializes back to NaN.
mod wire_number {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Outbound calculation request. Fire-and-forget: no request id is attached,
/// so no later correlation with a specific result is possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationRequest {
    #[serde(with = "wire_number")]
    pub first_operand: f64,
    #[serde(with = "wire_number")]
    pub second_operand: f64,
    pub operation: Operation,
    #[serde(rename = "recordId")]
    pub record_id: RecordId,
}

impl CalculationRequest {
    pub fn new(
        first_operand: f64,
        second_operand: f64,
        operation: Operation,
        record_id: RecordId,
    ) -> Self {
        Self {
            first_operand,
            second_operand,
            operation,
            record_id,
        }
    }

    pub fn into_frame(self) -> Result<EventFrame, ProtocolError> {
        let data = serde_json::to_value(&self).map_err(|source| ProtocolError::Encode {
            event: EVENT_PERFORM_CALCULATION,
            source,
        })?;
        Ok(EventFrame::new(EVENT_PERFORM_CALCULATION, data))
    }
}

/// Inbound calculation result as produced by the remote compute service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    #[serde(with = "wire_number")]
    pub first_operand: f64,
    #[serde(with = "wire_number")]
    pub second_operand: f64,
    pub operation: Operation,
    #[serde(with = "wire_number")]
    pub result: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectErrorPayload {
    pub message: String,
}

/// Inbound events the session consumes, validated at the boundary.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    ConnectError { message: String },
    Result(CalculationResult),
}

impl InboundEvent {
    /// Parses a frame into a typed event. Unknown names and malformed
    /// payloads fail closed with a `ProtocolError`.
    pub fn from_frame(frame: &EventFrame) -> Result<Self, ProtocolError> {
        match frame.event.as_str() {
            EVENT_CONNECT => Ok(InboundEvent::Connected),
            EVENT_DISCONNECT => Ok(InboundEvent::Disconnected),
            EVENT_CONNECT_ERROR => {
                let payload: ConnectErrorPayload = serde_json::from_value(frame.data.clone())
                    .map_err(|source| ProtocolError::MalformedPayload {
                        event: EVENT_CONNECT_ERROR,
                        source,
                    })?;
                Ok(InboundEvent::ConnectError {
                    message: payload.message,
                })
            }
            EVENT_CALCULATION_RESULT => {
                let payload: CalculationResult = serde_json::from_value(frame.data.clone())
                    .map_err(|source| ProtocolError::MalformedPayload {
                        event: EVENT_CALCULATION_RESULT,
                        source,
                    })?;
                Ok(InboundEvent::Result(payload))
            }
            other => Err(ProtocolError::UnknownEvent {
                name: other.to_string(),
            }),
        }
    }
}
