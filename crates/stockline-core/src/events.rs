//! # Domain Events
//!
//! Facts recorded next to the state change that produced them.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  repository operation (one SQLite transaction)                         │
//! │     │                                                                   │
//! │     ├── status CAS / ledger write                                      │
//! │     ├── DomainEvent ──► domain_events row (outbox)                     │
//! │     └── hooks react to the event inside the same transaction           │
//! │            RequestReceived ──► activation_on_request_received          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::channel::{ChannelEvent, ChannelStatus};
use crate::request::RequestType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ChannelCreated {
        channel_id: String,
        code: String,
        initial_request_id: String,
    },
    StockRequestCreated {
        channel_id: String,
        request_id: String,
        request_type: RequestType,
    },
    /// A request reached `received` and its quantities are in the ledger.
    RequestReceived {
        channel_id: String,
        request_id: String,
        request_type: RequestType,
    },
    ChannelActivated {
        channel_id: String,
        request_id: String,
    },
    SaleRecorded {
        channel_id: String,
        sale_id: String,
        total_cents: i64,
    },
    SaleCancelled {
        channel_id: String,
        sale_id: String,
    },
    /// Close-out entries were written and the channel left `active`.
    ChannelClosed {
        channel_id: String,
        barcodes: usize,
        clamped: usize,
    },
    ReturnShipped {
        channel_id: String,
        provider: String,
        tracking_number: String,
    },
    ReturnReceived {
        channel_id: String,
    },
}

impl DomainEvent {
    /// Stable name stored in the `event_type` column.
    pub const fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ChannelCreated { .. } => "channel_created",
            DomainEvent::StockRequestCreated { .. } => "stock_request_created",
            DomainEvent::RequestReceived { .. } => "request_received",
            DomainEvent::ChannelActivated { .. } => "channel_activated",
            DomainEvent::SaleRecorded { .. } => "sale_recorded",
            DomainEvent::SaleCancelled { .. } => "sale_cancelled",
            DomainEvent::ChannelClosed { .. } => "channel_closed",
            DomainEvent::ReturnShipped { .. } => "return_shipped",
            DomainEvent::ReturnReceived { .. } => "return_received",
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            DomainEvent::ChannelCreated { channel_id, .. }
            | DomainEvent::StockRequestCreated { channel_id, .. }
            | DomainEvent::RequestReceived { channel_id, .. }
            | DomainEvent::ChannelActivated { channel_id, .. }
            | DomainEvent::SaleRecorded { channel_id, .. }
            | DomainEvent::SaleCancelled { channel_id, .. }
            | DomainEvent::ChannelClosed { channel_id, .. }
            | DomainEvent::ReturnShipped { channel_id, .. }
            | DomainEvent::ReturnReceived { channel_id } => channel_id,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            DomainEvent::ChannelCreated {
                initial_request_id, ..
            } => Some(initial_request_id),
            DomainEvent::StockRequestCreated { request_id, .. }
            | DomainEvent::RequestReceived { request_id, .. }
            | DomainEvent::ChannelActivated { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// A row of the `domain_events` outbox.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DomainEventRecord {
    pub id: String,
    pub event_type: String,
    pub channel_id: String,
    pub request_id: Option<String>,
    /// The serialized [`DomainEvent`].
    pub payload: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl DomainEventRecord {
    pub fn decode(&self) -> serde_json::Result<DomainEvent> {
        serde_json::from_str(&self.payload)
    }
}

/// One row of the status history of a channel or a stock request.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StatusChange {
    pub entity: String,
    pub entity_id: String,
    pub from_status: String,
    pub to_status: String,
    #[ts(as = "String")]
    pub changed_at: DateTime<Utc>,
}

/// Decides whether a received request activates its channel.
///
/// Only the INITIAL request of an `approved` channel does. TOPUP requests,
/// channels still waiting for approval and channels already past `approved`
/// are left alone. Callers apply the returned event through the channel
/// transition table.
pub fn activation_on_request_received(
    event: &DomainEvent,
    channel_status: ChannelStatus,
) -> Option<ChannelEvent> {
    match event {
        DomainEvent::RequestReceived {
            request_type: RequestType::Initial,
            ..
        } if channel_status == ChannelStatus::Approved => Some(ChannelEvent::Activate),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(request_type: RequestType) -> DomainEvent {
        DomainEvent::RequestReceived {
            channel_id: "ch".into(),
            request_id: "rq".into(),
            request_type,
        }
    }

    #[test]
    fn test_initial_request_activates_approved_channel() {
        assert_eq!(
            activation_on_request_received(&received(RequestType::Initial), ChannelStatus::Approved),
            Some(ChannelEvent::Activate)
        );
    }

    #[test]
    fn test_hook_ignores_everything_else() {
        let initial = received(RequestType::Initial);
        for status in ChannelStatus::ALL {
            if status != ChannelStatus::Approved {
                assert_eq!(activation_on_request_received(&initial, status), None);
            }
        }
        assert_eq!(
            activation_on_request_received(&received(RequestType::Topup), ChannelStatus::Approved),
            None
        );
        let other = DomainEvent::SaleCancelled {
            channel_id: "ch".into(),
            sale_id: "s".into(),
        };
        assert_eq!(activation_on_request_received(&other, ChannelStatus::Approved), None);
    }

    #[test]
    fn test_payload_round_trips_through_record() {
        let event = received(RequestType::Topup);
        let record = DomainEventRecord {
            id: "e1".into(),
            event_type: event.event_type().into(),
            channel_id: event.channel_id().into(),
            request_id: event.request_id().map(str::to_string),
            payload: serde_json::to_string(&event).unwrap(),
            created_at: Utc::now(),
        };
        assert!(record.payload.contains("\"type\":\"request_received\""));
        assert_eq!(record.decode().unwrap(), event);
    }
}
