use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{HarvestingError, HarvestingState, Identifier, Reference, ReferenceEventType};

/// The person fields of an inbound retrieval request, as received over the
/// broker, before validation against the configured identifier type
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPersonFields {
    /// Given name, when supplied.
    pub first_name: Option<String>,
    /// Family name, when supplied.
    pub last_name: Option<String>,
    /// Identifiers as supplied by the client, before validation.
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

/// The JSON payload a client publishes on the inbound routing key
/// (`task.person.references.retrieval`) to request a retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Always `"person"` today; kept as a field rather than a unit struct
    /// so an unrecognised `type` can be rejected explicitly instead of
    /// failing generic JSON decoding.
    #[serde(rename = "type")]
    pub kind: String,
    /// The person to harvest references for.
    pub fields: InboundPersonFields,
    /// Whether the caller wants retrieval/harvesting/reference events
    /// published back.
    #[serde(default)]
    pub reply: bool,
    /// Identifier types to treat as absent during entity resolution.
    #[serde(default)]
    pub nullify: Vec<String>,
    /// Whether to reject the retrieval as ambiguous rather than merge when
    /// more than one existing entity shares an identifier.
    #[serde(default)]
    pub identifiers_safe_mode: bool,
    /// The harvesters to run; empty means every relevant harvester.
    #[serde(default)]
    pub harvesters: Vec<String>,
    /// The reference event types the caller wants published; empty means
    /// all of them.
    #[serde(default)]
    pub events: Vec<ReferenceEventType>,
}

impl InboundMessage {
    /// Whether `kind` names the only request type this system understands.
    pub fn is_person(&self) -> bool {
        self.kind == "person"
    }
}

/// `{type:"Retrieval", id?, error?, message?, parameters?}` - announces a
/// retrieval's registration, or reports that one could not be registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRetrieval {
    /// The retrieval's id, present once registration succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Present and `true` when this message reports a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    /// A human-readable failure description, present on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The offending inbound payload, present on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl OutboundRetrieval {
    /// A successful registration announcement.
    pub fn registered(id: Uuid) -> Self {
        Self { id: Some(id), error: None, message: None, parameters: None }
    }

    /// A registration or results-wait failure, carrying the offending
    /// payload for diagnosis.
    pub fn failed(message: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self { id: None, error: Some(true), message: Some(message.into()), parameters: Some(parameters) }
    }
}

/// `{type:"Harvesting", id, retrieval_id, harvester, state}` - a harvesting
/// state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundHarvesting {
    /// The harvesting's id.
    pub id: Uuid,
    /// The retrieval this harvesting belongs to.
    pub retrieval_id: Uuid,
    /// The harvester name.
    pub harvester: String,
    /// The state just reached.
    pub state: HarvestingState,
    /// Present when `state` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HarvestingError>,
}

/// `{type:"ReferenceEvent", id, harvesting_id, reference:{...}, event_type,
/// enhanced?}` - one classified reference event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundReferenceEvent {
    /// The event's id.
    pub id: Option<Uuid>,
    /// The harvesting that produced this event.
    pub harvesting_id: Uuid,
    /// The recorded reference, serialised for transport; absent only for a
    /// `Deleted` event for a reference that was never actually stored.
    pub reference: Option<Reference>,
    /// Which kind of change this event represents.
    pub event_type: ReferenceEventType,
    /// Whether concept/contributor enhancement completed for this
    /// reference.
    pub enhanced: bool,
}

impl From<crate::ReferenceEvent> for OutboundReferenceEvent {
    fn from(event: crate::ReferenceEvent) -> Self {
        Self {
            id: event.id,
            harvesting_id: event.harvesting_id,
            reference: event.reference,
            event_type: event.event_type,
            enhanced: event.enhanced,
        }
    }
}

/// The union of outbound message kinds published on the results routing
/// keys, tagged by `type` so a single factory can derive both the payload
/// and the routing key from one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A retrieval registration announcement or failure.
    Retrieval(OutboundRetrieval),
    /// A harvesting state transition.
    Harvesting(OutboundHarvesting),
    /// A classified reference event.
    ReferenceEvent(OutboundReferenceEvent),
}

impl OutboundMessage {
    /// The routing key this message publishes under, per §6's
    /// `event.references.{retrieval.{ok|error},harvesting.{state},
    /// reference.{created|updated|unchanged|deleted}}` scheme.
    pub fn routing_key(&self) -> String {
        match self {
            OutboundMessage::Retrieval(r) => {
                let subtype = if r.error.unwrap_or(false) { "error" } else { "ok" };
                format!("event.references.retrieval.{subtype}")
            }
            OutboundMessage::Harvesting(h) => {
                format!("event.references.harvesting.{}", harvesting_state_key(h.state))
            }
            OutboundMessage::ReferenceEvent(e) => {
                format!("event.references.reference.{}", reference_event_type_key(e.event_type))
            }
        }
    }
}

fn harvesting_state_key(state: HarvestingState) -> &'static str {
    match state {
        HarvestingState::Idle => "idle",
        HarvestingState::Running => "running",
        HarvestingState::Completed => "completed",
        HarvestingState::Failed => "failed",
    }
}

fn reference_event_type_key(kind: ReferenceEventType) -> &'static str {
    match kind {
        ReferenceEventType::Created => "created",
        ReferenceEventType::Updated => "updated",
        ReferenceEventType::Unchanged => "unchanged",
        ReferenceEventType::Deleted => "deleted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_decodes_minimal_identifier_only_payload() {
        let json = serde_json::json!({
            "type": "person",
            "fields": {"identifiers": [{"type": "idref", "value": "123"}]},
        });
        let msg: InboundMessage = serde_json::from_value(json).unwrap();
        assert!(msg.is_person());
        assert!(!msg.reply);
        assert_eq!(msg.fields.identifiers[0].value, "123");
    }

    #[test]
    fn outbound_retrieval_routing_key_depends_on_error_flag() {
        assert_eq!(OutboundMessage::Retrieval(OutboundRetrieval::registered(Uuid::new_v4())).routing_key(), "event.references.retrieval.ok");
        assert_eq!(
            OutboundMessage::Retrieval(OutboundRetrieval::failed("bad", serde_json::Value::Null)).routing_key(),
            "event.references.retrieval.error"
        );
    }

    #[test]
    fn outbound_harvesting_routing_key_embeds_state() {
        let event = OutboundMessage::Harvesting(OutboundHarvesting {
            id: Uuid::new_v4(),
            retrieval_id: Uuid::new_v4(),
            harvester: "hal".into(),
            state: HarvestingState::Completed,
            error: None,
        });
        assert_eq!(event.routing_key(), "event.references.harvesting.completed");
    }

    #[test]
    fn outbound_message_tags_on_type_field() {
        let event = OutboundMessage::ReferenceEvent(OutboundReferenceEvent {
            id: Some(Uuid::new_v4()),
            harvesting_id: Uuid::new_v4(),
            reference: None,
            event_type: ReferenceEventType::Deleted,
            enhanced: false,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "ReferenceEvent");
        assert_eq!(value["event_type"], "deleted");
    }
}
