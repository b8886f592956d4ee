use mesabot_schema::{AssistantDecision, HandoverAction};
use serde::Deserialize;

/// Marker phrase the assistant emits in plain text when it has just recorded
/// a reservation. Inherited verbatim; deliberately not broadened.
const RESERVATION_MARKER: &str = "reserva registrada";

/// Labeled fields scanned out of a plain-text confirmation to build the
/// operator summary.
const PROMPT_LABELS: [&str; 4] = ["Nome:", "Número de pessoas:", "Dia:", "Horário:"];

/// A successfully normalized assistant reply, plus the JSON object it was
/// decoded from when the structured path succeeded.
#[derive(Debug, Clone)]
pub struct ParsedDecision {
    pub decision: AssistantDecision,
    pub json: Option<serde_json::Value>,
}

/// The decision record as the model actually emits it: alternate key
/// spellings for the handover action, everything optional.
#[derive(Debug, Deserialize)]
struct DecisionWire {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    handover: Option<String>,
    #[serde(default, rename = "handoverAction")]
    handover_action_camel: Option<String>,
    #[serde(default, rename = "handover_action")]
    handover_action_snake: Option<String>,
    #[serde(default)]
    agent_prompt: Option<String>,
    #[serde(default)]
    reserva_confirmada: bool,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl DecisionWire {
    /// First non-empty handover value, checked in priority order. An empty
    /// value under one key falls through to the next key, not to "none".
    fn handover_raw(&self) -> Option<&str> {
        [
            &self.handover,
            &self.handover_action_camel,
            &self.handover_action_snake,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .map(str::trim)
        .find(|v| !v.is_empty())
    }
}

/// Turns a raw assistant reply into a normalized decision.
///
/// Tries JSON extraction + structural decode first, then the plain-text
/// reservation heuristic. `None` means neither worked; callers treat the raw
/// text as an opaque reply with no handover.
pub fn parse(raw: &str) -> Option<ParsedDecision> {
    if let Some(candidate) = extract_json_candidate(raw) {
        if let Some(parsed) = decode_wire(&candidate) {
            return Some(parsed);
        }
    }
    fallback_plain_text(raw).map(|decision| ParsedDecision {
        decision,
        json: None,
    })
}

/// Locates the JSON object substring of a raw reply: fence contents first,
/// then the whole trimmed text, then the widest brace span anywhere.
fn extract_json_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Some(span) = brace_span(fenced) {
            return Some(span.to_string());
        }
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    brace_span(raw).map(str::to_string)
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let end = after.rfind("```")?;
    Some(&after[..end])
}

fn brace_span(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last < first {
        return None;
    }
    Some(&text[first..=last])
}

fn decode_wire(candidate: &str) -> Option<ParsedDecision> {
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    if !value.is_object() {
        return None;
    }
    let wire: DecisionWire = serde_json::from_value(value.clone()).ok()?;

    let handover = wire
        .handover_raw()
        .map(HandoverAction::parse)
        .unwrap_or(HandoverAction::None);
    let reply = wire.reply.unwrap_or_default();

    let usable =
        !reply.trim().is_empty() || handover != HandoverAction::None || wire.reserva_confirmada;
    if !usable {
        return None;
    }

    Some(ParsedDecision {
        decision: AssistantDecision {
            reply,
            handover,
            agent_prompt: wire.agent_prompt.filter(|p| !p.trim().is_empty()),
            reservation_confirmed: wire.reserva_confirmada,
            details: wire.details,
        },
        json: Some(value),
    })
}

/// Plain-text fallback: a reply carrying the reservation marker is treated
/// as a confirmed reservation, with the operator summary scraped from the
/// labeled fields the assistant writes into its confirmation text.
fn fallback_plain_text(raw: &str) -> Option<AssistantDecision> {
    if !raw.to_lowercase().contains(RESERVATION_MARKER) {
        return None;
    }

    let mut parts = Vec::new();
    for label in PROMPT_LABELS {
        if let Some(pos) = raw.find(label) {
            let rest = &raw[pos + label.len()..];
            let value = rest.lines().next().unwrap_or("").trim();
            let value = value.trim_end_matches('.').trim();
            if !value.is_empty() {
                parts.push(format!("{} {}", label.trim_end_matches(':'), value));
            }
        }
    }

    let agent_prompt = if parts.is_empty() {
        "Nova reserva registrada pelo assistente.".to_string()
    } else {
        format!("Nova reserva registrada: {}.", parts.join(", "))
    };

    Some(AssistantDecision {
        reply: raw.trim().to_string(),
        handover: HandoverAction::Confirm,
        agent_prompt: Some(agent_prompt),
        reservation_confirmed: true,
        details: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_decision_fields() {
        let parsed = parse(r#"{"reply":"x","handoverAction":"confirm","reserva_confirmada":true}"#)
            .expect("parse should succeed");
        assert_eq!(parsed.decision.reply, "x");
        assert_eq!(parsed.decision.handover, HandoverAction::Confirm);
        assert!(parsed.decision.reservation_confirmed);
        assert!(parsed.json.is_some());
    }

    #[test]
    fn handover_key_priority_order() {
        let parsed = parse(
            r#"{"reply":"x","handover":"ask","handoverAction":"confirm","handover_action":"confirm"}"#,
        )
        .unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::Ask);

        let parsed = parse(r#"{"reply":"x","handoverAction":"confirm","handover_action":"ask"}"#)
            .unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::Confirm);
    }

    #[test]
    fn empty_handover_key_falls_through_to_next_spelling() {
        let parsed = parse(r#"{"reply":"x","handover":"","handoverAction":"confirm"}"#).unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::Confirm);

        let parsed = parse(r#"{"reply":"x","handover":"  ","handover_action":"ask"}"#).unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::Ask);
    }

    #[test]
    fn unrecognized_handover_normalizes_to_none() {
        let parsed = parse(r#"{"reply":"x","handover":"escalate"}"#).unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::None);
    }

    #[test]
    fn fenced_json_extracts_same_as_unwrapped() {
        let bare = parse(r#"{"reply":"oi","handover":"ask"}"#).unwrap();
        let fenced = parse("```json\n{\"reply\":\"oi\",\"handover\":\"ask\"}\n```").unwrap();
        assert_eq!(bare.decision.reply, fenced.decision.reply);
        assert_eq!(bare.decision.handover, fenced.decision.handover);
        assert_eq!(bare.json, fenced.json);
    }

    #[test]
    fn json_embedded_in_prose_is_found_by_brace_scan() {
        let parsed = parse("Claro! Segue a decisão: {\"reply\":\"anotado\"} obrigado").unwrap();
        assert_eq!(parsed.decision.reply, "anotado");
    }

    #[test]
    fn malformed_json_in_fence_falls_back_to_heuristic() {
        let raw = "```json\n{reply: sem aspas}\n```\nReserva registrada. Nome: Ana.";
        let parsed = parse(raw).unwrap();
        assert!(parsed.json.is_none());
        assert!(parsed.decision.reservation_confirmed);
    }

    #[test]
    fn plain_text_reservation_marker_builds_agent_prompt() {
        let parsed = parse("Reserva registrada. Nome: Ana. Dia: 10.").unwrap();
        assert_eq!(parsed.decision.handover, HandoverAction::Confirm);
        assert!(parsed.decision.reservation_confirmed);
        let prompt = parsed.decision.agent_prompt.unwrap();
        assert!(prompt.contains("Nome Ana"));
        assert!(prompt.contains("Dia 10"));
        assert_eq!(parsed.decision.reply, "Reserva registrada. Nome: Ana. Dia: 10.");
    }

    #[test]
    fn marker_without_labels_uses_generic_summary() {
        let parsed = parse("Pronto! Sua reserva registrada com sucesso.").unwrap();
        assert!(parsed.decision.reservation_confirmed);
        assert_eq!(
            parsed.decision.agent_prompt.as_deref(),
            Some("Nova reserva registrada pelo assistente.")
        );
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        let parsed = parse("RESERVA REGISTRADA para amanhã.").unwrap();
        assert!(parsed.decision.reservation_confirmed);
    }

    #[test]
    fn text_without_json_or_marker_fails_to_parse() {
        assert!(parse("Olá! Como posso ajudar?").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn json_with_nothing_usable_falls_through() {
        // Decodes structurally but carries no reply, handover or confirmation.
        assert!(parse(r#"{"details":{"foo":1}}"#).is_none());
    }

    #[test]
    fn agent_prompt_blank_is_dropped() {
        let parsed = parse(r#"{"reply":"x","agent_prompt":"   "}"#).unwrap();
        assert!(parsed.decision.agent_prompt.is_none());
    }
}
