use std::sync::Arc;

use anyhow::Result;
use mesabot_provider::{LlmMessage, LlmProvider, LlmRequest, LlmResponse, ResponseFormat};
use mesabot_schema::{
    AssistantDecision, ConversationContext, ConversationTurn, HandoverAction, TurnRole,
};
use uuid::Uuid;

use crate::config::AssistantConfig;
use crate::decision;
use crate::tools::{self, ToolExecutor, ATTENDANT_TOOL, RESERVATION_TOOL};

const DEGRADED_REPLY: &str = "Nosso atendimento automático está temporariamente indisponível. \
     Em breve um atendente falará com você.";
const APOLOGY_REPLY: &str = "Desculpe, tive um problema para processar sua mensagem agora. \
     Pode tentar novamente em instantes?";
const NOT_UNDERSTOOD_REPLY: &str = "Desculpe, não consegui entender. Pode reformular?";

/// Calls the language model and turns whatever comes back into a decision.
///
/// This boundary never fails: missing credentials, network errors, tool
/// failures and unusable responses all degrade into fixed decisions.
pub struct AssistantOrchestrator {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<dyn ToolExecutor>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
}

impl AssistantOrchestrator {
    /// `provider` is `None` when no API credentials are configured; every
    /// request then short-circuits to the degraded-service decision.
    pub fn new(
        config: &AssistantConfig,
        provider: Option<Arc<dyn LlmProvider>>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
        }
    }

    pub async fn generate_decision(
        &self,
        conversation_id: Uuid,
        user_text: &str,
        history: &[ConversationTurn],
        context: &ConversationContext,
    ) -> AssistantDecision {
        let Some(provider) = self.provider.as_ref() else {
            tracing::warn!(
                conversation_id = %conversation_id,
                "assistant credentials not configured, returning degraded decision"
            );
            return AssistantDecision::reply(DEGRADED_REPLY);
        };

        match self
            .try_generate(provider.as_ref(), user_text, history, context)
            .await
        {
            Ok(decision) => decision,
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "assistant call failed, returning apology decision"
                );
                AssistantDecision::reply(APOLOGY_REPLY)
            }
        }
    }

    async fn try_generate(
        &self,
        provider: &dyn LlmProvider,
        user_text: &str,
        history: &[ConversationTurn],
        context: &ConversationContext,
    ) -> Result<AssistantDecision> {
        let request = self.build_request(user_text, history, context);
        let response = provider.chat(request).await?;
        self.decision_from_response(response).await
    }

    fn build_request(
        &self,
        user_text: &str,
        history: &[ConversationTurn],
        context: &ConversationContext,
    ) -> LlmRequest {
        let mut system = self.system_prompt.clone();
        if !context.collected.is_empty() {
            if let Ok(collected) = serde_json::to_string(&context.collected) {
                system.push_str("\n\nDados já coletados nesta conversa: ");
                system.push_str(&collected);
            }
        }

        let mut messages: Vec<LlmMessage> = history
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => LlmMessage::user(turn.text.clone()),
                TurnRole::Assistant => LlmMessage::assistant(turn.text.clone()),
            })
            .collect();
        messages.push(LlmMessage::user(user_text));

        LlmRequest {
            model: self.model.clone(),
            system: Some(system),
            messages,
            max_tokens: self.max_tokens,
            tools: tools::tool_definitions(),
            response_format: Some(decision_response_format()),
        }
    }

    async fn decision_from_response(&self, response: LlmResponse) -> Result<AssistantDecision> {
        if let Some((name, input)) = response.tool_use() {
            let output = self.tools.execute(name, input).await?;
            return Ok(decision_from_tool(name, input, output));
        }

        let text = response.text.trim();
        if text.is_empty() {
            return Ok(AssistantDecision::reply(NOT_UNDERSTOOD_REPLY));
        }

        match decision::parse(text) {
            Some(parsed) => Ok(parsed.decision),
            // Undecodable text is still a valid reply to the customer.
            None => Ok(AssistantDecision::reply(text)),
        }
    }
}

/// Maps a tool invocation onto the closed handover set: the reservation tool
/// confirms, the attendant tool asks, anything else carries no handover. The
/// raw tool name is kept in the decision details.
fn decision_from_tool(
    name: &str,
    input: &serde_json::Value,
    output: String,
) -> AssistantDecision {
    let details = Some(serde_json::json!({ "tool": name, "args": input }));
    match name {
        RESERVATION_TOOL => AssistantDecision {
            reply: output,
            handover: HandoverAction::Confirm,
            agent_prompt: Some(tools::reservation_summary(input)),
            reservation_confirmed: true,
            details,
        },
        ATTENDANT_TOOL => AssistantDecision {
            reply: output,
            handover: HandoverAction::Ask,
            agent_prompt: input
                .get("motivo")
                .and_then(|v| v.as_str())
                .map(|motivo| format!("Cliente pediu atendimento humano: {motivo}")),
            reservation_confirmed: false,
            details,
        },
        _ => AssistantDecision {
            reply: output,
            handover: HandoverAction::None,
            agent_prompt: None,
            reservation_confirmed: false,
            details,
        },
    }
}

/// The strict structured-output schema every decision request carries.
fn decision_response_format() -> ResponseFormat {
    ResponseFormat {
        name: "decisao_atendimento".to_string(),
        strict: true,
        schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "reply": { "type": "string" },
                "agentPrompt": { "type": ["string", "null"] },
                "nomeCompleto": { "type": ["string", "null"] },
                "qtdPessoas": { "type": ["integer", "null"] },
                "data": { "type": ["string", "null"] },
                "hora": { "type": ["string", "null"] }
            },
            "required": ["reply", "agentPrompt", "nomeCompleto", "qtdPessoas", "data", "hora"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use mesabot_provider::ContentBlock;

    use crate::config::AssistantConfig;
    use crate::tools::BuiltinToolExecutor;

    fn config() -> AssistantConfig {
        AssistantConfig {
            model: "gpt-4o-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            system_prompt: "Você é a recepcionista virtual.".to_string(),
            max_tokens: 512,
        }
    }

    struct ScriptedProvider {
        response: LlmResponse,
    }

    impl ScriptedProvider {
        fn text(text: &str) -> Self {
            Self {
                response: LlmResponse {
                    text: text.to_string(),
                    content: vec![ContentBlock::Text {
                        text: text.to_string(),
                    }],
                    input_tokens: None,
                    output_tokens: None,
                    stop_reason: Some("end_turn".into()),
                },
            }
        }

        fn tool(name: &str, input: serde_json::Value) -> Self {
            Self {
                response: LlmResponse {
                    text: String::new(),
                    content: vec![ContentBlock::ToolUse {
                        id: "call_1".into(),
                        name: name.to_string(),
                        input,
                    }],
                    input_tokens: None,
                    output_tokens: None,
                    stop_reason: Some("tool_use".into()),
                },
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Err(anyhow!("openai api error (503) [retryable]"))
        }
    }

    fn orchestrator(provider: Option<Arc<dyn LlmProvider>>) -> AssistantOrchestrator {
        AssistantOrchestrator::new(&config(), provider, Arc::new(BuiltinToolExecutor))
    }

    #[tokio::test]
    async fn missing_credentials_degrade_without_network() {
        let orchestrator = orchestrator(None);
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "oi",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, DEGRADED_REPLY);
        assert_eq!(decision.handover, HandoverAction::None);
    }

    #[tokio::test]
    async fn provider_failure_returns_apology() {
        let orchestrator = orchestrator(Some(Arc::new(FailingProvider)));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "oi",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, APOLOGY_REPLY);
    }

    #[tokio::test]
    async fn structured_text_response_is_parsed() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::text(
            r#"{"reply":"Para qual dia?","handoverAction":"none"}"#,
        ))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "quero reservar",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, "Para qual dia?");
        assert_eq!(decision.handover, HandoverAction::None);
    }

    #[tokio::test]
    async fn unparseable_text_becomes_opaque_reply() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::text(
            "Olá! Como posso ajudar você hoje?",
        ))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "oi",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, "Olá! Como posso ajudar você hoje?");
        assert_eq!(decision.handover, HandoverAction::None);
        assert!(!decision.reservation_confirmed);
    }

    #[tokio::test]
    async fn empty_response_returns_not_understood() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::text("  "))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "oi",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, NOT_UNDERSTOOD_REPLY);
    }

    #[tokio::test]
    async fn reservation_tool_confirms_with_summary() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::tool(
            RESERVATION_TOOL,
            serde_json::json!({
                "nomeCompleto": "Ana Souza",
                "qtdPessoas": 4,
                "data": "2026-08-10",
                "hora": "20:00"
            }),
        ))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "pode confirmar",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.handover, HandoverAction::Confirm);
        assert!(decision.reservation_confirmed);
        assert!(decision.reply.starts_with("Reserva registrada."));
        assert!(decision.agent_prompt.unwrap().contains("Ana Souza"));
        assert_eq!(decision.details.unwrap()["tool"], RESERVATION_TOOL);
    }

    #[tokio::test]
    async fn attendant_tool_asks_for_handover() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::tool(
            ATTENDANT_TOOL,
            serde_json::json!({"motivo": "pedido fora do cardápio"}),
        ))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "quero falar com alguém",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.handover, HandoverAction::Ask);
        assert!(!decision.reservation_confirmed);
        assert!(decision
            .agent_prompt
            .unwrap()
            .contains("pedido fora do cardápio"));
    }

    #[tokio::test]
    async fn unknown_tool_failure_degrades_to_apology() {
        let orchestrator = orchestrator(Some(Arc::new(ScriptedProvider::tool(
            "consultar_estoque",
            serde_json::json!({}),
        ))));
        let decision = orchestrator
            .generate_decision(
                Uuid::new_v4(),
                "tem estoque?",
                &[],
                &ConversationContext::default(),
            )
            .await;
        assert_eq!(decision.reply, APOLOGY_REPLY);
    }

    #[test]
    fn request_carries_history_tools_and_schema() {
        let orchestrator = orchestrator(None);
        let history = vec![
            ConversationTurn {
                role: TurnRole::User,
                text: "oi".to_string(),
                at: Utc::now(),
            },
            ConversationTurn {
                role: TurnRole::Assistant,
                text: "olá!".to_string(),
                at: Utc::now(),
            },
        ];
        let mut context = ConversationContext::default();
        context
            .collected
            .insert("nomeCompleto".to_string(), serde_json::json!("Ana"));

        let request = orchestrator.build_request("quero reservar", &history, &context);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, "assistant");
        assert_eq!(request.messages[2].text(), "quero reservar");
        assert_eq!(request.tools.len(), 2);
        let format = request.response_format.unwrap();
        assert_eq!(format.name, "decisao_atendimento");
        assert!(format.strict);
        assert!(request.system.unwrap().contains("Dados já coletados"));
    }
}
