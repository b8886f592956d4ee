use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mesabot_provider::ToolDef;

/// Tool the model invokes once every reservation field is collected.
pub const RESERVATION_TOOL: &str = "registrar_reserva";
/// Tool the model invokes when the customer should talk to a human.
pub const ATTENDANT_TOOL: &str = "acionar_atendente";

/// Executes a named tool with raw arguments, returning the text that becomes
/// the assistant's reply.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String>;
}

/// The two tools this pipeline ships with. Both are pure text renderers: the
/// actual side effects (reservation commit, mode transition) belong to the
/// decision dispatcher.
pub struct BuiltinToolExecutor;

#[async_trait]
impl ToolExecutor for BuiltinToolExecutor {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String> {
        match name {
            RESERVATION_TOOL => Ok(render_reservation_confirmation(args)),
            ATTENDANT_TOOL => Ok(
                "Certo! Já estou chamando um atendente para continuar seu atendimento."
                    .to_string(),
            ),
            other => Err(anyhow!("unknown tool: {other}")),
        }
    }
}

/// Declarations sent to the model alongside every decision request.
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: RESERVATION_TOOL.to_string(),
            description: "Registra uma reserva confirmada com todos os dados coletados."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "nomeCompleto": { "type": "string" },
                    "qtdPessoas": { "type": "integer", "minimum": 1 },
                    "data": { "type": "string" },
                    "hora": { "type": "string" }
                },
                "required": ["nomeCompleto", "qtdPessoas", "data", "hora"]
            }),
        },
        ToolDef {
            name: ATTENDANT_TOOL.to_string(),
            description: "Aciona um atendente humano para assumir a conversa.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "motivo": { "type": "string" }
                },
                "required": ["motivo"]
            }),
        },
    ]
}

fn arg_text(args: &serde_json::Value, key: &str) -> String {
    match args.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => "não informado".to_string(),
    }
}

/// Confirmation text in the exact phrasing the plain-text parser fallback
/// recognizes.
fn render_reservation_confirmation(args: &serde_json::Value) -> String {
    format!(
        "Reserva registrada. Nome: {}. Número de pessoas: {}. Dia: {}. Horário: {}.",
        arg_text(args, "nomeCompleto"),
        arg_text(args, "qtdPessoas"),
        arg_text(args, "data"),
        arg_text(args, "hora"),
    )
}

/// Operator-facing one-liner for a reservation committed via tool call.
pub fn reservation_summary(args: &serde_json::Value) -> String {
    format!(
        "Nova reserva registrada: Nome {}, Número de pessoas {}, Dia {}, Horário {}.",
        arg_text(args, "nomeCompleto"),
        arg_text(args, "qtdPessoas"),
        arg_text(args, "data"),
        arg_text(args, "hora"),
    )
}
