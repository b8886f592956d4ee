use mesabot_provider::{LlmProvider, LlmRequest, OpenAiProvider, ResponseFormat, ToolDef};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn decision_request(model: &str) -> LlmRequest {
    let mut req = LlmRequest::simple(
        model.to_string(),
        Some("Você é a recepcionista virtual.".to_string()),
        "quero uma mesa para quatro".to_string(),
    );
    req.tools = vec![ToolDef {
        name: "registrar_reserva".to_string(),
        description: "Registra uma reserva confirmada".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {"nomeCompleto": {"type": "string"}}
        }),
    }];
    req.response_format = Some(ResponseFormat {
        name: "decisao_atendimento".to_string(),
        schema: serde_json::json!({"type": "object"}),
        strict: true,
    });
    req
}

#[tokio::test]
async fn chat_sends_bearer_auth_and_parses_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "response_format": {"type": "json_schema"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {"content": "{\"reply\":\"Claro! Para qual dia?\"}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 42, "completion_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test", server.uri());
    let resp = provider.chat(decision_request("gpt-4o-mini")).await.unwrap();
    assert!(resp.text.contains("Para qual dia?"));
    assert_eq!(resp.input_tokens, Some(42));
    assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn chat_surfaces_tool_invocation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "registrar_reserva",
                            "arguments": "{\"nomeCompleto\":\"Ana\",\"qtdPessoas\":4}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test", server.uri());
    let resp = provider.chat(decision_request("gpt-4o-mini")).await.unwrap();
    let (name, input) = resp.tool_use().expect("tool invocation expected");
    assert_eq!(name, "registrar_reserva");
    assert_eq!(input["qtdPessoas"], 4);
}

#[tokio::test]
async fn chat_maps_http_error_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"type": "server_error", "message": "upstream exploded"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test", server.uri());
    let err = provider
        .chat(decision_request("gpt-4o-mini"))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("500"));
    assert!(text.contains("[retryable]"));
    assert!(text.contains("upstream exploded"));
}
