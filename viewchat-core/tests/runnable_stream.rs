use futures::StreamExt;
use serde_json::json;
use viewchat_core::{LlmRequest, LlmResponse, Message, Runnable, StreamEvent, ViewchatError};

struct Echo;

#[async_trait::async_trait]
impl Runnable<LlmRequest, LlmResponse> for Echo {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, ViewchatError> {
        let content = input
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(LlmResponse { content })
    }

    fn stream(
        &self,
        input: LlmRequest,
    ) -> futures::stream::BoxStream<'_, Result<StreamEvent, ViewchatError>> {
        let text = input
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let events = vec![
            Ok(StreamEvent::Metadata {
                key: "model".to_string(),
                value: json!(input.model),
            }),
            Ok(StreamEvent::ContentChunk(text.clone())),
            Ok(StreamEvent::FinalAnswer(text)),
        ];
        futures::stream::iter(events).boxed()
    }
}

fn request(content: &str) -> LlmRequest {
    LlmRequest {
        model: "echo".to_string(),
        messages: vec![Message::system("be brief"), Message::user(content)],
        temperature: Some(0.0),
    }
}

#[tokio::test]
async fn runnable_invoke_returns_response() {
    let response = Echo.invoke(request("hi")).await.unwrap();
    assert_eq!(response.content, "hi");
}

#[tokio::test]
async fn runnable_stream_emits_events_in_order() {
    let events: Vec<_> = Echo.stream(request("hi")).collect().await;
    let events = events.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        events,
        vec![
            StreamEvent::Metadata {
                key: "model".to_string(),
                value: json!("echo"),
            },
            StreamEvent::ContentChunk("hi".to_string()),
            StreamEvent::FinalAnswer("hi".to_string()),
        ]
    );
}

#[test]
fn llm_request_omits_missing_temperature() {
    let mut req = request("hi");
    req.temperature = None;
    let value = serde_json::to_value(&req).unwrap();
    assert!(value.get("temperature").is_none());
    assert_eq!(value["messages"][1], json!({"role": "user", "content": "hi"}));
}
