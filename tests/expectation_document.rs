use std::io::Write;

use openai_mock::{ExpectationDocument, MockServer, RegistrationError};
use serde_json::{json, Value};

const DOCUMENT: &str = r#"
expectations:
  - when: What is the weather in london?
    reply: Enjoy the weather.
    steps:
      - - tool: FindsTheLatitudeAndLongitudeOfAGivenCity
          arguments:
            name: London
      - - tool: ForecastsTheWeatherForTheGivenLatitudeAndLongitude
          arguments:
            latitude: "51.50758961965397"
            longitude: "-0.13388057363742217"
  - when: another sentence
    reply: hello World
"#;

async fn post_json(server: &MockServer, body: Value) -> Value {
    let response = reqwest::Client::new()
        .post(server.url("/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn serves_expectations_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(DOCUMENT.as_bytes()).unwrap();

    let document = ExpectationDocument::from_file(file.path()).unwrap();
    let server = MockServer::start(document.to_registry().unwrap()).await.unwrap();
    assert_eq!(server.expectations().len(), 2);

    let text = post_json(
        &server,
        json!({"messages": [{"role": "user", "content": "another sentence"}]}),
    )
    .await;
    assert_eq!(text["choices"][0]["message"]["content"], "hello World");

    let question = json!({"role": "user", "content": "What is the weather in london?"});
    let first = post_json(&server, json!({ "messages": [question] })).await;
    let call = &first["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["function"]["arguments"], "{\"name\":\"London\"}");

    let second = post_json(
        &server,
        json!({"messages": [
            question,
            {"role": "tool", "tool_call_id": call["id"], "content": "{\"latitude\": 51.5}"}
        ]}),
    )
    .await;
    let call = &second["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(
        call["function"]["name"],
        "ForecastsTheWeatherForTheGivenLatitudeAndLongitude"
    );

    // the tool result wins over the configured reply
    let done = post_json(
        &server,
        json!({"messages": [
            question,
            {"role": "tool", "tool_call_id": call["id"], "content": "Sunny"}
        ]}),
    )
    .await;
    assert_eq!(done["choices"][0]["message"]["content"], "Sunny");
    assert_eq!(done["choices"][0]["finish_reason"], "stop");

    server.shutdown().await.unwrap();
}

#[test]
fn duplicate_triggers_are_rejected() {
    let document = ExpectationDocument::from_yaml_str(
        "expectations:\n  - when: hi\n    reply: one\n  - when: hi\n    reply: two\n",
    )
    .unwrap();
    assert!(matches!(
        document.to_registry(),
        Err(RegistrationError::DuplicateTrigger(trigger)) if trigger == "hi"
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ExpectationDocument::from_file(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(RegistrationError::Io(_))));
}
