//! Protocol tests against a live server backed by stub models.

mod common;

use serde_json::{Value, json};

fn chat_body(model: &str, content: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": content}]
    })
}

#[test]
fn models_listing_includes_identifiers_and_aliases() {
    let mut server = common::start_stub_server("stub-model", &["stub-alias"]);

    let body: Value = reqwest::blocking::get(format!("{}/models", server.base_url()))
        .unwrap()
        .json()
        .unwrap();

    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"stub-model"));
    assert!(ids.contains(&"stub-alias"));

    server.shutdown();
}

#[test]
fn alias_and_identifier_produce_identical_output() {
    let mut server = common::start_stub_server("stub-model", &["stub-alias"]);
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/chat/completions", server.base_url());

    let mut outputs = Vec::new();
    for model in ["stub-model", "stub-alias"] {
        let body: Value = client
            .post(&url)
            .json(&chat_body(model, "ping"))
            .send()
            .unwrap()
            .json()
            .unwrap();
        outputs.push(body["choices"][0]["message"]["content"].to_string());
    }
    assert_eq!(outputs[0], outputs[1]);

    server.shutdown();
}

#[test]
fn unknown_model_is_client_error_and_server_stays_usable() {
    let mut server = common::start_stub_server("stub-model", &[]);
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/chat/completions", server.base_url());

    let missing = client
        .post(&url)
        .json(&chat_body("unknown-model", "hi"))
        .send()
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
    let body: Value = missing.json().unwrap();
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("unknown-model")
    );

    let valid = client
        .post(&url)
        .json(&chat_body("stub-model", "still here"))
        .send()
        .unwrap();
    assert!(valid.status().is_success());

    server.shutdown();
}

#[test]
fn extra_request_fields_are_ignored_over_the_wire() {
    let mut server = common::start_stub_server("stub-model", &[]);
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(format!("{}/chat/completions", server.base_url()))
        .json(&json!({
            "model": "stub-model",
            "messages": [{"role": "user", "content": "hi"}],
            "n": 1,
            "user": "integration-test",
            "some_future_field": {"nested": true}
        }))
        .send()
        .unwrap();
    assert!(response.status().is_success());

    server.shutdown();
}

#[test]
fn streaming_response_terminates_with_done() {
    let mut server = common::start_stub_server("stub-model", &[]);
    let client = reqwest::blocking::Client::new();

    let mut body = json!({
        "model": "stub-model",
        "messages": [{"role": "user", "content": "hi"}]
    });
    body["stream"] = json!(true);

    let text = client
        .post(format!("{}/chat/completions", server.base_url()))
        .json(&body)
        .send()
        .unwrap()
        .text()
        .unwrap();

    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("\"finish_reason\":\"stop\""));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    server.shutdown();
}
