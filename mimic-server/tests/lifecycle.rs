//! Lifecycle integration tests over stub models: readiness, port
//! uniqueness, and teardown behavior without any model artifacts.

mod common;

use std::time::{Duration, Instant};

use mimic_server::{API_KEY, LlmServer, ServerOptions};

#[test]
fn server_becomes_ready_and_serves_models() {
    let mut server = common::start_stub_server("stub-model", &[]);

    let response = reqwest::blocking::get(format!("{}/models", server.base_url())).unwrap();
    assert!(response.status().is_success());

    server.shutdown();
}

#[test]
fn client_config_points_at_the_allocated_port() {
    let mut server = common::start_stub_server("stub-model", &[]);

    let config = server.client_config();
    assert_eq!(
        config.base_url,
        format!("http://127.0.0.1:{}/v1", server.port())
    );
    assert_eq!(config.api_key, API_KEY);

    server.shutdown();
}

#[test]
fn concurrent_servers_get_distinct_ports() {
    let mut first = common::start_stub_server("stub-model", &[]);
    let mut second = common::start_stub_server("stub-model", &[]);

    assert_ne!(first.port(), second.port());

    // Both must be serving at the same time.
    for server in [&first, &second] {
        let response = reqwest::blocking::get(format!("{}/models", server.base_url())).unwrap();
        assert!(response.status().is_success());
    }

    first.shutdown();
    second.shutdown();
}

#[test]
fn shutdown_is_idempotent_and_bounded() {
    let mut server = common::start_stub_server("stub-model", &[]);
    let port = server.port();

    let started = Instant::now();
    server.shutdown();
    server.shutdown();
    assert!(
        started.elapsed() < Duration::from_secs(6),
        "shutdown exceeded the join bound"
    );

    // The port is released and can be re-bound.
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[test]
fn shutdown_after_requests_leaves_no_worker_behind() {
    let mut server = common::start_stub_server("stub-model", &[]);
    let base_url = server.base_url();

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("{base_url}/chat/completions"))
        .json(&serde_json::json!({
            "model": "stub-model",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .unwrap();
    assert!(response.status().is_success());

    server.shutdown();

    // The endpoint must stop answering once shut down.
    let after = client.get(format!("{base_url}/models")).send();
    assert!(after.is_err());
}

#[test]
fn drop_shuts_the_server_down() {
    let port;
    {
        let server = common::start_stub_server("stub-model", &[]);
        port = server.port();
    }
    // Implicit shutdown on drop released the port.
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[test]
fn shutdown_can_run_from_another_thread() {
    let server = common::start_stub_server("stub-model", &[]);

    let handle = std::thread::spawn(move || {
        let mut server = server;
        server.shutdown();
        server
    });
    let mut server = handle.join().unwrap();
    server.shutdown();
}

#[test]
fn startup_timeout_is_bounded_and_distinguishable() {
    // With a ceiling that has already expired, construction either catches
    // the worker ready on the very first probe or fails with
    // StartupTimeout. Either way it must return promptly.
    let options = ServerOptions::new(["stub-model"]).startup_timeout(Duration::from_nanos(1));
    let started = Instant::now();
    let result = LlmServer::start_with_config(common::stub_config("stub-model", &[]), &options);
    assert!(started.elapsed() < Duration::from_secs(10));
    if let Err(err) = result {
        assert!(matches!(err, mimic_server::ServerError::StartupTimeout { .. }));
    }
}
