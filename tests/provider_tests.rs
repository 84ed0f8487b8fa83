use std::collections::HashMap;
use std::io::Read;
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use agentd::config::ProviderSpec;
use agentd::error::AgentdError;
use agentd::provider::{build_provider, OllamaProvider, Provider};
use tiny_http::{Response, Server};

mod helpers;
use helpers::EnvVarGuard;

struct Captured {
    url: String,
    body: String,
    authorization: Option<String>,
}

fn reserve_local_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// One-shot HTTP server: answers the first request with `status`/`reply`.
fn mock_server(status: u16, reply: &'static str) -> (String, mpsc::Receiver<Captured>) {
    let addr = format!("127.0.0.1:{}", reserve_local_port());
    let server = Server::http(&addr).expect("bind mock server");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok(mut req) = server.recv() {
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);
            let authorization = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let _ = tx.send(Captured {
                url: req.url().to_string(),
                body,
                authorization,
            });
            let _ = req.respond(Response::from_string(reply).with_status_code(status));
        }
    });
    (format!("http://{addr}"), rx)
}

fn ollama(endpoint: &str, stream: bool) -> OllamaProvider {
    OllamaProvider {
        endpoint: endpoint.to_string(),
        stream,
        timeout_secs: 5,
    }
}

fn spec_from_yaml(yaml: &str) -> ProviderSpec {
    serde_yaml::from_str(yaml).expect("parse ProviderSpec YAML")
}

#[test]
fn ollama_non_streaming_returns_response_field() {
    let (endpoint, rx) = mock_server(200, r#"{"model":"llama3","response":"hi there","done":true}"#);

    let out = ollama(&endpoint, false).complete("llama3", "say hi").unwrap();
    assert_eq!(out, "hi there");

    let req = rx.recv().unwrap();
    assert_eq!(req.url, "/api/generate");
    let sent: serde_json::Value = serde_json::from_str(&req.body).unwrap();
    assert_eq!(sent["model"], "llama3");
    assert_eq!(sent["prompt"], "say hi");
    assert_eq!(sent["stream"], false);
}

#[test]
fn ollama_streaming_concatenates_chunks() {
    let reply = "{\"response\":\"Hello\",\"done\":false}\n\
                 not json\n\
                 {\"response\":\" world\",\"done\":false}\n\
                 {\"response\":\"\",\"done\":true}\n";
    let (endpoint, rx) = mock_server(200, reply);

    let out = ollama(&format!("{endpoint}/"), true).complete("m", "p").unwrap();
    assert_eq!(out, "Hello world");

    let sent: serde_json::Value = serde_json::from_str(&rx.recv().unwrap().body).unwrap();
    assert_eq!(sent["stream"], true);
}

#[test]
fn ollama_error_status_is_typed() {
    let (endpoint, _rx) = mock_server(500, "model not loaded");
    let err = ollama(&endpoint, false).complete("m", "p").unwrap_err();
    match &err {
        AgentdError::Status { status, body, .. } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "ollama returned status 500: model not loaded");
}

#[test]
fn ollama_undecodable_body_is_a_decode_error() {
    let (endpoint, _rx) = mock_server(200, "<html>nope</html>");
    let err = ollama(&endpoint, false).complete("m", "p").unwrap_err();
    assert!(matches!(err, AgentdError::Decode(_)), "{err:?}");
}

#[test]
fn ollama_url_env_overrides_config_endpoint() {
    let _guard = EnvVarGuard::set("AGENTD_OLLAMA_URL", "http://10.0.0.5:11434");
    let spec = spec_from_yaml(
        r#"
type: ollama
config:
  endpoint: http://localhost:1
  stream: true
  timeout_secs: 9
"#,
    );
    let p = OllamaProvider::from_spec(&spec).unwrap();
    assert_eq!(p.endpoint, "http://10.0.0.5:11434");
    assert!(p.stream);
}

#[test]
fn invalid_timeout_override_is_rejected() {
    let _guard = EnvVarGuard::set("AGENTD_TIMEOUT_SECS", "soon");
    let err = OllamaProvider::from_spec(&ProviderSpec::default())
        .err()
        .expect("expected config error");
    assert!(
        err.to_string().contains("AGENTD_TIMEOUT_SECS"),
        "unexpected error: {err}"
    );
}

#[test]
fn timeout_override_beats_config() {
    let _guard = EnvVarGuard::set("AGENTD_TIMEOUT_SECS", "3");
    let spec = spec_from_yaml("type: ollama\nconfig:\n  timeout_secs: 60\n");
    assert_eq!(OllamaProvider::from_spec(&spec).unwrap().timeout_secs, 3);
}

#[test]
fn unsupported_kind_is_a_config_error() {
    let _guard = EnvVarGuard::unset("AGENTD_TIMEOUT_SECS");
    let spec = ProviderSpec {
        kind: "carrier-pigeon".into(),
        config: HashMap::new(),
    };
    let err = build_provider(&spec).err().expect("expected error");
    assert!(matches!(err, AgentdError::Config(_)), "{err:?}");
    assert!(err.to_string().contains("carrier-pigeon"), "{err}");
}

#[test]
fn http_provider_requires_endpoint() {
    let _guard = EnvVarGuard::unset("AGENTD_TIMEOUT_SECS");
    let spec = spec_from_yaml("type: http\n");
    let err = build_provider(&spec).err().expect("expected error");
    assert!(err.to_string().contains("config.endpoint"), "{err}");
}

#[test]
fn http_provider_posts_prompt_with_bearer_token() {
    let _guard = EnvVarGuard::set("AGENTD_TEST_PROVIDER_TOKEN", "s3cret");
    let (endpoint, rx) = mock_server(200, r#"{"output":"done"}"#);
    let spec = spec_from_yaml(&format!(
        r#"
type: http
config:
  endpoint: {endpoint}/complete
  auth:
    type: bearer
    env: AGENTD_TEST_PROVIDER_TOKEN
"#
    ));

    let provider = build_provider(&spec).unwrap();
    assert_eq!(provider.complete("m", "go").unwrap(), "done");

    let req = rx.recv().unwrap();
    assert_eq!(req.url, "/complete");
    assert_eq!(req.authorization.as_deref(), Some("Bearer s3cret"));
    let sent: serde_json::Value = serde_json::from_str(&req.body).unwrap();
    assert_eq!(sent["prompt"], "go");
}

#[test]
fn http_provider_reports_missing_output_field() {
    let _guard = EnvVarGuard::unset("AGENTD_TIMEOUT_SECS");
    let (endpoint, _rx) = mock_server(200, r#"{"text":"wrong key"}"#);
    let spec = spec_from_yaml(&format!("type: http\nconfig:\n  endpoint: {endpoint}\n"));
    let err = build_provider(&spec).unwrap().complete("m", "p").unwrap_err();
    assert!(matches!(err, AgentdError::MissingField(_, "output")), "{err:?}");
}
