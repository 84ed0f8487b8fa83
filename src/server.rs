//! HTTP gateway in front of the dispatcher.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{info, warn};

use crate::compiler;
use crate::dispatch::Dispatcher;
use crate::instruction::Metadata;
use crate::mermaid;
use crate::trace::Trace;

pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

const VISUALIZER_TITLE: &str = "agentd DAG Visualization";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instruction: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Metadata,
}

/// Missing and `null` fields both mean "empty".
fn null_as_default<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteResponse {
    pub content: String,
    pub trace: Trace,
    pub complete: bool,
}

/// Serve until the listener fails. Requests are spread over `workers`
/// threads that share one dispatcher.
pub fn run_server(bind_addr: &str, workers: usize, dispatcher: Dispatcher) -> Result<()> {
    let server = Server::http(bind_addr)
        .map_err(|err| anyhow!("failed to bind gateway at {bind_addr}: {err}"))?;
    let server = Arc::new(server);
    let dispatcher = Arc::new(dispatcher);
    info!(bind = bind_addr, workers, "gateway listening");

    let handles = (0..workers.max(1))
        .map(|i| {
            let server = Arc::clone(&server);
            let dispatcher = Arc::clone(&dispatcher);
            thread::Builder::new()
                .name(format!("agentd-worker-{i}"))
                .spawn(move || worker_loop(&server, &dispatcher))
        })
        .collect::<std::io::Result<Vec<_>>>()
        .context("failed to spawn gateway worker")?;

    for handle in handles {
        if handle.join().is_err() {
            return Err(anyhow!("gateway worker panicked"));
        }
    }
    Ok(())
}

fn worker_loop(server: &Server, dispatcher: &Dispatcher) {
    for request in server.incoming_requests() {
        let url = request.url().to_string();
        if let Err(err) = handle_request(request, dispatcher) {
            warn!(url, error = %err, "failed to answer request");
        }
    }
}

fn handle_request(mut request: Request, dispatcher: &Dispatcher) -> Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));

    if method == Method::Options {
        request.respond(text_response(200, "text/plain", ""))?;
        return Ok(());
    }

    match (method, path) {
        (Method::Get, "/v1/health") => {
            request.respond(json_response(200, &serde_json::json!({ "ok": true }))?)?;
        }
        (Method::Post, "/v1/execute") => {
            let mut body: Vec<u8> = Vec::new();
            request
                .as_reader()
                .take((MAX_REQUEST_BYTES + 1) as u64)
                .read_to_end(&mut body)
                .context("failed to read request body")?;
            if body.len() > MAX_REQUEST_BYTES {
                request.respond(text_response(413, "text/plain", "Payload too large"))?;
                return Ok(());
            }

            let req: ExecuteRequest = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "rejecting execute request");
                    request.respond(text_response(400, "text/plain", "Invalid JSON"))?;
                    return Ok(());
                }
            };
            let response = execute_request(dispatcher, &req);
            request.respond(json_response(200, &response)?)?;
        }
        (_, "/v1/execute") => {
            request.respond(text_response(405, "text/plain", "Use POST"))?;
        }
        (Method::Get, "/visualize") => match query_param(query, "dag") {
            Some(plan) if !plan.is_empty() => {
                let diagram = mermaid::render(&compiler::compile_dag(&plan));
                let page = mermaid::html_page(VISUALIZER_TITLE, &diagram);
                request.respond(text_response(200, "text/html; charset=utf-8", page))?;
            }
            _ => {
                request.respond(text_response(
                    400,
                    "text/plain",
                    "Missing ?dag=plan://... parameter",
                ))?;
            }
        },
        _ => {
            request.respond(text_response(404, "text/plain", "Not found"))?;
        }
    }
    Ok(())
}

pub fn execute_request(dispatcher: &Dispatcher, req: &ExecuteRequest) -> ExecuteResponse {
    info!(session = req.session_id.as_str(), "execute request");
    let out = dispatcher.dispatch(&req.session_id, &req.instruction, &req.metadata);
    ExecuteResponse {
        content: out.output,
        trace: out.trace,
        complete: true,
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    let url = reqwest::Url::parse(&format!("http://localhost/?{query}")).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn text_response(code: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Response<Cursor<Vec<u8>>> {
    with_headers(Response::from_data(body.into()).with_status_code(code), content_type)
}

fn json_response<T: Serialize>(code: u16, value: &T) -> Result<Response<Cursor<Vec<u8>>>> {
    let body = serde_json::to_vec(value)?;
    Ok(text_response(code, "application/json", body))
}

fn with_headers(
    mut response: Response<Cursor<Vec<u8>>>,
    content_type: &str,
) -> Response<Cursor<Vec<u8>>> {
    let headers = [
        ("Content-Type", content_type),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type"),
    ];
    for (name, value) in headers {
        if let Ok(header) = Header::from_bytes(name, value) {
            response = response.with_header(header);
        }
    }
    response
}
