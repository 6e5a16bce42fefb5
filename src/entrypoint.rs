//! Entrypoint — the HTTP listener and request handlers
//!
//! Accepts connections on the configured address and dispatches the
//! serving routes: plain generation, OpenAI-compatible chat, health,
//! and metrics. Buffered responses race a client-disconnect watcher;
//! streaming responses detect disconnects through body-channel failure.

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::admission::{RawGenerationRequest, RequestAdmission};
use crate::api::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ModelList, OpenAiError,
    SSE_DONE,
};
use crate::api::{ErrorBody, GenerateResponse};
use crate::cancel::{client_channel, CancellationWatcher, DeliveryOutcome};
use crate::config::ServingConfig;
use crate::engine::{EngineProxy, TokenStream};
use crate::error::{Result, ServingError};
use crate::observability::ServingMetrics;
use crate::stream::ndjson_line;
use crate::{HealthStatus, ReplicaState};

/// Response body unifying buffered and streamed payloads
type ResponseBody = BoxBody<Bytes, Infallible>;

/// Shared state for request handling
pub struct ServingState {
    pub config: Arc<ServingConfig>,
    pub replica_state: Arc<RwLock<ReplicaState>>,
    pub start_time: Instant,
    pub admission: Arc<RequestAdmission>,
    pub proxy: Arc<EngineProxy>,
    pub metrics: Arc<ServingMetrics>,
}

/// Start the HTTP entrypoint on the configured listen address
pub async fn start_http_entrypoint(
    addr: SocketAddr,
    state: Arc<ServingState>,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServingError::Other(format!("Failed to bind {}: {}", addr, e)))?;

    info!(address = %addr, "HTTP entrypoint listening");

    let handle = tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let state = state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let _ = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(|req| handle_request(req, remote_addr, state.clone())),
                    )
                    .await;
            });
        }
    });

    Ok(handle)
}

/// Dispatch one HTTP request to its route handler
async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ServingState>,
) -> std::result::Result<Response<ResponseBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, remote = %remote_addr, "Request received");

    let response = match (method.as_str(), path.as_str()) {
        ("POST", "/generate") => handle_generate(req, state).await,
        ("POST", "/v1/chat/completions") => handle_chat(req, state).await,
        ("GET", "/v1/models") => models_response(&state),
        ("GET", "/v1/replicas/metrics") => replica_metrics_response(&state),
        ("GET", "/health") => health_response(&state),
        ("GET", "/metrics") => metrics_response(&state),
        _ => json_response(StatusCode::NOT_FOUND, &ErrorBody::new("Not found")),
    };

    Ok(response)
}

// ---------------------------------------------------------------------------
// Plain generation endpoint
// ---------------------------------------------------------------------------

/// `POST /generate` — admit, submit, and deliver one generation
async fn handle_generate(
    req: Request<Incoming>,
    state: Arc<ServingState>,
) -> Response<ResponseBody> {
    let body = collect_body(req).await;
    let raw: RawGenerationRequest = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody::new(format!("Invalid request body: {}", e)),
            );
        }
    };

    let request = match state.admission.admit(raw) {
        Ok(request) => request,
        Err(e) => return json_response(StatusCode::BAD_REQUEST, &ErrorBody::new(e.to_string())),
    };

    let prompt = request.prompt.clone();
    let wants_stream = request.stream;
    let request_id = request.id.clone();

    let stream = match state.proxy.submit(request).await {
        Ok(stream) => stream,
        Err(e @ ServingError::Overloaded(_)) => {
            return json_response(StatusCode::SERVICE_UNAVAILABLE, &ErrorBody::new(e.to_string()));
        }
        Err(e) => {
            error!(request_id = %request_id, "Generation submit failed: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorBody::new(e.to_string()),
            );
        }
    };

    if wants_stream {
        stream_ndjson(stream, state)
    } else {
        buffered_generate(stream, prompt, state).await
    }
}

/// Deliver a buffered `/generate` response: the prompt followed by the
/// completion, as the single candidate in `text`.
async fn buffered_generate(
    mut stream: TokenStream,
    prompt: String,
    state: Arc<ServingState>,
) -> Response<ResponseBody> {
    let (client, monitor) = client_channel();
    let watcher = CancellationWatcher::new(monitor, state.proxy.clone(), state.metrics.clone());

    let task = tokio::spawn(async move { watcher.collect(&mut stream, Some(&prompt)).await });

    // Dropping this handler mid-flight drops the handle, which fires the
    // watcher inside the spawned task.
    let _client = client;

    match task.await {
        Ok(Ok(DeliveryOutcome::Completed(completed))) => {
            json_response(StatusCode::OK, &GenerateResponse::single(completed.text))
        }
        Ok(Ok(DeliveryOutcome::ClientGone)) => client_gone_response(),
        Ok(Err(e)) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorBody::new(e.to_string()),
        ),
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorBody::new(format!("Generation task failed: {}", e)),
        ),
    }
}

/// Stream `/generate` deltas as newline-delimited JSON
fn stream_ndjson(mut stream: TokenStream, state: Arc<ServingState>) -> Response<ResponseBody> {
    let (tx, body) = channel_body();
    let proxy = state.proxy.clone();
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        let request_id = stream.request_id().to_string();
        loop {
            match stream.next().await {
                Ok(Some(chunk)) => {
                    let terminal = chunk.is_terminal();
                    let line = ndjson_line(&chunk);
                    if tx.send(Bytes::from(line)).await.is_err() {
                        metrics.record_client_disconnect();
                        info!(request_id = %request_id, "Client gone mid-stream; aborting generation");
                        proxy.abort(&request_id).await;
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(request_id = %request_id, "Generation stream failed: {}", e);
                    let line = format!("{}\n", serde_json::json!({ "error": e.to_string() }));
                    let _ = tx.send(Bytes::from(line)).await;
                    return;
                }
            }
        }
    });

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    response
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat endpoint
// ---------------------------------------------------------------------------

/// `POST /v1/chat/completions` — flatten, admit, and deliver a chat completion
async fn handle_chat(req: Request<Incoming>, state: Arc<ServingState>) -> Response<ResponseBody> {
    let body = collect_body(req).await;
    let chat: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(chat) => chat,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &OpenAiError::invalid_request(format!("Invalid request body: {}", e)),
            );
        }
    };

    if chat.messages.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &OpenAiError::invalid_request("messages must not be empty"),
        );
    }

    let request = match state.admission.admit(chat.to_raw()) {
        Ok(request) => request,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &OpenAiError::invalid_request(e.to_string()),
            );
        }
    };

    let input_tokens = request.input_token_count;
    let wants_stream = request.stream;
    let request_id = request.id.clone();
    let model = state.config.engine.model_id.clone();

    let stream = match state.proxy.submit(request).await {
        Ok(stream) => stream,
        Err(e @ ServingError::Overloaded(_)) => {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &OpenAiError::server(e.to_string()),
            );
        }
        Err(e) => {
            error!(request_id = %request_id, "Generation submit failed: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &OpenAiError::server(e.to_string()),
            );
        }
    };

    if wants_stream {
        stream_chat_sse(stream, model, state)
    } else {
        buffered_chat(stream, model, input_tokens, state).await
    }
}

/// Deliver a buffered chat completion: generated text only, with usage
async fn buffered_chat(
    mut stream: TokenStream,
    model: String,
    input_tokens: usize,
    state: Arc<ServingState>,
) -> Response<ResponseBody> {
    let (client, monitor) = client_channel();
    let watcher = CancellationWatcher::new(monitor, state.proxy.clone(), state.metrics.clone());

    let task = tokio::spawn(async move { watcher.collect(&mut stream, None).await });
    let _client = client;

    match task.await {
        Ok(Ok(DeliveryOutcome::Completed(completed))) => {
            let completion_tokens = state.admission.count_tokens(&completed.text);
            let response = ChatCompletionResponse::new(
                &model,
                &completed.text,
                completed.finish_reason,
                input_tokens,
                completion_tokens,
            );
            json_response(StatusCode::OK, &response)
        }
        Ok(Ok(DeliveryOutcome::ClientGone)) => client_gone_response(),
        Ok(Err(e)) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &OpenAiError::server(e.to_string()),
        ),
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &OpenAiError::server(format!("Generation task failed: {}", e)),
        ),
    }
}

/// Stream a chat completion as SSE chunks closed by `[DONE]`
fn stream_chat_sse(
    mut stream: TokenStream,
    model: String,
    state: Arc<ServingState>,
) -> Response<ResponseBody> {
    let (tx, body) = channel_body();
    let proxy = state.proxy.clone();
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        let request_id = stream.request_id().to_string();
        let id = crate::api::openai::completion_id();

        let initial = ChatCompletionChunk::initial(&id, &model).to_sse();
        if tx.send(Bytes::from(initial)).await.is_err() {
            metrics.record_client_disconnect();
            proxy.abort(&request_id).await;
            return;
        }

        loop {
            match stream.next().await {
                Ok(Some(chunk)) => {
                    let mut events = String::new();
                    if !chunk.delta.is_empty() {
                        events.push_str(
                            &ChatCompletionChunk::content(&id, &model, &chunk.delta).to_sse(),
                        );
                    }
                    let terminal = match chunk.finish_reason {
                        Some(reason) => {
                            events.push_str(&ChatCompletionChunk::done(&id, &model, reason).to_sse());
                            events.push_str(SSE_DONE);
                            true
                        }
                        None => false,
                    };
                    if tx.send(Bytes::from(events)).await.is_err() {
                        metrics.record_client_disconnect();
                        info!(request_id = %request_id, "Client gone mid-stream; aborting generation");
                        proxy.abort(&request_id).await;
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(Bytes::from(SSE_DONE)).await;
                    return;
                }
                Err(e) => {
                    warn!(request_id = %request_id, "Generation stream failed: {}", e);
                    let _ = tx.send(Bytes::from(SSE_DONE)).await;
                    return;
                }
            }
        }
    });

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}

// ---------------------------------------------------------------------------
// Introspection endpoints
// ---------------------------------------------------------------------------

/// `GET /v1/models` — the one model this replica serves
fn models_response(state: &ServingState) -> Response<ResponseBody> {
    json_response(
        StatusCode::OK,
        &ModelList::single(&state.config.engine.model_id),
    )
}

/// `GET /v1/replicas/metrics` — this replica's load report
fn replica_metrics_response(state: &ServingState) -> Response<ResponseBody> {
    let report = serde_json::json!([{
        "replica_id": state.config.server.replica_id,
        "ongoing_request_count": state.proxy.ongoing_request_count(),
    }]);
    json_response(StatusCode::OK, &report)
}

/// `GET /health` — replica state and counters
fn health_response(state: &ServingState) -> Response<ResponseBody> {
    let health = HealthStatus {
        state: state.replica_state.read().unwrap().clone(),
        model_id: state.config.engine.model_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ongoing_requests: state.proxy.ongoing_request_count(),
        admitted_requests: state.metrics.admitted_requests(),
    };
    json_response(StatusCode::OK, &health)
}

/// `GET /metrics` — Prometheus text exposition
fn metrics_response(state: &ServingState) -> Response<ResponseBody> {
    let mut response = Response::new(full(state.metrics.render_prometheus()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

// ---------------------------------------------------------------------------
// Response plumbing
// ---------------------------------------------------------------------------

/// Collect a request body; read errors yield an empty body
async fn collect_body(req: Request<Incoming>) -> Bytes {
    match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    }
}

fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).boxed()
}

/// Bounded channel feeding a streaming response body
fn channel_body() -> (mpsc::Sender<Bytes>, ResponseBody) {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    let frames = ReceiverStream::new(rx).map(|bytes| Ok::<_, Infallible>(Frame::data(bytes)));
    (tx, BodyExt::boxed(StreamBody::new(frames)))
}

/// Serialize a JSON response with the given status
fn json_response(status: StatusCode, body: &impl Serialize) -> Response<ResponseBody> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(full(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// 499, the conventional status for a client that closed the connection
fn client_gone_response() -> Response<ResponseBody> {
    let status = StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &ErrorBody::new("Client closed request"))
}
