use crate::service::{QueryError, QueryService, QueryStream};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use codechat_llm::StreamEvent;
use codechat_protocol::{
    QueryRequest, ValidationError, ERR_AUTH, ERR_PROVIDER, ERR_TIMEOUT, ERR_VALIDATION,
    REQUEST_ID_HEADER,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_REQUEST_ID_LEN: usize = 128;

/// `GET /health` and `POST /query`
pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .with_state(service)
}

async fn health(State(service): State<Arc<QueryService>>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    with_request_id(Json(service.health()).into_response(), &request_id)
}

async fn query(
    State(service): State<Arc<QueryService>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    let response = handle_query(&service, &params, &body, &request_id).await;
    with_request_id(response, &request_id)
}

async fn handle_query(
    service: &QueryService,
    params: &HashMap<String, String>,
    body: &[u8],
    request_id: &str,
) -> Response {
    let request: QueryRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            log::info!("[{request_id}] malformed query body: {err}");
            let err = QueryError::Validation(ValidationError::Malformed(err.to_string()));
            return error_response(&err);
        }
    };
    let streaming = request.stream || stream_requested(params);

    let prepared = match service.prepare(&request, request_id).await {
        Ok(prepared) => prepared,
        Err(err) => return error_response(&err),
    };

    if streaming {
        match service.stream(prepared) {
            Ok(stream) => sse_response(stream),
            Err(err) => error_response(&err),
        }
    } else {
        match service.answer(prepared).await {
            Ok(answer) => Json(answer).into_response(),
            Err(err) => error_response(&err),
        }
    }
}

/// `?stream=true` on the query string also selects streaming
fn stream_requested(params: &HashMap<String, String>) -> bool {
    params.get("stream").is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        )
    })
}

fn sse_response(stream: QueryStream) -> Response {
    let events = stream.map(|event| Ok::<_, Infallible>(sse_event(event)));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_event(event: StreamEvent) -> Event {
    match event {
        // multi-line deltas become multiple `data:` lines; CR is not allowed
        StreamEvent::Delta(text) => Event::default().data(text.replace('\r', "")),
        StreamEvent::Completed => Event::default().event("done").data("[DONE]"),
        StreamEvent::Failed(err) => {
            let envelope = QueryError::from(err).envelope();
            let data = serde_json::to_string(&envelope).unwrap_or_default();
            Event::default().event("error").data(data)
        }
    }
}

pub fn status_for(code: &str) -> StatusCode {
    match code {
        ERR_VALIDATION => StatusCode::UNPROCESSABLE_ENTITY,
        ERR_AUTH => StatusCode::UNAUTHORIZED,
        ERR_PROVIDER => StatusCode::SERVICE_UNAVAILABLE,
        ERR_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &QueryError) -> Response {
    let status = status_for(err.code());
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("Query failed: {err}");
    }
    (status, Json(err.envelope())).into_response()
}

/// Caller-supplied id when usable, otherwise a fresh one
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(generate_request_id, str::to_string)
}

fn generate_request_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis:x}-{seq:04x}")
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use codechat_protocol::ERR_UNEXPECTED;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(status_for(ERR_VALIDATION), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ERR_AUTH), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ERR_PROVIDER), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ERR_TIMEOUT), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ERR_UNEXPECTED), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn request_id_is_echoed_or_generated() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("  abc-123 "));
        assert_eq!(request_id(&headers), "abc-123");

        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        let generated = request_id(&headers);
        assert_ne!(generated, long);
        assert!(generated.contains('-'));

        assert_ne!(request_id(&HeaderMap::new()), request_id(&HeaderMap::new()));
    }

    #[test]
    fn stream_flag_from_query_string() {
        let params = |value: &str| HashMap::from([("stream".to_string(), value.to_string())]);
        assert!(stream_requested(&params("true")));
        assert!(stream_requested(&params("1")));
        assert!(!stream_requested(&params("false")));
        assert!(!stream_requested(&HashMap::new()));
    }
}
