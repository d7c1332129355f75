//! Scripted in-memory transport for unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use serde_json::Value;

use super::{RequestContext, Transport, TransportResponse, sealed};
use crate::error::{ClientError, Result};

/// Scripted reply for one request.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Respond with a status and JSON body.
    Json(u16, Value),
    /// Fail without a response.
    NetworkError,
    /// Wait, then produce the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub(crate) fn ok(body: Value) -> Self {
        Self::Json(200, body)
    }

    pub(crate) fn status(status: u16) -> Self {
        Self::Json(status, serde_json::json!({ "statusCode": status, "message": "error" }))
    }

    pub(crate) fn error(status: u16, message: &str) -> Self {
        Self::Json(status, serde_json::json!({ "statusCode": status, "message": message }))
    }

    pub(crate) fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// A request observed by the mock.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: &'static str,
    pub route: String,
    pub query: Option<String>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct Route {
    queue: VecDeque<MockReply>,
    fallback: Option<MockReply>,
}

/// Transport that answers from per-route scripts.
///
/// Each route consumes queued replies in order, then repeats its fallback,
/// then answers 404.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl sealed::private::Sealed for MockTransport {}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot reply for `route`.
    pub(crate) fn push(&self, route: &str, reply: MockReply) -> &Self {
        self.routes.lock().unwrap().entry(route.to_owned()).or_default().queue.push_back(reply);
        self
    }

    /// Sets the reply used once the queue for `route` is drained.
    pub(crate) fn always(&self, route: &str, reply: MockReply) -> &Self {
        self.routes.lock().unwrap().entry(route.to_owned()).or_default().fallback = Some(reply);
        self
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, route: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.route == route).collect()
    }

    pub(crate) fn count(&self, route: &str) -> usize {
        self.calls_to(route).len()
    }

    fn next_reply(&self, route: &str) -> MockReply {
        let mut routes = self.routes.lock().unwrap();
        routes
            .get_mut(route)
            .and_then(|r| r.queue.pop_front().or_else(|| r.fallback.clone()))
            .unwrap_or_else(|| MockReply::status(404))
    }
}

impl Transport for MockTransport {
    async fn send<'a>(&'a self, ctx: RequestContext<'a>) -> Result<TransportResponse> {
        let (route, query) = match ctx.path.split_once('?') {
            Some((route, query)) => (route.to_owned(), Some(query.to_owned())),
            None => (ctx.path.to_owned(), None),
        };

        self.calls.lock().unwrap().push(RecordedCall {
            method: ctx.method.as_str(),
            route: route.clone(),
            query,
            bearer: ctx.bearer.map(str::to_owned),
            body: ctx.body.and_then(|b| serde_json::from_slice(b).ok()),
        });

        let mut reply = self.next_reply(&route);
        loop {
            match reply {
                MockReply::Json(status, body) => {
                    let body = serde_json::to_vec(&body).unwrap();
                    return Ok(TransportResponse { status, body, headers: vec![] });
                }
                MockReply::NetworkError => {
                    return Err(ClientError::TransportError("connection refused".to_owned()));
                }
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    fn protocol_name(&self) -> &'static str {
        "mock"
    }
}
