//! Scripted transport for tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tokio::sync::watch;

use super::{HttpResponse, Method, Transport, TransportError};

/// A request the mock saw.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

type Reply = Result<HttpResponse, TransportError>;

struct Scripted {
  reply: Reply,
  gate: Option<watch::Receiver<bool>>,
}

#[derive(Default)]
struct Route {
  queue: VecDeque<Scripted>,
  last: Option<Reply>,
}

/// Holds back one scripted reply until opened.
pub(crate) struct Gate(watch::Sender<bool>);

impl Gate {
  pub fn open(&self) {
    self.0.send_replace(true);
  }
}

/// Transport answering from a per-(method, path) script.
///
/// Each route holds a queue of replies handed out in request order; once the
/// queue is drained the last reply served repeats. Unscripted routes answer
/// 404. While held, requests are recorded immediately but do not resolve
/// until [`MockTransport::release`].
pub(crate) struct MockTransport {
  routes: Mutex<HashMap<(Method, String), Route>>,
  calls: Mutex<Vec<RecordedCall>>,
  open: watch::Sender<bool>,
}

impl MockTransport {
  pub fn new() -> Self {
    let (open, _) = watch::channel(true);
    Self {
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      open,
    }
  }

  pub fn ok_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse {
      status,
      status_text: status_text(status).to_string(),
      headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
      body: serde_json::to_vec(body).unwrap(),
    }
  }

  /// Script a 200 JSON reply.
  pub fn reply(&self, method: Method, path: &str, body: Value) -> &Self {
    self.push(method, path, Ok(Self::ok_response(200, &body)))
  }

  /// Script a 200 JSON reply that is not delivered until the returned gate
  /// opens. Requests issued later on the same route are not held up by it.
  pub fn reply_gated(&self, method: Method, path: &str, body: Value) -> Gate {
    let (gate, held) = watch::channel(false);
    self.enqueue(
      method,
      path,
      Scripted {
        reply: Ok(Self::ok_response(200, &body)),
        gate: Some(held),
      },
    );
    Gate(gate)
  }

  /// Script an error status with a JSON body.
  pub fn fail(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
    self.push(
      method,
      path,
      Err(TransportError::Status(Self::ok_response(status, &body))),
    )
  }

  /// Script an error status with a raw (non-JSON) body.
  pub fn fail_raw(&self, method: Method, path: &str, status: u16, body: &str) -> &Self {
    self.push(
      method,
      path,
      Err(TransportError::Status(HttpResponse {
        status,
        status_text: status_text(status).to_string(),
        headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
        body: body.as_bytes().to_vec(),
      })),
    )
  }

  pub fn fail_network(&self, method: Method, path: &str, message: &str) -> &Self {
    self.push(method, path, Err(TransportError::Network(message.to_string())))
  }

  /// Keep requests pending until `release` is called.
  pub fn hold(&self) {
    self.open.send_replace(false);
  }

  pub fn release(&self) {
    self.open.send_replace(true);
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().len()
  }

  pub fn count(&self, method: Method, path: &str) -> usize {
    self
      .calls
      .lock()
      .iter()
      .filter(|c| c.method == method && c.path == path)
      .count()
  }

  fn push(&self, method: Method, path: &str, reply: Reply) -> &Self {
    self.enqueue(method, path, Scripted { reply, gate: None });
    self
  }

  fn enqueue(&self, method: Method, path: &str, scripted: Scripted) {
    self
      .routes
      .lock()
      .entry((method, path.to_string()))
      .or_default()
      .queue
      .push_back(scripted);
  }

  fn next_reply(&self, method: Method, path: &str) -> (Reply, Option<watch::Receiver<bool>>) {
    let mut routes = self.routes.lock();
    let Some(route) = routes.get_mut(&(method, path.to_string())) else {
      let not_found = Self::ok_response(404, &json!({ "errors": [{ "reason": "Not found" }] }));
      return (Err(TransportError::Status(not_found)), None);
    };
    match route.queue.pop_front() {
      Some(Scripted { reply, gate }) => {
        route.last = Some(reply.clone());
        (reply, gate)
      }
      None => (
        route
          .last
          .clone()
          .expect("scripted route has at least one reply"),
        None,
      ),
    }
  }
}

impl Transport for MockTransport {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
    self.calls.lock().push(RecordedCall {
      method,
      path: path.to_string(),
      body: body.cloned(),
    });
    let (reply, gate) = self.next_reply(method, path);
    let mut open = self.open.subscribe();
    async move {
      // Always suspend once so concurrent callers interleave.
      tokio::task::yield_now().await;
      let _ = open.wait_for(|ready| *ready).await;
      if let Some(mut gate) = gate {
        let _ = gate.wait_for(|ready| *ready).await;
      }
      reply
    }
    .boxed()
  }
}

fn status_text(status: u16) -> &'static str {
  match status {
    200 => "OK",
    400 => "Bad Request",
    401 => "Unauthorized",
    404 => "Not Found",
    500 => "Internal Server Error",
    _ => "",
  }
}
