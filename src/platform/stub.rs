//! Loopback HTTP/1.1 server that answers the REST client from a routing closure.
//!
//! One request per connection (`connection: close`); every request is logged.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub target: String,
    pub body: String,
}

pub(crate) struct Reply {
    status: u16,
    body: String,
    location: Option<String>,
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            location: None,
        }
    }

    pub(crate) fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// `202 Accepted` pointing at a job.
    pub(crate) fn accepted(location: String) -> Self {
        Self {
            status: 202,
            body: "{}".into(),
            location: Some(location),
        }
    }

    pub(crate) fn error(status: u16, title: &str, detail: &str) -> Self {
        Self::json(
            status,
            json!({ "errors": [ { "code": 10000, "title": title, "detail": detail } ] }),
        )
    }
}

/// A list page as the v3 API returns it.
pub(crate) fn page(resources: Value, next: Option<String>) -> Value {
    json!({
        "pagination": { "next": next.map(|href| json!({ "href": href })) },
        "resources": resources,
    })
}

pub(crate) struct StubServer {
    base: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl StubServer {
    /// Serve `route(request, base_url)` on an ephemeral port.
    pub(crate) async fn start<F>(route: F) -> Self
    where
        F: Fn(&Request, &str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let route = Arc::new(route);
        let log = requests.clone();
        let root = base.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let route = route.clone();
                let log = log.clone();
                let root = root.clone();
                tokio::spawn(async move {
                    serve(stream, |req| (*route)(req, &root), &log).await;
                });
            }
        });

        Self { base, requests }
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Body of the first `method path` request.
    pub(crate) fn body_of(&self, method: &str, path: &str) -> Option<String> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path == path)
            .map(|r| r.body)
    }
}

async fn serve<R>(mut stream: TcpStream, route: R, log: &Mutex<Vec<Request>>)
where
    R: Fn(&Request) -> Reply,
{
    let Some(req) = read_request(&mut stream).await else {
        return;
    };
    let reply = route(&req);
    log.lock().unwrap().push(req);

    let mut head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
        reply.status,
        reason(reply.status),
        reply.body.len()
    );
    if let Some(location) = &reply.location {
        head.push_str(&format!("location: {location}\r\n"));
    }
    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(reply.body.as_bytes()).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split(' ');
    let method = start.next()?.to_string();
    let target = start.next()?.to_string();

    let mut content_length = 0usize;
    let mut chunked = false;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse().ok()?,
            "transfer-encoding" => chunked = value.to_ascii_lowercase().contains("chunked"),
            _ => {}
        }
    }

    let mut body = buf[header_end..].to_vec();
    loop {
        let complete = if chunked {
            body.ends_with(b"0\r\n\r\n")
        } else {
            body.len() >= content_length
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let path = target.split('?').next().unwrap_or_default().to_string();
    Some(Request {
        method,
        path,
        target,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        _ => "Unknown",
    }
}
