//! ReqwestTransport - HTTP API への送信（本番用）
//!
//! 応答を受け取れた場合は status に関わらず `Ok`。送信前／応答本文の読み取り
//! 途中で失敗した場合だけ `TransportError` にする。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};

use crate::domain::{ApiRequest, ApiResponse, HttpMethod};
use crate::ports::{Transport, TransportError};

pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// 新しい ReqwestTransport を作成（`timeout` は reqwest 側の上限）
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("build http client: {e}")))?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_method(request.method), self.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            "api response"
        );
        Ok(ApiResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn url_joins_base_and_path() {
        let t = ReqwestTransport::new("http://api.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.base_url(), "http://api.local");
        assert_eq!(t.url("/api/me?x=1"), "http://api.local/api/me?x=1");
        assert_eq!(t.url("api/me"), "http://api.local/api/me");
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let t = ReqwestTransport::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2))
            .unwrap();
        let err = t.send(&ApiRequest::get("/api/me")).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn error_status_is_a_response_and_body_is_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.ends_with(b"{\"site\":4}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 422 Unprocessable Entity\r\n\
                      Content-Type: text/plain\r\n\
                      Content-Length: 9\r\n\
                      Connection: close\r\n\r\n\
                      bad shift",
                )
                .await
                .unwrap();
            String::from_utf8_lossy(&seen).to_string()
        });

        let t = ReqwestTransport::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        let req = ApiRequest::new(HttpMethod::Post, "/api/clock/in")
            .with_body("application/json", b"{\"site\":4}".to_vec())
            .with_header("Idempotency-Key", "abc:clock_in:1");
        let resp = t.send(&req).await.unwrap();

        assert_eq!(resp.status, 422);
        assert_eq!(resp.content_type.as_deref(), Some("text/plain"));
        assert_eq!(resp.body, b"bad shift".to_vec());

        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("post /api/clock/in http/1.1"));
        assert!(raw.contains("idempotency-key: abc:clock_in:1"));
        assert!(raw.contains("content-type: application/json"));
    }
}
