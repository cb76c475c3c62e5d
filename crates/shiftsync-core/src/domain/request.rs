//! Request / response shapes exchanged with the transport.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// State-changing verbs (the only ones that may be queued).
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported http method '{0}'")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// ApiRequest はアプリケーションコードが発行する API リクエスト
///
/// `path` is relative to the API origin and may carry a query string
/// (`/api/time-entries?week=12`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body("application/json", value.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        split_path(&self.path).0
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// ApiResponse はサーバから実際に届いた応答（status は問わない）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short human-readable reason for error reporting.
    pub fn reason(&self) -> String {
        let snippet: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
        if snippet.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("HTTP {}: {}", self.status, snippet)
        }
    }
}

/// RequestSignature は read リクエストの正規化されたキャッシュキー
///
/// ルート + ソート済みで空でない query の組。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn of(request: &ApiRequest) -> Self {
        Self::from_path(&request.path)
    }

    pub fn from_path(path: &str) -> Self {
        let (route, query) = split_path(path);
        let route = route.trim_end_matches('/');
        let route = if route.is_empty() { "/" } else { route };

        let mut pairs: Vec<(&str, &str)> = query
            .unwrap_or("")
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        pairs.sort_unstable();

        if pairs.is_empty() {
            return Self(route.to_string());
        }
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        Self(format!("{route}?{query}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (path, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::sorted("/api/shifts?week=3&team=a", "/api/shifts?team=a&week=3")]
    #[case::empty_params_dropped("/api/shifts?team=&week=3", "/api/shifts?week=3")]
    #[case::trailing_slash("/api/shifts/", "/api/shifts")]
    #[case::no_query("/api/me", "/api/me")]
    #[case::dangling_question_mark("/api/me?", "/api/me")]
    fn signature_normalizes_query(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(RequestSignature::from_path(path).as_str(), expected);
    }

    #[test]
    fn equivalent_reads_share_a_key() {
        let a = RequestSignature::from_path("/api/entries?from=1&to=2");
        let b = RequestSignature::from_path("/api/entries?to=2&from=1");
        assert_eq!(a, b);
    }

    #[test]
    fn mutating_methods() {
        assert!(HttpMethod::Post.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
        assert!(!HttpMethod::Get.is_mutating());
        assert!(!HttpMethod::Head.is_mutating());
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn route_strips_query() {
        let req = ApiRequest::get("/api/entries?week=2");
        assert_eq!(req.route(), "/api/entries");
    }

    #[test]
    fn response_reason_includes_status_and_body() {
        let resp = ApiResponse::new(422, b"invalid shift".to_vec());
        assert_eq!(resp.reason(), "HTTP 422: invalid shift");
        assert_eq!(ApiResponse::new(500, Vec::new()).reason(), "HTTP 500");
    }
}
