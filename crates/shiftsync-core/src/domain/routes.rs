//! Route allow-lists: which requests are cached, which are queued.
//!
//! Pattern syntax (segment based, matched against the path without query):
//! - literal segments match themselves
//! - `*` matches exactly one segment (`/api/tasks/*`)
//! - a trailing `**` matches any remainder, including nothing

use std::fmt;

use serde::{Deserialize, Serialize};

use super::operation::OperationKind;
use super::request::{ApiRequest, HttpMethod};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route pattern must start with '/': {0}")]
    NotAbsolute(String),

    #[error("'**' is only allowed as the last segment: {0}")]
    MisplacedRest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Rest,
}

/// RoutePattern はコンパイル済みのパスパターン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        if !raw.starts_with('/') {
            return Err(RouteError::NotAbsolute(raw.to_string()));
        }
        let parts: Vec<&str> = split_segments(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" if i + 1 == parts.len() => Segment::Rest,
                "**" => return Err(RouteError::MisplacedRest(raw.to_string())),
                "*" => Segment::Any,
                lit => Segment::Literal(lit.to_string()),
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn matches(&self, route: &str) -> bool {
        let mut parts = split_segments(route);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Config shape of one write allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRouteSpec {
    pub method: HttpMethod,
    pub path: String,
    pub kind: OperationKind,
}

#[derive(Debug, Clone)]
struct WriteRoute {
    method: HttpMethod,
    pattern: RoutePattern,
    kind: OperationKind,
}

/// RequestClass は interceptor によるリクエストの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    PassThrough,
    CacheableRead,
    QueueableWrite(OperationKind),
}

/// RouteTable は read / write の許可リスト（最初に一致した write ルートが勝つ）
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    reads: Vec<RoutePattern>,
    writes: Vec<WriteRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_read(mut self, pattern: &str) -> Result<Self, RouteError> {
        self.reads.push(RoutePattern::parse(pattern)?);
        Ok(self)
    }

    pub fn allow_write(
        mut self,
        method: HttpMethod,
        pattern: &str,
        kind: OperationKind,
    ) -> Result<Self, RouteError> {
        self.writes.push(WriteRoute {
            method,
            pattern: RoutePattern::parse(pattern)?,
            kind,
        });
        Ok(self)
    }

    pub fn from_specs(reads: &[String], writes: &[WriteRouteSpec]) -> Result<Self, RouteError> {
        let mut table = Self::new();
        for read in reads {
            table = table.allow_read(read)?;
        }
        for write in writes {
            table = table.allow_write(write.method, &write.path, write.kind)?;
        }
        Ok(table)
    }

    pub fn classify(&self, request: &ApiRequest) -> RequestClass {
        let route = request.route();
        if request.method == HttpMethod::Get {
            if self.reads.iter().any(|p| p.matches(route)) {
                return RequestClass::CacheableRead;
            }
            return RequestClass::PassThrough;
        }
        if request.method.is_mutating()
            && let Some(write) = self
                .writes
                .iter()
                .find(|w| w.method == request.method && w.pattern.matches(route))
        {
            return RequestClass::QueueableWrite(write.kind);
        }
        RequestClass::PassThrough
    }

    /// Write routes that repeat an earlier (method, pattern) pair.
    pub fn duplicate_writes(&self) -> Vec<String> {
        let mut seen: Vec<(HttpMethod, &str)> = Vec::new();
        let mut dups = Vec::new();
        for w in &self.writes {
            let key = (w.method, w.pattern.as_str());
            if seen.contains(&key) {
                dups.push(format!("{} {}", w.method, w.pattern));
            } else {
                seen.push(key);
            }
        }
        dups
    }

    /// Write routes declared with a non-mutating verb (they would never match).
    pub fn non_mutating_writes(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter(|w| !w.method.is_mutating())
            .map(|w| format!("{} {}", w.method, w.pattern))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use RequestClass::QueueableWrite;

    #[rstest]
    #[case("/api/clock/in", "/api/clock/in", true)]
    #[case("/api/clock/in", "/api/clock/out", false)]
    #[case("/api/tasks/*", "/api/tasks/17", true)]
    #[case("/api/tasks/*", "/api/tasks", false)]
    #[case("/api/tasks/*", "/api/tasks/17/comments", false)]
    #[case("/api/entries/**", "/api/entries", true)]
    #[case("/api/entries/**", "/api/entries/2026/03", true)]
    #[case("/api/entries", "/api/entries/", true)]
    fn pattern_matching(#[case] pattern: &str, #[case] route: &str, #[case] expected: bool) {
        assert_eq!(RoutePattern::parse(pattern).unwrap().matches(route), expected);
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(matches!(
            RoutePattern::parse("api/x"),
            Err(RouteError::NotAbsolute(_))
        ));
        assert!(matches!(
            RoutePattern::parse("/api/**/x"),
            Err(RouteError::MisplacedRest(_))
        ));
    }

    fn table() -> RouteTable {
        RouteTable::new()
            .allow_read("/api/me")
            .unwrap()
            .allow_read("/api/entries/**")
            .unwrap()
            .allow_write(HttpMethod::Post, "/api/clock/in", OperationKind::ClockIn)
            .unwrap()
            .allow_write(HttpMethod::Patch, "/api/tasks/*", OperationKind::TaskUpdate)
            .unwrap()
    }

    #[rstest]
    #[case(HttpMethod::Get, "/api/me", RequestClass::CacheableRead)]
    #[case(HttpMethod::Get, "/api/entries?week=3", RequestClass::CacheableRead)]
    #[case(HttpMethod::Get, "/api/reports", RequestClass::PassThrough)]
    #[case(HttpMethod::Post, "/api/clock/in", QueueableWrite(OperationKind::ClockIn))]
    #[case(HttpMethod::Patch, "/api/tasks/8", QueueableWrite(OperationKind::TaskUpdate))]
    #[case(HttpMethod::Put, "/api/tasks/8", RequestClass::PassThrough)]
    #[case(HttpMethod::Post, "/api/reports/export", RequestClass::PassThrough)]
    #[case(HttpMethod::Head, "/api/me", RequestClass::PassThrough)]
    fn classification(
        #[case] method: HttpMethod,
        #[case] path: &str,
        #[case] expected: RequestClass,
    ) {
        assert_eq!(table().classify(&ApiRequest::new(method, path)), expected);
    }

    #[test]
    fn duplicate_and_non_mutating_writes_are_reported() {
        let table = table()
            .allow_write(HttpMethod::Post, "/api/clock/in", OperationKind::ClockOut)
            .unwrap()
            .allow_write(HttpMethod::Get, "/api/me", OperationKind::TaskUpdate)
            .unwrap();
        assert_eq!(table.duplicate_writes(), vec!["POST /api/clock/in".to_string()]);
        assert_eq!(table.non_mutating_writes(), vec!["GET /api/me".to_string()]);
    }
}
