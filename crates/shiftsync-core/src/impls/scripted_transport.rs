//! ScriptedTransport - テスト用の Transport
//!
//! 事前に積んだ応答を順番に返し、受け取ったリクエストをすべて記録する。
//! スクリプトが尽きたら `fallback` を返し続ける。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::{ApiRequest, ApiResponse};
use crate::ports::{Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Step {
    Respond(ApiResponse),
    Fail(TransportError),
    /// Never completes (the caller's timeout or shutdown has to end it).
    Hang,
}

struct ScriptState {
    steps: VecDeque<Step>,
    fallback: Step,
    sent: Vec<ApiRequest>,
}

pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    pub fn new(fallback: Step) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                steps: VecDeque::new(),
                fallback,
                sent: Vec::new(),
            }),
        }
    }

    /// go_online() されるまで全リクエストが接続失敗になる
    pub fn offline() -> Self {
        Self::new(Step::Fail(TransportError::Connect("network unreachable".into())))
    }

    /// 応答を積まなければ全リクエストに空の 200 を返す
    pub fn online() -> Self {
        Self::new(Step::Respond(ApiResponse::new(200, Vec::new())))
    }

    pub fn push(&self, step: Step) -> &Self {
        self.lock().steps.push_back(step);
        self
    }

    pub fn respond(&self, status: u16, body: &str) -> &Self {
        self.push(Step::Respond(ApiResponse::new(status, body.as_bytes().to_vec())))
    }

    pub fn fail_connect(&self) -> &Self {
        self.push(Step::Fail(TransportError::Connect("connection refused".into())))
    }

    pub fn set_fallback(&self, step: Step) {
        self.lock().fallback = step;
    }

    pub fn go_online(&self) {
        self.set_fallback(Step::Respond(ApiResponse::new(200, Vec::new())));
    }

    pub fn go_offline(&self) {
        self.set_fallback(Step::Fail(TransportError::Connect("network unreachable".into())));
    }

    /// これまでに受け取ったリクエスト（受信順）
    pub fn sent(&self) -> Vec<ApiRequest> {
        self.lock().sent.clone()
    }

    pub fn sent_paths(&self) -> Vec<String> {
        self.lock().sent.iter().map(|r| r.path.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let step = {
            let mut state = self.lock();
            state.sent.push(request.clone());
            match state.steps.pop_front() {
                Some(step) => step,
                None => state.fallback.clone(),
            }
        };
        match step {
            Step::Respond(response) => Ok(response),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_fallback_and_recording() {
        let t = ScriptedTransport::online();
        t.respond(422, "nope").fail_connect();

        let a = t.send(&ApiRequest::get("/a")).await.unwrap();
        let b = t.send(&ApiRequest::get("/b")).await.unwrap_err();
        let c = t.send(&ApiRequest::get("/c")).await.unwrap();

        assert_eq!(a.status, 422);
        assert!(matches!(b, TransportError::Connect(_)));
        assert_eq!(c.status, 200);
        assert_eq!(t.sent_paths(), vec!["/a", "/b", "/c"]);
    }
}
