use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CompletionClient, LlmError, QueryRequest};

type Handler = Box<dyn Fn(&QueryRequest) -> Result<String, LlmError> + Send + Sync>;

/// In-memory client answering from a closure; records every request.
pub struct MockClient {
    handler: Handler,
    requests: Mutex<Vec<QueryRequest>>,
}

impl MockClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&QueryRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer with `replies` in order, then fail with `MalformedResponse`.
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(replies.into_iter().map(Into::into).collect());
        Self::new(move |_| {
            queue
                .lock()
                .map_err(|_| LlmError::MalformedResponse)?
                .pop_front()
                .ok_or(LlmError::MalformedResponse)
        })
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn answer(&self, request: &QueryRequest) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.handler)(request)
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn query(&self, request: &QueryRequest) -> Result<String, LlmError> {
        self.answer(request)
    }

    fn query_blocking(&self, request: &QueryRequest) -> Result<String, LlmError> {
        self.answer(request)
    }
}
