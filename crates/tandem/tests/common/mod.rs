//! Scripted collaborators for orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem::config::TimeoutConfig;
use tandem::{
    DocumentPipeline, Orchestrator, Passage, RetrievalError, RetrievalResult, SqlPipeline,
    SqlPipelineError, SqlProposal, SqlRows, TandemConfig,
};

/// Timeouts short enough that a hanging fake fails the call quickly.
pub fn test_config() -> TandemConfig {
    let mut config = TandemConfig::default();
    config.timeouts = TimeoutConfig {
        retrieval_ms: 200,
        generation_ms: 200,
        execution_ms: 200,
    };
    config
}

pub struct FakeDocuments {
    ready: AtomicBool,
    reply: Mutex<Result<RetrievalResult, String>>,
    delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize,
}

impl FakeDocuments {
    pub fn answering(answer: &str) -> Self {
        let result = RetrievalResult {
            passages: vec![
                Passage {
                    text: "Returns are accepted within 30 days.".into(),
                    source_ref: "handbook/returns.md#policy".into(),
                    score: 0.71,
                },
                Passage {
                    text: "Pricing follows a tiered volume model.".into(),
                    source_ref: "handbook/pricing.md#strategy".into(),
                    score: 0.88,
                },
            ],
            answer: answer.to_string(),
        };
        Self {
            ready: AtomicBool::new(true),
            reply: Mutex::new(Ok(result)),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        let fake = Self::answering("");
        *fake.reply.lock().unwrap() = Err(message.to_string());
        fake
    }

    pub fn slow(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentPipeline for FakeDocuments {
    fn name(&self) -> &str {
        "fake-documents"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn retrieve(&self, _query: &str, top_k: usize) -> Result<RetrievalResult, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Ok(mut result) => {
                result.passages.truncate(top_k);
                Ok(result)
            }
            Err(message) => Err(RetrievalError::Unavailable(message)),
        }
    }
}

pub struct FakeSql {
    ready: AtomicBool,
    statement: Mutex<String>,
    generate_error: Mutex<Option<SqlPipelineError>>,
    execute_reply: Mutex<Result<SqlRows, SqlPipelineError>>,
    generate_delay: Mutex<Option<Duration>>,
    execute_delay: Mutex<Option<Duration>>,
    executed: Mutex<Vec<String>>,
    on_execute: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pub generate_calls: AtomicUsize,
}

impl FakeSql {
    pub fn returning(statement: &str, rows: SqlRows) -> Self {
        Self {
            ready: AtomicBool::new(true),
            statement: Mutex::new(statement.to_string()),
            generate_error: Mutex::new(None),
            execute_reply: Mutex::new(Ok(rows)),
            generate_delay: Mutex::new(None),
            execute_delay: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
            on_execute: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// `SELECT COUNT(*) FROM customers` returning 1,284.
    pub fn counting_customers() -> Self {
        Self::returning(
            "SELECT COUNT(*) AS customer_count FROM customers",
            SqlRows::new(vec!["customer_count".into()], vec![vec![json!(1284)]]),
        )
    }

    pub fn unavailable(message: &str) -> Self {
        let fake = Self::counting_customers();
        *fake.generate_error.lock().unwrap() = Some(SqlPipelineError::Unavailable(message.to_string()));
        fake
    }

    pub fn failing_execution(self, message: &str) -> Self {
        *self.execute_reply.lock().unwrap() = Err(SqlPipelineError::Execution(message.to_string()));
        self
    }

    pub fn slow_generation(self, delay: Duration) -> Self {
        *self.generate_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn slow_execution(self, delay: Duration) -> Self {
        *self.execute_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Run `hook` at the start of every execution.
    pub fn on_execute(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        *self.on_execute.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlPipeline for FakeSql {
    fn name(&self) -> &str {
        "fake-sql"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn generate_sql(&self, query: &str) -> Result<SqlProposal, SqlPipelineError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.generate_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.generate_error.lock().unwrap().clone() {
            return Err(err);
        }
        let statement = self.statement.lock().unwrap().clone();
        Ok(SqlProposal::new(query, statement, "Generated for the test question"))
    }

    async fn execute_sql(&self, sql: &str) -> Result<SqlRows, SqlPipelineError> {
        self.executed.lock().unwrap().push(sql.to_string());
        if let Some(hook) = self.on_execute.lock().unwrap().as_ref() {
            hook();
        }
        let delay = *self.execute_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.execute_reply.lock().unwrap().clone()
    }
}

pub fn orchestrator(
    config: &TandemConfig,
    documents: Arc<FakeDocuments>,
    sql: Arc<FakeSql>,
) -> Orchestrator {
    Orchestrator::new(config, documents, sql).expect("orchestrator should build")
}
