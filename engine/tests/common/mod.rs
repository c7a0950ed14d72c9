//! Shared fixtures for the integration tests
//!
//! `ScriptedModel` stands in for the LLM router. Replies are routed by the
//! system prompt of each request, so one model can serve every stage.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use launchpad_engine::config::Config;
use launchpad_engine::llm::{Completion, LLMError, ModelClient, ModelRequest, Result};

pub const ANALYZER: &str = "requirements analyst";
pub const BACKEND: &str = "backend engineer";
pub const FRONTEND: &str = "frontend engineer";

/// One scripted answer
pub enum Reply {
    Text(String),
    Error(LLMError),
    /// Never answers within any reasonable stage timeout
    Hang,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

#[derive(Default)]
struct Script {
    queued: HashMap<&'static str, VecDeque<Reply>>,
    fallback: HashMap<&'static str, String>,
    calls: HashMap<&'static str, usize>,
}

/// Model client answering from per-stage queues
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<Script>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model that answers every stage with a usable reply
    pub fn happy() -> Self {
        Self::new()
            .always(ANALYZER, analyzer_reply())
            .always(BACKEND, backend_reply())
            .always(FRONTEND, ui_reply())
    }

    /// Reply used whenever the stage queue is empty
    pub fn always(self, stage: &'static str, content: impl Into<String>) -> Self {
        self.lock().fallback.insert(stage, content.into());
        self
    }

    /// Reply used once, before any fallback
    pub fn then(self, stage: &'static str, reply: Reply) -> Self {
        self.lock().queued.entry(stage).or_default().push_back(reply);
        self
    }

    pub fn calls(&self, stage: &'static str) -> usize {
        self.lock().calls.get(stage).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn stage_of(request: &ModelRequest) -> &'static str {
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        [ANALYZER, BACKEND, FRONTEND]
            .into_iter()
            .find(|stage| system.contains(stage))
            .unwrap_or("unknown")
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<Completion> {
        let stage = Self::stage_of(request);
        let reply = {
            let mut script = self.lock();
            *script.calls.entry(stage).or_default() += 1;
            match script.queued.get_mut(stage).and_then(VecDeque::pop_front) {
                Some(reply) => reply,
                None => match script.fallback.get(stage) {
                    Some(text) => Reply::Text(text.clone()),
                    None => Reply::Error(LLMError::ProviderUnavailable(format!(
                        "no script for {}",
                        stage
                    ))),
                },
            }
        };

        match reply {
            Reply::Text(content) => Ok(Completion {
                content,
                provider: "scripted".to_string(),
            }),
            Reply::Error(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LLMError::Timeout)
            }
        }
    }
}

pub fn analyzer_reply() -> String {
    r#"<think>The user wants a todo list.</think>
```json
{
  "purpose": "Track personal todo items",
  "target_audience": ["individuals"],
  "features": ["add todo", "complete todo", "list todos"],
  "entities": ["Todo"],
  "endpoints": ["GET /todos", "POST /todos"]
}
```"#
        .to_string()
}

pub fn backend_source() -> &'static str {
    r#"from fastapi import FastAPI
from pydantic import BaseModel

app = FastAPI()
todos = []


class Todo(BaseModel):
    title: str
    done: bool = False


@app.get("/health")
def health():
    return {"status": "ok"}


@app.get("/todos")
def list_todos():
    return todos


@app.post("/todos")
def add_todo(todo: Todo):
    todos.append(todo)
    return todo"#
}

pub fn backend_reply() -> String {
    format!("Here is the backend:\n\n```python\n{}\n```\n", backend_source())
}

pub fn ui_source() -> &'static str {
    r#"function App() {
  const [todos, setTodos] = React.useState([]);

  React.useEffect(() => {
    fetch(`${window.API_BASE_URL}/todos`)
      .then((res) => res.json())
      .then(setTodos);
  }, []);

  return (
    <ul>
      {todos.map((todo) => (
        <li key={todo.title}>{todo.title}</li>
      ))}
    </ul>
  );
}"#
}

pub fn ui_reply() -> String {
    format!("```jsx\n{}\n```", ui_source())
}

/// Configuration rooted in `dir` with fast retries and deploys
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.core.data_dir = dir.join("data");
    config.core.projects_dir = dir.join("projects");
    config.store.root = dir.join("store");
    config.pipeline.retry_backoff_ms = 10;
    config.deploy.startup_grace_ms = 200;
    config.deploy.health_attempts = 3;
    config.deploy.health_delay_ms = 100;
    config.deploy.health_request_timeout_ms = 500;
    config.deploy.stop_timeout_ms = 1_000;
    config.deploy.install_command = Vec::new();
    config.validate_and_process().unwrap();
    config
}

pub fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Find `len` consecutive bindable ports, scanning upwards from `from`
pub fn free_range(from: u16, len: u16) -> (u16, u16) {
    let mut start = from;
    'outer: while start < 64000 {
        for port in start..start + len {
            if TcpListener::bind(("127.0.0.1", port)).is_err() {
                start = port + 1;
                continue 'outer;
            }
        }
        return (start, start + len - 1);
    }
    panic!("no free port range above {}", from);
}
