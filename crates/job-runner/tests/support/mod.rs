#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use job_runner::{ContainerRuntime, ExecutionDescriptor, RuntimeError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Start,
    Wait,
    Logs,
    Stop,
    Remove,
}

#[derive(Debug, Clone, Copy)]
pub enum Fail {
    Rejected,
    Protocol,
}

impl Fail {
    fn error(self, op: Op) -> RuntimeError {
        match self {
            Fail::Rejected => RuntimeError::Rejected {
                operation: format!("{op:?}").to_lowercase(),
                message: "injected failure".to_string(),
            },
            Fail::Protocol => RuntimeError::Protocol {
                operation: format!("{op:?}").to_lowercase(),
                message: "connection reset by peer".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    live: HashSet<String>,
    stopped: HashSet<String>,
    missing_images: HashSet<String>,
    failures: HashMap<Op, Fail>,
    logs: Vec<u8>,
    exit_code: i64,
    hold_wait: bool,
}

/// In-memory container runtime that records every call as `op(name)`.
pub struct FakeRuntime {
    state: Mutex<State>,
    released: Notify,
}

pub const STOPPED_EXIT_CODE: i64 = 137;

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            released: Notify::new(),
        }
    }

    pub fn with_logs(self, logs: &[u8]) -> Self {
        self.state.lock().unwrap().logs = logs.to_vec();
        self
    }

    pub fn with_exit_code(self, code: i64) -> Self {
        self.state.lock().unwrap().exit_code = code;
        self
    }

    /// A unit with this name already exists.
    pub fn with_live(self, name: &str) -> Self {
        self.state.lock().unwrap().live.insert(name.to_string());
        self
    }

    pub fn with_missing_image(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .missing_images
            .insert(image.to_string());
        self
    }

    pub fn failing(self, op: Op, fail: Fail) -> Self {
        self.state.lock().unwrap().failures.insert(op, fail);
        self
    }

    /// `wait` blocks until the unit is stopped or [`release`](Self::release) is called.
    pub fn holding_wait(self) -> Self {
        self.state.lock().unwrap().hold_wait = true;
        self
    }

    pub fn release(&self) {
        self.state.lock().unwrap().hold_wait = false;
        self.released.notify_waiters();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.state.lock().unwrap().live.contains(name)
    }

    fn record(&self, op: &str, name: &str) -> Option<Fail> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op}({name})"));
        let key = match op {
            "create" => Op::Create,
            "start" => Op::Start,
            "wait" => Op::Wait,
            "logs" => Op::Logs,
            "stop" => Op::Stop,
            _ => Op::Remove,
        };
        state.failures.get(&key).copied()
    }

    fn should_hold(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.hold_wait && !state.stopped.contains(name)
    }
}

/// Polls `predicate` until it holds or two seconds pass.
pub async fn eventually(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

pub fn calls_for(name: &str, ops: &[&str]) -> Vec<String> {
    ops.iter().map(|op| format!("{op}({name})")).collect()
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(!self.state.lock().unwrap().missing_images.contains(image))
    }

    async fn create(&self, descriptor: &ExecutionDescriptor) -> Result<(), RuntimeError> {
        let name = descriptor.name();
        if let Some(fail) = self.record("create", name) {
            return Err(fail.error(Op::Create));
        }
        let mut state = self.state.lock().unwrap();
        if state.missing_images.contains(descriptor.image()) {
            return Err(RuntimeError::ImageNotFound {
                image: descriptor.image().to_string(),
            });
        }
        if !state.live.insert(name.to_string()) {
            return Err(RuntimeError::Conflict {
                name: name.to_string(),
            });
        }
        state.stopped.remove(name);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        if let Some(fail) = self.record("start", name) {
            return Err(fail.error(Op::Start));
        }
        if !self.is_live(name) {
            return Err(RuntimeError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        if let Some(fail) = self.record("wait", name) {
            return Err(fail.error(Op::Wait));
        }
        loop {
            let notified = self.released.notified();
            if !self.should_hold(name) {
                break;
            }
            notified.await;
        }
        let state = self.state.lock().unwrap();
        if state.stopped.contains(name) {
            Ok(STOPPED_EXIT_CODE)
        } else {
            Ok(state.exit_code)
        }
    }

    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        if let Some(fail) = self.record("logs", name) {
            return Err(fail.error(Op::Logs));
        }
        Ok(self.state.lock().unwrap().logs.clone())
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        if let Some(fail) = self.record("stop", name) {
            return Err(fail.error(Op::Stop));
        }
        {
            let mut state = self.state.lock().unwrap();
            if !state.live.contains(name) {
                return Err(RuntimeError::NotFound {
                    name: name.to_string(),
                });
            }
            state.stopped.insert(name.to_string());
        }
        self.released.notify_waiters();
        Ok(())
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        if let Some(fail) = self.record("remove", name) {
            return Err(fail.error(Op::Remove));
        }
        let mut state = self.state.lock().unwrap();
        if !state.live.remove(name) {
            return Err(RuntimeError::NotFound {
                name: name.to_string(),
            });
        }
        state.stopped.remove(name);
        Ok(())
    }
}
