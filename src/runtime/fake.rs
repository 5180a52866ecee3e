//! Scripted in-memory runtime used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{HostError, Result};
use crate::runtime::{ContainerRuntime, ResourceStats, RuntimeState};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    running: bool,
    host_port: u16,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    conflict_ports: HashSet<u16>,
    fail_create: Option<String>,
    next_id: u64,
    created: Vec<(String, u16)>,
}

/// In-memory [`ContainerRuntime`] whose failures are scripted per test.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_and_start` report a port conflict for this host port.
    pub fn conflict_on_port(&self, port: u16) {
        self.state.lock().unwrap().conflict_ports.insert(port);
    }

    /// Make the next `create_and_start` fail with a non-conflict error.
    pub fn fail_create(&self, reason: &str) {
        self.state.lock().unwrap().fail_create = Some(reason.to_string());
    }

    /// Simulate a container being removed behind the manager's back.
    pub fn remove_externally(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .containers
            .retain(|c| c.name != name);
    }

    /// Simulate a container that exited on its own.
    pub fn mark_exited(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.iter_mut().find(|c| c.name == name) {
            c.running = false;
        }
    }

    /// Names and ports passed to `create_and_start`, in order.
    pub fn created(&self) -> Vec<(String, u16)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    fn find(&self, id_or_name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_and_start(
        &self,
        name: &str,
        _image: &str,
        _env: HashMap<String, String>,
        _internal_port: u16,
        host_port: u16,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.created.push((name.to_string(), host_port));

        if let Some(reason) = state.fail_create.take() {
            return Err(HostError::Runtime { reason });
        }
        if state.conflict_ports.contains(&host_port) {
            return Err(HostError::Runtime {
                reason: format!("driver failed: port is already allocated ({})", host_port),
            });
        }

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            running: true,
            host_port,
        });
        Ok(id)
    }

    async fn stop(&self, id: &str, _timeout_secs: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state
            .containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
        {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(HostError::NotFound {
                what: "container",
                id: id.to_string(),
            }),
        }
    }

    async fn remove(&self, id_or_name: &str, _force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state
            .containers
            .retain(|c| c.id != id_or_name && c.name != id_or_name);
        if state.containers.len() == before {
            return Err(HostError::NotFound {
                what: "container",
                id: id_or_name.to_string(),
            });
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<RuntimeState> {
        match self.find(id) {
            Some(c) => Ok(RuntimeState {
                running: c.running,
                host_port: Some(c.host_port),
                ..Default::default()
            }),
            None => Err(HostError::NotFound {
                what: "container",
                id: id.to_string(),
            }),
        }
    }

    async fn logs(&self, id: &str, _tail: usize) -> Result<String> {
        match self.find(id) {
            Some(_) => Ok("fake container log line\n".to_string()),
            None => Err(HostError::NotFound {
                what: "container",
                id: id.to_string(),
            }),
        }
    }

    async fn stats(&self, id: &str) -> Result<ResourceStats> {
        match self.find(id) {
            Some(_) => Ok(ResourceStats {
                cpu_percent: 1.5,
                memory_usage_bytes: 10 * 1024 * 1024,
                memory_limit_bytes: 2048 * 1024 * 1024,
            }),
            None => Err(HostError::NotFound {
                what: "container",
                id: id.to_string(),
            }),
        }
    }
}
