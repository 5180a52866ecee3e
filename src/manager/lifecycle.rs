//! Container lifecycle management for per-artifact workers.
//!
//! One container per artifact, named `workflow-<artifact_id>`, bound to a
//! host port from the allocator's range. The manager reconciles its local
//! record against what Docker actually reports: a record whose container is
//! gone is purged rather than surfaced as an error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::{container_name, ManagerConfig};
use crate::error::{HostError, Result};
use crate::manager::ports::PortAllocator;
use crate::runtime::ContainerRuntime;

/// Tracked state of an artifact's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One record per artifact with an active or last-known container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerRecord {
    pub artifact_id: String,
    pub container_id: String,
    pub port: u16,
    pub status: ContainerStatus,
    pub start_time: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_status: String,
    pub last_error: Option<String>,
}

/// Manages the mapping from artifact id to its supervised container.
pub struct ContainerManager {
    config: ManagerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    ports: PortAllocator,
    records: Mutex<HashMap<String, ContainerRecord>>,
    /// Per-artifact operation gates. Runtime I/O for one artifact never
    /// serializes start/stop calls for unrelated artifacts.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerManager {
    pub fn new(config: ManagerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let ports = PortAllocator::new(config.base_port, config.max_port);
        Self {
            config,
            runtime,
            ports,
            records: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Acquire the per-artifact gate, creating it on first use.
    pub(crate) async fn gate(&self, artifact_id: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(artifact_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Snapshot of the tracked record for an artifact.
    pub async fn record(&self, artifact_id: &str) -> Option<ContainerRecord> {
        self.records.lock().await.get(artifact_id).cloned()
    }

    /// Snapshot of all tracked records.
    pub async fn records(&self) -> Vec<ContainerRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Apply a mutation to an artifact's record, if it still exists.
    pub(crate) async fn update_record<F>(&self, artifact_id: &str, f: F)
    where
        F: FnOnce(&mut ContainerRecord),
    {
        if let Some(record) = self.records.lock().await.get_mut(artifact_id) {
            f(record);
        }
    }

    /// Drop an artifact's record and release its port.
    ///
    /// Used when the runtime no longer knows the container; callers hold
    /// the artifact gate.
    pub(crate) async fn purge(&self, artifact_id: &str) {
        let removed = self.records.lock().await.remove(artifact_id);
        if let Some(record) = removed {
            self.ports.release(record.port).await;
            tracing::info!(
                artifact_id = %artifact_id,
                port = record.port,
                "Purged stale container record"
            );
        }
    }

    /// Start (or re-adopt) the container for an artifact.
    ///
    /// Idempotent: a second call while the container is running returns the
    /// same `(container_id, port)` without creating anything.
    pub async fn start(&self, artifact_id: &str) -> Result<(String, u16)> {
        let gate = self.gate(artifact_id).await;
        let _guard = gate.lock().await;

        // Re-adoption path: if we already track a container, believe Docker
        // over our own table.
        if let Some(existing) = self.record(artifact_id).await {
            match self.runtime.inspect(&existing.container_id).await {
                Ok(state) if state.running => {
                    tracing::info!(
                        artifact_id = %artifact_id,
                        container_id = %existing.container_id,
                        port = existing.port,
                        "Container already running"
                    );
                    return Ok((existing.container_id, existing.port));
                }
                Ok(_) | Err(HostError::NotFound { .. }) => {
                    // Exited or externally removed: clear it and recreate.
                    self.purge(artifact_id).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.create(artifact_id).await
    }

    /// Creation loop: walk candidate ports until one binds.
    async fn create(&self, artifact_id: &str) -> Result<(String, u16)> {
        let name = container_name(artifact_id);
        // Conflicted candidates stay reserved until the loop ends so the
        // allocator advances to the next port instead of re-issuing them.
        let mut conflicted: Vec<u16> = Vec::new();

        let result = self.create_inner(artifact_id, &name, &mut conflicted).await;

        for port in conflicted {
            self.ports.release(port).await;
        }

        result
    }

    async fn create_inner(
        &self,
        artifact_id: &str,
        name: &str,
        conflicted: &mut Vec<u16>,
    ) -> Result<(String, u16)> {
        for attempt in 0..self.config.max_start_attempts {
            let candidate = self.ports.allocate(artifact_id).await?;

            // Start is destructive-idempotent: clear any pre-existing
            // container of this name before creating.
            if let Err(e) = self.runtime.remove(name, true).await {
                if !matches!(e, HostError::NotFound { .. }) {
                    tracing::warn!(artifact_id = %artifact_id, error = %e, "Failed to remove pre-existing container");
                }
            }

            let mut env = HashMap::new();
            env.insert("PORT".to_string(), candidate.to_string());
            env.insert("ARTIFACT_ID".to_string(), artifact_id.to_string());

            match self
                .runtime
                .create_and_start(name, &self.config.worker_image, env, candidate, candidate)
                .await
            {
                Ok(container_id) => {
                    // The runtime is authoritative on the bound host port.
                    let bound = match self.runtime.inspect(&container_id).await {
                        Ok(state) => state.host_port.unwrap_or(candidate),
                        Err(e) => {
                            tracing::warn!(
                                artifact_id = %artifact_id,
                                error = %e,
                                "Port mapping introspection failed, assuming requested port"
                            );
                            candidate
                        }
                    };
                    if bound != candidate {
                        self.ports.release(candidate).await;
                        self.ports.claim(bound, artifact_id).await;
                    }

                    let record = ContainerRecord {
                        artifact_id: artifact_id.to_string(),
                        container_id: container_id.clone(),
                        port: bound,
                        status: ContainerStatus::Running,
                        start_time: Utc::now(),
                        last_health_check: None,
                        health_status: "starting".to_string(),
                        last_error: None,
                    };
                    self.records
                        .lock()
                        .await
                        .insert(artifact_id.to_string(), record);

                    tracing::info!(
                        artifact_id = %artifact_id,
                        container_id = %container_id,
                        port = bound,
                        "Created and started worker container"
                    );
                    return Ok((container_id, bound));
                }
                Err(e) if e.is_port_conflict() => {
                    tracing::warn!(
                        artifact_id = %artifact_id,
                        port = candidate,
                        attempt,
                        "Host port already taken, trying next candidate"
                    );
                    conflicted.push(candidate);
                }
                Err(e) => {
                    self.ports.release(candidate).await;
                    return Err(e);
                }
            }
        }

        Err(HostError::ResourceExhausted {
            reason: format!(
                "no bindable port for {} after {} attempts",
                artifact_id, self.config.max_start_attempts
            ),
        })
    }

    /// Stop and remove an artifact's container.
    ///
    /// Best-effort: local state is left consistent even when the runtime
    /// already lost the container. Calling this with no tracked record is a
    /// successful no-op.
    pub async fn stop(&self, artifact_id: &str) -> Result<()> {
        let gate = self.gate(artifact_id).await;
        let _guard = gate.lock().await;

        let record = match self.record(artifact_id).await {
            Some(r) => r,
            None => return Ok(()),
        };

        if let Err(e) = self
            .runtime
            .stop(&record.container_id, self.config.stop_timeout_secs as i64)
            .await
        {
            tracing::warn!(
                artifact_id = %artifact_id,
                error = %e,
                "Failed to stop container (may already be stopped)"
            );
        }
        if let Err(e) = self.runtime.remove(&record.container_id, true).await {
            if !matches!(e, HostError::NotFound { .. }) {
                tracing::warn!(
                    artifact_id = %artifact_id,
                    error = %e,
                    "Failed to remove container (may require manual cleanup)"
                );
            }
        }

        self.ports.release(record.port).await;
        self.records.lock().await.remove(artifact_id);

        tracing::info!(artifact_id = %artifact_id, "Stopped worker container");
        Ok(())
    }

    /// Tear down every tracked container. Invoked once at process
    /// termination; individual failures are logged, never fatal.
    pub async fn shutdown_all(&self) {
        let artifact_ids: Vec<String> = self
            .records
            .lock()
            .await
            .keys()
            .cloned()
            .collect();

        for artifact_id in artifact_ids {
            if let Err(e) = self.stop(&artifact_id).await {
                tracing::warn!(
                    artifact_id = %artifact_id,
                    error = %e,
                    "Failed to tear down container during shutdown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    fn manager_with(runtime: Arc<FakeRuntime>) -> ContainerManager {
        ContainerManager::new(ManagerConfig::default(), runtime)
    }

    #[tokio::test]
    async fn start_allocates_first_port_and_names_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        let (container_id, port) = mgr.start("a1").await.unwrap();
        assert_eq!(port, 5002);
        assert!(!container_id.is_empty());

        let created = runtime.created();
        assert_eq!(created.last().unwrap(), &("workflow-a1".to_string(), 5002));

        let record = mgr.record("a1").await.unwrap();
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.port, 5002);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        let first = mgr.start("a1").await.unwrap();
        let second = mgr.start("a1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn distinct_artifacts_get_distinct_ports() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(runtime);

        let (_, p1) = mgr.start("a1").await.unwrap();
        let (_, p2) = mgr.start("a2").await.unwrap();
        assert_ne!(p1, p2);
        assert_eq!(p2, 5003);
    }

    #[tokio::test]
    async fn port_conflict_retries_next_candidate() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.conflict_on_port(5002);
        let mgr = manager_with(Arc::clone(&runtime));

        let (_, port) = mgr.start("a1").await.unwrap();
        assert_eq!(port, 5003);

        // The conflicted candidate is free again for other artifacts once
        // the loop ends; the fake still reports it taken, so the next
        // artifact lands on 5004.
        let (_, port2) = mgr.start("a2").await.unwrap();
        assert_eq!(port2, 5004);
    }

    #[tokio::test]
    async fn non_conflict_create_error_is_fatal() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_create("image not found");
        let mgr = manager_with(runtime);

        let err = mgr.start("a1").await.unwrap_err();
        assert!(matches!(err, HostError::Runtime { .. }));
        assert!(mgr.record("a1").await.is_none());
    }

    #[tokio::test]
    async fn externally_removed_container_is_recreated() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        let (id1, p1) = mgr.start("a1").await.unwrap();
        runtime.remove_externally("workflow-a1");

        let (id2, p2) = mgr.start("a1").await.unwrap();
        assert_ne!(id1, id2);
        // The stale port was released before re-allocation, so the lowest
        // port comes straight back.
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn exited_container_is_recreated() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        let (id1, _) = mgr.start("a1").await.unwrap();
        runtime.mark_exited("workflow-a1");

        let (id2, _) = mgr.start("a1").await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        mgr.start("a1").await.unwrap();
        mgr.stop("a1").await.unwrap();
        assert!(mgr.record("a1").await.is_none());
        assert_eq!(runtime.container_count(), 0);

        // Second stop with no record is a successful no-op.
        mgr.stop("a1").await.unwrap();
    }

    #[tokio::test]
    async fn stop_releases_port_for_reuse() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(runtime);

        let (_, p1) = mgr.start("a1").await.unwrap();
        mgr.stop("a1").await.unwrap();
        let (_, p2) = mgr.start("a2").await.unwrap();
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn concurrent_starts_for_same_artifact_create_once() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = Arc::new(manager_with(Arc::clone(&runtime)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move { mgr.start("a1").await.unwrap() }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        let first = &results[0];
        assert!(results.iter().all(|r| r == first));
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_all_clears_every_record() {
        let runtime = Arc::new(FakeRuntime::new());
        let mgr = manager_with(Arc::clone(&runtime));

        mgr.start("a1").await.unwrap();
        mgr.start("a2").await.unwrap();
        mgr.start("a3").await.unwrap();

        mgr.shutdown_all().await;
        assert!(mgr.records().await.is_empty());
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn attempt_budget_exhaustion() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut config = ManagerConfig::default();
        config.max_start_attempts = 3;
        for port in 5002..5010 {
            runtime.conflict_on_port(port);
        }
        let mgr = ContainerManager::new(config, runtime);

        let err = mgr.start("a1").await.unwrap_err();
        assert!(matches!(err, HostError::ResourceExhausted { .. }));
    }
}
