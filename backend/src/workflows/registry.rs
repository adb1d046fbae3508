// Workflow Registry - Validated CRUD over workflow definitions

use autoflow_shared::Workflow;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::services::{EngineMetrics, WorkflowStorage};
use crate::validation::{Validated, WorkflowValidator};

/// Filter for workflow listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowFilter {
    #[serde(default)]
    pub enabled_only: bool,
    /// Workflows must carry every listed tag
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_by: Option<String>,
}

impl WorkflowFilter {
    pub fn enabled() -> Self {
        Self {
            enabled_only: true,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn created_by(mut self, owner: &str) -> Self {
        self.created_by = Some(owner.to_string());
        self
    }

    fn matches(&self, workflow: &Workflow) -> bool {
        (!self.enabled_only || workflow.enabled)
            && self.tags.iter().all(|tag| workflow.tags.contains(tag))
            && self
                .created_by
                .as_deref()
                .is_none_or(|owner| workflow.created_by.as_deref() == Some(owner))
    }
}

pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    validator: WorkflowValidator,
    storage: Arc<dyn WorkflowStorage>,
    metrics: Arc<EngineMetrics>,
}

impl WorkflowRegistry {
    pub fn new(
        validator: WorkflowValidator,
        storage: Arc<dyn WorkflowStorage>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            validator,
            storage,
            metrics,
        }
    }

    fn validate(&self, workflow: Workflow) -> EngineResult<Validated<Workflow>> {
        let workflow_id = workflow.id;
        self.validator.validate(workflow).inspect_err(|e| {
            if let EngineError::Validation { field, message } = e {
                self.metrics.validation_failed(workflow_id, field, message);
            }
        })
    }

    /// Validate, persist, then publish a new workflow
    pub async fn create(&self, workflow: Workflow) -> EngineResult<Workflow> {
        let workflow = self.validate(workflow)?.into_inner();

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(EngineError::Conflict(format!("workflow {} already exists", workflow.id)));
        }

        self.storage.save_workflow(&workflow).await?;
        workflows.insert(workflow.id, workflow.clone());

        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    /// Replace a workflow definition. Identity and creation time are kept
    /// from the stored value whatever the caller passed.
    pub async fn update(&self, workflow_id: Uuid, mut workflow: Workflow) -> EngineResult<Workflow> {
        let mut workflows = self.workflows.write().await;
        let Some(existing) = workflows.get(&workflow_id) else {
            return Err(EngineError::workflow_not_found(workflow_id));
        };

        workflow.id = workflow_id;
        workflow.created_at = existing.created_at;
        workflow.updated_at = Utc::now();
        let workflow = self.validate(workflow)?.into_inner();

        self.storage.save_workflow(&workflow).await?;
        workflows.insert(workflow_id, workflow.clone());

        info!(workflow_id = %workflow_id, name = %workflow.name, "workflow updated");
        Ok(workflow)
    }

    pub async fn remove(&self, workflow_id: Uuid) -> EngineResult<Workflow> {
        let mut workflows = self.workflows.write().await;
        if !workflows.contains_key(&workflow_id) {
            return Err(EngineError::workflow_not_found(workflow_id));
        }

        self.storage.delete_workflow_storage(workflow_id).await?;
        let removed = workflows
            .remove(&workflow_id)
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        info!(workflow_id = %workflow_id, name = %removed.name, "workflow deleted");
        Ok(removed)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    pub async fn contains(&self, workflow_id: Uuid) -> bool {
        self.workflows.read().await.contains_key(&workflow_id)
    }

    /// Most recently updated first; ties broken by name, then id
    pub async fn list(&self, filter: &WorkflowFilter, params: PaginationParams) -> PaginatedResponse<Workflow> {
        let mut matching: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        params.paginate(matching)
    }

    /// Enabled workflows in creation order, as trigger processing scans them
    pub async fn enabled_snapshot(&self) -> Vec<Workflow> {
        let mut enabled: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.enabled)
            .cloned()
            .collect();

        enabled.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        enabled
    }

    /// Load persisted definitions, skipping any that no longer validate.
    /// Returns the number loaded.
    pub async fn load_from_storage(&self) -> EngineResult<usize> {
        let stored = self.storage.load_workflows().await?;
        let mut workflows = self.workflows.write().await;
        let mut loaded = 0;

        for workflow in stored {
            let workflow_id = workflow.id;
            match self.validate(workflow) {
                Ok(valid) => {
                    workflows.insert(workflow_id, valid.into_inner());
                    loaded += 1;
                }
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "skipping stored workflow"),
            }
        }

        info!(loaded, "workflows loaded from storage");
        Ok(loaded)
    }

    /// (total, enabled)
    pub async fn counts(&self) -> (usize, usize) {
        let workflows = self.workflows.read().await;
        (workflows.len(), workflows.values().filter(|w| w.enabled).count())
    }
}
