//! The `CronTab` resource kind and its reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use informer::{ObjectMeta, Resource};
use reconciler::{Reconcile, SyncError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// API group and version of the `CronTab` kind.
pub const API_VERSION: &str = "stable.example.com/v1beta1";

/// A scheduled job: run `image` on `cron_spec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTab {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CronTabSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTabSpec {
    /// Five-field cron schedule, e.g. `*/5 * * * *`.
    #[serde(default)]
    pub cron_spec: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub replicas: u32,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    CronTab::KIND.to_string()
}

impl CronTab {
    /// A `CronTab` in `namespace` named `name`.
    pub fn new(namespace: &str, name: &str, spec: CronTabSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::namespaced(namespace, name),
            spec,
        }
    }
}

impl Resource for CronTab {
    const KIND: &'static str = "CronTab";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CronTabSpec {
    /// Reject specs no amount of retrying will fix.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let fields = self.cron_spec.split_whitespace().count();
        if fields != 5 {
            return Err(format!(
                "cronSpec '{}' must have 5 fields, found {fields}",
                self.cron_spec
            ));
        }
        if self.image.trim().is_empty() {
            return Err("image must not be empty".to_string());
        }
        Ok(())
    }
}

/// Reconciles `CronTab`s by logging what they ask for.
#[derive(Debug, Default, Clone, Copy)]
pub struct CronTabReconciler;

#[async_trait]
impl Reconcile<CronTab> for CronTabReconciler {
    async fn reconcile(&self, crontab: Arc<CronTab>) -> Result<(), SyncError> {
        crontab.spec.validate().map_err(SyncError::permanent)?;
        info!(
            namespace = crontab.metadata.namespace().unwrap_or_default(),
            name = %crontab.metadata.name,
            resource_version = %crontab.metadata.resource_version,
            cron_spec = %crontab.spec.cron_spec,
            image = %crontab.spec.image,
            replicas = crontab.spec.replicas,
            "Processing crontab"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec(cron_spec: &str, image: &str) -> CronTabSpec {
        CronTabSpec {
            cron_spec: cron_spec.to_string(),
            image: image.to_string(),
            replicas: 1,
        }
    }

    #[test]
    fn test_deserializes_camel_case_manifest() {
        let crontab: CronTab = serde_json::from_str(
            r#"{
                "metadata": {"name": "backup", "namespace": "default"},
                "spec": {"cronSpec": "0 3 * * *", "image": "backup:1.2", "replicas": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(crontab.api_version, API_VERSION);
        assert_eq!(crontab.kind, "CronTab");
        assert_eq!(crontab.spec.cron_spec, "0 3 * * *");
        assert_eq!(crontab.spec.replicas, 2);
        assert_eq!(crontab.metadata.namespace(), Some("default"));
    }

    #[test]
    fn test_validate_spec() {
        assert!(spec("*/5 * * * *", "busybox").validate().is_ok());
        assert!(spec("* * *", "busybox").validate().is_err());
        assert!(spec("*/5 * * * *", " ").validate().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_invalid_spec_permanently() {
        let crontab = Arc::new(CronTab::new("default", "broken", spec("nonsense", "busybox")));

        let result = CronTabReconciler.reconcile(crontab).await;

        assert!(matches!(result, Err(SyncError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_reconcile_accepts_valid_spec() {
        let crontab = Arc::new(CronTab::new("default", "backup", spec("0 3 * * *", "backup:1.2")));

        assert!(CronTabReconciler.reconcile(crontab).await.is_ok());
    }
}
