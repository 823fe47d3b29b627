// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Resource Manifest Loader
//
// Parses multi-document YAML files of `ModelTemplate` and
// `ModelTemplateVersion` objects and seeds them into the stores:
//
//   apiVersion: ml.vela.dev/v1
//   kind: ModelTemplate
//   metadata: { name: llama, namespace: default }
//   spec: { defaultVersionRef: v1 }
//   ---
//   apiVersion: ml.vela.dev/v1
//   kind: ModelTemplateVersion
//   metadata: { name: v1, namespace: default }
//   spec: { templateName: llama, modelID: meta-llama/Llama-2-7b-chat-hf }

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::domain::meta::{Resource, ML_API_VERSION};
use crate::domain::store::ResourceStore;
use crate::domain::template::ModelTemplate;
use crate::domain::version::ModelTemplateVersion;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Deserialize)]
struct TypeMeta {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
}

/// Objects parsed from one manifest file, in document order per kind.
#[derive(Debug, Default)]
pub struct ResourceManifests {
    pub templates: Vec<ModelTemplate>,
    pub versions: Vec<ModelTemplateVersion>,
}

impl ResourceManifests {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut manifests = Self::default();

        for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let value = serde_yaml::Value::deserialize(document)
                .with_context(|| format!("Failed to parse YAML document {}", index + 1))?;
            if value.is_null() {
                continue;
            }

            let type_meta: TypeMeta = serde_yaml::from_value(value.clone())
                .with_context(|| format!("Document {} is missing apiVersion or kind", index + 1))?;
            if type_meta.api_version != ML_API_VERSION {
                bail!(
                    "Document {}: unsupported apiVersion '{}'. Must be '{}'",
                    index + 1,
                    type_meta.api_version,
                    ML_API_VERSION
                );
            }

            match type_meta.kind.as_str() {
                kind if kind == ModelTemplate::KIND => {
                    let mut template: ModelTemplate = serde_yaml::from_value(value)
                        .with_context(|| format!("Document {}: invalid ModelTemplate", index + 1))?;
                    default_namespace(&mut template.metadata.namespace);
                    manifests.templates.push(template);
                }
                kind if kind == ModelTemplateVersion::KIND => {
                    let mut version: ModelTemplateVersion = serde_yaml::from_value(value)
                        .with_context(|| {
                            format!("Document {}: invalid ModelTemplateVersion", index + 1)
                        })?;
                    default_namespace(&mut version.metadata.namespace);
                    manifests.versions.push(version);
                }
                other => bail!("Document {}: unsupported kind '{}'", index + 1, other),
            }
        }

        Ok(manifests)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file {:?}", path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to load manifests from {:?}", path))
    }

    pub fn len(&self) -> usize {
        self.templates.len() + self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create every object. Templates go first so versions find their owner
    /// on the first delivery.
    pub async fn apply(
        &self,
        templates: &dyn ResourceStore<ModelTemplate>,
        versions: &dyn ResourceStore<ModelTemplateVersion>,
    ) -> Result<()> {
        for template in &self.templates {
            templates
                .create(template)
                .await
                .with_context(|| format!("Failed to create ModelTemplate {}", template.key()))?;
        }
        for version in &self.versions {
            versions
                .create(version)
                .await
                .with_context(|| {
                    format!("Failed to create ModelTemplateVersion {}", version.key())
                })?;
        }
        info!(
            templates = self.templates.len(),
            versions = self.versions.len(),
            "Applied resource manifests"
        );
        Ok(())
    }
}

fn default_namespace(namespace: &mut String) {
    if namespace.is_empty() {
        *namespace = DEFAULT_NAMESPACE.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::InMemoryResourceStore;
    use std::io::Write;

    const MANIFESTS: &str = r#"
apiVersion: ml.vela.dev/v1
kind: ModelTemplate
metadata:
  name: llama
spec:
  description: Llama 2 chat
---
apiVersion: ml.vela.dev/v1
kind: ModelTemplateVersion
metadata:
  name: v1
  namespace: default
spec:
  templateName: llama
  modelID: meta-llama/Llama-2-7b-chat-hf
  engineConfig:
    maxTotalTokens: 4096
---
"#;

    #[test]
    fn test_parses_documents_by_kind() {
        let manifests = ResourceManifests::from_yaml_str(MANIFESTS).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests.templates[0].metadata.namespace, "default");
        assert_eq!(manifests.templates[0].spec.description.as_deref(), Some("Llama 2 chat"));
        assert_eq!(manifests.versions[0].spec.template_name, "llama");
        assert_eq!(manifests.versions[0].spec.engine_config.max_total_tokens, 4096);
    }

    #[test]
    fn test_rejects_unknown_kind_and_api_version() {
        let unknown_kind = "apiVersion: ml.vela.dev/v1\nkind: Dataset\nmetadata:\n  name: d\n";
        let err = ResourceManifests::from_yaml_str(unknown_kind).unwrap_err();
        assert!(err.to_string().contains("unsupported kind 'Dataset'"));

        let wrong_group =
            "apiVersion: ml.oneblock.ai/v1\nkind: ModelTemplate\nmetadata:\n  name: t\n";
        assert!(ResourceManifests::from_yaml_str(wrong_group).is_err());
    }

    #[tokio::test]
    async fn test_apply_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFESTS.as_bytes()).unwrap();

        let manifests = ResourceManifests::from_yaml_file(file.path()).unwrap();
        let templates = InMemoryResourceStore::<ModelTemplate>::new();
        let versions = InMemoryResourceStore::<ModelTemplateVersion>::new();
        manifests.apply(&templates, &versions).await.unwrap();

        assert!(templates.get("default", "llama").await.unwrap().is_some());
        assert!(versions.get("default", "v1").await.unwrap().is_some());
        assert!(manifests.apply(&templates, &versions).await.is_err());
    }
}
