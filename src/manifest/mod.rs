//! Manifest decoding.
//!
//! A manifest file may hold several YAML documents. Each document is first read generically to
//! discover its `kind`; kinds with a pod specification are converted into the typed canonical
//! schema, everything else stays a schema-less [`Node`] tree.

pub mod node;
pub mod workload;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::error::BuildError;

pub use node::{Node, NodeMap};
pub use workload::{Workload, WorkloadKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Workload(Workload),
    Object(Node),
}

impl Manifest {
    pub fn kind(&self) -> &str {
        match self {
            Manifest::Workload(workload) => workload.kind().as_str(),
            Manifest::Object(node) => node.str_at(&["kind"]).unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Manifest::Workload(workload) => workload.name(),
            Manifest::Object(node) => node.str_at(&["metadata", "name"]).unwrap_or_default(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        let namespace = match self {
            Manifest::Workload(workload) => workload.metadata().namespace.as_deref(),
            Manifest::Object(node) => node.str_at(&["metadata", "namespace"]),
        };
        namespace.filter(|ns| !ns.is_empty())
    }

    pub fn as_workload(&self) -> Option<&Workload> {
        match self {
            Manifest::Workload(workload) => Some(workload),
            Manifest::Object(_) => None,
        }
    }

    pub fn into_node(self) -> Result<Node> {
        match self {
            Manifest::Workload(workload) => workload.to_node(),
            Manifest::Object(node) => Ok(node),
        }
    }
}

/// Reads manifest files relative to an optional base directory.
#[derive(Debug, Clone, Default)]
pub struct ManifestDecoder {
    base_path: Option<PathBuf>,
}

impl ManifestDecoder {
    pub fn new(base_path: Option<PathBuf>) -> Self {
        Self { base_path }
    }

    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn read_file(&self, file: &str) -> Result<Vec<Manifest>> {
        let path = self.resolve(file);
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;
        decode_at(&source, &path)
    }
}

/// Decodes every non-empty document in `source`, in order.
pub fn decode_documents(source: &str) -> Result<Vec<Manifest>> {
    decode_at(source, Path::new("<inline>"))
}

pub(crate) fn decode_at(source: &str, path: &Path) -> Result<Vec<Manifest>> {
    let decode_error = |message: String| BuildError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let node = Node::deserialize(document).map_err(|err| decode_error(err.to_string()))?;
        if node.is_null() {
            continue;
        }
        if node.as_map().is_none() {
            return Err(decode_error("document is not a mapping".to_string()).into());
        }
        let Some(kind) = node.str_at(&["kind"]).map(str::to_string) else {
            return Err(decode_error("document has no kind".to_string()).into());
        };

        let manifest = match WorkloadKind::from_kind(&kind) {
            Some(known) => {
                let workload = Workload::from_node(known, node)
                    .map_err(|err| decode_error(format!("{err:#}")))?;
                Manifest::Workload(workload)
            }
            None => Manifest::Object(node),
        };
        debug!(file = %path.display(), kind = %kind, "Decoded manifest document");
        manifests.push(manifest);
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_empty_documents() {
        let source = "---\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\nkind: Service\nmetadata:\n  name: b\n";
        let manifests = decode_documents(source).unwrap();
        let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(kinds, ["ConfigMap", "Service"]);
    }

    #[test]
    fn rejects_scalar_documents() {
        let err = decode_documents("just text").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Decode { .. })
        ));
    }

    #[test]
    fn relative_files_resolve_against_base() {
        let decoder = ManifestDecoder::new(Some(PathBuf::from("/srv/app")));
        assert_eq!(decoder.resolve("k8s/job.yml"), PathBuf::from("/srv/app/k8s/job.yml"));
        assert_eq!(decoder.resolve("/abs.yml"), PathBuf::from("/abs.yml"));
    }
}
