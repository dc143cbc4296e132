//! Container projection: turns the pod specification of a decoded workload into the container,
//! volume and annotation records the delivery platform expects.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use crate::definition::{PipelineDefinition, Scaffold};
use crate::error::BuildError;
use crate::graph::{
    CapabilitiesRecord, ClaimRecord, ConfigMapKeySource, ConfigMapVolumeRecord, ContainerRecord,
    EmptyDirRecord, EnvFromRecord, EnvSourceRecord, EnvVarRecord, ExecRecord, FieldRefSource,
    HttpGetRecord, HttpHeaderRecord, ImageDescriptionRecord, NamedSource, PortRecord,
    ProbeHandler, ProbeRecord, ResourceRecord, SecretKeySource, SecretVolumeRecord,
    SecurityContextRecord, TcpSocketRecord, VolumeMountRecord, VolumeSourceRecord,
};
use crate::manifest::workload::{
    Container, ContainerPort, EnvFromSource, EnvVar, Probe, ResourceList, SecurityContext,
    Volume,
};
use crate::manifest::{Manifest, ManifestDecoder, Node, Workload};
use crate::overrides;
use crate::quantity::Quantity;
use crate::sizing::ControllerRecommendations;

/// Everything a stage needs from one ingested workload manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestGroup {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub containers: Vec<ContainerRecord>,
    pub init_containers: Vec<ContainerRecord>,
    pub volume_sources: Vec<VolumeSourceRecord>,
}

pub struct ContainerProjector<'a> {
    pipeline: &'a PipelineDefinition,
    decoder: &'a ManifestDecoder,
}

impl<'a> ContainerProjector<'a> {
    pub fn new(pipeline: &'a PipelineDefinition, decoder: &'a ManifestDecoder) -> Self {
        Self { pipeline, decoder }
    }

    /// Reads the scaffold's manifest and projects its first workload document.
    #[instrument(skip_all, fields(file = scaffold.manifest()))]
    pub fn ingest(
        &self,
        scaffold: &dyn Scaffold,
        sizing: Option<&ControllerRecommendations>,
    ) -> Result<ManifestGroup> {
        let file = scaffold.manifest();
        let manifests = self.decoder.read_file(file)?;
        let Some(first) = manifests.first() else {
            return Err(BuildError::NoContainers {
                path: self.decoder.resolve(file),
            }
            .into());
        };
        let Some(workload) = manifests.iter().find_map(Manifest::as_workload) else {
            return Err(BuildError::UnsupportedManifestKind {
                kind: first.kind().to_string(),
            })
            .with_context(|| format!("Failed to ingest manifest file: {file}"));
        };

        let mut workload = workload.clone();
        if scaffold.target_size() > 0 {
            overrides::set_target_size(&mut workload, scaffold.target_size());
        }
        if let Some(recommendations) = sizing.and_then(|s| s.get(workload.name())) {
            overrides::fill_sizing(&mut workload, recommendations);
        }
        self.project(&workload, scaffold)
            .with_context(|| format!("Failed to project containers from: {file}"))
    }

    pub fn project(&self, workload: &Workload, scaffold: &dyn Scaffold) -> Result<ManifestGroup> {
        let spec = workload.pod_spec();
        let containers = spec
            .containers
            .iter()
            .map(|c| self.project_container(c, scaffold))
            .collect::<Result<Vec<_>>>()?;
        let init_containers = spec
            .init_containers
            .iter()
            .map(|c| self.project_container(c, scaffold))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            workload = workload.name(),
            containers = containers.len(),
            init_containers = init_containers.len(),
            "Projected workload"
        );

        Ok(ManifestGroup {
            name: workload.name().to_string(),
            namespace: workload.metadata().namespace.clone().unwrap_or_default(),
            annotations: workload.metadata().annotations.clone(),
            pod_annotations: workload.pod_metadata().annotations.clone(),
            containers,
            init_containers,
            volume_sources: spec.volumes.iter().map(project_volume).collect(),
        })
    }

    pub fn project_container(
        &self,
        container: &Container,
        scaffold: &dyn Scaffold,
    ) -> Result<ContainerRecord> {
        Ok(ContainerRecord {
            name: container.name.clone(),
            args: container.args.clone().unwrap_or_default(),
            command: container.command.clone().unwrap_or_default(),
            env_vars: container.env.iter().map(project_env_var).collect(),
            env_from: container.env_from.iter().map(project_env_from).collect(),
            image_description: self.image_description(&container.name, scaffold),
            image_pull_policy: container
                .image_pull_policy
                .as_deref()
                .unwrap_or_default()
                .to_uppercase(),
            limits: resource_record(&container.resources.limits, "limits", &container.name)?,
            requests: resource_record(&container.resources.requests, "requests", &container.name)?,
            ports: container.ports.iter().map(project_port).collect(),
            volume_mounts: container
                .volume_mounts
                .iter()
                .map(|vm| VolumeMountRecord {
                    name: vm.name.clone(),
                    mount_path: vm.mount_path.clone(),
                    read_only: vm.read_only.unwrap_or(false),
                    sub_path: vm.sub_path.clone().unwrap_or_default(),
                })
                .collect(),
            liveness_probe: container
                .liveness_probe
                .as_ref()
                .and_then(|p| project_probe(p, &container.ports)),
            readiness_probe: container
                .readiness_probe
                .as_ref()
                .and_then(|p| project_probe(p, &container.ports)),
            security_context: container
                .security_context
                .as_ref()
                .map(project_security_context),
        })
    }

    fn image_description(&self, container: &str, scaffold: &dyn Scaffold) -> ImageDescriptionRecord {
        let Some(reference) = scaffold.image_description_ref(container) else {
            return ImageDescriptionRecord::default();
        };
        match self.pipeline.image_description(&reference.name) {
            Some(desc) => ImageDescriptionRecord {
                account: desc.account.clone(),
                from_trigger: false,
                image_id: desc.image_id.clone(),
                organization: desc.organization.clone(),
                registry: desc.registry.clone(),
                repository: desc.repository.clone(),
                tag: desc.tag.clone(),
            },
            None => {
                debug!(
                    container,
                    description = %reference.name,
                    "No image description with that name; leaving it blank"
                );
                ImageDescriptionRecord::default()
            }
        }
    }
}

fn resource_record(list: &ResourceList, section: &str, container: &str) -> Result<ResourceRecord> {
    let quantity = |field: &str| -> Result<String> {
        let Some(text) = list.get(field).and_then(Node::scalar_text) else {
            return Ok(Quantity::zero().to_string());
        };
        match Quantity::parse(&text) {
            Ok(q) => Ok(q.to_string()),
            Err(err) => bail!("Invalid {section} {field} for container {container}: {err}"),
        }
    };
    Ok(ResourceRecord {
        cpu: quantity("cpu")?,
        memory: quantity("memory")?,
    })
}

fn project_port(port: &ContainerPort) -> PortRecord {
    PortRecord {
        container_port: port.container_port,
        name: port.name.clone().unwrap_or_default(),
        protocol: port.protocol.clone().unwrap_or_default(),
    }
}

fn project_env_var(env: &EnvVar) -> EnvVarRecord {
    let env_source = env.value_from.as_ref().and_then(|from| {
        let source = EnvSourceRecord {
            config_map_source: from.config_map_key_ref.as_ref().map(|r| ConfigMapKeySource {
                config_map_name: r.name.clone(),
                key: r.key.clone(),
                optional: r.optional.unwrap_or(false),
            }),
            secret_source: from.secret_key_ref.as_ref().map(|r| SecretKeySource {
                secret_name: r.name.clone(),
                key: r.key.clone(),
                optional: r.optional.unwrap_or(false),
            }),
            field_ref: from.field_ref.as_ref().map(|f| FieldRefSource {
                field_path: f.field_path.clone(),
            }),
        };
        let empty = source.config_map_source.is_none()
            && source.secret_source.is_none()
            && source.field_ref.is_none();
        (!empty).then_some(source)
    });

    EnvVarRecord {
        name: env.name.clone(),
        value: env.value.clone().unwrap_or_default(),
        env_source,
    }
}

fn project_env_from(source: &EnvFromSource) -> EnvFromRecord {
    let named = |name: &str, optional: Option<bool>| NamedSource {
        name: name.to_string(),
        optional: optional.unwrap_or(false),
    };
    EnvFromRecord {
        prefix: source.prefix.clone().unwrap_or_default(),
        config_map_ref: source
            .config_map_ref
            .as_ref()
            .map(|r| named(&r.name, r.optional)),
        secret_ref: source.secret_ref.as_ref().map(|r| named(&r.name, r.optional)),
    }
}

/// Numeric value of a probe port, resolving named ports against the container's declarations.
fn probe_port(port: &Node, declared: &[ContainerPort]) -> i32 {
    match port {
        Node::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()).unwrap_or(0),
        Node::String(text) => text.parse().unwrap_or_else(|_| {
            declared
                .iter()
                .find(|p| p.name.as_deref() == Some(text.as_str()))
                .map(|p| p.container_port)
                .unwrap_or(0)
        }),
        _ => 0,
    }
}

/// `None` for a check that declares no handler.
fn project_probe(probe: &Probe, ports: &[ContainerPort]) -> Option<ProbeRecord> {
    let handler = if let Some(http) = &probe.http_get {
        ProbeHandler {
            kind: "HTTP",
            http_get_action: Some(HttpGetRecord {
                path: http.path.clone().unwrap_or_default(),
                port: probe_port(&http.port, ports),
                uri_scheme: http.scheme.clone().unwrap_or_else(|| "HTTP".to_string()),
                http_headers: http
                    .http_headers
                    .iter()
                    .map(|h| HttpHeaderRecord {
                        name: h.name.clone(),
                        value: h.value.clone(),
                    })
                    .collect(),
            }),
            exec_action: None,
            tcp_socket_action: None,
        }
    } else if let Some(exec) = &probe.exec {
        ProbeHandler {
            kind: "EXEC",
            http_get_action: None,
            exec_action: Some(ExecRecord {
                commands: exec.command.clone(),
            }),
            tcp_socket_action: None,
        }
    } else if let Some(tcp) = &probe.tcp_socket {
        ProbeHandler {
            kind: "TCP",
            http_get_action: None,
            exec_action: None,
            tcp_socket_action: Some(TcpSocketRecord {
                port: probe_port(&tcp.port, ports),
            }),
        }
    } else {
        debug!("Health check declares no handler; dropping it");
        return None;
    };

    Some(ProbeRecord {
        handler,
        failure_threshold: probe.failure_threshold.unwrap_or_default(),
        success_threshold: probe.success_threshold.unwrap_or_default(),
        initial_delay_seconds: probe.initial_delay_seconds.unwrap_or_default(),
        period_seconds: probe.period_seconds.unwrap_or_default(),
        timeout_seconds: probe.timeout_seconds.unwrap_or_default(),
    })
}

fn project_security_context(ctx: &SecurityContext) -> SecurityContextRecord {
    SecurityContextRecord {
        privileged: ctx.privileged.unwrap_or(false),
        read_only_root_filesystem: ctx.read_only_root_filesystem.unwrap_or(false),
        run_as_user: ctx.run_as_user,
        capabilities: ctx.capabilities.as_ref().map(|caps| CapabilitiesRecord {
            add: caps.add.clone(),
            drop: caps.drop.clone(),
        }),
    }
}

pub fn project_volume(volume: &Volume) -> VolumeSourceRecord {
    let mut record = VolumeSourceRecord {
        name: volume.name.clone(),
        ..Default::default()
    };

    if let Some(cm) = &volume.config_map {
        record.kind = "CONFIGMAP".to_string();
        record.config_map = Some(ConfigMapVolumeRecord {
            config_map_name: cm.name.clone(),
            items: cm.items.clone(),
            default_mode: cm.default_mode,
        });
    } else if let Some(secret) = &volume.secret {
        record.kind = "SECRET".to_string();
        record.secret = Some(SecretVolumeRecord {
            secret_name: secret.secret_name.clone(),
            items: secret.items.clone(),
            default_mode: secret.default_mode,
        });
    } else if let Some(empty_dir) = &volume.empty_dir {
        record.kind = "EMPTYDIR".to_string();
        record.empty_dir = Some(EmptyDirRecord {
            medium: empty_dir.medium.as_deref().unwrap_or_default().to_uppercase(),
        });
    } else if let Some(claim) = &volume.persistent_volume_claim {
        record.kind = "PERSISTENTVOLUMECLAIM".to_string();
        record.persistent_volume_claim = Some(ClaimRecord {
            claim_name: claim.claim_name.clone(),
            read_only: claim.read_only.unwrap_or(false),
        });
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(yaml: &str) -> Container {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn http_probe_resolves_named_port() {
        let c = container(
            r#"
name: web
ports:
  - containerPort: 8080
    name: http
livenessProbe:
  httpGet:
    path: /healthz
    port: http
  periodSeconds: 5
"#,
        );
        let probe = project_probe(c.liveness_probe.as_ref().unwrap(), &c.ports).unwrap();
        assert_eq!(probe.handler.kind, "HTTP");
        let http = probe.handler.http_get_action.unwrap();
        assert_eq!(http.port, 8080);
        assert_eq!(http.path, "/healthz");
        assert!(probe.handler.exec_action.is_none());
        assert_eq!(probe.period_seconds, 5);
    }

    #[test]
    fn exec_probe_copies_commands() {
        let c = container(
            "name: worker\nreadinessProbe:\n  exec:\n    command: [cat, /tmp/ready]\n",
        );
        let probe = project_probe(c.readiness_probe.as_ref().unwrap(), &c.ports).unwrap();
        assert_eq!(probe.handler.kind, "EXEC");
        assert_eq!(
            probe.handler.exec_action.unwrap().commands,
            ["cat", "/tmp/ready"]
        );
    }

    #[test]
    fn tcp_check_keeps_its_port() {
        let c = container(
            "name: cache\nports:\n  - containerPort: 6379\nlivenessProbe:\n  tcpSocket:\n    port: 6379\n",
        );
        let record = project_probe(c.liveness_probe.as_ref().unwrap(), &c.ports).unwrap();
        assert_eq!(record.handler.kind, "TCP");
        assert_eq!(record.handler.tcp_socket_action.unwrap().port, 6379);
    }

    #[test]
    fn handlerless_check_is_dropped() {
        let c = container("name: web\nlivenessProbe:\n  periodSeconds: 10\n");
        assert!(project_probe(c.liveness_probe.as_ref().unwrap(), &c.ports).is_none());
    }

    #[test]
    fn env_sources_default_optional_to_false() {
        let c = container(
            r#"
name: web
env:
  - name: PLAIN
    value: "1"
  - name: FROM_MAP
    valueFrom:
      configMapKeyRef:
        name: settings
        key: level
  - name: POD
    valueFrom:
      fieldRef:
        fieldPath: metadata.name
"#,
        );
        let vars: Vec<_> = c.env.iter().map(project_env_var).collect();
        assert_eq!(vars[0].value, "1");
        assert!(vars[0].env_source.is_none());
        let cm = vars[1]
            .env_source
            .as_ref()
            .and_then(|s| s.config_map_source.as_ref())
            .unwrap();
        assert_eq!(cm.config_map_name, "settings");
        assert!(!cm.optional);
        assert_eq!(
            vars[2].env_source.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "metadata.name"
        );
    }

    #[test]
    fn volume_kinds_are_tagged() {
        let volumes: Vec<Volume> = serde_yaml::from_str(
            r#"
- name: scratch
  emptyDir:
    medium: Memory
- name: data
  persistentVolumeClaim:
    claimName: data-claim
- name: host
  hostPath:
    path: /var/run
"#,
        )
        .unwrap();
        let records: Vec<_> = volumes.iter().map(project_volume).collect();
        assert_eq!(records[0].kind, "EMPTYDIR");
        assert_eq!(records[0].empty_dir.as_ref().unwrap().medium, "MEMORY");
        assert_eq!(records[1].kind, "PERSISTENTVOLUMECLAIM");
        assert_eq!(records[2].kind, "");
        assert_eq!(records[2].name, "host");
    }

    #[test]
    fn absent_quantities_project_as_zero() {
        let c = container("name: web\nresources:\n  limits:\n    cpu: 500m\n");
        let limits = resource_record(&c.resources.limits, "limits", "web").unwrap();
        assert_eq!(limits.cpu, "500m");
        assert_eq!(limits.memory, "0");
    }
}
