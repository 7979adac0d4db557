use anyhow::{Context, Result};
use futures::SinkExt;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, LogParams, TerminalSize};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::model::{GridSize, Target};
use crate::transport::{DuplexRemote, DuplexTransport, Outbound, SimplexRemote, SimplexTransport};

const READ_BUFFER_BYTES: usize = 16 * 1024;
const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

/// Opens session transports. Implementations own credentials; sessions only
/// see the returned transport.
pub trait SessionConnector {
    fn open_duplex(&self, target: &Target) -> DuplexTransport;

    fn open_simplex(&self, target: &Target) -> SimplexTransport;
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LogOptions {
    pub tail_lines: Option<i64>,
    pub timestamps: bool,
    pub previous: bool,
}

impl LogOptions {
    fn params(&self, container: Option<String>) -> LogParams {
        LogParams {
            container,
            follow: !self.previous,
            previous: self.previous,
            tail_lines: self.tail_lines,
            timestamps: self.timestamps,
            ..LogParams::default()
        }
    }
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn new(context: Option<String>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; --context is unavailable in this environment");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());

        Ok(Self {
            client,
            context,
            cluster,
            default_namespace,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub async fn pod_containers(&self, namespace: &str, pod_name: &str) -> Result<Vec<String>> {
        let pod = self.fetch_pod(namespace, pod_name).await?;
        Ok(ordered_containers(&pod))
    }

    /// Fills in the namespace and container the way `kubectl exec` would.
    pub async fn resolve_target(
        &self,
        namespace: Option<String>,
        pod_name: &str,
        container: Option<String>,
    ) -> Result<Target> {
        let namespace = namespace
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.default_namespace.clone());
        let pod = self.fetch_pod(&namespace, pod_name).await?;
        let containers = ordered_containers(&pod);

        let container = match container.filter(|value| !value.trim().is_empty()) {
            Some(name) => {
                if !containers.is_empty() && !containers.contains(&name) {
                    anyhow::bail!(
                        "container '{name}' not found in pod {namespace}/{pod_name} (available: {})",
                        containers.join(", ")
                    );
                }
                Some(name)
            }
            None => default_container(&pod),
        };

        debug!(%namespace, pod_name, ?container, "resolved session target");
        Ok(Target::new(namespace, pod_name, container))
    }

    async fn fetch_pod(&self, namespace: &str, pod_name: &str) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(pod_name)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{pod_name}"))
    }
}

#[derive(Clone)]
pub struct KubeConnector {
    client: Client,
    shell: Vec<String>,
    logs: LogOptions,
}

impl KubeConnector {
    pub fn new(client: Client, shell: Vec<String>, logs: LogOptions) -> Self {
        Self {
            client,
            shell,
            logs,
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl SessionConnector for KubeConnector {
    fn open_duplex(&self, target: &Target) -> DuplexTransport {
        let (mut transport, remote) = DuplexTransport::pair();
        let task = tokio::spawn(run_exec(
            self.pods(&target.namespace),
            target.clone(),
            self.shell.clone(),
            remote,
        ));
        transport.attach(task);
        transport
    }

    fn open_simplex(&self, target: &Target) -> SimplexTransport {
        let (mut transport, remote) = SimplexTransport::pair();
        let params = self.logs.params(target.container.clone());
        let task = tokio::spawn(run_log_stream(
            self.pods(&target.namespace),
            target.clone(),
            params,
            remote,
        ));
        transport.attach(task);
        transport
    }
}

async fn run_exec(pods: Api<Pod>, target: Target, command: Vec<String>, mut remote: DuplexRemote) {
    if remote.is_detached() {
        return;
    }
    let mut params = AttachParams::interactive_tty();
    if let Some(container) = &target.container {
        params = params.container(container.clone());
    }

    let mut attached = match pods.exec(&target.pod_name, command, &params).await {
        Ok(attached) => attached,
        Err(error) => {
            warn!(pod = %target, "exec failed: {error}");
            remote.failed(SessionError::connection(error.to_string()));
            return;
        }
    };
    let (Some(mut stdin), Some(mut stdout)) = (attached.stdin(), attached.stdout()) else {
        remote.failed(SessionError::connection(
            "exec session did not expose stdin/stdout",
        ));
        attached.abort();
        return;
    };
    let mut resize = attached.terminal_size();
    if !remote.opened() {
        attached.abort();
        return;
    }
    info!(pod = %target, "exec stream established");

    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];
    loop {
        tokio::select! {
            read = stdout.read(&mut buffer) => match read {
                Ok(0) => {
                    remote.ended();
                    break;
                }
                Ok(size) => {
                    if !remote.chunk(buffer[..size].to_vec()) {
                        break;
                    }
                }
                Err(error) => {
                    remote.failed(SessionError::transport(error.to_string()));
                    break;
                }
            },
            outbound = remote.next_outbound() => match outbound {
                Some(Outbound::Input(bytes)) => {
                    let written = match stdin.write_all(&bytes).await {
                        Ok(()) => stdin.flush().await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = written {
                        remote.failed(SessionError::transport(error.to_string()));
                        break;
                    }
                }
                Some(Outbound::Resize(size)) => {
                    if let Some(resize) = resize.as_mut() {
                        send_resize(resize, size).await;
                    }
                }
                None => break,
            },
        }
    }

    attached.abort();
    debug!(pod = %target, "exec stream released");
}

async fn run_log_stream(pods: Api<Pod>, target: Target, params: LogParams, remote: SimplexRemote) {
    if remote.is_cancelled() {
        return;
    }
    let stream = match pods.log_stream(&target.pod_name, &params).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(pod = %target, "log stream failed to open: {error}");
            remote.failed(SessionError::connection(error.to_string()));
            return;
        }
    };
    let mut stream = Box::pin(stream);
    if !remote.opened() {
        return;
    }
    info!(pod = %target, follow = params.follow, "log stream established");

    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];
    loop {
        tokio::select! {
            _ = remote.cancelled() => break,
            read = futures::AsyncReadExt::read(&mut stream, &mut buffer) => match read {
                Ok(0) => {
                    remote.ended();
                    break;
                }
                Ok(size) => {
                    if !remote.chunk(buffer[..size].to_vec()) {
                        break;
                    }
                }
                Err(error) => {
                    remote.failed(SessionError::transport(error.to_string()));
                    break;
                }
            },
        }
    }
    debug!(pod = %target, "log stream released");
}

async fn send_resize(resize: &mut mpsc::Sender<TerminalSize>, size: GridSize) -> bool {
    let sent = resize
        .send(TerminalSize {
            width: size.cols,
            height: size.rows,
        })
        .await;
    if let Err(error) = &sent {
        trace!(cols = size.cols, rows = size.rows, "terminal resize not delivered: {error}");
    }
    sent.is_ok()
}

fn ordered_containers(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.containers
        .iter()
        .map(|container| container.name.clone())
        .collect()
}

fn default_container(pod: &Pod) -> Option<String> {
    let containers = ordered_containers(pod);
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(DEFAULT_CONTAINER_ANNOTATION))
        .filter(|name| containers.contains(name))
        .cloned()
        .or_else(|| containers.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::{LogOptions, default_container, ordered_containers, send_resize};
    use crate::model::GridSize;
    use futures::StreamExt;
    use futures::channel::mpsc;
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use std::collections::BTreeMap;

    fn pod(containers: &[&str], annotation: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.spec = Some(PodSpec {
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Container::default()
                })
                .collect(),
            ..PodSpec::default()
        });
        if let Some(annotation) = annotation {
            pod.metadata.annotations = Some(BTreeMap::from([(
                "kubectl.kubernetes.io/default-container".to_string(),
                annotation.to_string(),
            )]));
        }
        pod
    }

    #[test]
    fn default_container_prefers_annotation() {
        let pod = pod(&["istio-proxy", "app"], Some("app"));
        assert_eq!(default_container(&pod), Some("app".to_string()));
    }

    #[test]
    fn default_container_falls_back_to_first() {
        let pod = pod(&["app", "sidecar"], Some("missing"));
        assert_eq!(default_container(&pod), Some("app".to_string()));
        assert_eq!(ordered_containers(&pod), vec!["app", "sidecar"]);
    }

    #[test]
    fn default_container_is_absent_without_spec() {
        assert_eq!(default_container(&Pod::default()), None);
    }

    #[tokio::test]
    async fn resize_reports_closed_channel_instead_of_failing() {
        let (mut tx, mut rx) = mpsc::channel(4);
        assert!(send_resize(&mut tx, GridSize::new(100, 30)).await);
        let delivered = rx.next().await.unwrap();
        assert_eq!((delivered.width, delivered.height), (100, 30));

        drop(rx);
        assert!(!send_resize(&mut tx, GridSize::new(80, 24)).await);
    }

    #[test]
    fn log_params_follow_unless_previous() {
        let live = LogOptions {
            tail_lines: Some(200),
            timestamps: true,
            previous: false,
        }
        .params(Some("app".to_string()));
        assert!(live.follow);
        assert_eq!(live.tail_lines, Some(200));
        assert_eq!(live.container.as_deref(), Some("app"));

        let previous = LogOptions {
            previous: true,
            ..LogOptions::default()
        }
        .params(None);
        assert!(!previous.follow);
        assert!(previous.previous);
    }
}
