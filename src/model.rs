use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Target {
    pub namespace: String,
    pub pod_name: String,
    pub container: Option<String>,
}

impl Target {
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container: Option<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container: container.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn with_container(&self, container: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace.clone(),
            pod_name: self.pod_name.clone(),
            container: Some(container.into()),
        }
    }

    /// `pod (container)` when a container is known, otherwise just the pod.
    pub fn label(&self) -> String {
        match &self.container {
            Some(container) => format!("{} ({container})", self.pod_name),
            None => self.pod_name.clone(),
        }
    }

    pub fn export_file_name(&self) -> String {
        let sanitized = self
            .pod_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        format!("{sanitized}.log")
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)?;
        if let Some(container) = &self.container {
            write!(f, ":{container}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GridSize {
    pub cols: u16,
    pub rows: u16,
}

impl GridSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Closed,
}

impl ConnectionState {
    pub fn title(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Error | Self::Closed)
    }
}
