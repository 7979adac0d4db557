use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SHELL: [&str; 3] = [
    "sh",
    "-c",
    "command -v bash >/dev/null 2>&1 && exec bash || exec sh",
];

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConsoleConfig {
    pub source: Option<String>,
    pub shell: Vec<String>,
    pub tail_lines: Option<i64>,
    pub timestamps: bool,
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConsoleConfigFile {
    #[serde(default, alias = "command", alias = "exec")]
    shell: Vec<String>,
    #[serde(default, alias = "tail")]
    tail_lines: Option<i64>,
    #[serde(default)]
    timestamps: bool,
    #[serde(default, alias = "export")]
    export_dir: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            source: None,
            shell: DEFAULT_SHELL.iter().map(|part| part.to_string()).collect(),
            tail_lines: None,
            timestamps: false,
            export_dir: PathBuf::from("."),
        }
    }
}

impl ConsoleConfig {
    pub fn discover() -> Result<Self> {
        match discover_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.source = Some(path.display().to_string());
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self> {
        let parsed: ConsoleConfigFile = if raw.trim().is_empty() {
            ConsoleConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        let defaults = Self::default();

        let shell = parsed
            .shell
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>();
        Ok(Self {
            source: None,
            shell: if shell.is_empty() { defaults.shell } else { shell },
            tail_lines: parsed.tail_lines.filter(|lines| *lines > 0),
            timestamps: parsed.timestamps,
            export_dir: parsed.export_dir.unwrap_or(defaults.export_dir),
        })
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PODLINK_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("podlink.yaml"),
        PathBuf::from("podlink.yml"),
        PathBuf::from(".podlink.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/podlink/config.yaml"),
            PathBuf::from(&home).join(".config/podlink/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
