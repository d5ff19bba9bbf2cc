use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-disk format of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Text,
    Binary,
    Json,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Text => "txt",
            FileFormat::Binary => "bin",
            FileFormat::Json => "json",
        }
    }

    /// Guess the format of a file from its extension
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "json" => FileFormat::Json,
            Some(ext) if ext == "txt" || ext == "csv" || ext == "log" => FileFormat::Text,
            _ => FileFormat::Binary,
        }
    }
}

/// Kind of logged value a meta record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Metric,
    Parameter,
    Tag,
    Artifact,
}

impl MetaKind {
    fn folder(self) -> &'static str {
        match self {
            MetaKind::Metric => "metrics",
            MetaKind::Parameter => "parameters",
            MetaKind::Tag => "tags",
            MetaKind::Artifact => "artifacts",
        }
    }
}

/// Suffix every meta record path ends with
pub const META_SUFFIX: &str = ".meta.json";

/// Deterministic artifact path of the meta record for `key`
///
/// ```
/// use tracepads::backend::{meta_name, MetaKind};
///
/// assert_eq!(meta_name(MetaKind::Metric, "accuracy"), "metrics/accuracy.meta.json");
/// ```
pub fn meta_name(kind: MetaKind, key: &str) -> String {
    format!("{}/{}{}", kind.folder(), key, META_SUFFIX)
}

pub fn is_meta_path(path: &str) -> bool {
    path.ends_with(META_SUFFIX)
}

/// Meta record written alongside a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub name: String,
    #[serde(default)]
    pub step: Option<u64>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl MetricMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step: None,
            description: String::new(),
            additional_data: None,
        }
    }

    pub fn step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Meta record written alongside a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMeta {
    pub name: String,
    #[serde(default)]
    pub value_format: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl ParameterMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_format: "string".to_string(),
            description: String::new(),
            additional_data: None,
        }
    }

    pub fn value_format(mut self, format: impl Into<String>) -> Self {
        self.value_format = format.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Meta record written alongside a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMeta {
    pub name: String,
    #[serde(default)]
    pub value_format: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl TagMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_format: "string".to_string(),
            description: String::new(),
            additional_data: None,
        }
    }

    pub fn value_format(mut self, format: impl Into<String>) -> Self {
        self.value_format = format.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Meta record written alongside an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Path of the artifact relative to the run's artifact root
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl ArtifactMeta {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            file_format: FileFormat::from_path(&path),
            path,
            description: String::new(),
            additional_data: None,
        }
    }

    pub fn file_format(mut self, format: FileFormat) -> Self {
        self.file_format = format;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}
