use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// On-disk job descriptor as uploaded by the remote client.
///
/// Only `manifest` is interpreted here. Every other key is carried through
/// untouched for the item processor (model name, language, command, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub manifest: Vec<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

/// One job folder under the working directory, with its manifest already
/// filtered down to items that still lack a completion marker.
#[derive(Debug, Clone)]
pub struct JobUnit {
    pub jobdir: PathBuf,
    pub descriptor_path: PathBuf,
    pub manifest: Vec<String>,
    /// Manifest length before filtering.
    pub total_items: usize,
    pub params: BTreeMap<String, Value>,
    pub modified: SystemTime,
    pub settled: bool,
}

impl JobUnit {
    /// Folder name of the job, used in logs and status output.
    pub fn name(&self) -> String {
        self.jobdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.jobdir.display().to_string())
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// String parameter lookup; non-string values are treated as absent.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.manifest.is_empty()
    }
}

/// A single pending manifest entry handed to the item processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub name: String,
    /// Input file for the item inside the job folder.
    pub path: PathBuf,
    /// The processor writes this file once the item is done.
    pub marker: PathBuf,
}
