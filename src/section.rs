//! Parsed configuration-section tree.
//!
//! The registry does not parse configuration grammar itself; it consumes
//! an already-parsed tree of key/value sections. This module provides that
//! representation plus a YAML loader for it, so client definitions read:
//!
//! ```yaml
//! client dell-switch:
//!   ipaddr: 192.0.2.1
//!   secret: s3cr3t
//!   limit:
//!     max_connections: 32
//! ```
//!
//! A two-part key ("client dell-switch") names the section and carries its
//! distinguishing label.

use std::path::Path;
use std::time::Duration;

use serde_yaml::Value;

use crate::error::ClientError;

/// One entry in a section: either a scalar value or a nested section.
#[derive(Debug, Clone)]
pub enum Entry {
    Value(String),
    Section(Section),
}

/// A named key/value section with optional nested sections.
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    label: Option<String>,
    entries: Vec<(String, Entry)>,
}

impl Section {
    pub fn new(name: &str, label: Option<&str>) -> Self {
        Section {
            name: name.to_string(),
            label: label.map(String::from),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn push_value(&mut self, key: &str, value: &str) {
        self.entries
            .push((key.to_string(), Entry::Value(value.to_string())));
    }

    pub fn push_section(&mut self, section: Section) {
        self.entries
            .push((section.name.clone(), Entry::Section(section)));
    }

    /// First scalar value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, e)| match e {
            Entry::Value(v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    /// First nested section named `name`.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.entries.iter().find_map(|(k, e)| match e {
            Entry::Section(s) if k == name => Some(s),
            _ => None,
        })
    }

    /// All nested sections named `name`, in definition order.
    pub fn sections<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> {
        self.entries.iter().filter_map(move |(k, e)| match e {
            Entry::Section(s) if k == name => Some(s),
            _ => None,
        })
    }

    /// Boolean value with a default, accepting yes/no style tokens.
    pub fn bool_value(&self, key: &str, default: bool) -> Result<bool, ClientError> {
        match self.value(key) {
            None => Ok(default),
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ClientError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got '{}'", raw),
                }),
            },
        }
    }

    /// Unsigned integer value with a default.
    pub fn u32_value(&self, key: &str, default: u32) -> Result<u32, ClientError> {
        match self.value(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<u32>().map_err(|e| ClientError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected an unsigned integer, got '{}': {}", raw, e),
            }),
        }
    }

    /// Duration value in humantime form ("500ms", "30s"), absent is None.
    pub fn duration_value(&self, key: &str) -> Result<Option<Duration>, ClientError> {
        match self.value(key) {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| ClientError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected a duration, got '{}': {}", raw, e),
                }),
        }
    }

    /// Parse a YAML document into a section tree rooted at "main".
    pub fn from_yaml_str(yaml: &str) -> Result<Section, ClientError> {
        let value: Value = serde_yaml::from_str(yaml).map_err(|e| ClientError::InvalidValue {
            key: "main".to_string(),
            reason: format!("{}", e),
        })?;
        section_from_value("main", None, &value)
    }

    /// Parse a YAML file into a section tree rooted at "main".
    pub fn from_yaml_file(path: &Path) -> Result<Section, ClientError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ClientError::InvalidClientFile {
                path: path.display().to_string(),
                reason: format!("{}", e),
            })?;
        Section::from_yaml_str(&contents).map_err(|e| ClientError::InvalidClientFile {
            path: path.display().to_string(),
            reason: format!("{}", e),
        })
    }
}

fn section_from_value(name: &str, label: Option<&str>, value: &Value) -> Result<Section, ClientError> {
    let mapping = value.as_mapping().ok_or_else(|| ClientError::InvalidValue {
        key: name.to_string(),
        reason: "expected a mapping".to_string(),
    })?;

    let mut section = Section::new(name, label);
    for (key, val) in mapping {
        let key = key.as_str().ok_or_else(|| ClientError::InvalidValue {
            key: name.to_string(),
            reason: "section keys must be strings".to_string(),
        })?;

        match val {
            Value::Mapping(_) => {
                // Two-part keys carry the section's distinguishing label.
                let (sub_name, sub_label) = match key.split_once(char::is_whitespace) {
                    Some((n, l)) => (n, Some(l.trim())),
                    None => (key, None),
                };
                section.push_section(section_from_value(sub_name, sub_label, val)?);
            }
            Value::String(s) => section.push_value(key, s),
            Value::Number(n) => section.push_value(key, &n.to_string()),
            Value::Bool(b) => section.push_value(key, if *b { "true" } else { "false" }),
            Value::Null => section.push_value(key, ""),
            _ => {
                return Err(ClientError::InvalidValue {
                    key: key.to_string(),
                    reason: "lists are not supported in client sections".to_string(),
                })
            }
        }
    }
    Ok(section)
}
