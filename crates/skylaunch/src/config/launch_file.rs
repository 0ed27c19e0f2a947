//! Launch description YAML schema definitions

use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Root launch description
///
/// The `launch` sequence is ordered: document order is resolution order for
/// argument declarations, parameter loads, includes, and nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Ordered sequence of launch items
    pub launch: Vec<LaunchItem>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A single item in a launch description
///
/// Items are written as single-key mappings (`- arg: {...}`, `- node: {...}`),
/// so the serde representation is hand-rolled: a derived externally tagged
/// enum would demand YAML type tags instead.
#[derive(Debug, Clone)]
pub enum LaunchItem {
    /// Argument declaration with an optional default
    Arg(ArgDecl),
    /// Structured parameter file load into the current namespace
    Rosparam(RosparamDecl),
    /// Expansion of another launch description
    Include(IncludeDecl),
    /// A process to spawn and supervise
    Node(NodeDecl),
}

const LAUNCH_ITEM_KINDS: &[&str] = &["arg", "rosparam", "include", "node"];

impl<'de> Deserialize<'de> for LaunchItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ItemVisitor;

        impl<'de> Visitor<'de> for ItemVisitor {
            type Value = LaunchItem;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a mapping with a single key: arg, rosparam, include, or node")
            }

            fn visit_map<A>(self, mut map: A) -> Result<LaunchItem, A::Error>
            where
                A: MapAccess<'de>,
            {
                let kind: String = map
                    .next_key()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;

                let item = match kind.as_str() {
                    "arg" => LaunchItem::Arg(map.next_value()?),
                    "rosparam" => LaunchItem::Rosparam(map.next_value()?),
                    "include" => LaunchItem::Include(map.next_value()?),
                    "node" => LaunchItem::Node(map.next_value()?),
                    other => return Err(de::Error::unknown_variant(other, LAUNCH_ITEM_KINDS)),
                };

                if let Some(extra) = map.next_key::<String>()? {
                    return Err(de::Error::custom(format!(
                        "launch item has a second key '{}'; each item holds exactly one of {}",
                        extra,
                        LAUNCH_ITEM_KINDS.join(", ")
                    )));
                }

                Ok(item)
            }
        }

        deserializer.deserialize_map(ItemVisitor)
    }
}

impl Serialize for LaunchItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            LaunchItem::Arg(decl) => map.serialize_entry("arg", decl)?,
            LaunchItem::Rosparam(decl) => map.serialize_entry("rosparam", decl)?,
            LaunchItem::Include(decl) => map.serialize_entry("include", decl)?,
            LaunchItem::Node(decl) => map.serialize_entry("node", decl)?,
        }
        map.end()
    }
}

impl LaunchItem {
    /// Short description of the item for error locations
    pub fn describe(&self) -> String {
        match self {
            LaunchItem::Arg(a) => format!("arg '{}'", a.name),
            LaunchItem::Rosparam(r) => format!("rosparam load '{}'", r.file),
            LaunchItem::Include(i) => format!("include '{}'", i.file),
            LaunchItem::Node(n) => format!("node '{}'", n.name),
        }
    }
}

/// Argument declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDecl {
    /// Argument name
    pub name: String,
    /// Default value, used when the including scope supplies no override
    #[serde(default)]
    pub default: Option<ArgValue>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// Parameter file load directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosparamDecl {
    /// Only `load` is supported
    #[serde(default)]
    pub command: RosparamCommand,
    /// Path to the parameter file (substitutions allowed)
    pub file: String,
    /// Namespace to load under, relative to the current scope
    #[serde(default)]
    pub ns: Option<String>,
}

/// Supported rosparam commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RosparamCommand {
    #[default]
    Load,
}

/// Include directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeDecl {
    /// Path to the included description (substitutions allowed)
    pub file: String,
    /// Namespace pushed onto everything defined by the included description.
    /// Absent means the child shares the parent's namespace.
    #[serde(default)]
    pub ns: Option<String>,
    /// Argument overrides for the included description, resolved in the
    /// including scope before recursion
    #[serde(default)]
    pub args: IndexMap<String, String>,
}

/// Node (process) declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDecl {
    /// Package name, resolved through the package registry.
    /// Mutually exclusive with `executable`; requires `type`.
    #[serde(default)]
    pub pkg: Option<String>,

    /// Executable name within the package
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,

    /// Direct executable path (for binaries outside any package)
    /// Mutually exclusive with `pkg`
    #[serde(default)]
    pub executable: Option<String>,

    /// Node name, unique within the resolved tree after namespacing
    pub name: String,

    /// Where the child's stdout/stderr goes
    #[serde(default)]
    pub output: OutputMode,

    /// Policy applied when the process exits unexpectedly
    #[serde(default)]
    pub on_exit: ExitPolicy,

    /// Node-private parameters (ordered; substitutions allowed in values)
    #[serde(default)]
    pub params: IndexMap<String, String>,

    /// Raw arguments passed directly to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables specific to this node
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Output handling for a node's stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Stream the child's output through the supervisor's own log output
    Screen,
    /// Redirect to a per-node log file
    #[default]
    Log,
}

/// Policy applied when a supervised process exits without a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// Any unexpected exit tears down the whole group
    #[default]
    Required,
    /// Restart the process after a delay
    Respawn,
    /// Log the exit and continue
    Ignore,
}

impl LaunchFile {
    /// Load a launch description from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a launch description from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch description structure
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        for item in &self.launch {
            match item {
                LaunchItem::Arg(arg) => {
                    if arg.name.is_empty() {
                        return Err(LaunchFileError::Validation(
                            "arg declaration with empty name".to_string(),
                        ));
                    }
                }
                LaunchItem::Rosparam(rosparam) => {
                    if rosparam.file.is_empty() {
                        return Err(LaunchFileError::Validation(
                            "rosparam load with empty file".to_string(),
                        ));
                    }
                }
                LaunchItem::Include(include) => {
                    if include.file.is_empty() {
                        return Err(LaunchFileError::Validation(
                            "include with empty file".to_string(),
                        ));
                    }
                }
                LaunchItem::Node(node) => {
                    if node.name.is_empty() {
                        return Err(LaunchFileError::Validation(
                            "node with empty name".to_string(),
                        ));
                    }
                    if node.name.contains('/') {
                        return Err(LaunchFileError::Validation(format!(
                            "Node '{}': names must not contain '/'; use an include 'ns' to namespace",
                            node.name
                        )));
                    }
                    // Check that either pkg+type or executable is specified
                    match (&node.pkg, &node.node_type, &node.executable) {
                        (Some(_), Some(_), None) => {} // pkg + type: OK
                        (None, None, Some(_)) => {}    // executable: OK
                        (Some(_), None, None) => {
                            return Err(LaunchFileError::Validation(format!(
                                "Node '{}': 'pkg' requires 'type' to be specified",
                                node.name
                            )));
                        }
                        (None, Some(_), None) => {
                            return Err(LaunchFileError::Validation(format!(
                                "Node '{}': 'type' requires 'pkg' to be specified",
                                node.name
                            )));
                        }
                        (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => {
                            return Err(LaunchFileError::Validation(format!(
                                "Node '{}': cannot specify both 'pkg'/'type' and 'executable'",
                                node.name
                            )));
                        }
                        (None, None, None) => {
                            return Err(LaunchFileError::Validation(format!(
                                "Node '{}': must specify either 'pkg'+'type' or 'executable'",
                                node.name
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Errors that can occur when loading a launch description
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_launch_file() {
        let yaml = r#"
version: "1.0"
launch:
  - arg: { name: env, default: "envA" }
  - rosparam: { command: load, file: "config/base.yaml" }
  - node:
      pkg: mavros_gym
      type: agent_node
      name: agent
      output: screen
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        assert_eq!(launch_file.launch.len(), 3);
        assert!(matches!(launch_file.launch[0], LaunchItem::Arg(_)));
        assert!(matches!(launch_file.launch[1], LaunchItem::Rosparam(_)));
        assert!(matches!(launch_file.launch[2], LaunchItem::Node(_)));
    }

    #[test]
    fn test_items_keep_document_order() {
        let yaml = r#"
launch:
  - node: { executable: "bin/b", name: b }
  - node: { executable: "bin/a", name: a }
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let names: Vec<_> = launch_file
            .launch
            .iter()
            .map(|item| item.describe())
            .collect();
        assert_eq!(names, vec!["node 'b'", "node 'a'"]);
    }

    #[test]
    fn test_node_defaults() {
        let yaml = r#"
launch:
  - node: { executable: "bin/a", name: a }
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let LaunchItem::Node(node) = &launch_file.launch[0] else {
            panic!("expected node");
        };
        assert_eq!(node.output, OutputMode::Log);
        assert_eq!(node.on_exit, ExitPolicy::Required);
        assert!(node.params.is_empty());
    }

    #[test]
    fn test_validation_missing_type() {
        let yaml = r#"
launch:
  - node: { pkg: some_package, name: bad }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Validation(_))));
    }

    #[test]
    fn test_validation_pkg_and_executable_conflict() {
        let yaml = r#"
launch:
  - node: { pkg: p, type: t, executable: "bin/x", name: bad }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Validation(_))));
    }

    #[test]
    fn test_validation_slash_in_node_name() {
        let yaml = r#"
launch:
  - node: { executable: "bin/a", name: "ns/a" }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Validation(_))));
    }

    #[test]
    fn test_include_with_overrides() {
        let yaml = r#"
launch:
  - include:
      file: "launch/sim.launch.yaml"
      ns: sim
      args: { env: "envB" }
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let LaunchItem::Include(include) = &launch_file.launch[0] else {
            panic!("expected include");
        };
        assert_eq!(include.ns.as_deref(), Some("sim"));
        assert_eq!(include.args.get("env").map(String::as_str), Some("envB"));
    }

    #[test]
    fn test_arg_value_as_str() {
        assert_eq!(ArgValue::Bool(true).as_str(), "true");
        assert_eq!(ArgValue::Int(42).as_str(), "42");
        assert_eq!(ArgValue::String("x".into()).as_str(), "x");
    }

    #[test]
    fn test_items_round_trip_as_single_key_mappings() {
        let yaml = r#"
launch:
  - arg: { name: env, default: "envA" }
  - node: { executable: "bin/a", name: a }
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let rendered = serde_yaml::to_string(&launch_file).unwrap();
        // The serialized form is the same untagged single-key shape
        assert!(rendered.contains("- arg:"));
        assert!(rendered.contains("- node:"));
        assert!(!rendered.contains('!'));

        let reparsed = LaunchFile::from_yaml(&rendered).unwrap();
        assert_eq!(reparsed.launch.len(), 2);
        assert!(matches!(reparsed.launch[0], LaunchItem::Arg(_)));
        assert!(matches!(reparsed.launch[1], LaunchItem::Node(_)));
    }

    #[test]
    fn test_unknown_item_kind_rejected() {
        let yaml = r#"
launch:
  - group: { name: sensors }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Parse(_))));
    }

    #[test]
    fn test_item_with_two_keys_rejected() {
        let yaml = r#"
launch:
  - arg: { name: env }
    node: { executable: "bin/a", name: a }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Parse(_))));
    }

    #[test]
    fn test_unknown_rosparam_command_rejected() {
        let yaml = r#"
launch:
  - rosparam: { command: dump, file: "out.yaml" }
"#;
        let result = LaunchFile::from_yaml(yaml);
        assert!(matches!(result, Err(LaunchFileError::Parse(_))));
    }
}
