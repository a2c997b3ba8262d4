use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Invocation name used as argv[0] when none is configured.
pub const DEFAULT_PROGRAM_NAME: &str = "program";

/// Opaque locator of the program a worker host should execute.
///
/// The controller never interprets it; the process worker host treats it as
/// an executable path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramRef(String);

impl ProgramRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProgramRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Virtual filesystem snapshot: path to file content.
///
/// Directories are implied by path prefixes only. In serialized form, content
/// that is valid UTF-8 is written as a string and anything else as a byte
/// array; both forms are accepted on input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsSnapshot(BTreeMap<String, Vec<u8>>);

impl FsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.0.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.0.get(path).map(Vec::as_slice)
    }

    /// Content of `path` decoded as UTF-8, if present and valid.
    pub fn get_text(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.0.remove(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_slice()))
    }
}

impl FromIterator<(String, Vec<u8>)> for FsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ContentRepr {
    Text(String),
    Bytes(Vec<u8>),
}

impl Serialize for FsSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr: BTreeMap<&str, ContentRepr> = self
            .0
            .iter()
            .map(|(path, content)| {
                let value = match std::str::from_utf8(content) {
                    Ok(text) => ContentRepr::Text(text.to_string()),
                    Err(_) => ContentRepr::Bytes(content.clone()),
                };
                (path.as_str(), value)
            })
            .collect();
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FsSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = BTreeMap::<String, ContentRepr>::deserialize(deserializer)?;
        Ok(repr
            .into_iter()
            .map(|(path, content)| {
                let bytes = match content {
                    ContentRepr::Text(text) => text.into_bytes(),
                    ContentRepr::Bytes(bytes) => bytes,
                };
                (path, bytes)
            })
            .collect())
    }
}

/// Resolved parameters for the next run.
///
/// Mutated only through configuration updates; the controller snapshots it at
/// the start of each run, so changes made while a run is active apply to the
/// next one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfiguration {
    /// Program locator.
    pub src: ProgramRef,
    /// Invocation name, passed as argv[0].
    pub name: String,
    /// Arguments following the invocation name.
    pub args: Vec<String>,
    /// Environment visible to the program.
    pub env: BTreeMap<String, String>,
    /// Initial virtual filesystem.
    pub fs: FsSnapshot,
    /// Do not echo input locally before forwarding it.
    pub disable_echo: bool,
    /// Tell the worker its standard streams are not a terminal.
    pub disable_tty: bool,
    /// Host should show run/stop controls.
    pub controls: bool,
    /// Run once as soon as this flag is first set.
    pub autorun: bool,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            src: ProgramRef::default(),
            name: DEFAULT_PROGRAM_NAME.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            fs: FsSnapshot::default(),
            disable_echo: false,
            disable_tty: false,
            controls: false,
            autorun: false,
        }
    }
}

impl RunConfiguration {
    /// Full argument vector: invocation name followed by the arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_starts_with_name() {
        let config = RunConfiguration {
            args: vec!["-n".to_string(), "3".to_string()],
            ..RunConfiguration::default()
        };
        assert_eq!(config.argv(), vec!["program", "-n", "3"]);
    }

    #[test]
    fn fs_snapshot_serializes_text_and_binary() {
        let mut fs = FsSnapshot::new();
        fs.insert("/a.txt", "hello");
        fs.insert("/b.bin", vec![0xff, 0x00]);
        let value = serde_json::to_value(&fs).unwrap();
        assert_eq!(value["/a.txt"], "hello");
        assert_eq!(value["/b.bin"], serde_json::json!([255, 0]));

        let back: FsSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, fs);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: RunConfiguration =
            serde_json::from_str(r#"{"src": "/bin/echo", "disable_echo": true}"#).unwrap();
        assert_eq!(config.src.as_str(), "/bin/echo");
        assert_eq!(config.name, DEFAULT_PROGRAM_NAME);
        assert!(config.disable_echo);
        assert!(!config.autorun);
    }
}
