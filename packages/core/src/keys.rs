//! Output key naming.

/// Derives output storage keys from input keys.
///
/// The mapping is a pure function of the input key so a redelivered job
/// overwrites its earlier output instead of adding a new object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKeys {
    prefix: String,
}

impl OutputKeys {
    pub const DEFAULT_PREFIX: &'static str = "json-output/";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `<prefix><input key>.json`, with any leading `/` of the input dropped.
    pub fn output_key(&self, input_key: &str) -> String {
        let input_key = input_key.trim_start_matches('/');
        format!("{}{}.json", self.prefix, input_key)
    }
}

impl Default for OutputKeys {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}
