//! Document transforms.
//!
//! A [`Transform`] is a pure byte-to-byte conversion: no I/O, no state, and
//! the same input always yields the same output. Errors mean the input is
//! malformed, never that the conversion should simply be tried again.

mod error;
pub mod sample;
mod xml_json;

pub use error::TransformError;
pub use xml_json::XmlToJson;

/// A pure converter from one document format to another.
pub trait Transform: Send + Sync + 'static {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Convert `input` into the target format.
    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, TransformError>;
}
