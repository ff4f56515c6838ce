//! Interfaces to the layers around the container.
//!
//! Serialization formats and parameter documentation live outside this
//! crate; these traits are the seams they plug into.

use crate::container::ConfigContainer;
use crate::error::Result;

/// Documentation for one parameter or group, keyed by its tree path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub path: String,
    pub help: String,
    pub default: Option<String>,
    pub mandatory: bool,
}

/// Source of parameter documentation.
pub trait DescriptorLookup: Send + Sync {
    /// Describe the parameter or group at `path`. Fails with
    /// [`ConfigError::NotDescribed`](crate::ConfigError::NotDescribed) for
    /// unknown paths.
    fn describe(&self, path: &str) -> Result<ParameterDescriptor>;
}

/// Round-trips a container's tree through an external representation.
pub trait TreeLoaderSaver: Send + Sync {
    /// Populate `container` from a serialized tree.
    fn load(&self, input: &str, container: &ConfigContainer) -> Result<()>;

    /// Serialize the groups and parameters of `container`.
    fn save(&self, container: &ConfigContainer) -> Result<String>;
}
