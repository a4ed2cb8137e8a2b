use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Resource guard installed while secure processing is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Largest schema or instance document accepted, in bytes
    pub max_document_bytes: usize,
    /// Deepest element nesting accepted from pushed events
    pub max_element_depth: usize,
    /// Whether the backend may fetch network resources itself
    pub allow_network: bool,
}

impl ResourceLimits {
    /// Limits applied when secure processing is switched on
    pub fn secure() -> Self {
        Self {
            max_document_bytes: 64 * 1024 * 1024,
            max_element_depth: 256,
            allow_network: false,
        }
    }

    pub fn check_document_size(&self, size: usize, what: &str) -> Result<()> {
        if size > self.max_document_bytes {
            return Err(SchemaError::LimitExceeded {
                details: format!(
                    "{} is {} bytes, limit is {} bytes",
                    what, size, self.max_document_bytes
                ),
            });
        }
        Ok(())
    }

    pub fn check_element_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_element_depth {
            return Err(SchemaError::LimitExceeded {
                details: format!(
                    "element depth {} exceeds limit of {}",
                    depth, self.max_element_depth
                ),
            });
        }
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::secure()
    }
}
