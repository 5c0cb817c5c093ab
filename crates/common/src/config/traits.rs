//! # Configuration Traits

use crate::error::SvcadmError;

/// Configuration validation trait
pub trait ConfigValidation {
    type Error: SvcadmError;

    /// Validate the configuration
    fn validate(&self) -> Result<(), Self::Error>;

    /// Get configuration warnings (non-fatal issues)
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}
