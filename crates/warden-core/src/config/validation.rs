//! Configuration validation

use super::model::WardenConfig;
use crate::error::WardenResult;
use crate::policy::PolicyValidator;

/// Fail fast on configuration that no component could run with
///
/// Rejects zero limits, a zero batch size, zero engine ceilings, malformed CSP
/// sources, an unparsable self origin and an unknown log level or format.
pub fn validate_config(config: &WardenConfig) -> WardenResult<()> {
    config.limits.validate()?;
    config.batcher.validate()?;
    config.sandbox.validate()?;
    config.logging.validate()?;
    // Compiles every source list and the self origin
    PolicyValidator::new(config.csp.clone())?;
    Ok(())
}
