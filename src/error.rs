//! Central error handling for the MLAA pipeline
//!
//! Provides a unified [`MlaaError`] enum with consistent categorization, the
//! [`ErrorPolicy`] that decides whether a failing call stops the pipeline, and the
//! [`StatusLatch`] that records failures the permissive policy lets through.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Centralized error type for all pipeline operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MlaaError {
    #[error("Resource creation error: {0}")]
    ResourceCreation(String),

    #[error("Shader compilation error: {0}")]
    ShaderCompilation(String),

    #[error("Binding error: parameter '{0}' not found in effect")]
    MissingParameter(String),

    #[error("Binding error: technique '{0}' not found in effect")]
    MissingTechnique(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Asset error: {0}")]
    Asset(String),
}

impl MlaaError {
    /// Short category label used as a log prefix
    pub fn category(&self) -> &'static str {
        match self {
            MlaaError::ResourceCreation(_) => "Resource",
            MlaaError::ShaderCompilation(_) => "Shader",
            MlaaError::MissingParameter(_) | MlaaError::MissingTechnique(_) => "Binding",
            MlaaError::InvalidArgument(_) => "Argument",
            MlaaError::Submission(_) => "Submission",
            MlaaError::Asset(_) => "Asset",
        }
    }

    /// Convenience constructors for common error types
    pub fn resource<T: ToString>(msg: T) -> Self {
        MlaaError::ResourceCreation(msg.to_string())
    }

    pub fn shader<T: ToString>(msg: T) -> Self {
        MlaaError::ShaderCompilation(msg.to_string())
    }

    pub fn invalid<T: ToString>(msg: T) -> Self {
        MlaaError::InvalidArgument(msg.to_string())
    }

    pub fn submission<T: ToString>(msg: T) -> Self {
        MlaaError::Submission(msg.to_string())
    }

    pub fn asset<T: ToString>(msg: T) -> Self {
        MlaaError::Asset(msg.to_string())
    }
}

/// Result type alias for pipeline operations
pub type MlaaResult<T> = Result<T, MlaaError>;

/// How a failing device or effect call is handled.
///
/// `Strict` traces the failing call and propagates the first error immediately.
/// `Permissive` traces it, latches it and lets the remaining calls of the frame run.
/// Invalid input modes abort the run under either policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    Strict,
    Permissive,
}

impl ErrorPolicy {
    /// Debug builds are strict, release builds permissive.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            ErrorPolicy::Strict
        } else {
            ErrorPolicy::Permissive
        }
    }

    pub fn canonical(self) -> &'static str {
        match self {
            ErrorPolicy::Strict => "strict",
            ErrorPolicy::Permissive => "permissive",
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::for_build()
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl std::str::FromStr for ErrorPolicy {
    type Err = MlaaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "debug" => Ok(ErrorPolicy::Strict),
            "permissive" | "release" => Ok(ErrorPolicy::Permissive),
            other => Err(MlaaError::invalid(format!("unknown error policy '{other}'"))),
        }
    }
}

/// First-failure latch shared by construction and every run.
///
/// Keeps the first error since the last reset so that a later successful call
/// cannot mask an earlier failure.
#[derive(Debug, Default)]
pub struct StatusLatch {
    first: Option<MlaaError>,
    frame: Option<MlaaError>,
    failures: u32,
}

impl StatusLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn latch(&mut self, err: MlaaError) {
        self.failures = self.failures.saturating_add(1);
        if self.frame.is_none() {
            self.frame = Some(err.clone());
        }
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    /// Forget the per-frame failure; the persistent status is kept.
    pub fn begin_frame(&mut self) {
        self.frame = None;
    }

    /// First failure recorded since [`StatusLatch::begin_frame`]
    pub fn frame_result(&self) -> MlaaResult<()> {
        match &self.frame {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// First failure recorded since construction or the last [`StatusLatch::clear`]
    pub fn status(&self) -> MlaaResult<()> {
        match &self.first {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Total number of failures latched since the last clear
    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Route the result of one device/effect call through the active policy.
///
/// `call` names the operation for the diagnostic trace.
pub fn check(
    policy: ErrorPolicy,
    latch: &mut StatusLatch,
    call: &str,
    result: MlaaResult<()>,
) -> MlaaResult<()> {
    let Err(err) = result else {
        return Ok(());
    };

    match policy {
        ErrorPolicy::Strict => {
            log::error!(target: "mlaa", "[{}] {} failed: {}", err.category(), call, err);
            latch.latch(err.clone());
            Err(err)
        }
        ErrorPolicy::Permissive => {
            log::warn!(target: "mlaa", "[{}] {} failed, continuing: {}", err.category(), call, err);
            latch.latch(err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_propagates_and_latches() {
        let mut latch = StatusLatch::new();
        let err = MlaaError::submission("device lost");
        let result = check(ErrorPolicy::Strict, &mut latch, "Clear", Err(err.clone()));
        assert_eq!(result, Err(err.clone()));
        assert_eq!(latch.status(), Err(err));
    }

    #[test]
    fn permissive_continues_but_remembers_first_failure() {
        let mut latch = StatusLatch::new();
        let first = MlaaError::submission("first");
        let second = MlaaError::submission("second");

        assert!(check(ErrorPolicy::Permissive, &mut latch, "A", Err(first.clone())).is_ok());
        assert!(check(ErrorPolicy::Permissive, &mut latch, "B", Ok(())).is_ok());
        assert!(check(ErrorPolicy::Permissive, &mut latch, "C", Err(second)).is_ok());

        assert_eq!(latch.status(), Err(first.clone()));
        assert_eq!(latch.frame_result(), Err(first));
        assert_eq!(latch.failure_count(), 2);
    }

    #[test]
    fn frame_reset_keeps_persistent_status() {
        let mut latch = StatusLatch::new();
        latch.latch(MlaaError::submission("old"));
        latch.begin_frame();
        assert!(latch.frame_result().is_ok());
        assert!(latch.status().is_err());
        latch.clear();
        assert!(latch.status().is_ok());
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!("Strict".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Strict);
        assert_eq!("release".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Permissive);
        assert!("lenient".parse::<ErrorPolicy>().is_err());
    }
}
