use thiserror::Error;

use super::format::AudioSystem;

/// Errors that can occur during stream operations.
///
/// Native backend faults are carried as opaque codes in [`StreamError::Backend`]
/// and are never reinterpreted by the engine — they travel from the driver to
/// the caller unchanged. Under/overruns are not errors; they are reported
/// through the XRun notification callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("{system:?} backend fault {code}")]
    Backend { system: AudioSystem, code: u32 },

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("stream already running")]
    AlreadyRunning,

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl StreamError {
    /// A native fault from the given backend, passed through verbatim.
    pub fn backend(system: AudioSystem, code: u32) -> Self {
        Self::Backend { system, code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_fault_is_opaque() {
        let err = StreamError::backend(AudioSystem::Asio, 0x8000_0001);
        assert_eq!(
            err,
            StreamError::Backend {
                system: AudioSystem::Asio,
                code: 0x8000_0001
            }
        );
    }

    #[test]
    fn display_messages() {
        let err = StreamError::InvalidConfig("master index out of range".into());
        assert_eq!(
            err.to_string(),
            "invalid stream configuration: master index out of range"
        );
        assert_eq!(StreamError::DeviceNotAvailable.to_string(), "device not available");
    }
}
