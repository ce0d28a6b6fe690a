use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// No adapter/driver combination could produce a usable device.
    DeviceUnavailable(String),

    /// The requested output does not exist, is already duplicated by
    /// another process, or cannot be duplicated at all.
    OutputUnavailable(String),

    /// The duplication handle was invalidated by the platform (mode
    /// change, secure desktop, fullscreen app) and must be recreated.
    SessionLost,

    Timeout,

    /// The video encoder or container writer refused a media type or a
    /// sample. Fatal to the current output stream.
    EncoderRejected(String),

    UnsupportedFormat(String),

    BufferOverflow,

    InvalidConfig(String),

    Canceled,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidConfig(_) => CaptureErrorClass::InvalidInput,
            Self::UnsupportedFormat(_)
            | Self::DeviceUnavailable(_)
            | Self::OutputUnavailable(_) => CaptureErrorClass::Unsupported,
            Self::SessionLost | Self::Timeout | Self::Canceled => CaptureErrorClass::Transient,
            Self::EncoderRejected(_) | Self::BufferOverflow | Self::Platform(_) => {
                CaptureErrorClass::Fatal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::Transient)
    }

    pub fn requires_session_reset(&self) -> bool {
        matches!(self, Self::SessionLost)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceUnavailable(message) => {
                write!(f, "no usable graphics device: {message}")
            }
            Self::OutputUnavailable(message) => {
                write!(f, "output cannot be duplicated: {message}")
            }
            Self::SessionLost => write!(f, "desktop duplication session was lost"),
            Self::Timeout => write!(f, "failed to acquire desktop frame within timeout"),
            Self::EncoderRejected(message) => write!(f, "encoder rejected input: {message}"),
            Self::UnsupportedFormat(fmt_name) => {
                write!(f, "unsupported desktop texture format: {fmt_name}")
            }
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::Canceled => write!(f, "capture was canceled"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lost_is_transient_and_resets_the_session() {
        let error = CaptureError::SessionLost;
        assert!(error.is_retryable());
        assert!(error.requires_session_reset());
        assert!(!CaptureError::Timeout.requires_session_reset());
    }

    #[test]
    fn encoder_rejection_is_fatal() {
        let error = CaptureError::EncoderRejected("AddStream".into());
        assert_eq!(error.class(), CaptureErrorClass::Fatal);
        assert!(!error.is_retryable());
    }
}
