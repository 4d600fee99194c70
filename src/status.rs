use std::fmt;

use thiserror::Error;

/// Reason code carried by a terminal status.
///
/// The numbering follows the gRPC status codes so the values stay
/// meaningful to other tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// the call completed normally
    Ok = 0,
    /// the call was cancelled by the client or the transport
    Cancelled = 1,
    /// the request stream was not valid for the method's shape
    InvalidArgument = 3,
    /// the method is not known by the server
    Unimplemented = 12,
    /// the handler failed unexpectedly
    Internal = 13,
}

impl Code {
    /// decode a code from its wire value
    pub fn from_u8(v: u8) -> Option<Code> {
        match v {
            0 => Some(Code::Ok),
            1 => Some(Code::Cancelled),
            3 => Some(Code::InvalidArgument),
            12 => Some(Code::Unimplemented),
            13 => Some(Code::Internal),
            _ => None,
        }
    }

    /// the wire value of the code
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Ok => "ok",
            Code::Cancelled => "cancelled",
            Code::InvalidArgument => "invalid argument",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The terminal status of a call, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// create a status with the given code and reason
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// successful completion
    pub fn ok() -> Self {
        Status::new(Code::Ok, "")
    }

    /// `Cancelled` status
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Status::new(Code::Cancelled, message)
    }

    /// `InvalidArgument` status
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Status::new(Code::InvalidArgument, message)
    }

    /// `Unimplemented` status
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Status::new(Code::Unimplemented, message)
    }

    /// `Internal` status
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Status::new(Code::Internal, message)
    }

    /// the reason code
    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }

    /// the human readable reason
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// true if the call completed normally
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_wire_values() {
        for code in [
            Code::Ok,
            Code::Cancelled,
            Code::InvalidArgument,
            Code::Unimplemented,
            Code::Internal,
        ] {
            assert_eq!(Code::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(Code::Unimplemented.as_u8(), 12);
        assert_eq!(Code::from_u8(2), None);
        assert_eq!(Code::from_u8(200), None);
    }

    #[test]
    fn status_display() {
        let s = Status::unimplemented("unknown method `foo`");
        assert_eq!(s.to_string(), "unimplemented: unknown method `foo`");
        assert!(!s.is_ok());
        assert!(Status::ok().is_ok());
    }
}
