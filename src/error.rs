// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::error;
use std::fmt;
use std::io;

/// Error type returned by every fallible operation in this crate.
///
/// Replaces the C original's thread-local `errno`-style store with an
/// ordinary `Result`; the variants mirror the taxonomy the node, client and
/// server FSMs distinguish between.
#[derive(Debug)]
pub enum CmcpError {
    /// Null/out-of-range argument, or an operation called in the wrong
    /// state. Roughly `EINVAL`.
    InvalidArgument(&'static str),
    /// `bind`/`connect` called while already initialized. Roughly
    /// `EALREADY`.
    AlreadyConnected,
    /// `send` attempted before the session is `Connected`, or `connect`
    /// timed out before reaching it. Roughly `ENOTCONN`.
    NotConnected,
    /// A wait for a target state did not observe it before its deadline.
    /// Roughly `ETIMEDOUT`.
    TimedOut,
    /// A frame or data list could not be parsed.
    Parse(&'static str),
    /// The underlying transport failed.
    Transport(io::Error),
}

impl fmt::Display for CmcpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CmcpError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CmcpError::AlreadyConnected => write!(f, "node is already initialized"),
            CmcpError::NotConnected => write!(f, "not connected"),
            CmcpError::TimedOut => write!(f, "timed out waiting for state"),
            CmcpError::Parse(msg) => write!(f, "parse error: {}", msg),
            CmcpError::Transport(ref e) => write!(f, "transport error: {}", e),
        }
    }
}

impl error::Error for CmcpError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            CmcpError::Transport(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CmcpError {
    fn from(e: io::Error) -> CmcpError {
        match e.kind() {
            io::ErrorKind::TimedOut => CmcpError::TimedOut,
            io::ErrorKind::NotConnected => CmcpError::NotConnected,
            io::ErrorKind::AlreadyExists => CmcpError::AlreadyConnected,
            _ => CmcpError::Transport(e),
        }
    }
}

impl From<CmcpError> for io::Error {
    fn from(e: CmcpError) -> io::Error {
        match e {
            CmcpError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            CmcpError::AlreadyConnected => {
                io::Error::new(io::ErrorKind::AlreadyExists, "already connected")
            }
            CmcpError::NotConnected => io::Error::new(io::ErrorKind::NotConnected, "not connected"),
            CmcpError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "timed out"),
            CmcpError::Parse(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            CmcpError::Transport(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, CmcpError>;

pub fn invalid_argument(msg: &'static str) -> CmcpError {
    CmcpError::InvalidArgument(msg)
}

pub fn parse_error(msg: &'static str) -> CmcpError {
    CmcpError::Parse(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_roundtrip_through_io_error_kinds() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "recv timed out");
        let cmcp_err: CmcpError = io_err.into();
        assert!(matches!(cmcp_err, CmcpError::TimedOut));
    }

    #[test]
    fn other_io_errors_are_preserved_as_transport_errors() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let cmcp_err: CmcpError = io_err.into();
        assert!(matches!(cmcp_err, CmcpError::Transport(_)));
    }
}
