// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Cadenza.
///
/// Failures to open a filter or to apply a parameter are reported as `bool` results by the
/// respective functions and leave the filter untouched. `Error` covers the conditions detected
/// mid-stream, inside `process` or `flush`, after which the only legal calls on the failing
/// filter are `reset` or `close`.
#[derive(Debug)]
pub enum Error {
    /// A filter failed during `process` or `flush`. The filter must be reset before further use.
    Process {
        /// Name of the failing filter.
        filter: &'static str,
        /// What went wrong.
        message: &'static str,
    },
    /// A parameter combination turned out to be invalid during processing.
    Param(&'static str),
    /// The graph was asked to build a chain it cannot support.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Process { filter, message } => {
                write!(f, "processing error in {}: {}", filter, message)
            }
            Error::Param(msg) => write!(f, "invalid parameter: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
        }
    }
}

impl error::Error for Error {}

/// Result type for all fallible Cadenza operations.
pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a processing error.
pub fn process_error<T>(filter: &'static str, message: &'static str) -> Result<T> {
    Err(Error::Process { filter, message })
}

/// Convenience function to create an invalid parameter error.
pub fn param_error<T>(message: &'static str) -> Result<T> {
    Err(Error::Param(message))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(message: &'static str) -> Result<T> {
    Err(Error::Unsupported(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_display() {
        let err = Error::Process { filter: "Convolver", message: "fir generation failed" };
        assert_eq!(err.to_string(), "processing error in Convolver: fir generation failed");

        let err: Result<()> = param_error("quality out of range");
        assert_eq!(err.unwrap_err().to_string(), "invalid parameter: quality out of range");
    }
}
