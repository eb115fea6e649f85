// SPDX-License-Identifier: MIT

//! Carries a process exit code alongside an error message (§6 "Exit codes").
//! Commands return `ExitError` instead of calling `std::process::exit`
//! directly so `main` owns process termination.

use std::fmt;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<forge_core::CoreError> for ExitError {
    fn from(err: forge_core::CoreError) -> Self {
        let code = if matches!(err, forge_core::CoreError::Dependency(_)) { 3 } else { 1 };
        Self::new(code, err.to_string())
    }
}
