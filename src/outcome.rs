//! Outcome of a per-object step during tagging and reconstruction.
//!
//! - `Ok(v)`         : step succeeded.
//! - `Recovered(msg)`: step failed for this object only; the caller logs `msg`,
//!                      leaves the slot empty and moves on.
//! - `Fatal(err)`    : the whole operation must abort.

use anyhow::{Error, Result};

#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Recovered(String),
    Fatal(Error),
}

impl<T> Outcome<T> {
    pub fn recovered(msg: impl Into<String>) -> Self {
        Outcome::Recovered(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }

    /// Fatal -> `Err`, recovered -> `Ok(None)` (message handed to `on_recovered`).
    pub fn settle<F: FnOnce(&str)>(self, on_recovered: F) -> Result<Option<T>> {
        match self {
            Outcome::Ok(v) => Ok(Some(v)),
            Outcome::Recovered(msg) => {
                on_recovered(&msg);
                Ok(None)
            }
            Outcome::Fatal(e) => Err(e),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(r: Result<T>) -> Self {
        match r {
            Ok(v) => Outcome::Ok(v),
            Err(e) => Outcome::Fatal(e),
        }
    }
}
