// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Intercepted call surface
//!
//! The rewriter redirects every MySQL client call to the dispatcher together
//! with the function name and its argument list. Names are mapped once onto
//! [`CallKind`] at the boundary; everything downstream matches on the enum.

use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of an intercepted client call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    #[serde(rename = "mysqli_connect")]
    Connect,
    #[serde(rename = "mysqli_connect_error")]
    ConnectError,
    #[serde(rename = "mysqli_select_db")]
    SelectDb,
    #[serde(rename = "mysqli_query")]
    Query,
    #[serde(rename = "mysqli_close")]
    Close,
    #[serde(rename = "mysqli_error")]
    Error,
    #[serde(rename = "mysqli_fetch_assoc")]
    FetchAssoc,
    #[serde(rename = "mysqli_fetch_array")]
    FetchArray,
    #[serde(rename = "mysqli_fetch_row")]
    FetchRow,
    #[serde(rename = "mysqli_fetch_all")]
    FetchAll,
    #[serde(rename = "mysqli_num_rows")]
    NumRows,
    #[serde(rename = "mysqli_real_escape_string")]
    RealEscapeString,
    #[serde(rename = "mysqli_fetch_lengths")]
    FetchLengths,
}

impl CallKind {
    /// Every call kind, in declaration order
    pub const ALL: [CallKind; 13] = [
        CallKind::Connect,
        CallKind::ConnectError,
        CallKind::SelectDb,
        CallKind::Query,
        CallKind::Close,
        CallKind::Error,
        CallKind::FetchAssoc,
        CallKind::FetchArray,
        CallKind::FetchRow,
        CallKind::FetchAll,
        CallKind::NumRows,
        CallKind::RealEscapeString,
        CallKind::FetchLengths,
    ];

    /// Client library function this kind intercepts
    pub const fn function_name(self) -> &'static str {
        match self {
            CallKind::Connect => "mysqli_connect",
            CallKind::ConnectError => "mysqli_connect_error",
            CallKind::SelectDb => "mysqli_select_db",
            CallKind::Query => "mysqli_query",
            CallKind::Close => "mysqli_close",
            CallKind::Error => "mysqli_error",
            CallKind::FetchAssoc => "mysqli_fetch_assoc",
            CallKind::FetchArray => "mysqli_fetch_array",
            CallKind::FetchRow => "mysqli_fetch_row",
            CallKind::FetchAll => "mysqli_fetch_all",
            CallKind::NumRows => "mysqli_num_rows",
            CallKind::RealEscapeString => "mysqli_real_escape_string",
            CallKind::FetchLengths => "mysqli_fetch_lengths",
        }
    }

    /// Calls that resolve rows from a result handle
    pub const fn reads_result(self) -> bool {
        matches!(
            self,
            CallKind::FetchAssoc
                | CallKind::FetchArray
                | CallKind::FetchRow
                | CallKind::FetchAll
                | CallKind::NumRows
        )
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// Function name with no matching [`CallKind`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown call: {0}")]
pub struct UnknownCall(pub String);

impl FromStr for CallKind {
    type Err = UnknownCall;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallKind::ALL
            .into_iter()
            .find(|kind| kind.function_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCall(s.to_string()))
    }
}

/// A single call argument as captured at the call site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Arg {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Arg::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret the argument as a handle previously returned by dispatch
    ///
    /// Integers outside the encoded range are not handles.
    pub fn as_handle(&self) -> Option<Handle> {
        self.as_int()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|&raw| Handle::in_handle_range(raw))
            .map(Handle::from_raw)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Null => Ok(()),
            Arg::Bool(true) => f.write_str("1"),
            Arg::Bool(false) => Ok(()),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<Handle> for Arg {
    fn from(handle: Handle) -> Self {
        Arg::Int(i64::from(handle.raw()))
    }
}
