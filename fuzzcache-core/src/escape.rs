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

//! String escaping for `mysqli_real_escape_string`
//!
//! Pure substitution, no connection needed. The table is applied in a single
//! pass so a backslash introduced by one substitution is never escaped again.

/// Characters escaped for SQL string literals, with their replacements
pub const ESCAPE_TABLE: [(char, &str); 7] = [
    ('\\', "\\\\"),
    ('\0', "\\0"),
    ('\n', "\\n"),
    ('\r', "\\r"),
    ('\x1a', "\\Z"),
    ('\'', "\\'"),
    ('"', "\\\""),
];

fn replacement(c: char) -> Option<&'static str> {
    ESCAPE_TABLE
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

/// Escape `input` for inclusion in a quoted SQL literal
pub fn escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for c in input.chars() {
        match replacement(c) {
            Some(escaped) => out.push_str(escaped),
            None => out.push(c),
        }
    }
    out
}
