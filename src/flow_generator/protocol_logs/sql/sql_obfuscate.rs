/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    num::NonZeroUsize,
};

use ahash::RandomState;
use lru::LruCache;

const QUESTION_MARK: char = '?';

// statements per connection
pub const OBFUSCATE_CACHE_SIZE: usize = 16;

/// Remembers the obfuscated text of recently seen statements.
///
/// Connection pools and ORMs send the same few statements over and over,
/// the cache is keyed by a hash of the original text.
pub struct ObfuscateCache {
    hasher: RandomState,
    cache: LruCache<u64, String>,
}

impl Default for ObfuscateCache {
    fn default() -> Self {
        Self::new(OBFUSCATE_CACHE_SIZE)
    }
}

impl fmt::Debug for ObfuscateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObfuscateCache")
            .field("len", &self.cache.len())
            .finish()
    }
}

impl ObfuscateCache {
    pub fn new(size: usize) -> Self {
        Self {
            hasher: RandomState::new(),
            cache: LruCache::new(NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn attempt_obfuscation(&mut self, sql: &str) -> String {
        let mut hasher = self.hasher.build_hasher();
        sql.hash(&mut hasher);
        let key = hasher.finish();
        if let Some(s) = self.cache.get(&key) {
            return s.clone();
        }
        let output = obfuscate(sql);
        self.cache.put(key, output.clone());
        output
    }
}

// pushes a placeholder, "?, ?" lists collapse into one
fn push_placeholder(out: &mut String) {
    let trimmed = out.trim_end();
    if trimmed.ends_with("?,") {
        let len = trimmed.len() - 1;
        out.truncate(len);
        return;
    }
    out.push(QUESTION_MARK);
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Replaces literals in a statement with `?`.
///
/// Quoted strings and numbers become `?`, lists of them collapse to a
/// single `?`, comments are dropped and runs of white space are folded.
/// Identifiers, keywords, operators and bind markers (`?`, `$1`) are kept.
pub fn obfuscate(sql: &str) -> String {
    let input = sql.as_bytes();
    let len = input.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;
    while i < len {
        let b = input[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                push_space(&mut out);
                i += 1;
            }
            b'\'' => {
                i = skip_quoted(input, i, b'\'');
                push_placeholder(&mut out);
            }
            // quoted identifiers
            b'"' | b'`' => {
                let end = skip_quoted(input, i, b);
                out.push_str(&sql[i..end]);
                i = end;
            }
            b'-' if input[i..].starts_with(b"--") => {
                i = input[i..]
                    .iter()
                    .position(|&c| c == b'\n')
                    .map(|n| i + n)
                    .unwrap_or(len);
                push_space(&mut out);
            }
            b'/' if input[i..].starts_with(b"/*") => {
                i = input[i + 2..]
                    .windows(2)
                    .position(|w| w == b"*/")
                    .map(|n| i + 2 + n + 2)
                    .unwrap_or(len);
                push_space(&mut out);
            }
            b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < len {
                    let c = input[i];
                    if c.is_ascii_alphanumeric() || c == b'.' {
                        i += 1;
                    } else if (c == b'+' || c == b'-')
                        && matches!(input[i - 1], b'e' | b'E')
                        && !input[start..].starts_with(b"0x")
                    {
                        // exponent sign
                        i += 1;
                    } else {
                        break;
                    }
                }
                push_placeholder(&mut out);
            }
            // bind marker such as $1
            b'$' => {
                let end = input[i + 1..]
                    .iter()
                    .position(|c| !c.is_ascii_digit())
                    .map(|n| i + 1 + n)
                    .unwrap_or(len);
                out.push_str(&sql[i..end]);
                i = end.max(i + 1);
            }
            _ if is_identifier_byte(b) => {
                let start = i;
                while i < len && is_identifier_byte(input[i]) {
                    i += 1;
                }
                out.push_str(&sql[start..i]);
            }
            _ => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out.truncate(out.trim_end().len());
    out
}

// end of a quoted run starting at `start`, doubled quotes and backslash
// escapes stay inside
fn skip_quoted(input: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < input.len() {
        let c = input[i];
        if c == b'\\' {
            i += 2;
        } else if c == quote {
            if input.get(i + 1) == Some(&quote) {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    input.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_obfuscate() {
        let cases = [
            ("SELECT id FROM t1", "SELECT id FROM t1"),
            ("DELETE FROM t WHERE id = 1;", "DELETE FROM t WHERE id = ?;"),
            (
                "select * from users where name = 'O''Brien' and age > 30.5",
                "select * from users where name = ? and age > ?",
            ),
            (
                "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')",
                "INSERT INTO t (a, b) VALUES (?), (?)",
            ),
            (
                "SELECT * FROM t WHERE id IN (1, 2, 3)",
                "SELECT * FROM t WHERE id IN (?)",
            ),
            (
                "UPDATE t SET a = 1, b = 'two' WHERE c = 3",
                "UPDATE t SET a = ?, b = ? WHERE c = ?",
            ),
            (
                "SELECT /* user 42 */ a FROM t1 -- trailing 7\nWHERE b = 0x1F",
                "SELECT a FROM t1 WHERE b = ?",
            ),
            (
                "SELECT \"Col1\", `c2` FROM tbl2 WHERE x = $1 AND y = ?",
                "SELECT \"Col1\", `c2` FROM tbl2 WHERE x = $1 AND y = ?",
            ),
            ("UPDATE t SET v = -5e3 + 1E-2", "UPDATE t SET v = -? + ?"),
            (
                "SELECT 'it\\'s', nâme FROM t",
                "SELECT ?, nâme FROM t",
            ),
            ("SELECT 'unterminated", "SELECT ?"),
        ];
        for (input, expected) in cases {
            assert_eq!(obfuscate(input), expected, "input {}", input);
        }
    }

    #[test]
    fn cache() {
        let mut cache = ObfuscateCache::new(1);
        assert_eq!(cache.attempt_obfuscation("SELECT 1"), "SELECT ?");
        assert_eq!(cache.attempt_obfuscation("SELECT 1"), "SELECT ?");
        assert_eq!(cache.attempt_obfuscation("SELECT 'a'"), "SELECT ?");
        assert_eq!(cache.cache.len(), 1);
        let mut cache = ObfuscateCache::new(0);
        assert_eq!(cache.attempt_obfuscation("SELECT 2"), "SELECT ?");
    }
}
