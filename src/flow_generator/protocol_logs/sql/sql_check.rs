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

const COMMON_SQL_START: [&'static str; 19] = [
    // crud
    "SELECT", "PREPARE", "INSERT", "UPDATE", "DELETE",
    // table manipulate
    "SHOW", "CREATE", "DROP", "ALTER",
    // sql explain
    "EXPLAIN",
    // other
    "GRANT", "SET", "SAVEPOINT", "RELEASE", "DECLARE", "CALL", "FETCH", "IMPORT", "REVOKE",
];

// not every statement keyword, only the ones worth a record
const POSTGRESQL_START: [&'static str; 19] = [
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "WITH",
    "EXECUTE",
    "DECLARE",
    "MATERIALIZED",
    "ABORT",
    "ANALYZE",
    "LOAD",
    "LOCK",
    "CHECKPOINT",
    "REFRESH",
    "REINDEX",
    "RESET",
    "START",
    "TABLE",
    "CLUSTER",
    "TRUNCATE",
];

const MYSQL_START: [&'static str; 15] = [
    "XA", "FLUSH", "SHOW", "USE", "LOCK", "UNLOCK", "STOP", "START", "LOAD", "ANALYZE", "BEGIN",
    "COMMIT", "ROLLBACK", "DESC", "WITH",
];

pub(super) fn is_valid_sql(first: &str, keywords: &[&'static str]) -> bool {
    COMMON_SQL_START
        .iter()
        .chain(keywords.iter())
        .any(|k| first.eq_ignore_ascii_case(k))
}

pub(super) fn is_postgresql(sql: &str) -> bool {
    trim_head_comment_and_get_first_word(sql, 12)
        .map(|first| is_valid_sql(first, &POSTGRESQL_START))
        .unwrap_or(false)
}

pub(super) fn is_mysql(sql: &str) -> bool {
    trim_head_comment_and_get_first_word(sql, 8)
        .map(|first| is_valid_sql(first, &MYSQL_START))
        .unwrap_or(false)
}

/// Splits the leading `/* ... */` blocks from the statement.
///
/// Returns the comment blocks as written and the statement after them, or
/// `None` when a block is not closed. MySQL executable comments (`/*! */`,
/// `/*!80027 */`) are treated as comments too.
pub(super) fn split_head_comment(sql: &str) -> Option<(&str, &str)> {
    let sql = sql.trim_start();
    let mut rest = sql;
    while let Some(body) = rest.strip_prefix("/*") {
        let end = body.find("*/")?;
        rest = body[end + 2..].trim_start();
    }
    let comment = sql[..sql.len() - rest.len()].trim_end();
    Some((comment, rest))
}

/// First keyword of the statement after the head comments, at most
/// `first_word_max_len` letters long.
pub(super) fn trim_head_comment_and_get_first_word(
    sql: &str,
    first_word_max_len: usize,
) -> Option<&str> {
    let (_, sql) = split_head_comment(sql)?;
    match sql.find(|c: char| !c.is_alphabetic()) {
        Some(idx) if idx != 0 && idx <= first_word_max_len => Some(&sql[..idx]),
        Some(_) => None,
        // a single word
        None if !sql.is_empty() && sql.len() <= first_word_max_len => Some(sql),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_word() {
        let cases = [
            ("sEleCt 1", 6, Some("sEleCt")),
            ("sEleCt 1", 5, None),
            ("/* i am comment */SelecT 1", 6, Some("SelecT")),
            ("  /* a */ /*b*/ SelecT 1", 6, Some("SelecT")),
            ("/* i am comment * /*/ SelecT 1", 6, Some("SelecT")),
            ("/* unable to parse */SelecT", 6, Some("SelecT")),
            ("/* not a comment * / SelecT 1", 6, None),
            ("/ * not a comment */ SelecT 1", 6, None),
            ("/* c /* */ syntax error /* c */ SelecT 1", 6, Some("syntax")),
            ("/* c */ -- select", 6, None),
            ("", 6, None),
        ];
        for (sql, max, expected) in cases {
            assert_eq!(
                trim_head_comment_and_get_first_word(sql, max),
                expected,
                "sql {}",
                sql
            );
        }
    }

    #[test]
    fn head_comment() {
        assert_eq!(
            split_head_comment(" /* app=api */ /*!80027 */ SELECT 1"),
            Some(("/* app=api */ /*!80027 */", "SELECT 1"))
        );
        assert_eq!(split_head_comment("SELECT 1"), Some(("", "SELECT 1")));
        assert_eq!(split_head_comment("/* open SELECT 1"), None);
    }

    #[test]
    fn dialects() {
        assert!(is_mysql("use db"));
        assert!(is_mysql("/* x */ commit"));
        assert!(!is_mysql("vacuum"));
        assert!(is_postgresql("TRUNCATE t"));
        assert!(is_postgresql("with a as (select 1) select * from a"));
        assert!(!is_postgresql("use db"));
        assert!(!is_postgresql("hello world"));
    }
}
