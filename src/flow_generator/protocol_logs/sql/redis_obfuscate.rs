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

// Redis command arguments that may carry user data are replaced by '?'.
// The command itself, keys and options are kept.

const BLANK_SPACE: u8 = b' ';
const QUESTION_MARK: u8 = b'?';

struct ArgWriter<'a> {
    out: Vec<u8>,
    args: std::slice::Iter<'a, &'a [u8]>,
}

impl<'a> ArgWriter<'a> {
    fn push(&mut self, arg: &[u8]) {
        if !self.out.is_empty() && !arg.is_empty() {
            self.out.push(BLANK_SPACE);
        }
        self.out.extend_from_slice(arg);
    }

    fn mask(&mut self) {
        self.out.push(BLANK_SPACE);
        self.out.push(QUESTION_MARK);
    }

    fn next_arg(&mut self) -> Option<&'a [u8]> {
        self.args.next().copied()
    }

    // keeps the first n arguments and masks the next one, the rest is kept
    fn nth_masked(&mut self, n: usize) {
        let mut i = 0;
        while let Some(arg) = self.next_arg() {
            if i == n {
                self.mask();
            } else {
                self.push(arg);
            }
            i += 1;
        }
    }

    // every n-th argument masked
    fn every_nth_masked(&mut self, n: usize) {
        let mut i = 0;
        while let Some(arg) = self.next_arg() {
            if (i + 1) % n == 0 {
                self.mask();
            } else {
                self.push(arg);
            }
            i += 1;
        }
    }

    fn rest(&mut self) {
        while let Some(arg) = self.next_arg() {
            self.push(arg);
        }
    }

    // key kept, anything after it collapsed into a single '?'
    fn key_and_mask(&mut self) {
        if let Some(key) = self.next_arg() {
            self.push(key);
        }
        if self.args.len() > 0 {
            self.mask();
        }
    }
}

/// Rebuilds the command line from its arguments with sensitive values
/// masked. `args[0]` is the command as sent, `cmd` its upper case form.
pub fn obfuscate(cmd: &str, args: &[&[u8]]) -> Vec<u8> {
    let Some((first, rest)) = args.split_first() else {
        return vec![];
    };
    let mut w = ArgWriter {
        out: Vec::with_capacity(args.iter().map(|a| a.len() + 1).sum()),
        args: rest.iter(),
    };
    w.push(first);

    match cmd {
        "AUTH" => {
            if w.next_arg().map(|a| !a.is_empty()).unwrap_or(false) {
                w.mask();
            }
        }
        "HELLO" => {
            while let Some(arg) = w.next_arg() {
                w.out.push(BLANK_SPACE);
                w.out.extend_from_slice(arg);
                if arg.eq_ignore_ascii_case(b"AUTH") {
                    w.mask();
                    break;
                }
            }
        }
        "APPEND" | "GETSET" | "LPUSHX" | "GEORADIUSBYMEMBER" | "RPUSHX" | "SET" | "SETNX"
        | "SISMEMBER" | "ZRANK" | "ZREVRANK" | "ZSCORE" => w.nth_masked(1),
        "HSETNX" | "LREM" | "LSET" | "SETBIT" | "SETEX" | "PSETEX" | "SETRANGE" | "ZINCRBY"
        | "SMOVE" | "RESTORE" => w.nth_masked(2),
        "LINSERT" => w.nth_masked(3),
        "GEOHASH" | "GEOPOS" | "GEODIST" | "LPUSH" | "RPUSH" | "SREM" | "ZREM" | "SADD" => {
            w.key_and_mask()
        }
        "GEOADD" => {
            if let Some(key) = w.next_arg() {
                w.push(key);
            }
            w.every_nth_masked(3);
        }
        "HSET" | "HMSET" => {
            if let Some(key) = w.next_arg() {
                w.push(key);
            }
            w.every_nth_masked(2);
        }
        "MSET" | "MSETNX" => w.every_nth_masked(2),
        "CONFIG" => {
            while let Some(arg) = w.next_arg() {
                w.push(arg);
                if arg.eq_ignore_ascii_case(b"SET") {
                    w.every_nth_masked(2);
                    break;
                }
            }
        }
        "BITFIELD" => {
            let mut after_set = 0;
            while let Some(arg) = w.next_arg() {
                if after_set > 0 {
                    after_set += 1;
                }
                if arg.eq_ignore_ascii_case(b"SET") {
                    after_set = 1;
                }
                if after_set == 4 {
                    w.mask();
                    after_set = 0;
                } else {
                    w.out.push(BLANK_SPACE);
                    w.out.extend_from_slice(arg);
                }
            }
        }
        "ZADD" => {
            if let Some(key) = w.next_arg() {
                w.push(key);
            }
            while let Some(arg) = w.next_arg() {
                w.push(arg);
                let upper = arg.to_ascii_uppercase();
                if !matches!(
                    upper.as_slice(),
                    b"NX" | b"XX" | b"GT" | b"LT" | b"CH" | b"INCR"
                ) {
                    // first score
                    break;
                }
            }
            if w.next_arg().map(|a| !a.is_empty()).unwrap_or(false) {
                w.mask();
            }
            w.every_nth_masked(2);
        }
        _ => w.rest(),
    }
    w.out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(line: &str) -> String {
        let args = line.split(' ').map(|s| s.as_bytes()).collect::<Vec<_>>();
        let cmd = line.split(' ').next().unwrap().to_ascii_uppercase();
        String::from_utf8(obfuscate(&cmd, &args)).unwrap()
    }

    #[test]
    fn redis_obfuscate() {
        let cases = [
            ("GET key", "GET key"),
            ("AUTH", "AUTH"),
            ("AUTH my-secret-password", "AUTH ?"),
            ("AUTH james my-secret-password", "AUTH ?"),
            (
                "HELLO 3 AUTH username passwd SETNAME cliname",
                "HELLO 3 AUTH ?",
            ),
            ("APPEND key value", "APPEND key ?"),
            ("GETSET key value", "GETSET key ?"),
            ("SET key value", "SET key ?"),
            ("SET key value EX 10 NX", "SET key ? EX 10 NX"),
            ("set key value", "set key ?"),
            ("ZSCORE key member", "ZSCORE key ?"),
            ("HSETNX key field value", "HSETNX key field ?"),
            ("LSET key index value", "LSET key index ?"),
            ("SETEX key seconds value", "SETEX key seconds ?"),
            ("ZINCRBY key increment member", "ZINCRBY key increment ?"),
            ("SMOVE source destination member", "SMOVE source destination ?"),
            (
                "RESTORE key ttl serialized-value REPLACE",
                "RESTORE key ttl ? REPLACE",
            ),
            ("LINSERT key BEFORE pivot value", "LINSERT key BEFORE pivot ?"),
            ("GEOHASH key member member member", "GEOHASH key ?"),
            ("GEOPOS key member member", "GEOPOS key ?"),
            ("LPUSH key value value", "LPUSH key ?"),
            ("SADD key member member", "SADD key ?"),
            ("ZREM key member", "ZREM key ?"),
            ("SREM key", "SREM key"),
            (
                "GEOADD key longitude latitude member longitude latitude member",
                "GEOADD key longitude latitude ? longitude latitude ?",
            ),
            ("HSET key field value field2 value2", "HSET key field ? field2 ?"),
            ("HMSET key field", "HMSET key field"),
            ("MSET key value key value", "MSET key ? key ?"),
            ("MSETNX key value", "MSETNX key ?"),
            ("CONFIG SET parameter value", "CONFIG SET parameter ?"),
            ("CONFIG GET parameter", "CONFIG GET parameter"),
            (
                "BITFIELD key GET type offset SET type offset value INCRBY type",
                "BITFIELD key GET type offset SET type offset ? INCRBY type",
            ),
            ("BITFIELD key SET type offset", "BITFIELD key SET type offset"),
            ("ZADD key score member score member", "ZADD key score ? score ?"),
            (
                "ZADD key NX CH INCR score member",
                "ZADD key NX CH INCR score ?",
            ),
            ("ZADD key XX INCR score", "ZADD key XX INCR score"),
            ("FAKECMD key value", "FAKECMD key value"),
        ];
        for (input, expected) in cases {
            assert_eq!(run(input), expected, "input {}", input);
        }
    }

    #[test]
    fn empty_arguments() {
        assert!(obfuscate("", &[]).is_empty());
        assert_eq!(obfuscate("GET", &[b"GET", b""]), b"GET".to_vec());
        assert_eq!(obfuscate("AUTH", &[b"AUTH", b""]), b"AUTH".to_vec());
    }
}
