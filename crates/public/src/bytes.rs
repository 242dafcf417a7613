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

// Callers check the length first, a short slice is a bug in the caller.

pub fn read_u16_be(bs: &[u8]) -> u16 {
    assert!(bs.len() >= 2);
    u16::from_be_bytes([bs[0], bs[1]])
}

pub fn read_u16_le(bs: &[u8]) -> u16 {
    assert!(bs.len() >= 2);
    u16::from_le_bytes([bs[0], bs[1]])
}

pub fn read_u24_be(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 3);
    u32::from_be_bytes([0, bs[0], bs[1], bs[2]])
}

pub fn read_u24_le(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 3);
    u32::from_le_bytes([bs[0], bs[1], bs[2], 0])
}

pub fn read_u32_be(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 4);
    u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]])
}

pub fn read_u32_le(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 4);
    u32::from_le_bytes([bs[0], bs[1], bs[2], bs[3]])
}

pub fn read_i32_be(bs: &[u8]) -> i32 {
    read_u32_be(bs) as i32
}

pub fn read_u64_be(bs: &[u8]) -> u64 {
    assert!(bs.len() >= 8);
    let mut b = [0u8; 8];
    b.copy_from_slice(&bs[..8]);
    u64::from_be_bytes(b)
}

pub fn read_u64_le(bs: &[u8]) -> u64 {
    assert!(bs.len() >= 8);
    let mut b = [0u8; 8];
    b.copy_from_slice(&bs[..8]);
    u64::from_le_bytes(b)
}
