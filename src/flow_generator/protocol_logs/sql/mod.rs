/*
 * Copyright (c) 2022 Yunshan Networks
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

mod mysql;
mod postgre_convert;
mod postgresql;
mod redis;
mod redis_obfuscate;
mod sql_check;
mod sql_obfuscate;

pub use mysql::{MysqlHeader, MysqlInfo, MysqlLog};
pub use postgresql::{PostgreInfo, PostgresqlLog};
pub use redis::{RedisInfo, RedisLog};
