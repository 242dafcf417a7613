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

use enum_dispatch::enum_dispatch;
use serde::Serialize;

use crate::flow_generator::protocol_logs::{
    AmqpInfo, Http2Info, HttpInfo, L7ResponseStatus, MysqlInfo, PostgreInfo, RedisInfo,
};

macro_rules! all_protocol_info {
    ($($name:ident($info_struct:ident)),+$(,)?) => {
        #[derive(Serialize, Debug, Clone)]
        #[enum_dispatch]
        #[serde(untagged)]
        pub enum L7ProtocolInfo {
            $(
                $name($info_struct),
            )+
        }
    };
}

all_protocol_info!(
    HttpInfo(HttpInfo),
    Http2Info(Http2Info),
    MysqlInfo(MysqlInfo),
    RedisInfo(RedisInfo),
    PostgreInfo(PostgreInfo),
    AmqpInfo(AmqpInfo),
    // add new protocol info below
);

#[enum_dispatch(L7ProtocolInfo)]
pub trait L7ProtocolInfoInterface {
    fn status(&self) -> L7ResponseStatus;

    // span operation name, such as "GET /index" or "Redis SET"
    fn operation(&self) -> String;

    // protocol specific part of the aggregation key
    fn aggregation_tags(&self) -> Vec<(&'static str, String)>;
}
