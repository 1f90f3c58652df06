// Copyright 2022 Ryan Seipp
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

//! A small reactor-based HTTP/1.1 server: one `mio` poll loop accepting
//! connections and dispatching their I/O to a fixed worker pool, with
//! an indexed timer heap closing idle connections and a memory-mapped
//! static file server backing GET requests.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod parser;
pub mod reactor;
pub mod timer;
pub mod worker;
