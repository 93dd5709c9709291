// Copyright 2025 WireRPC Authors
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

//! # WireRPC CLI
//!
//! Support code for the `wirerpc` binary.
//!
//! ## Key Commands
//!
//! - `wirerpc serve`: run a server exposing the demo [`EchoService`](demo::SERVICE_NAME)
//! - `wirerpc call`: make one call through an in-memory registry seeded from
//!   `--instance` flags and print the raw JSON result

pub mod args;
pub mod demo;
