// Copyright 2024 Google LLC
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

pub mod args;
pub mod backend;
pub mod client;
pub mod config;
pub mod error_utils;
pub mod forwarder;
pub mod geometry;
pub mod hotkey;
pub mod network;
pub mod prelude;
pub mod server;
pub mod state;
pub mod tracker;
pub mod transition;
pub mod utils;
