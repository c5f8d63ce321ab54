// Copyright 2025 Lodestone Authors
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

//! Lodestone Metrics
//!
//! Prometheus metrics for the load balancer data plane. The request pipeline
//! only updates typed signals; exposition (the scrape endpoint) is owned by
//! the binary, which renders the registry on demand.
//!
//! Five signals are exposed:
//!
//! - `loadbalancer_requests_total` (counter)
//! - `loadbalancer_errors_total` (counter)
//! - `loadbalancer_response_time_seconds` (histogram, default buckets)
//! - `loadbalancer_active_connections` (gauge)
//! - `loadbalancer_backend_health{backend_url}` (labeled gauge)

pub mod registry;

pub use registry::Metrics;
