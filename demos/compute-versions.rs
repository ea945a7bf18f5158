// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
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

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut client = oscompute::ClientConfig::from_env()
        .expect("Failed to load the configuration from the environment")
        .into_client()
        .expect("Failed to create a compute client");

    let versions = client
        .get_versions()
        .await
        .expect("Cannot fetch compute versions");
    for version in versions {
        match (version.min_version, version.version) {
            (Some(min), Some(max)) => println!("{}: microversions {} to {}", version.id, min, max),
            _ => println!("{}: microversions are not supported", version.id),
        }
    }

    for timing in client.get_timings() {
        println!("{} took {:?}", timing.label, timing.elapsed);
    }
}
