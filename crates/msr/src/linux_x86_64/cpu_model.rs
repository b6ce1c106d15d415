/*
 * Copyright 2024 Fluence Labs Limited
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

use raw_cpuid::CpuId;

use topo_shared::CpuModel;
use topo_shared::Vendor;

/// Detects the model of the CPU this process runs on.
pub fn detect_cpu_model() -> Option<CpuModel> {
    let cpuid = CpuId::new();

    let vendor = Vendor::from_vendor_id(cpuid.get_vendor_info()?.as_str());
    let feature_info = cpuid.get_feature_info()?;
    let model = CpuModel::new(
        vendor,
        feature_info.family_id() as u32,
        feature_info.model_id() as u32,
    );

    tracing::debug!("detected CPU model: {model}");
    Some(model)
}
