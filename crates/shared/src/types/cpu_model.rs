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

use newtype_derive::newtype_fmt;
use serde::Deserialize;
use serde::Serialize;

pub type VfmType = u32;

/// An opaque vendor-family-model identifier of a CPU.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Vfm(VfmType);

newtype_derive::NewtypeFrom! { () pub struct Vfm(VfmType); }
newtype_derive::NewtypeDisplay! { () pub struct Vfm(VfmType); }

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Intel,
    Amd,
    Other,
}

impl Vendor {
    pub fn from_vendor_id(vendor_id: &str) -> Self {
        match vendor_id.trim() {
            "GenuineIntel" => Vendor::Intel,
            "AuthenticAMD" => Vendor::Amd,
            _ => Vendor::Other,
        }
    }

    const fn code(self) -> VfmType {
        match self {
            Vendor::Intel => 1,
            Vendor::Amd => 2,
            Vendor::Other => 0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuModel {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
}

// Granite Rapids Xeon (X and D), Sierra Forest Xeon and Clearwater Forest Xeon do not enumerate
// compute dies via CPUID, so the die IDs come from MSR_PM_LOGICAL_ID.
const MODELS_WITH_HIDDEN_DIES: [CpuModel; 4] = [
    CpuModel::intel(6, 0xAD),
    CpuModel::intel(6, 0xAE),
    CpuModel::intel(6, 0xAF),
    CpuModel::intel(6, 0xDD),
];

// Diamond Rapids Xeon, where every package has two IMH devices, each with an I/O and a memory
// uncore frequency domain.
const MODELS_WITH_IMH: [CpuModel; 1] = [CpuModel::intel(19, 0x01)];

const CODENAMES: [(CpuModel, &str); 30] = [
    (CpuModel::intel(6, 0xDD), "Clearwater Forest Xeon"),
    (CpuModel::intel(6, 0xAF), "Sierra Forest Xeon"),
    (CpuModel::intel(6, 0xAD), "Granite Rapids Xeon"),
    (CpuModel::intel(6, 0xAE), "Granite Rapids Xeon D"),
    (CpuModel::intel(6, 0xCF), "Emerald Rapids Xeon"),
    (CpuModel::intel(6, 0x8F), "Sapphire Rapids Xeon"),
    (CpuModel::intel(6, 0x6A), "Ice Lake Xeon"),
    (CpuModel::intel(6, 0x6C), "Ice Lake Xeon D"),
    (CpuModel::intel(6, 0x55), "Skylake, Cascade Lake, or Cooper Lake Xeon"),
    (CpuModel::intel(6, 0x4F), "Broadwell Xeon"),
    (CpuModel::intel(6, 0x56), "Broadwell Xeon-D"),
    (CpuModel::intel(6, 0x3F), "Haswell Xeon"),
    (CpuModel::intel(6, 0x3E), "Ivy Town Xeon"),
    (CpuModel::intel(6, 0x2D), "SandyBridge Xeon"),
    (CpuModel::intel(6, 0xBD), "Lunar Lake mobile"),
    (CpuModel::intel(6, 0xAC), "Meteor Lake client"),
    (CpuModel::intel(6, 0xAA), "Meteor Lake mobile"),
    (CpuModel::intel(6, 0xBA), "Raptor Lake mobile"),
    (CpuModel::intel(6, 0xBF), "Raptor Lake client"),
    (CpuModel::intel(6, 0xB7), "Raptor Lake client"),
    (CpuModel::intel(6, 0x97), "Alder Lake client"),
    (CpuModel::intel(6, 0x9A), "Alder Lake mobile"),
    (CpuModel::intel(6, 0xBE), "Alder Lake mobile"),
    (CpuModel::intel(6, 0xA7), "Rocket Lake client"),
    (CpuModel::intel(6, 0x8D), "Tiger Lake client"),
    (CpuModel::intel(6, 0x8C), "Tiger Lake mobile"),
    (CpuModel::intel(6, 0x9E), "Kaby Lake client"),
    (CpuModel::intel(6, 0x5E), "Skylake client"),
    (CpuModel::intel(6, 0x86), "Snow Ridge, Jacobsville"),
    (CpuModel::intel(6, 0x5F), "Denverton, Harrisonville"),
];

impl CpuModel {
    pub const fn new(vendor: Vendor, family: u32, model: u32) -> Self {
        Self {
            vendor,
            family,
            model,
        }
    }

    pub const fn intel(family: u32, model: u32) -> Self {
        Self::new(Vendor::Intel, family, model)
    }

    pub fn vfm(&self) -> Vfm {
        Vfm::from((self.vendor.code() << 16) | ((self.family & 0xFF) << 8) | (self.model & 0xFF))
    }

    /// Returns true if compute dies of this CPU are only visible via MSR_PM_LOGICAL_ID.
    pub fn has_hidden_dies(&self) -> bool {
        MODELS_WITH_HIDDEN_DIES
            .iter()
            .any(|model| model.vfm() == self.vfm())
    }

    pub fn has_imh(&self) -> bool {
        MODELS_WITH_IMH.iter().any(|model| model.vfm() == self.vfm())
    }

    /// The marketing codename of a known Intel model.
    pub fn codename(&self) -> Option<&'static str> {
        CODENAMES
            .iter()
            .find(|(model, _)| model.vfm() == self.vfm())
            .map(|(_, codename)| *codename)
    }
}

impl std::fmt::Display for CpuModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} family {:#x} model {:#x}",
            self.vendor, self.family, self.model
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granite_rapids_hides_dies() {
        assert!(CpuModel::intel(6, 0xAD).has_hidden_dies());
        assert!(!CpuModel::intel(6, 0x8F).has_hidden_dies());
        assert!(!CpuModel::new(Vendor::Amd, 6, 0xAD).has_hidden_dies());
    }

    #[test]
    fn vfm_distinguishes_vendors() {
        let intel = CpuModel::intel(0x19, 0x61).vfm();
        let amd = CpuModel::new(Vendor::Amd, 0x19, 0x61).vfm();
        assert_ne!(intel, amd);
        assert_eq!(u32::from(intel), 0x0001_1961);
    }

    #[test]
    fn known_models_have_codenames() {
        assert_eq!(CpuModel::intel(6, 0x8F).codename(), Some("Sapphire Rapids Xeon"));
        assert_eq!(CpuModel::intel(6, 0xAE).codename(), Some("Granite Rapids Xeon D"));
        assert_eq!(CpuModel::intel(6, 0x01).codename(), None);
        assert_eq!(CpuModel::new(Vendor::Amd, 6, 0x8F).codename(), None);
    }
}
