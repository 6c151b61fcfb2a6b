//! Telemetry field catalog
//!
//! Field identifiers are the numeric codes the telemetry daemon uses to name a
//! metric. Each known field has a canonical upper-case name (for example
//! `RDC_FI_GPU_UTIL`), which is what operators put in allow-lists, and a
//! lower-case display name used for the exported series.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric telemetry field identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(u32);

/// Static description of a catalog field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Numeric code
    pub id: FieldId,
    /// Canonical upper-case name
    pub name: &'static str,
    /// Help text for the exported series
    pub help: &'static str,
}

impl FieldId {
    pub const GPU_CLOCK: FieldId = FieldId(100);
    pub const MEM_CLOCK: FieldId = FieldId(101);
    pub const MEMORY_TEMP: FieldId = FieldId(200);
    pub const GPU_TEMP: FieldId = FieldId(201);
    pub const POWER_USAGE: FieldId = FieldId(300);
    pub const PCIE_TX: FieldId = FieldId(400);
    pub const PCIE_RX: FieldId = FieldId(401);
    pub const GPU_UTIL: FieldId = FieldId(500);
    pub const GPU_MEMORY_USAGE: FieldId = FieldId(501);
    pub const GPU_MEMORY_TOTAL: FieldId = FieldId(502);
    pub const ECC_CORRECT_TOTAL: FieldId = FieldId(600);
    pub const ECC_UNCORRECT_TOTAL: FieldId = FieldId(601);
    pub const PROF_OCCUPANCY_PERCENT: FieldId = FieldId(800);
    pub const PROF_ACTIVE_WAVES: FieldId = FieldId(801);
    pub const PROF_ACTIVE_CYCLES: FieldId = FieldId(802);

    /// Create a field id from a raw code (not checked against the catalog)
    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// Raw numeric code
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Look up a field by its exact canonical name; surrounding whitespace is ignored
    pub fn from_name(name: &str) -> Option<FieldId> {
        let name = name.trim();
        CATALOG
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id)
    }

    /// Catalog entry for this field, if known
    pub fn descriptor(self) -> Option<&'static FieldDescriptor> {
        CATALOG.iter().find(|d| d.id == self)
    }

    /// Canonical upper-case name, or `RDC_FI_UNKNOWN_<code>`
    pub fn name(self) -> String {
        match self.descriptor() {
            Some(d) => d.name.to_string(),
            None => format!("RDC_FI_UNKNOWN_{}", self.0),
        }
    }

    /// Lower-case name used for series names
    pub fn display_name(self) -> String {
        self.name().to_lowercase()
    }

    /// Help text for the exported series
    pub fn help(self) -> String {
        match self.descriptor() {
            Some(d) => d.help.to_string(),
            None => self.display_name(),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FieldId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldId::from_name(s).ok_or_else(|| crate::Error::unknown_field(s.trim()))
    }
}

/// Every field this exporter knows how to name
pub static CATALOG: &[FieldDescriptor] = &[
    FieldDescriptor { id: FieldId::GPU_CLOCK, name: "RDC_FI_GPU_CLOCK", help: "Current graphics clock in Hz" },
    FieldDescriptor { id: FieldId::MEM_CLOCK, name: "RDC_FI_MEM_CLOCK", help: "Current memory clock in Hz" },
    FieldDescriptor { id: FieldId::MEMORY_TEMP, name: "RDC_FI_MEMORY_TEMP", help: "Memory temperature in millidegrees Celsius" },
    FieldDescriptor { id: FieldId::GPU_TEMP, name: "RDC_FI_GPU_TEMP", help: "GPU temperature in millidegrees Celsius" },
    FieldDescriptor { id: FieldId::POWER_USAGE, name: "RDC_FI_POWER_USAGE", help: "Average power usage in microwatts" },
    FieldDescriptor { id: FieldId::PCIE_TX, name: "RDC_FI_PCIE_TX", help: "PCIe transmit throughput" },
    FieldDescriptor { id: FieldId::PCIE_RX, name: "RDC_FI_PCIE_RX", help: "PCIe receive throughput" },
    FieldDescriptor { id: FieldId::GPU_UTIL, name: "RDC_FI_GPU_UTIL", help: "GPU busy percent" },
    FieldDescriptor { id: FieldId::GPU_MEMORY_USAGE, name: "RDC_FI_GPU_MEMORY_USAGE", help: "VRAM used in bytes" },
    FieldDescriptor { id: FieldId::GPU_MEMORY_TOTAL, name: "RDC_FI_GPU_MEMORY_TOTAL", help: "VRAM total in bytes" },
    FieldDescriptor { id: FieldId::ECC_CORRECT_TOTAL, name: "RDC_FI_ECC_CORRECT_TOTAL", help: "Correctable ECC errors" },
    FieldDescriptor { id: FieldId::ECC_UNCORRECT_TOTAL, name: "RDC_FI_ECC_UNCORRECT_TOTAL", help: "Uncorrectable ECC errors" },
    FieldDescriptor { id: FieldId::PROF_OCCUPANCY_PERCENT, name: "RDC_FI_PROF_OCCUPANCY_PERCENT", help: "Compute occupancy percent" },
    FieldDescriptor { id: FieldId::PROF_ACTIVE_WAVES, name: "RDC_FI_PROF_ACTIVE_WAVES", help: "Active waves" },
    FieldDescriptor { id: FieldId::PROF_ACTIVE_CYCLES, name: "RDC_FI_PROF_ACTIVE_CYCLES", help: "Active cycles" },
];

/// Fields exported when no allow-list is configured
pub const DEFAULT_FIELDS: &[FieldId] = &[
    FieldId::GPU_MEMORY_USAGE,
    FieldId::GPU_MEMORY_TOTAL,
    FieldId::POWER_USAGE,
    FieldId::GPU_CLOCK,
    FieldId::GPU_UTIL,
    FieldId::GPU_TEMP,
    FieldId::PROF_ACTIVE_CYCLES,
    FieldId::PROF_ACTIVE_WAVES,
    FieldId::PROF_OCCUPANCY_PERCENT,
];
