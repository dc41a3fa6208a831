//! Scratch memory carved from the slack at the end of writable sections.
//!
//! A writable section is mapped up to its alignment boundary but only
//! `used` bytes of it belong to the program. The zero-filled remainder can
//! hold payload variables without clobbering live data.

use log::debug;

use crate::error::{Error, Result};
use crate::module::WritableSection;
use crate::types::VirtAddr;

/// Unused tail of one writable section. `begin <= cursor <= end` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlackRegion {
    begin: u64,
    cursor: u64,
    end: u64,
}

impl SlackRegion {
    /// Slack after `section`: from its loaded end to the next alignment
    /// boundary strictly above it. Sections without a usable power-of-two
    /// alignment contribute an empty region.
    pub fn from_section(section: &WritableSection) -> Self {
        let begin = section.start.addr() as u64 + section.used as u64;
        let align = section.alignment as u64;
        let end = if align > 1 && align.is_power_of_two() {
            ((begin + align) & !(align - 1)).min(1 << 32)
        } else {
            begin
        };
        SlackRegion {
            begin,
            cursor: begin,
            end: end.max(begin),
        }
    }

    /// Region covering `[begin, end)` directly.
    pub fn new(begin: VirtAddr, end: VirtAddr) -> Self {
        let begin = begin.addr() as u64;
        SlackRegion {
            begin,
            cursor: begin,
            end: (end.addr() as u64).max(begin),
        }
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.end - self.cursor
    }

    fn take(&mut self, n: u32) -> Option<VirtAddr> {
        let next = self.cursor + n as u64;
        if next > self.end {
            return None;
        }
        let addr = u32::try_from(self.cursor).ok()?;
        self.cursor = next;
        Some(VirtAddr(addr))
    }
}

/// Bump allocator over every module's slack regions, in discovery order.
#[derive(Debug, Default)]
pub struct ScratchAllocator {
    regions: Vec<SlackRegion>,
}

impl ScratchAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(&mut self, section: &WritableSection) {
        self.add_region(SlackRegion::from_section(section));
    }

    pub fn add_region(&mut self, region: SlackRegion) {
        debug!(
            "slack region 0x{:x}..0x{:x} ({} bytes)",
            region.begin,
            region.end,
            region.remaining()
        );
        self.regions.push(region);
    }

    pub fn regions(&self) -> &[SlackRegion] {
        &self.regions
    }

    /// Hand out `n` bytes from the first region that still has room.
    pub fn allocate(&mut self, n: u32) -> Result<VirtAddr> {
        self.regions
            .iter_mut()
            .find_map(|region| region.take(n))
            .ok_or(Error::AllocationExhausted(n))
    }
}
