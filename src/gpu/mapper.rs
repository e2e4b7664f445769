// ============================================================================
// HOST MAPPER — expose a finished transfer buffer to the CPU
// ============================================================================

use super::device::TransferDevice;
use super::error::{contract_violation, ReadbackError};
use super::ring::TransferRing;
use super::scheduler::PackBinding;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MappedRegion {
    slot: usize,
    len: u64,
}

/// Tracks the single buffer that may be mapped at a time.
#[derive(Debug, Default)]
pub struct HostMapper {
    mapped: Option<MappedRegion>,
    maps: u64,
}

impl HostMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn mapped_slot(&self) -> Option<usize> {
        self.mapped.map(|m| m.slot)
    }

    /// Successful maps so far.
    pub fn maps(&self) -> u64 {
        self.maps
    }

    /// Map `[0, len)` of the bound buffer for reading.  Waits only for the
    /// copy that last wrote that buffer.
    pub fn map<D: TransferDevice>(
        &mut self,
        device: &D,
        ring: &TransferRing<D>,
        binding: &PackBinding,
        len: u64,
    ) -> Result<usize, ReadbackError> {
        if let Some(m) = self.mapped {
            return Err(contract_violation(format!(
                "map while buffer {} is still mapped",
                m.slot
            )));
        }
        let Some(slot_index) = binding.bound() else {
            return Err(contract_violation("map with no active transfer buffer".to_string()));
        };
        let Some(slot) = ring.slot(slot_index) else {
            return Err(contract_violation(format!(
                "bound transfer buffer {} does not exist",
                slot_index
            )));
        };
        if len == 0 || len > ring.buffer_size() {
            return Err(ReadbackError::ContractViolation(format!(
                "map of {} bytes from a {} byte buffer",
                len,
                ring.buffer_size()
            )));
        }

        device.map_read(&slot.buffer, len, slot.fence.as_ref())?;
        self.mapped = Some(MappedRegion { slot: slot_index, len });
        self.maps += 1;
        Ok(slot_index)
    }

    /// Host view of the mapped bytes.
    pub fn view<'a, D: TransferDevice>(
        &self,
        device: &'a D,
        ring: &'a TransferRing<D>,
    ) -> Result<D::View<'a>, ReadbackError> {
        let Some(m) = self.mapped else {
            return Err(ReadbackError::ContractViolation("no transfer buffer is mapped".to_string()));
        };
        let slot = ring.slot(m.slot).ok_or_else(|| {
            ReadbackError::ContractViolation(format!("mapped transfer buffer {} is gone", m.slot))
        })?;
        Ok(device.mapped_range(&slot.buffer, m.len))
    }

    /// Release the mapping and reset the pack binding to "none".
    pub fn unmap<D: TransferDevice>(
        &mut self,
        device: &D,
        ring: &TransferRing<D>,
        binding: &mut PackBinding,
    ) -> Result<(), ReadbackError> {
        let Some(m) = self.mapped.take() else {
            return Err(contract_violation("unmap without a matching map".to_string()));
        };
        if let Some(slot) = ring.slot(m.slot) {
            device.unmap(&slot.buffer);
        }
        binding.unbind();
        Ok(())
    }
}
