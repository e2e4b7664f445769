// ============================================================================
// SOFT DEVICE — CPU model of a transfer device
// ============================================================================
//
// Used when no wgpu adapter can be opened at all, and by the test suite.  It
// behaves like a device that finishes work some submissions later:
//   * `copy_rect` snapshots the source rows and queues the write;
//   * a queued copy lands once `latency` newer copies have been issued, or
//     when a map waits on its fence (that wait is counted as a stall);
//   * buffers are zero-filled at creation.

use std::cell::{Cell, Ref, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::device::TransferDevice;
use super::error::ReadbackError;
use super::format::{ReadRect, SourceDescriptor};

/// CPU-side render target.
pub struct SoftSurface {
    desc: SourceDescriptor,
    pixels: Vec<u8>,
}

impl SoftSurface {
    pub fn new(desc: SourceDescriptor) -> Self {
        Self {
            desc,
            pixels: vec![0; desc.byte_size() as usize],
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        self.desc
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Set every pixel to `pixel` (one pixel's worth of bytes).
    pub fn fill(&mut self, pixel: &[u8]) {
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        debug_assert_eq!(pixel.len(), bpp);
        for chunk in self.pixels.chunks_exact_mut(bpp) {
            chunk.copy_from_slice(pixel);
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: &[u8]) {
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        let start = (y as usize * self.desc.width as usize + x as usize) * bpp;
        self.pixels[start..start + bpp].copy_from_slice(pixel);
    }
}

/// Transfer buffer owned by a [`SoftDevice`].
pub struct SoftBuffer {
    id: u32,
    data: Rc<RefCell<Vec<u8>>>,
    mapped: Cell<bool>,
    alive: Rc<Cell<usize>>,
}

impl SoftBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.data.borrow().len() as u64
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.get()
    }
}

impl Drop for SoftBuffer {
    fn drop(&mut self) {
        self.alive.set(self.alive.get().saturating_sub(1));
    }
}

/// Counters describing everything the device has been asked to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub buffers_alive: usize,
    pub buffers_created: usize,
    pub copies_issued: u64,
    pub copies_completed: u64,
    pub maps: u64,
    pub unmaps: u64,
    /// Maps that had to wait for an unfinished copy.
    pub stalls: u64,
}

struct PendingCopy {
    fence: u64,
    dest: Rc<RefCell<Vec<u8>>>,
    rows: Vec<u8>,
    row_bytes: usize,
    row_pitch: usize,
}

pub struct SoftDevice {
    latency: u64,
    row_alignment: u32,
    next_fence: Cell<u64>,
    next_buffer_id: Cell<u32>,
    pending: RefCell<VecDeque<PendingCopy>>,
    stats: Cell<SoftStats>,
    alive: Rc<Cell<usize>>,
    /// Remaining successful allocations; `None` = unlimited.
    alloc_budget: Cell<Option<usize>>,
    lost: Cell<bool>,
}

impl SoftDevice {
    /// Device whose copies finish one submission later, with tightly packed rows.
    pub fn new() -> Self {
        Self::with_latency(1)
    }

    /// `latency` = how many newer copies must be issued before a queued copy
    /// lands on its own.  `0` models a device that finishes instantly.
    pub fn with_latency(latency: u64) -> Self {
        Self {
            latency,
            row_alignment: 1,
            next_fence: Cell::new(1),
            next_buffer_id: Cell::new(1),
            pending: RefCell::new(VecDeque::new()),
            stats: Cell::new(SoftStats::default()),
            alive: Rc::new(Cell::new(0)),
            alloc_budget: Cell::new(None),
            lost: Cell::new(false),
        }
    }

    /// Pad rows to a multiple of `alignment` bytes, as wgpu does with 256.
    pub fn with_row_alignment(mut self, alignment: u32) -> Self {
        self.row_alignment = alignment.max(1);
        self
    }

    pub fn stats(&self) -> SoftStats {
        let mut s = self.stats.get();
        s.buffers_alive = self.alive.get();
        s
    }

    /// Copies issued but not yet landed in their buffers.
    pub fn pending_copies(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Let the next `count` allocations succeed and fail every one after.
    pub fn fail_allocations_after(&self, count: usize) {
        self.alloc_budget.set(Some(count));
    }

    /// Simulate a lost context: every later map and allocation fails.
    pub fn lose_device(&self) {
        self.lost.set(true);
    }

    /// Drain the queue, as if the device went idle.
    pub fn finish(&self) {
        self.retire(|_| true);
    }

    fn bump(&self, f: impl FnOnce(&mut SoftStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }

    /// Land every queued copy (in issue order) for which `done` holds.
    /// Returns how many landed.
    fn retire(&self, done: impl Fn(u64) -> bool) -> u64 {
        let mut landed = 0;
        let mut pending = self.pending.borrow_mut();
        while let Some(front) = pending.front() {
            if !done(front.fence) {
                break;
            }
            if let Some(job) = pending.pop_front() {
                let mut dest = job.dest.borrow_mut();
                for (r, row) in job.rows.chunks_exact(job.row_bytes).enumerate() {
                    let start = r * job.row_pitch;
                    dest[start..start + job.row_bytes].copy_from_slice(row);
                }
                landed += 1;
            }
        }
        drop(pending);
        self.bump(|s| s.copies_completed += landed);
        landed
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferDevice for SoftDevice {
    type Buffer = SoftBuffer;
    type Target = SoftSurface;
    type Fence = u64;
    type View<'a> = Ref<'a, [u8]>;

    fn describe(&self, target: &SoftSurface) -> Option<SourceDescriptor> {
        Some(target.desc)
    }

    fn row_pitch(&self, source: &SourceDescriptor) -> Option<u32> {
        let align = self.row_alignment;
        source.row_bytes()?.div_ceil(align).checked_mul(align)
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<SoftBuffer, ReadbackError> {
        if self.lost.get() {
            return Err(ReadbackError::AllocationFailure(format!("{}: device lost", label)));
        }
        if let Some(budget) = self.alloc_budget.get() {
            if budget == 0 {
                return Err(ReadbackError::AllocationFailure(format!(
                    "{}: out of device memory ({} bytes requested)",
                    label, size
                )));
            }
            self.alloc_budget.set(Some(budget - 1));
        }

        let id = self.next_buffer_id.get();
        self.next_buffer_id.set(id + 1);
        self.alive.set(self.alive.get() + 1);
        self.bump(|s| s.buffers_created += 1);

        Ok(SoftBuffer {
            id,
            data: Rc::new(RefCell::new(vec![0; size as usize])),
            mapped: Cell::new(false),
            alive: Rc::clone(&self.alive),
        })
    }

    fn destroy_buffer(&self, buffer: SoftBuffer) {
        // Drop any queued write into it so it never lands.
        self.pending
            .borrow_mut()
            .retain(|job| !Rc::ptr_eq(&job.dest, &buffer.data));
        drop(buffer);
    }

    fn copy_rect(
        &self,
        target: &SoftSurface,
        rect: &ReadRect,
        row_pitch: u32,
        buffer: &SoftBuffer,
    ) -> Result<u64, ReadbackError> {
        let desc = target.desc;
        if !rect.fits(&desc) || rect.is_empty() {
            return Err(ReadbackError::ContractViolation(format!(
                "copy of {:?} outside {}x{} surface",
                rect, desc.width, desc.height
            )));
        }
        if buffer.mapped.get() {
            return Err(ReadbackError::ContractViolation(format!(
                "copy into mapped buffer {}",
                buffer.id
            )));
        }

        let bpp = desc.format.bytes_per_pixel() as usize;
        let row_bytes = rect.width as usize * bpp;
        let row_pitch = row_pitch as usize;
        let needed = (rect.height as usize - 1) * row_pitch + row_bytes;
        if row_pitch < row_bytes || needed > buffer.data.borrow().len() {
            return Err(ReadbackError::ContractViolation(format!(
                "copy of {:?} needs {} bytes, buffer {} holds {}",
                rect,
                needed,
                buffer.id,
                buffer.size()
            )));
        }

        let src_pitch = desc.width as usize * bpp;
        let mut rows = Vec::with_capacity(row_bytes * rect.height as usize);
        for r in 0..rect.height as usize {
            let start = (rect.y as usize + r) * src_pitch + rect.x as usize * bpp;
            rows.extend_from_slice(&target.pixels[start..start + row_bytes]);
        }

        let fence = self.next_fence.get();
        self.next_fence.set(fence + 1);
        self.pending.borrow_mut().push_back(PendingCopy {
            fence,
            dest: Rc::clone(&buffer.data),
            rows,
            row_bytes,
            row_pitch,
        });
        self.bump(|s| s.copies_issued += 1);

        let latency = self.latency;
        self.retire(|f| f + latency <= fence);
        Ok(fence)
    }

    fn map_read(&self, buffer: &SoftBuffer, len: u64, fence: Option<&u64>) -> Result<(), ReadbackError> {
        if self.lost.get() {
            return Err(ReadbackError::InvalidMapping(format!("buffer {}: device lost", buffer.id)));
        }
        if buffer.mapped.get() {
            return Err(ReadbackError::InvalidMapping(format!("buffer {} is already mapped", buffer.id)));
        }
        if len > buffer.size() {
            return Err(ReadbackError::InvalidMapping(format!(
                "map of {} bytes beyond buffer {} ({} bytes)",
                len,
                buffer.id,
                buffer.size()
            )));
        }

        if let Some(&wait_for) = fence
            && self.retire(|f| f <= wait_for) > 0
        {
            self.bump(|s| s.stalls += 1);
        }

        buffer.mapped.set(true);
        self.bump(|s| s.maps += 1);
        Ok(())
    }

    fn mapped_range<'a>(&'a self, buffer: &'a SoftBuffer, len: u64) -> Ref<'a, [u8]> {
        Ref::map(buffer.data.borrow(), |v| &v[..(len as usize).min(v.len())])
    }

    fn unmap(&self, buffer: &SoftBuffer) {
        buffer.mapped.set(false);
        self.bump(|s| s.unmaps += 1);
    }
}
