// kernel/src/memory/frame_allocator.rs
//
// Tracks residency of the physical frames covering the pageable area
// and picks replacement victims. A frame is either free or owned by
// exactly one (pid, virtual page) pair. The FIFO queue records the
// order in which frames became owned; LRU selection is driven by an
// age lookup supplied by the caller, since last-use ticks live in the
// page tables, not here.

use std::collections::VecDeque;

use crate::machine::Tick;
use crate::process::Pid;

#[derive(Debug, Clone, Copy, Default)]
struct FrameDesc {
    owner: Option<(Pid, usize)>,
}

#[derive(Debug)]
pub struct FrameManager {
    frames: Vec<FrameDesc>,
    fifo: VecDeque<usize>,
}

impl FrameManager {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: vec![FrameDesc::default(); num_frames],
            fifo: VecDeque::with_capacity(num_frames),
        }
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn count_free(&self) -> usize {
        self.frames.iter().filter(|f| f.owner.is_none()).count()
    }

    pub fn owner(&self, frame: usize) -> Option<(Pid, usize)> {
        self.frames.get(frame).and_then(|f| f.owner)
    }

    /// Any free frame, lowest index first.
    pub fn find_free(&self) -> Option<usize> {
        self.frames.iter().position(|f| f.owner.is_none())
    }

    /// Oldest owned frame, without removing it from the queue; the
    /// caller evicts it once the victim page has been written out.
    pub fn select_victim_fifo(&self) -> Option<usize> {
        self.fifo.front().copied()
    }

    /// Owned frame whose page has the smallest age according to
    /// `age_of`. Frames whose age cannot be resolved are skipped; if
    /// none resolves, falls back to FIFO.
    pub fn select_victim_lru(
        &self,
        age_of: impl Fn(Pid, usize) -> Option<Tick>,
    ) -> Option<usize> {
        let mut best: Option<(usize, Tick)> = None;
        for (idx, desc) in self.frames.iter().enumerate() {
            let Some((pid, page)) = desc.owner else {
                continue;
            };
            let Some(age) = age_of(pid, page) else {
                continue;
            };
            if best.is_none_or(|(_, best_age)| age < best_age) {
                best = Some((idx, age));
            }
        }
        match best {
            Some((idx, _)) => Some(idx),
            None => self.select_victim_fifo(),
        }
    }

    /// Record that `frame` now holds `page` of `pid` and append it to
    /// the replacement queue.
    pub fn assign(&mut self, frame: usize, pid: Pid, page: usize) {
        self.frames[frame].owner = Some((pid, page));
        self.fifo.push_back(frame);
    }

    /// Free `frame` and drop it from the replacement queue.
    pub fn evict(&mut self, frame: usize) {
        self.frames[frame].owner = None;
        self.fifo.retain(|&f| f != frame);
    }

    /// Free every frame owned by `pid`, preserving the relative queue
    /// order of the surviving frames.
    pub fn release_all(&mut self, pid: Pid) {
        for desc in &mut self.frames {
            if matches!(desc.owner, Some((owner, _)) if owner == pid) {
                desc.owner = None;
            }
        }
        let frames = &self.frames;
        self.fifo.retain(|&f| frames[f].owner.is_some());
    }

    pub fn iter_owned(&self) -> impl Iterator<Item = (usize, Pid, usize)> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(idx, d)| d.owner.map(|(pid, page)| (idx, pid, page)))
    }
}
