//! Three-slot rotating buffer set.

/// Number of slots in a [`BufferRing`].
pub const RING_SLOTS: usize = 3;

/// Fixed ring of owned buffers addressed through a rotating index.
///
/// `slot(i)` resolves to `(index + i) % 3`. Rotation only changes the
/// index; the buffers never move.
///
/// The accumulation backend assigns the roles:
/// - slot 0: latest field (stimuli are drawn here)
/// - slot 1: target of the next step
/// - slot 2: field one step older than slot 0
#[derive(Debug)]
pub struct BufferRing<T> {
    slots: [T; RING_SLOTS],
    index: usize,
}

impl<T> BufferRing<T> {
    /// Wrap three buffers; slot 0 is `slots[0]`.
    pub fn new(slots: [T; RING_SLOTS]) -> Self {
        Self { slots, index: 0 }
    }

    /// Physical position of logical slot `i`.
    #[inline]
    pub fn position(&self, i: usize) -> usize {
        (self.index + i) % RING_SLOTS
    }

    /// Logical slot `i`.
    #[inline]
    pub fn slot(&self, i: usize) -> &T {
        &self.slots[self.position(i)]
    }

    /// Mutable logical slot `i`.
    #[inline]
    pub fn slot_mut(&mut self, i: usize) -> &mut T {
        let pos = self.position(i);
        &mut self.slots[pos]
    }

    /// Advance by one: old slot 1 becomes slot 0, old slot 0 becomes slot 2.
    pub fn rotate(&mut self) {
        self.index = self.position(1);
    }

    /// Rotation index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// All buffers in physical order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}
