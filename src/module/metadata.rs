//! Per-input header metadata exposed to `process`.

use crate::header::Header;
use crate::message::Message;
use crate::time::Timestamp;

/// Snapshot of the last header seen on one input slot.
///
/// Written by the driving data thread immediately before each `process`
/// invocation and read by user code during it; both happen on the same
/// thread, so no locking is involved.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct InputMetadata {
    /// Header timestamp of the sample backing this slot.
    pub timestamp_ns: Timestamp,
    /// Header sequence number of the sample.
    pub sequence: u32,
    /// Message id of the sample.
    pub message_id: u32,
    /// Whether the slot was refreshed for the current invocation.
    pub is_fresh: bool,
    /// Whether the slot holds any usable sample at all.
    pub is_valid: bool,
}

/// Per-invocation view handed to `process`.
#[derive(Debug)]
pub struct ModuleContext {
    metadata: Box<[InputMetadata]>,
}

impl ModuleContext {
    pub(crate) fn new(num_inputs: usize) -> Self {
        Self {
            metadata: vec![InputMetadata::default(); num_inputs].into_boxed_slice(),
        }
    }

    pub(crate) fn record(&mut self, slot: usize, header: &Header, fresh: bool) {
        if let Some(meta) = self.metadata.get_mut(slot) {
            *meta = InputMetadata {
                timestamp_ns: header.timestamp_ns,
                sequence: header.seq_number,
                message_id: header.msg_type,
                is_fresh: fresh,
                is_valid: true,
            };
        }
    }

    pub(crate) fn invalidate(&mut self, slot: usize) {
        if let Some(meta) = self.metadata.get_mut(slot) {
            meta.is_fresh = false;
            meta.is_valid = false;
        }
    }

    /// Number of input slots.
    pub fn num_inputs(&self) -> usize {
        self.metadata.len()
    }

    /// Metadata of input slot `k`.
    pub fn input_metadata(&self, k: usize) -> Option<&InputMetadata> {
        self.metadata.get(k)
    }

    /// Header timestamp of input slot `k`, if the slot is valid.
    pub fn input_timestamp(&self, k: usize) -> Option<Timestamp> {
        self.metadata
            .get(k)
            .filter(|m| m.is_valid)
            .map(|m| m.timestamp_ns)
    }

    /// Whether slot `k` was refreshed for the current invocation.
    pub fn has_new_data(&self, k: usize) -> bool {
        self.metadata.get(k).is_some_and(|m| m.is_fresh)
    }

    /// Whether slot `k` holds a usable sample.
    pub fn is_input_valid(&self, k: usize) -> bool {
        self.metadata.get(k).is_some_and(|m| m.is_valid)
    }

    /// Metadata of the slot carrying messages of type `T`.
    ///
    /// Only meaningful when all declared input types are distinct; returns
    /// `None` when zero or several slots match.
    pub fn input_metadata_for<T: Message>(&self) -> Option<&InputMetadata> {
        let mut matches = self
            .metadata
            .iter()
            .filter(|m| m.is_valid && m.message_id == T::MESSAGE_ID);

        let found = matches.next()?;

        matches.next().is_none().then_some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_and_invalidate() {
        let mut ctx = ModuleContext::new(2);

        assert!(!ctx.is_input_valid(0));
        assert_eq!(ctx.input_timestamp(0), None);

        let header = Header::new(42, 8, 1_000, 7);

        ctx.record(0, &header, true);

        assert!(ctx.is_input_valid(0));
        assert!(ctx.has_new_data(0));
        assert_eq!(ctx.input_timestamp(0), Some(1_000));
        assert_eq!(ctx.input_metadata(0).unwrap().sequence, 7);

        ctx.invalidate(0);

        assert!(!ctx.is_input_valid(0));
        assert!(!ctx.has_new_data(0));
    }

    #[test]
    fn out_of_range_slot() {
        let ctx = ModuleContext::new(1);

        assert!(ctx.input_metadata(3).is_none());
        assert!(!ctx.is_input_valid(3));
    }
}
