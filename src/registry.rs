//! Cross-runtime reference registry.
//!
//! Generational slot arena keeping host objects alive while the engine
//! holds a handle to them. The engine stores only a packed [`RefToken`]
//! inside its userdata block, never a host pointer; the slot owns the
//! extending reference and is freed exactly once, driven by the engine's
//! finalize notification.

use crate::value::ObjectRef;

/// Packed generational handle stored in an engine-allocated block.
///
/// The generation detects stale tokens: a slot reused after its finalize
/// notification no longer resolves through the old token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefToken {
    index: u32,
    generation: u32,
}

impl RefToken {
    /// Pack into the `u64` layout written into the userdata block.
    pub(crate) fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`RefToken::to_bits`].
    pub(crate) fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

struct Slot {
    generation: u32,
    value: Option<ObjectRef>,
}

/// Registry of host objects reachable from engine-side handles.
///
/// Unordered; one instance per engine; single-threaded by design (one
/// thread drives one engine instance end to end).
#[derive(Default)]
pub struct RefRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl RefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an object that is crossing into the engine as a
    /// newly allocated engine-side block.
    ///
    /// Called exactly once per block; re-pushing the same host object
    /// allocates a fresh block and therefore a fresh token.
    pub fn track(&mut self, object: ObjectRef) -> RefToken {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(object);
            RefToken {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(object),
            });
            RefToken {
                index,
                generation: 0,
            }
        }
    }

    /// Look up the object behind a token.
    ///
    /// Returns `None` for stale or foreign tokens.
    pub fn resolve(&self, token: RefToken) -> Option<ObjectRef> {
        let slot = self.slots.get(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.value.clone()
    }

    /// Release a tracking entry in response to the engine's finalize
    /// notification for its block.
    ///
    /// Panics if the token was never tracked or was already released:
    /// that is an internal consistency failure of the bridge, not a
    /// user error, and must not be recovered from.
    pub fn untrack(&mut self, token: RefToken) -> ObjectRef {
        let slot = self
            .slots
            .get_mut(token.index as usize)
            .filter(|slot| slot.generation == token.generation);
        let Some(slot) = slot else {
            panic!("finalize notification for untracked reference {token:?}");
        };
        let Some(object) = slot.value.take() else {
            panic!("finalize notification for untracked reference {token:?}");
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(token.index);
        object
    }

    /// Number of live tracking entries.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
