// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Write barrier and remembered set (§4.2): every pointer store from an
//! old-space object to a new-space object records the card containing the
//! storing address, so the scavenger can find old→new pointers without
//! scanning all of old space.

use crate::types::Vaddr;
use alloc::collections::BTreeSet;

/// Power-of-two card size. Must divide every `OldSpace` chunk size evenly.
pub const CARD_SIZE: u64 = 512;

fn card_of(addr: Vaddr) -> Vaddr {
    addr.align_down(CARD_SIZE)
}

/// A duplicate-tolerant set of card addresses. Backed by a `BTreeSet` so
/// `remember` is naturally idempotent and iteration is in address order,
/// matching the deterministic-ordering requirement the rest of the crate
/// holds itself to.
#[derive(Default)]
pub struct RememberedSet {
    cards: BTreeSet<Vaddr>,
}

impl RememberedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, storing_addr: Vaddr) {
        self.cards.insert(card_of(storing_addr));
    }

    #[must_use]
    pub fn contains_card_of(&self, addr: Vaddr) -> bool {
        self.cards.contains(&card_of(addr))
    }

    pub fn cards(&self) -> impl Iterator<Item = Vaddr> + '_ {
        self.cards.iter().copied()
    }

    /// Drops a card once scavenging has determined it no longer references
    /// new space (end of §4.3 step 4).
    pub fn forget(&mut self, card: Vaddr) {
        self.cards.remove(&card);
    }

    pub fn clear(&mut self) {
        self.cards.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Call from every mutator pointer store: `container` is the address being
/// written into, `is_container_old` tells whether `container` lives in old
/// space, and `is_value_new` tells whether the stored pointer targets new
/// space. Old→new stores are the only ones that need remembering; old→old
/// and anything involving program space (immutable, never a store target)
/// never populate the set.
pub fn write_barrier(
    remembered_set: &mut RememberedSet,
    container: Vaddr,
    is_container_old: bool,
    is_value_new: bool,
) {
    if is_container_old && is_value_new {
        remembered_set.remember(container);
    }
}
