//! Coroutine identity

use core::fmt;

/// Unique identifier for a dispatched coroutine.
///
/// Ids increase monotonically for the lifetime of a scheduler and are
/// never handed out twice, even when the underlying slot (and its stack)
/// is recycled for a new dispatch. Within a timer node coroutines are
/// ordered by this id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoroId(u64);

impl CoroId {
    /// Id of the scheduler's bootstrap context
    pub const BOOTSTRAP: CoroId = CoroId(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        CoroId(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_bootstrap(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bootstrap() {
            write!(f, "CoroId(BOOTSTRAP)")
        } else {
            write!(f, "CoroId({})", self.0)
        }
    }
}

impl fmt::Display for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wake target for a suspended coroutine.
///
/// Pairs the scheduler slot with the id of the coroutine dispatched into
/// it, so a wake aimed at a coroutine that has since finished (and whose
/// slot was reused) can be told apart and dropped.
///
/// Ordering is by id first, which gives the tie-break order inside a
/// timer node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroHandle {
    id: CoroId,
    slot: u32,
}

impl CoroHandle {
    #[inline]
    pub const fn new(id: CoroId, slot: u32) -> Self {
        Self { id, slot }
    }

    #[inline]
    pub const fn id(self) -> CoroId {
        self.id
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Slot as an index
    #[inline]
    pub const fn index(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Debug for CoroHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroHandle({}@{})", self.id.0, self.slot)
    }
}
