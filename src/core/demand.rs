//! Demand accounting for a single producer.

/// Demand value meaning "no limit". Counters saturate here.
pub const UNBOUNDED: i64 = i64::MAX;

const CEILING: u64 = UNBOUNDED as u64;

/// Outstanding demand of one producer.
///
/// `Closed` is terminal: once reached the value never changes again and no
/// further event may be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Demand {
    /// No subscriber attached yet
    #[default]
    Unsubscribed,
    /// Items authorized but not yet delivered
    Open(u64),
    /// Cancelled or terminated
    Closed,
}

impl Demand {
    /// Add `n` to the outstanding demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns true on a zero to positive transition.
    pub fn add(&mut self, n: u64) -> bool {
        match self {
            Demand::Open(current) => {
                let was_zero = *current == 0;
                *current = current.saturating_add(n).min(CEILING);
                was_zero && *current > 0
            }
            Demand::Unsubscribed => {
                *self = Demand::Open(n.min(CEILING));
                n > 0
            }
            Demand::Closed => false,
        }
    }

    /// Consume one unit of demand. Returns false if none was available.
    ///
    /// Unbounded demand is never decremented.
    pub fn take_one(&mut self) -> bool {
        match self {
            Demand::Open(current) if *current == CEILING => true,
            Demand::Open(current) if *current > 0 => {
                *current -= 1;
                true
            }
            _ => false,
        }
    }

    /// Number of items that may be delivered right now.
    pub fn available(&self) -> u64 {
        match self {
            Demand::Open(n) => *n,
            _ => 0,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Demand::Open(n) if *n == CEILING)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Demand::Closed)
    }

    /// Move to `Closed`. Returns true if this call performed the transition.
    pub fn close(&mut self) -> bool {
        let was_open = !self.is_closed();
        *self = Demand::Closed;
        was_open
    }
}

/// Convert a protocol-level request amount to a counter increment.
pub(crate) fn amount(n: i64) -> Option<u64> {
    u64::try_from(n).ok()
}

/// Convert an internal counter back to a protocol-level request amount.
pub(crate) fn to_request(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(UNBOUNDED)
}
