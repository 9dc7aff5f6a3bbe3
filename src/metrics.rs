//! Protocol counters, exported through the `metrics` facade.
//!
//! With the `metrics` feature disabled every function compiles to nothing.

#[cfg(feature = "metrics")]
mod enabled {
    pub(crate) fn delivered() {
        metrics::counter!("demandweld_items_delivered").increment(1);
    }

    pub(crate) fn requested(n: u64) {
        metrics::counter!("demandweld_demand_requested").increment(n);
    }

    pub(crate) fn cancelled() {
        metrics::counter!("demandweld_cancellations").increment(1);
    }

    pub(crate) fn failed() {
        metrics::counter!("demandweld_errors").increment(1);
    }
}

#[cfg(not(feature = "metrics"))]
mod enabled {
    #[inline(always)]
    pub(crate) fn delivered() {}

    #[inline(always)]
    pub(crate) fn requested(_n: u64) {}

    #[inline(always)]
    pub(crate) fn cancelled() {}

    #[inline(always)]
    pub(crate) fn failed() {}
}

pub(crate) use enabled::*;
