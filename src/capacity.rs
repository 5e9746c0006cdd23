use crossbeam::atomic::AtomicCell;

/// Conservative default combine rule: the stronger shrink wins.
pub fn min_weight(periodic: f64, exceeded: f64) -> f64 {
    periodic.min(exceeded)
}

/// Cache-capacity adjustment weights, all starting at 1.0 (full capacity).
/// The writers own the range; nothing here clamps.
///
/// Three independently written figures:
/// - `periodic` is set by the periodic capacity-refresh maintenance pass,
/// - `exceeded` is set when work pauses because process memory is exceeded,
/// - `affected` is the value cache implementations actually size by.
///
/// Writes are last-writer-wins; only `recombine` touches `affected`. The rule
/// combining the first two belongs to the maintenance logic that calls
/// `recombine_with`, not to this type.
#[derive(Debug)]
pub struct CacheCapacityWeights {
    periodic: AtomicCell<f64>,
    exceeded: AtomicCell<f64>,
    affected: AtomicCell<f64>,
}

impl Default for CacheCapacityWeights {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheCapacityWeights {
    pub fn new() -> Self {
        Self {
            periodic: AtomicCell::new(1.0),
            exceeded: AtomicCell::new(1.0),
            affected: AtomicCell::new(1.0),
        }
    }

    pub fn set_periodic_weight(&self, weight: f64) {
        self.periodic.store(weight);
    }

    pub fn set_exceeded_weight(&self, weight: f64) {
        self.exceeded.store(weight);
    }

    pub fn periodic_weight(&self) -> f64 {
        self.periodic.load()
    }

    pub fn exceeded_weight(&self) -> f64 {
        self.exceeded.load()
    }

    /// The figure caches size themselves by. Stale until the next
    /// `recombine`; input writes do not propagate on their own.
    pub fn affected_weight(&self) -> f64 {
        self.affected.load()
    }

    /// Recompute and publish the affected weight with `combine`, returning
    /// the published value.
    pub fn recombine_with(&self, combine: impl Fn(f64, f64) -> f64) -> f64 {
        let weight = combine(self.periodic.load(), self.exceeded.load());
        self.affected.store(weight);
        weight
    }

    /// `recombine_with(min_weight)`.
    pub fn recombine(&self) -> f64 {
        self.recombine_with(min_weight)
    }
}
