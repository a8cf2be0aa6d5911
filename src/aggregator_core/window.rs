//! Windowed aggregation with a bounded rolling history per key

use super::naming;
use super::reducer::Reducer;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Ordered topic segments identifying one aggregated series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey(Vec<String>);

impl AggregationKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AggregationKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Reductions for one key, ordered by reduction time. `None` marks a window
/// that closed with nothing buffered.
pub type WindowHistory = BTreeMap<DateTime<Utc>, Option<Vec<f64>>>;

/// Full copy of every key's history, taken at the end of a reduction pass.
pub type HistorySnapshot = BTreeMap<AggregationKey, WindowHistory>;

pub type UpdateCallback = Box<dyn FnMut(&HistorySnapshot) + Send>;

#[derive(Debug)]
pub enum AggregatorError {
    ArityMismatch {
        key: AggregationKey,
        expected: usize,
        got: usize,
    },
    EmptySample(AggregationKey),
    InvalidConfig(String),
}

impl fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorError::ArityMismatch { key, expected, got } => write!(
                f,
                "Arity mismatch for key '{}': buffered samples have {} fields, got {}",
                key, expected, got
            ),
            AggregatorError::EmptySample(key) => {
                write!(f, "Empty sample for key '{}'", key)
            }
            AggregatorError::InvalidConfig(msg) => {
                write!(f, "Invalid aggregator configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for AggregatorError {}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    window: Duration,
    capacity: usize,
    reducer: Reducer,
}

impl AggregatorConfig {
    pub fn new(window: Duration, capacity: usize, reducer: Reducer) -> Result<Self, AggregatorError> {
        if window.is_zero() {
            return Err(AggregatorError::InvalidConfig(
                "window duration must be greater than zero".to_string(),
            ));
        }
        // Interval names have second resolution
        if window.subsec_nanos() != 0 {
            return Err(AggregatorError::InvalidConfig(format!(
                "window duration must be a whole number of seconds, got {:?}",
                window
            )));
        }
        if capacity == 0 {
            return Err(AggregatorError::InvalidConfig(
                "history capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            window,
            capacity,
            reducer,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    /// Descriptor appended to every output topic of this aggregator
    pub fn path_descriptor(&self) -> String {
        naming::path_descriptor(self.reducer.name(), self.window, self.capacity)
    }
}

/// Buffers samples per key and folds them into history once per window.
///
/// There is no timer thread: reductions happen opportunistically from `put`
/// and from the owning loop's calls to `tick`, so a window lasts at least
/// `window` and at most `window` plus one loop iteration. All keys share one
/// window clock and reduce together.
pub struct WindowedAggregator {
    config: AggregatorConfig,
    buffers: BTreeMap<AggregationKey, Vec<Vec<f64>>>,
    history: BTreeMap<AggregationKey, WindowHistory>,
    last_reduction: DateTime<Utc>,
    on_update: Option<UpdateCallback>,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl WindowedAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self::new_with_timestamp_fn(config, Box::new(Utc::now))
    }

    /// Create an aggregator with a custom clock (deterministic tests)
    pub fn new_with_timestamp_fn(
        config: AggregatorConfig,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let last_reduction = now_fn();
        Self {
            config,
            buffers: BTreeMap::new(),
            history: BTreeMap::new(),
            last_reduction,
            on_update: None,
            now_fn,
        }
    }

    /// Register an observer invoked once per reduction pass
    pub fn set_on_update(&mut self, callback: UpdateCallback) {
        self.on_update = Some(callback);
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Buffer one sample and run the elapsed-window check.
    ///
    /// Returns the snapshot when the check closed a window.
    pub fn put(
        &mut self,
        key: AggregationKey,
        values: Vec<f64>,
    ) -> Result<Option<HistorySnapshot>, AggregatorError> {
        if values.is_empty() {
            return Err(AggregatorError::EmptySample(key));
        }

        let buffer = self.buffers.entry(key.clone()).or_default();
        if let Some(first) = buffer.first() {
            if first.len() != values.len() {
                return Err(AggregatorError::ArityMismatch {
                    key,
                    expected: first.len(),
                    got: values.len(),
                });
            }
        }
        buffer.push(values);
        self.history.entry(key).or_default();

        Ok(self.tick())
    }

    /// Reduce every key if the current window has elapsed.
    pub fn tick(&mut self) -> Option<HistorySnapshot> {
        let now = (self.now_fn)();
        match (now - self.last_reduction).to_std() {
            Ok(elapsed) if elapsed >= self.config.window => {}
            _ => return None,
        }

        let capacity = self.config.capacity;
        for (key, buffer) in self.buffers.iter_mut() {
            let reduced = match self.config.reducer.reduce(buffer) {
                Ok(reduced) => reduced,
                Err(e) => {
                    log::error!("❌ Reduction for key '{}' failed: {}", key, e);
                    None
                }
            };
            buffer.clear();

            let history = self.history.entry(key.clone()).or_default();
            history.insert(now, reduced);
            while history.len() > capacity {
                history.pop_first();
            }
        }
        self.last_reduction = now;

        log::debug!(
            "🧮 Reduced {} key(s) with '{}' at {}",
            self.buffers.len(),
            self.config.reducer.name(),
            now
        );

        let snapshot = self.history.clone();
        if let Some(callback) = self.on_update.as_mut() {
            callback(&snapshot);
        }
        Some(snapshot)
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.clone()
    }

    pub fn history(&self, key: &AggregationKey) -> Option<&WindowHistory> {
        self.history.get(key)
    }

    pub fn buffered(&self, key: &AggregationKey) -> Option<&[Vec<f64>]> {
        self.buffers.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &AggregationKey> {
        self.buffers.keys()
    }

    pub fn last_reduction(&self) -> DateTime<Utc> {
        self.last_reduction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    fn mock_clock() -> (Arc<AtomicI64>, Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) {
        let millis = Arc::new(AtomicI64::new(1_700_000_000_000));
        let handle = millis.clone();
        let now_fn = Box::new(move || {
            DateTime::from_timestamp_millis(handle.load(Ordering::SeqCst)).unwrap()
        });
        (millis, now_fn)
    }

    fn aggregator(window_ms: u64, capacity: usize) -> (Arc<AtomicI64>, WindowedAggregator) {
        let config =
            AggregatorConfig::new(Duration::from_millis(window_ms), capacity, Reducer::Average)
                .unwrap();
        let (clock, now_fn) = mock_clock();
        (clock, WindowedAggregator::new_with_timestamp_fn(config, now_fn))
    }

    fn key(name: &str) -> AggregationKey {
        AggregationKey::from_iter([name])
    }

    #[test]
    fn test_put_accumulates_until_window_elapses() {
        let (clock, mut agg) = aggregator(1_000, 4);

        assert!(agg.put(key("a"), vec![1.0, 2.0]).unwrap().is_none());
        clock.fetch_add(400, Ordering::SeqCst);
        assert!(agg.put(key("a"), vec![3.0, 4.0]).unwrap().is_none());
        assert_eq!(agg.buffered(&key("a")).unwrap().len(), 2);
        assert!(agg.history(&key("a")).unwrap().is_empty());

        clock.fetch_add(600, Ordering::SeqCst);
        let snapshot = agg.tick().expect("window should close");

        let history = &snapshot[&key("a")];
        assert_eq!(history.len(), 1);
        assert_eq!(history.values().next().unwrap(), &Some(vec![2.0, 3.0]));
        assert!(agg.buffered(&key("a")).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_holds_only_samples_since_last_reduction() {
        let (clock, mut agg) = aggregator(1_000, 4);

        agg.put(key("a"), vec![10.0]).unwrap();
        clock.fetch_add(1_000, Ordering::SeqCst);
        agg.tick();

        agg.put(key("a"), vec![2.0]).unwrap();
        agg.put(key("a"), vec![4.0]).unwrap();
        assert_eq!(agg.buffered(&key("a")).unwrap(), &[vec![2.0], vec![4.0]]);

        clock.fetch_add(1_000, Ordering::SeqCst);
        agg.tick();
        let latest = agg.history(&key("a")).unwrap().values().last().unwrap();
        assert_eq!(latest, &Some(vec![3.0]));
    }

    #[test]
    fn test_every_key_reduced_and_empty_marker() {
        let (clock, mut agg) = aggregator(1_000, 4);

        agg.put(key("a"), vec![1.0]).unwrap();
        agg.put(key("b"), vec![5.0]).unwrap();
        clock.fetch_add(1_000, Ordering::SeqCst);
        agg.tick();

        // Only "a" receives data in the second window
        agg.put(key("a"), vec![3.0]).unwrap();
        clock.fetch_add(1_000, Ordering::SeqCst);
        let snapshot = agg.tick().unwrap();

        let b: Vec<_> = snapshot[&key("b")].values().cloned().collect();
        assert_eq!(b, vec![Some(vec![5.0]), None]);
        let a: Vec<_> = snapshot[&key("a")].values().cloned().collect();
        assert_eq!(a, vec![Some(vec![1.0]), Some(vec![3.0])]);
    }

    #[test]
    fn test_history_evicts_earliest() {
        let (clock, mut agg) = aggregator(1_000, 2);

        for i in 0..5 {
            agg.put(key("a"), vec![i as f64]).unwrap();
            clock.fetch_add(1_000, Ordering::SeqCst);
            agg.tick();
            assert!(agg.history(&key("a")).unwrap().len() <= 2);
        }

        let values: Vec<_> = agg.history(&key("a")).unwrap().values().cloned().collect();
        assert_eq!(values, vec![Some(vec![3.0]), Some(vec![4.0])]);
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let (_clock, mut agg) = aggregator(1_000, 2);

        agg.put(key("a"), vec![1.0, 2.0]).unwrap();
        let err = agg.put(key("a"), vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            AggregatorError::ArityMismatch { expected: 2, got: 1, .. }
        ));
        assert_eq!(agg.buffered(&key("a")).unwrap().len(), 1);

        // Other keys are unaffected
        agg.put(key("b"), vec![1.0]).unwrap();
    }

    #[test]
    fn test_arity_may_change_across_cycles() {
        let (clock, mut agg) = aggregator(1_000, 2);

        agg.put(key("a"), vec![1.0, 2.0]).unwrap();
        clock.fetch_add(1_000, Ordering::SeqCst);
        agg.tick();
        assert!(agg.put(key("a"), vec![1.0]).is_ok());
    }

    #[test]
    fn test_empty_sample_rejected() {
        let (_clock, mut agg) = aggregator(1_000, 2);
        assert!(matches!(
            agg.put(key("a"), vec![]),
            Err(AggregatorError::EmptySample(_))
        ));
    }

    #[test]
    fn test_update_callback_invoked_once_per_pass() {
        let (clock, mut agg) = aggregator(1_000, 2);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        agg.set_on_update(Box::new(move |snapshot| {
            sink.lock().unwrap().push(snapshot.len());
        }));

        agg.put(key("a"), vec![1.0]).unwrap();
        agg.put(key("b"), vec![1.0]).unwrap();
        assert!(agg.tick().is_none());

        clock.fetch_add(1_500, Ordering::SeqCst);
        agg.tick();
        agg.tick();

        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_sustained_load_keeps_history_bounded() {
        let (clock, mut agg) = aggregator(1_000, 2);
        let mut reductions = 0;

        for i in 0..101 {
            if agg.put(key("test-key"), vec![i as f64]).unwrap().is_some() {
                reductions += 1;
            }
            let len = agg.history(&key("test-key")).unwrap().len();
            assert!(len <= 2);
            if reductions >= 3 {
                assert_eq!(len, 2);
            }
            clock.fetch_add(40, Ordering::SeqCst);
        }

        assert_eq!(reductions, 4);
        assert_eq!(agg.history(&key("test-key")).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(AggregatorConfig::new(Duration::ZERO, 2, Reducer::Average).is_err());
        assert!(AggregatorConfig::new(Duration::from_secs(1), 0, Reducer::Average).is_err());
    }

    #[test]
    fn test_sub_second_windows_rejected() {
        for window in [Duration::from_millis(500), Duration::from_millis(1_500)] {
            assert!(matches!(
                AggregatorConfig::new(window, 2, Reducer::Average),
                Err(AggregatorError::InvalidConfig(_))
            ));
        }
        assert!(AggregatorConfig::new(Duration::from_secs(2), 2, Reducer::Average).is_ok());
    }

    #[test]
    fn test_wrong_arity_reducer_stores_empty_marker() {
        let widen = Reducer::custom("widen", |rows| vec![0.0; rows[0].len() + 1]);
        let config = AggregatorConfig::new(Duration::from_secs(1), 2, widen).unwrap();
        let (clock, now_fn) = mock_clock();
        let mut agg = WindowedAggregator::new_with_timestamp_fn(config, now_fn);

        agg.put(key("a"), vec![1.0, 2.0]).unwrap();
        clock.fetch_add(1_000, Ordering::SeqCst);
        let snapshot = agg.tick().expect("window should close");

        assert_eq!(snapshot[&key("a")].values().next().unwrap(), &None);
        assert!(agg.buffered(&key("a")).unwrap().is_empty());
    }
}
