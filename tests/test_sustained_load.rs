//! Sustained load against a wall-clock aggregator
//!
//! Puts one sample every 40ms for roughly four seconds into a one-second
//! window with two retained reductions.

#[cfg(test)]
mod sustained_load_tests {
    use std::thread::sleep;
    use std::time::Duration;
    use topicflow::aggregator_core::{AggregationKey, AggregatorConfig, Reducer, WindowedAggregator};

    #[test]
    fn test_history_stays_bounded_under_load() {
        let config =
            AggregatorConfig::new(Duration::from_secs(1), 2, Reducer::Average).unwrap();
        let mut aggregator = WindowedAggregator::new(config);
        let started = aggregator.last_reduction();
        let key: AggregationKey = ["acct1", "roomA", "dev1"].into_iter().collect();

        let mut reductions = 0;
        for i in 0..=100 {
            let value = (i % 10) as f64;
            if aggregator.put(key.clone(), vec![value, 40.0]).unwrap().is_some() {
                reductions += 1;
            }
            let history = aggregator.history(&key).expect("history created on put");
            assert!(history.len() <= 2);
            sleep(Duration::from_millis(40));
        }

        assert!(reductions >= 3, "expected at least three reductions, got {}", reductions);
        assert_eq!(aggregator.history(&key).map(|h| h.len()), Some(2));
        assert!(aggregator.last_reduction() > started);
    }
}
