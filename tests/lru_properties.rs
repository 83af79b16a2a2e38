//! Property tests: capacity bound and LRU order of the swapper under random
//! access.

use std::collections::VecDeque;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use expert_swap::cache::record::{ExpertRecord, ExpertWeights, Metadata};
use expert_swap::cache::swapper::Swapper;
use expert_swap::config::{CompressionConfig, SwapConfig};
use expert_swap::transfer::disk_store::{ExpertStore, FileStore};
use expert_swap::transfer::executor::InlineExecutor;

#[derive(Debug, Clone)]
enum Access {
    SwapIn(usize),
    Get(usize),
    Prefetch(usize),
}

fn access(experts: usize) -> impl Strategy<Value = Access> {
    prop_oneof![
        3 => (0..experts).prop_map(Access::SwapIn),
        3 => (0..experts).prop_map(Access::Get),
        1 => (0..experts).prop_map(Access::Prefetch),
    ]
}

fn id(i: usize) -> String {
    format!("e{i}")
}

/// Reference model: ids from least to most recently used.
fn touch(model: &mut VecDeque<String>, key: String, capacity: usize) {
    if let Some(pos) = model.iter().position(|k| *k == key) {
        model.remove(pos);
    } else if model.len() >= capacity {
        model.pop_front();
    }
    model.push_back(key);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn swapper_sync_access_is_lru(
        capacity in 1usize..5,
        ids in proptest::collection::vec(0usize..8, 1..60),
    ) {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
        for i in 0..8 {
            let weights = ExpertWeights::new(vec![i as u8; 16], vec![1u8; 8], vec![2u8; 4]);
            store.write(&ExpertRecord::new(id(i), weights, Metadata::new())).unwrap();
        }
        let config = SwapConfig {
            max_memory_experts: capacity,
            ..SwapConfig::with_storage_dir(tmp.path())
        };
        let mut swapper =
            Swapper::with_parts(config, Arc::new(store), Arc::new(InlineExecutor)).unwrap();

        let mut model = VecDeque::new();
        for i in ids {
            let before = swapper.stats();
            let weights = swapper.get(&id(i), None).unwrap();
            prop_assert_eq!(weights.gate[0], i as u8);
            let after = swapper.stats();
            // Each lookup is either one hit or one miss.
            prop_assert_eq!(after.hits + after.misses, before.hits + before.misses + 1);
            touch(&mut model, id(i), capacity);
            prop_assert_eq!(swapper.resident_ids(), Vec::from(model.clone()));
        }
        swapper.shutdown().unwrap();
    }

    #[test]
    fn swapper_capacity_bound_holds(
        capacity in 1usize..5,
        accesses in proptest::collection::vec(access(8), 1..80),
    ) {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
        for i in 0..8 {
            let weights = ExpertWeights::new(vec![i as u8; 16], vec![1u8; 8], vec![2u8; 4]);
            store.write(&ExpertRecord::new(id(i), weights, Metadata::new())).unwrap();
        }
        let config = SwapConfig {
            max_memory_experts: capacity,
            ..SwapConfig::with_storage_dir(tmp.path())
        };
        let mut swapper =
            Swapper::with_parts(config, Arc::new(store), Arc::new(InlineExecutor)).unwrap();

        for a in accesses {
            match a {
                Access::SwapIn(i) => {
                    let record = swapper.swap_in(&id(i), false, 0).unwrap();
                    prop_assert!(record.is_some());
                }
                Access::Get(i) => {
                    swapper.get(&id(i), None).unwrap();
                }
                Access::Prefetch(i) => {
                    prop_assert!(swapper.swap_in(&id(i), true, 0).unwrap().is_none());
                }
            }
            prop_assert!(swapper.resident_len() <= capacity);
        }
        swapper.flush().unwrap();
        prop_assert!(swapper.recent_failures().is_empty());
    }
}
