#![allow(dead_code)]

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use transaction_log_kv::{
    error::LogError, event::Event, logger::TransactionLogger, store::KvStore,
};

#[derive(Debug, Clone)]
pub enum Op {
    Put(String, String),
    Delete(String),
}

/// Deterministic mix of puts and deletes over a handful of keys, so keys get
/// overwritten, deleted, and deleted while absent.
pub fn workload(len: usize) -> Vec<Op> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..len)
        .map(|i| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let key = format!("key-{}", (state >> 33) % 8);
            if (state >> 20) % 4 == 0 {
                Op::Delete(key)
            } else {
                Op::Put(key, format!("value-{i}"))
            }
        })
        .collect()
}

/// Mutates the store, then records the mutation, the way request handlers do.
pub fn submit<L>(logger: &L, store: &KvStore, ops: &[Op])
where
    L: TransactionLogger + ?Sized,
{
    for op in ops {
        match op {
            Op::Put(key, value) => {
                store.put(key.clone(), value.clone());
                logger.record_put(key, value);
            }
            Op::Delete(key) => {
                store.delete(key);
                logger.record_delete(key);
            }
        }
    }
}

pub fn expected(ops: &[Op]) -> BTreeMap<String, String> {
    let store = KvStore::new();
    for op in ops {
        match op {
            Op::Put(key, value) => store.put(key.clone(), value.clone()),
            Op::Delete(key) => {
                store.delete(key);
            }
        }
    }
    store.snapshot()
}

/// Drains one replay scan completely.
pub async fn collect<L>(logger: &L) -> (Vec<Event>, Option<LogError>)
where
    L: TransactionLogger + ?Sized,
{
    drain(logger.replay()).await
}

pub async fn drain(
    (mut events, mut errors): (mpsc::Receiver<Event>, mpsc::Receiver<LogError>),
) -> (Vec<Event>, Option<LogError>) {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    (collected, errors.recv().await)
}

pub fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
