#![allow(dead_code)]

pub mod stores;

use futures_util::TryStreamExt;

use cache_persistence::domain::Key;
use cache_persistence::port::KeyStream;

/// Drain a key stream, sorted for stable assertions.
pub async fn sorted_keys(stream: KeyStream) -> Vec<Key> {
    let mut keys: Vec<Key> = stream.try_collect().await.expect("key stream failed");
    keys.sort();
    keys
}

pub fn keys(names: &[&str]) -> Vec<Key> {
    names.iter().map(|name| Key::new(*name)).collect()
}
