use fibre_lru::CacheBuilder;
use std::thread;
use std::time::Duration;

fn main() {
  // A cache that keeps at most 100 linked entries, expires them after
  // 2 seconds and accounts their memory against a 1 MiB budget.
  let cache = CacheBuilder::default()
    .max_item_num(100)
    .item_expire_sec(2)
    .ram_policy(1 << 20)
    .worker_sleep_ms(10)
    .start(true)
    .build()
    .expect("Failed to build cache");

  println!("Inserting ('key1', 100) into the cache.");
  cache.set("key1".to_string(), 100);

  match cache.get("key1") {
    Some(entry) => println!("Found value for key1: {}", entry.value()),
    None => println!("Value for key1 not found."),
  }

  // Cheap values are not worth caching.
  let refused = cache.set_with_cost("cheap".to_string(), 1, 0.1);
  println!("Cheap value stored: {}", refused.is_some());

  // Fill past the limit; the worker evicts from the least recently used end.
  for i in 0..150 {
    cache.set(format!("filler-{}", i), i);
  }
  thread::sleep(Duration::from_millis(200));
  println!("\nLinked entries after GC: {}", cache.size());
  println!("State: {}", cache.dump());

  println!("\nWaiting for 3 seconds for the entries to expire...");
  thread::sleep(Duration::from_secs(3));

  match cache.get("key1") {
    Some(entry) => println!("Found value for key1: {}", entry.value()),
    None => println!("Value for key1 not found (as expected after TTL)."),
  }

  println!("\nCache metrics: {:#?}", cache.metrics());
}
