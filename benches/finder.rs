use std::sync::Arc;

use divan::Bencher;
use rand::prelude::*;
use remoteh5::model::Attributes;
use remoteh5::prelude::*;
use remoteh5::timestamps::TimestampFinder;
use remoteh5::worker::{MemoryFile, MemoryStore};

const N: u64 = 1_000_000;

fn source(rt: &tokio::runtime::Runtime) -> Arc<dyn H5Source> {
    let mut rng = StdRng::seed_from_u64(1);
    let mut t = 0.0;
    let ts: Vec<f64> = (0..N)
        .map(|_| {
            t += rng.gen_range(0.0005..0.0015);
            t
        })
        .collect();

    let mut f = MemoryFile::new();
    f.insert_dataset("/acquisition/ts/timestamps", vec![N], ts, Attributes::new())
        .unwrap();
    let store = MemoryStore::new();
    store.insert("mem://f", f);

    let _guard = rt.enter();
    let registry = Registry::new(Config::default(), || Box::new(store.decoder())).unwrap();
    registry.open("mem://f", None)
}

#[divan::bench]
fn index_for_time_cached(b: Bencher) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let finder = TimestampFinder::new(source(&rt), "/acquisition/ts/timestamps", N);
    let c = Canceler::new();

    // Load every chunk once.
    rt.block_on(async {
        for i in 0..N / 100_000 {
            finder
                .index_for_time(i as f64 * 100.0 + 50.0, &c)
                .await
                .unwrap();
        }
    });

    let mut rng = StdRng::seed_from_u64(2);
    b.bench_local(|| {
        let t = rng.gen_range(0.0..1000.0);
        rt.block_on(finder.index_for_time(t, &c)).unwrap()
    })
}

#[divan::bench]
fn index_for_time_cold(b: Bencher) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let source = source(&rt);
    let c = Canceler::new();

    b.bench_local(|| {
        let finder = TimestampFinder::new(Arc::clone(&source), "/acquisition/ts/timestamps", N);
        rt.block_on(finder.index_for_time(500.0, &c)).unwrap()
    })
}

fn main() {
    divan::main();
}
