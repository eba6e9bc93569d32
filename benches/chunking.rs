use std::sync::Arc;

use divan::Bencher;
use remoteh5::model::Attributes;
use remoteh5::prelude::*;
use remoteh5::worker::{MemoryFile, MemoryStore};

const SAMPLES: u64 = 100_000;
const CHANNELS: u64 = 32;

fn registry(rt: &tokio::runtime::Runtime) -> Registry {
    let mut f = MemoryFile::new();
    f.insert_dataset(
        "/acquisition/ecephys/data",
        vec![SAMPLES, CHANNELS],
        (0..SAMPLES * CHANNELS)
            .map(|v| (v % 4096) as i16)
            .collect::<Vec<_>>(),
        Attributes::new(),
    )
    .unwrap();

    let store = MemoryStore::new();
    store.insert("mem://f", f);

    let _guard = rt.enter();
    Registry::new(Config::default(), || Box::new(store.decoder())).unwrap()
}

fn client(rt: &tokio::runtime::Runtime, r: &Registry, channels: u64) -> DatasetChunkingClient {
    rt.block_on(async {
        let file: Arc<dyn H5Source> = r.open("mem://f", None);
        let ds = file.get_dataset("/acquisition/ecephys/data").await.unwrap();
        let options = ChunkingOptions {
            visible_channels: Some(0..channels),
            ..Default::default()
        };
        DatasetChunkingClient::new(file, ds, 10_000, options).unwrap()
    })
}

#[divan::bench(args = [1, 5, 32])]
fn load_all_chunks(b: Bencher, channels: u64) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let r = registry(&rt);

    b.bench_local(|| {
        let mut c = client(&rt, &r, channels);
        rt.block_on(c.get_concatenated_chunk(0, 10, &Canceler::new()))
            .unwrap()
    })
}

#[divan::bench(args = [1, 5, 32])]
fn assemble_cached(b: Bencher, channels: u64) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let r = registry(&rt);
    let mut c = client(&rt, &r, channels);
    rt.block_on(c.get_concatenated_chunk(0, 10, &Canceler::new()))
        .unwrap();

    b.bench_local(|| {
        rt.block_on(c.get_concatenated_chunk(0, 10, &Canceler::new()))
            .unwrap()
    })
}

fn main() {
    divan::main();
}
