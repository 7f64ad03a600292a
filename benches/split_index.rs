use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use gitstat_rs::engine::splits::split_index;

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

/// Synthetic index: nested directories with uneven fanout, index-sorted.
fn make_index(entries: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = XorShift64::new(seed);
    let mut out = Vec::with_capacity(entries);
    for _ in 0..entries {
        let top = rng.next_u64() % 300;
        let depth = rng.next_u64() % 4;
        let mut path = format!("dir{top:04}");
        for _ in 0..depth {
            path.push_str(&format!("/sub{:02}", rng.next_u64() % 8));
        }
        path.push_str(&format!("/file{:05}.c", rng.next_u64() % 100_000));
        out.push(path.into_bytes());
    }
    out.sort();
    out.dedup();
    out
}

fn bench_split_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_index");
    for &entries in &[2_000usize, 20_000, 100_000] {
        let index = make_index(entries, 0x9e3779b97f4a7c15);
        group.throughput(Throughput::Elements(index.len() as u64));
        group.bench_function(format!("entries_{entries}"), |b| {
            b.iter(|| black_box(split_index(black_box(&index), 8)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split_index);
criterion_main!(benches);
