use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn parse(c: &mut Criterion) {
    let source = include_str!("board.dts");

    c.bench_function("dts_tree::from_str board.dts", |b| {
        b.iter(|| dts_tree::from_str(black_box(source)))
    });
}

pub fn render(c: &mut Criterion) {
    let dt = dts_tree::from_str(include_str!("board.dts")).expect("board.dts parses");

    c.bench_function("DeviceTree::to_string board.dts", |b| {
        b.iter(|| black_box(&dt).to_string())
    });
}

criterion_group!(benches, parse, render);
criterion_main!(benches);
