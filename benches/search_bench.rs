use criterion::{criterion_group, criterion_main, Criterion};
use pyrite::network;
use pyrite::position::Position;
use pyrite::threads::search_silent;
use pyrite::tt::TranspositionTable;
use shakmaty::CastlingMode;

fn bench_search(c: &mut Criterion) {
    network::init().unwrap();
    let startpos = Position::startpos();

    c.bench_function("search_depth_3_startpos", |b| {
        b.iter(|| {
            let tt = TranspositionTable::new(16);
            search_silent(&startpos, &tt, 3)
        })
    });

    c.bench_function("search_depth_4_startpos", |b| {
        b.iter(|| {
            let tt = TranspositionTable::new(16);
            search_silent(&startpos, &tt, 4)
        })
    });

    let kiwipete = Position::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        CastlingMode::Standard,
    )
    .unwrap();

    c.bench_function("search_depth_3_kiwipete", |b| {
        b.iter(|| {
            let tt = TranspositionTable::new(16);
            search_silent(&kiwipete, &tt, 3)
        })
    });
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
