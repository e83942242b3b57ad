use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remote_iq_streamer::codec::{FecDecoder, FecEncoder};
use remote_iq_streamer::protocol::{ProtectedBlock, BLOCK_SIZE, NB_ORIGINAL_BLOCKS};

fn frame_blocks(seed: u64) -> Vec<ProtectedBlock> {
    let mut state = seed;
    (0..NB_ORIGINAL_BLOCKS)
        .map(|_| {
            let mut block = [0u8; BLOCK_SIZE];
            for b in block.iter_mut() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                *b = (state >> 56) as u8;
            }
            block
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let originals = frame_blocks(1);

    for nb_fec in [8usize, 32, 127] {
        let mut encoder = FecEncoder::new(nb_fec).unwrap();
        c.bench_function(&format!("encode_frame_m{}", nb_fec), |b| {
            b.iter(|| encoder.encode(black_box(&originals)).unwrap())
        });
    }
}

fn bench_decode(c: &mut Criterion) {
    let nb_fec = 8;
    let originals = frame_blocks(2);
    let mut encoder = FecEncoder::new(nb_fec).unwrap();
    let recovery = encoder.encode(&originals).unwrap();

    // worst case for M = 8: the first eight originals are lost
    let mut received: Vec<(usize, &[u8])> = originals
        .iter()
        .enumerate()
        .skip(nb_fec)
        .map(|(i, block)| (i, &block[..]))
        .collect();
    received.extend(
        recovery
            .iter()
            .enumerate()
            .map(|(i, block)| (NB_ORIGINAL_BLOCKS + i, &block[..])),
    );

    let mut decoder = FecDecoder::new();
    c.bench_function("decode_frame_8_lost", |b| {
        b.iter(|| decoder.decode(black_box(&received), nb_fec).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
