use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use omron_fins_tcp::{
    ByteBuffer, Decoded, Decoder, Encoder, FinsHeader, FinsTcpCodec, FinsTcpFrame, NodeAddress,
};

fn buffer_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Bytes(256 * 4));

    group.bench_function("put_u32_x256", |b| {
        let mut buf = ByteBuffer::with_capacity(1024);
        b.iter(|| {
            buf.reset_write();
            for i in 0..256u32 {
                buf.put_u32(black_box(i));
            }
        })
    });

    group.bench_function("read_u32_x256", |b| {
        let mut buf = ByteBuffer::with_capacity(1024);
        for i in 0..256u32 {
            buf.put_u32(i);
        }
        b.iter(|| {
            buf.reset_read();
            let mut sum = 0u32;
            while let Ok(v) = buf.read_u32() {
                sum = sum.wrapping_add(v);
            }
            black_box(sum)
        })
    });

    group.bench_function("index_magic", |b| {
        let mut buf = ByteBuffer::with_capacity(1024);
        buf.put_bytes(&[0u8; 1000]);
        buf.put_bytes(b"FINS");
        b.iter(|| black_box(buf.index(b"FINS")))
    });

    group.finish();
}

fn fins_tcp_codec(c: &mut Criterion) {
    let header = FinsHeader::new_command(NodeAddress::new(0, 1, 0), NodeAddress::new(0, 10, 0), 7);
    let frame = FinsTcpFrame::fins_command(&header, &[0x01, 0x01, 0x82, 0x00, 0x64, 0x00, 0x00, 0x0A]);

    let mut encoded = ByteBuffer::new();
    FinsTcpCodec.encode(&frame, &mut encoded).unwrap();
    let wire = encoded.readable().to_vec();

    let mut group = c.benchmark_group("fins_tcp");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("encode", |b| {
        let mut dst = ByteBuffer::with_capacity(64);
        b.iter(|| {
            dst.reset_write();
            FinsTcpCodec.encode(black_box(&frame), &mut dst).unwrap();
        })
    });

    group.bench_function("decode", |b| {
        let mut src = ByteBuffer::from(wire.as_slice());
        b.iter(|| {
            src.reset_read();
            match FinsTcpCodec.decode(&mut src) {
                Ok(Decoded::Frame { message, .. }) => black_box(message.payload.len()),
                _ => 0,
            }
        })
    });

    group.finish();
}

criterion_group!(benches, buffer_primitives, fins_tcp_codec);
criterion_main!(benches);
