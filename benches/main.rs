use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use galley::body::{deserialize, serialize};
use galley::{Form, RequestBody};

fn json_body() -> RequestBody {
    let lines: Vec<_> = (0..50)
        .map(|i| json!({"ingredient": i, "quantity": "2.5", "unit": "kg"}))
        .collect();
    json!({"supplier": 12, "lines": lines}).into()
}

fn multipart_body() -> RequestBody {
    let photo: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    RequestBody::Multipart(
        Form::new()
            .text("location", "walk-in")
            .text("note", "damaged on delivery")
            .file("photo", "crate.jpg", "image/jpeg", photo),
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let json = json_body();
    c.bench_function("serialize json", |b| {
        b.iter(|| serialize(black_box(&json)).unwrap())
    });

    let multipart = multipart_body();
    c.bench_function("serialize multipart", |b| {
        b.iter(|| serialize(black_box(&multipart)).unwrap())
    });

    let stored = serialize(&multipart).unwrap();
    c.bench_function("deserialize multipart", |b| {
        b.iter(|| deserialize(black_box(&stored)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
