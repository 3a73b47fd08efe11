use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mikrocount::{parse_accounting, Classifier};

fn accounting_dump(lines: usize) -> String {
    let mut text = String::new();
    for i in 0..lines {
        let host = format!("192.168.{}.{}", (i / 250) % 250, i % 250 + 1);
        if i % 2 == 0 {
            text.push_str(&format!("{} 93.184.216.34 {} {}\n", host, i * 1500, i + 1));
        } else {
            text.push_str(&format!("93.184.216.34 {} {} {}\n", host, i * 1500, i + 1));
        }
    }
    text.push('\n');
    text
}

fn bench_pipeline(c: &mut Criterion) {
    let text = accounting_dump(5_000);
    let classifier = Classifier::new("192.168.0.0/16".parse().unwrap());

    c.bench_function("parse 5k records", |b| {
        b.iter(|| parse_accounting(black_box(&text)))
    });

    let dump = parse_accounting(&text);
    c.bench_function("classify 5k records", |b| {
        b.iter(|| classifier.classify_all(black_box(&dump.entries)))
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
