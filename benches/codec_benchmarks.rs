// ABOUTME: Criterion benchmarks for the gateway hot paths
// ABOUTME: Frame parsing, delivery receipt text parsing and submit_sm encoding

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use smpp_gateway::Frame;
use smpp_gateway::codec::Encodable;
use smpp_gateway::datatypes::*;
use smpp_gateway::models::DeliveryReceipt;
use std::io::Cursor;
use std::time::Duration;

fn sample_submit_sm(text: &str) -> SubmitSm {
    let coding = DataCoding::for_text(text);
    let mut body = ShortMessageBody::new("15550001", "15550002", Bytes::new());
    body.source_addr_ton = TypeOfNumber::International;
    body.source_addr_npi = NumericPlanIndicator::Isdn;
    body.registered_delivery = REGISTERED_DELIVERY_RECEIPT;
    body.data_coding = coding.to_byte();
    body.set_payload(coding.encode(text));
    SubmitSm::new(1, body)
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    let submit = sample_submit_sm("Hello World").to_bytes().unwrap();
    group.bench_function("submit_sm", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(submit.as_ref()));
            Frame::parse(&mut cursor).unwrap()
        })
    });

    let enquire = EnquireLink::new(7).to_bytes().unwrap();
    group.bench_function("enquire_link", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(enquire.as_ref()));
            Frame::parse(&mut cursor).unwrap()
        })
    });

    group.finish();
}

fn bench_receipt_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("receipt_parse");

    let text = "id:V1234567890 sub:001 dlvrd:001 submit date:2401011200 \
                done date:2401011201 stat:DELIVRD err:000 text:Hello World";
    group.bench_function("receipt_text", |b| {
        b.iter(|| DeliveryReceipt::parse(black_box(text)).unwrap())
    });

    let receipt = DeliveryReceipt::new("sinch-east-1700000000000000000", "UNDELIV", "034");
    group.bench_function("receipt_format", |b| b.iter(|| black_box(&receipt).format_text()));

    group.finish();
}

fn bench_submit_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_sm_encode");
    group.measurement_time(Duration::from_secs(5));

    for (name, text) in [
        ("gsm7_short", "Hello World".to_string()),
        ("gsm7_long", "A".repeat(400)),
        ("ucs2", "Привет, мир! ".repeat(5)),
    ] {
        let submit = sample_submit_sm(&text);
        group.bench_with_input(BenchmarkId::from_parameter(name), &submit, |b, submit| {
            b.iter(|| black_box(submit).to_bytes().unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_parse,
    bench_receipt_parse,
    bench_submit_encode
);
criterion_main!(benches);
