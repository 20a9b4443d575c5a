//! Performance benchmarks for the jayk core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use jayk_core::*;
use std::collections::BTreeSet;

fn benchmark_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");

    let messages = vec![
        "PING :irc.example.net",
        "NICK alice",
        ":alice!user@host PRIVMSG #channel :Hello world",
        ":irc.example.net 001 jayk :Welcome to the Internet Relay Network jayk!jayk@host",
        ":irc.example.net 433 * jayk :Nickname is already in use",
        ":op!op@host KICK #channel jayk :Goodbye",
    ];

    for msg in messages {
        group.bench_with_input(BenchmarkId::from_parameter(msg), msg, |b, msg| {
            b.iter(|| Message::parse(black_box(msg)))
        });
    }

    group.finish();
}

fn benchmark_message_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_formatting");

    let rooms: BTreeSet<String> = (0..20).map(|i| format!("#room{}", i)).collect();
    let messages = vec![
        Message::set_nickname("jayk"),
        Message::register("jayk", "Chatbot"),
        Message::join(&rooms),
        Message::privmsg("#channel", "alice: the quick brown fox jumps over the lazy dog"),
        Message::pong("abc123"),
    ];

    for (i, msg) in messages.iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), msg, |b, msg| {
            b.iter(|| msg.to_string())
        });
    }

    group.finish();
}

fn benchmark_user_parsing(c: &mut Criterion) {
    c.bench_function("user_parse", |b| {
        b.iter(|| User::parse(black_box("alice!~alice@host.example.org")))
    });
}

criterion_group!(
    benches,
    benchmark_message_parsing,
    benchmark_message_formatting,
    benchmark_user_parsing
);
criterion_main!(benches);
