//! Process engine stress tests.
//!
//! Payloads larger than any pipe buffer, slow consumers and chained
//! commands, all of which would deadlock a write-then-read implementation.

#![cfg(unix)]

use std::thread;
use std::time::Duration;

use bundlepipe::pipeline::run_pipeline;
use bundlepipe::process::{ProcessRunner, PIPE_BUF};
use bundlepipe::processor::Processor;
use bundlepipe::stream::ByteStream;

/// Deterministic, non-repeating-looking test data.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b"abcdefghijklmnopqrstuvwxyz0123456789\n"[(i * 7 + i / 13) % 37]).collect()
}

fn chunked(bytes: Vec<u8>, size: usize) -> ByteStream {
    let chunks: Vec<_> = bytes.chunks(size).map(|c| Ok(c.to_vec())).collect();
    ByteStream::new(chunks.into_iter())
}

#[test]
fn test_large_payload_round_trip() {
    let input = payload(4 * 1024 * 1024);
    let output = ProcessRunner::new("cat").stdin(chunked(input.clone(), 64 * 1024)).run_to_end().unwrap();
    assert_eq!(output.len(), input.len());
    assert_eq!(output, input);
}

#[test]
fn test_child_writes_before_reading() {
    // The child fills its stdout before touching stdin.
    let input = payload(512 * 1024);
    let output = ProcessRunner::new("head -c 300000 /dev/zero; cat")
        .stdin(chunked(input.clone(), 8192))
        .run_to_end()
        .unwrap();
    assert_eq!(output.len(), 300_000 + input.len());
    assert!(output[..300_000].iter().all(|&b| b == 0));
    assert_eq!(&output[300_000..], &input[..]);
}

#[test]
fn test_heavy_stderr_does_not_block() {
    let input = payload(256 * 1024);
    let output = ProcessRunner::new("head -c 500000 /dev/zero >&2; cat")
        .stdin(chunked(input.clone(), 4096))
        .run_to_end()
        .unwrap();
    assert_eq!(output, input);
}

#[test]
fn test_slow_consumer_receives_everything() {
    let stream = ProcessRunner::new("head -c 1000000 /dev/zero").spawn().unwrap();

    let mut total = 0;
    for (i, chunk) in stream.enumerate() {
        let chunk = chunk.unwrap();
        assert!(!chunk.is_empty());
        total += chunk.len();
        if i % 16 == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }
    assert_eq!(total, 1_000_000);
}

#[test]
fn test_input_written_in_bounded_chunks() {
    // One enormous upstream chunk must still reach the child intact.
    let input = payload(PIPE_BUF * 300 + 17);
    let output = ProcessRunner::new("wc -c").stdin_bytes(input.clone()).run_to_end().unwrap();
    assert_eq!(String::from_utf8(output).unwrap().trim(), input.len().to_string());
}

#[test]
fn test_chained_processes() {
    let input = payload(2 * 1024 * 1024);
    let chain = [
        Processor::command("cat"),
        Processor::command("tr a-z A-Z"),
        Processor::command("cat {infile}"),
        Processor::command("tr A-Z a-z"),
    ];

    let output = run_pipeline(&chain, chunked(input.clone(), 16 * 1024)).unwrap().into_bytes().unwrap();
    assert_eq!(output, input.to_ascii_lowercase());
}

#[test]
fn test_failure_midway_through_chain() {
    let chain = [
        Processor::command("cat"),
        Processor::command("head -c 10 >/dev/null; echo 'bad input' >&2; exit 4"),
        Processor::command("cat"),
    ];

    let err = run_pipeline(&chain, chunked(payload(1024 * 1024), 8192)).unwrap().into_bytes().unwrap_err();
    let failure = err.process_failure().expect("process failure");
    assert_eq!(failure.exit_code, Some(4));
    assert!(failure.stderr.contains("bad input"));
}
