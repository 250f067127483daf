//! Processor chaining.

use crate::processor::Processor;
use crate::stream::{ByteStream, StreamError};
use tracing::debug;

/// Feed `input` through each processor in order.
///
/// Every step consumes the stream produced by the previous one, so nothing is
/// buffered beyond what individual processors need. An empty chain returns the
/// input unchanged, including its backing file.
pub fn run_pipeline(processors: &[Processor], input: ByteStream) -> Result<ByteStream, StreamError> {
    processors.iter().try_fold(input, |stream, processor| {
        debug!(%processor, "applying processor");
        processor.apply(stream)
    })
}
