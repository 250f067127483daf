//! Source-map-producing publish.
//!
//! A bundle with a `source_map` setting is not concatenated in-process.
//! Each file's pre-chain output is made available on disk and the configured
//! command receives all of them through `{infile_list}`. The command writes
//! the bundle to stdout and the map to `{map_file}`. The map's `file` entry
//! and its sources are rewritten to public names before it is published next
//! to the artifact.
//!
//! Commands that print their own `sourceMappingURL` comment name the
//! temporary map file. That line is held out of the digest and written back
//! after hashing with the final `<artifact>.map` name.

use super::bundle::Bundle;
use super::pipeline::BuildError;
use super::publish::{write_atomic, PublishError, Published, Publisher, VersionMode};
use crate::config::{SourceMapConfig, INFILE_LIST, MAP_FILE, SOURCE_MAP_OPTIONS};
use crate::process::ProcessRunner;
use crate::processor::shell_quote;
use crate::stream::{ByteStream, Chunk, Materialized, StreamError};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Comment openers of a source map reference line.
const REFERENCE_MARKERS: [&[u8]; 3] = [b"//# sourceMappingURL=", b"/*# sourceMappingURL=", b"//@ sourceMappingURL="];

/// Artifact and map written for a bundle.
#[derive(Debug, Clone)]
pub struct SourceMapOutput {
    pub artifact: Published,
    pub map_path: PathBuf,
}

/// Render the source map command for the given inputs and map file.
pub fn render_command(config: &SourceMapConfig, inputs: &[&Path], map_file: &Path) -> String {
    let infile_list = inputs.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ");
    let options = config.options.replace(MAP_FILE, &shell_quote(map_file));
    config
        .command
        .replace(SOURCE_MAP_OPTIONS, &options)
        .replace(INFILE_LIST, &infile_list)
}

/// Build and publish a bundle together with its source map.
pub fn publish_with_source_map(
    bundle: &Bundle,
    config: &SourceMapConfig,
    mode: VersionMode,
) -> Result<SourceMapOutput, BuildError> {
    let mut inputs: Vec<Materialized> = Vec::with_capacity(bundle.files.len());
    for file in &bundle.files {
        let materialized = file
            .processed()
            .and_then(ByteStream::materialize)
            .map_err(|e| StreamError::in_file(&file.file_path, e))?;
        inputs.push(materialized);
    }

    let root = &bundle.bundle_file_root;
    fs::create_dir_all(root).map_err(|source| PublishError::CreateDir { path: root.clone(), source })?;
    let map_file = tempfile::Builder::new()
        .prefix(&format!(".{}.", bundle.bundle_filename))
        .suffix(".map.tmp")
        .tempfile_in(root)
        .map_err(|source| PublishError::Write { path: root.clone(), source })?
        .into_temp_path();

    let paths: Vec<&Path> = inputs.iter().map(Materialized::path).collect();
    let command = render_command(config, &paths, &map_file);
    debug!(bundle = %bundle.name, command = %command, "running source map command");

    let output = ProcessRunner::new(command).spawn()?;
    let map_name = map_file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let (filtered, emitted) = ReferenceFilter::new(ByteStream::new(output), map_name);
    let publisher = Publisher::new(root, &bundle.bundle_filename, &bundle.bundle_type).with_mode(mode);
    let mut staged = publisher.stage(ByteStream::new(filtered))?;

    let artifact_name = bundle.artifact_name(staged.version());
    let sources: Vec<(String, String)> = bundle
        .files
        .iter()
        .zip(&inputs)
        .map(|(file, input)| (input.path().to_string_lossy().into_owned(), file.file_url.clone()))
        .collect();
    drop(inputs);

    let raw = fs::read(&map_file).map_err(|e| BuildError::SourceMap {
        bundle: bundle.name.clone(),
        message: e.to_string(),
    })?;
    let rewritten = rewrite_source_map(&raw, &artifact_name, &sources)
        .map_err(|e| BuildError::SourceMap { bundle: bundle.name.clone(), message: e.to_string() })?;

    let map_path = bundle.source_map_path(staged.version());
    write_atomic(&map_path, ByteStream::from_bytes(rewritten))?;

    let public_map = format!("{}.map", artifact_name);
    match emitted.lock().ok().and_then(|mut line| line.take()) {
        Some(line) => staged.append(&rewrite_reference(&line, &public_map))?,
        None if config.append_reference => {
            staged.append(format!("\n//# sourceMappingURL={}\n", public_map).as_bytes())?
        }
        None => {}
    }
    let artifact = staged.commit()?;

    Ok(SourceMapOutput { artifact, map_path })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Whether a (possibly partial) line can still turn out to be a reference.
fn may_be_reference(line: &[u8]) -> bool {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let trimmed = &line[start..];
    REFERENCE_MARKERS.iter().any(|marker| {
        if trimmed.len() < marker.len() {
            marker.starts_with(trimmed)
        } else {
            trimmed.starts_with(marker)
        }
    })
}

/// Replace the URL of a reference line with `map_name`.
pub fn rewrite_reference(line: &[u8], map_name: &str) -> Vec<u8> {
    const KEY: &[u8] = b"sourceMappingURL=";
    let Some(at) = find(line, KEY) else {
        return line.to_vec();
    };
    let value_start = at + KEY.len();
    let value_len = line[value_start..]
        .iter()
        .position(|b| b.is_ascii_whitespace() || *b == b'*')
        .unwrap_or(line.len() - value_start);

    let mut out = Vec::with_capacity(line.len());
    out.extend_from_slice(&line[..value_start]);
    out.extend_from_slice(map_name.as_bytes());
    out.extend_from_slice(&line[value_start + value_len..]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Start of a line, not yet known to be a reference
    Start,
    /// Ordinary line, passed through until its newline
    Pass,
}

/// Stream adapter that removes reference lines naming `map_name`.
///
/// Only lines that begin with a reference marker are buffered; everything
/// else flows through unchanged. The last removed line is left in the
/// shared slot once the stream is exhausted.
struct ReferenceFilter {
    inner: ByteStream,
    map_name: Vec<u8>,
    state: LineState,
    line: Vec<u8>,
    emitted: Arc<Mutex<Option<Vec<u8>>>>,
    done: bool,
}

impl ReferenceFilter {
    fn new(inner: ByteStream, map_name: String) -> (Self, Arc<Mutex<Option<Vec<u8>>>>) {
        let emitted = Arc::new(Mutex::new(None));
        let filter = Self {
            inner,
            map_name: map_name.into_bytes(),
            state: LineState::Start,
            line: Vec::new(),
            emitted: Arc::clone(&emitted),
            done: false,
        };
        (filter, emitted)
    }

    fn feed(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        while !input.is_empty() {
            let newline = input.iter().position(|&b| b == b'\n');
            let (part, rest) = match newline {
                Some(i) => input.split_at(i + 1),
                None => (input, &[][..]),
            };
            input = rest;

            match self.state {
                LineState::Pass => out.extend_from_slice(part),
                LineState::Start => {
                    self.line.extend_from_slice(part);
                    if newline.is_none() && !may_be_reference(&self.line) {
                        out.append(&mut self.line);
                        self.state = LineState::Pass;
                    }
                }
            }
            if newline.is_some() {
                self.end_line(out);
            }
        }
    }

    fn end_line(&mut self, out: &mut Vec<u8>) {
        let line = std::mem::take(&mut self.line);
        if self.state == LineState::Start && may_be_reference(&line) && find(&line, &self.map_name).is_some() {
            if let Ok(mut slot) = self.emitted.lock() {
                *slot = Some(line);
            }
        } else {
            out.extend_from_slice(&line);
        }
        self.state = LineState::Start;
    }
}

impl Iterator for ReferenceFilter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while !self.done {
            let mut out = Vec::new();
            match self.inner.next() {
                Some(Ok(chunk)) => self.feed(&chunk, &mut out),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    self.end_line(&mut out);
                }
            }
            if !out.is_empty() {
                return Some(Ok(out));
            }
        }
        None
    }
}

/// Point a raw source map at the published artifact and public source URLs.
///
/// `sources` pairs the on-disk path handed to the command with the URL that
/// should replace it. Unknown sources are left as they are.
pub fn rewrite_source_map(
    raw: &[u8],
    artifact_name: &str,
    sources: &[(String, String)],
) -> Result<Vec<u8>, serde_json::Error> {
    let mut map: Value = serde_json::from_slice(raw)?;
    let Some(object) = map.as_object_mut() else {
        return Err(serde::de::Error::custom("source map is not a JSON object"));
    };

    object.insert("file".to_string(), Value::String(artifact_name.to_string()));
    if let Some(Value::Array(list)) = object.get_mut("sources") {
        for entry in list.iter_mut() {
            if let Value::String(source) = entry {
                if let Some((_, url)) = sources.iter().find(|(path, _)| path == source) {
                    *source = url.clone();
                }
            }
        }
    }

    serde_json::to_vec(&map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrite_source_map() {
        let raw = serde_json::to_vec(&json!({
            "version": 3,
            "file": "out.js",
            "sources": ["/tmp/a.js", "/tmp/other.js"],
            "mappings": "AAAA"
        }))
        .unwrap();

        let rewritten = rewrite_source_map(
            &raw,
            "app.abc.js",
            &[("/tmp/a.js".to_string(), "/static/js/a.js".to_string())],
        )
        .unwrap();
        let map: Value = serde_json::from_slice(&rewritten).unwrap();

        assert_eq!(map["file"], "app.abc.js");
        assert_eq!(map["sources"], json!(["/static/js/a.js", "/tmp/other.js"]));
        assert_eq!(map["mappings"], "AAAA");
    }

    fn filtered(chunks: &[&str], map_name: &str) -> (String, Option<String>) {
        let chunks: Vec<Chunk> = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        let (filter, emitted) = ReferenceFilter::new(ByteStream::new(chunks.into_iter()), map_name.to_string());
        let out = ByteStream::new(filter).into_bytes().unwrap();
        let line = emitted.lock().unwrap().take().map(|l| String::from_utf8(l).unwrap());
        (String::from_utf8(out).unwrap(), line)
    }

    #[test]
    fn test_reference_filter_holds_out_temp_reference() {
        let (out, line) = filtered(&["var a;\n//# source", "MappingURL=.app.x.map.tmp\n"], ".app.x.map.tmp");
        assert_eq!(out, "var a;\n");
        assert_eq!(line.as_deref(), Some("//# sourceMappingURL=.app.x.map.tmp\n"));
    }

    #[test]
    fn test_reference_filter_passes_other_lines() {
        let (out, line) = filtered(&["a();\n//# sourceMappingURL=vendor.map\n", "b();"], ".app.x.map.tmp");
        assert_eq!(out, "a();\n//# sourceMappingURL=vendor.map\nb();");
        assert!(line.is_none());
    }

    #[test]
    fn test_rewrite_reference() {
        assert_eq!(
            rewrite_reference(b"//# sourceMappingURL=/out/.app.x.map.tmp\n", "app.abc.js.map"),
            b"//# sourceMappingURL=app.abc.js.map\n".to_vec()
        );
        assert_eq!(
            rewrite_reference(b"/*# sourceMappingURL=.site.y.map.tmp */", "site.abc.css.map"),
            b"/*# sourceMappingURL=site.abc.css.map */".to_vec()
        );
    }

    #[test]
    fn test_rewrite_rejects_non_object() {
        assert!(rewrite_source_map(b"[1, 2]", "x.js", &[]).is_err());
        assert!(rewrite_source_map(b"", "x.js", &[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_render_command() {
        let config = SourceMapConfig {
            command: "uglifyjs {infile_list} {source_map_options}".to_string(),
            options: "--source-map {map_file}".to_string(),
            append_reference: true,
        };
        let command = render_command(
            &config,
            &[Path::new("/src/a.js"), Path::new("/src/b c.js")],
            Path::new("/out/x.map"),
        );
        assert_eq!(command, "uglifyjs /src/a.js '/src/b c.js' --source-map /out/x.map");
    }
}
