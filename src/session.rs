//! Stateful reassembly of framed sections from a fragmented byte stream.
//!
//! The session transport delivers arbitrary-sized chunks; this parser
//! recovers `(header bytes, body cache file)` sections from them. Envelope
//! headers are small and kept in memory so the caller can route a section
//! without touching the cache file; bodies may be many megabytes and are
//! spilled to disk as they arrive.
//!
//! Parsing is strictly sequential. Bytes before the first magic sentinel are
//! discarded, so a stream that resumes mid-garbage resynchronises on the next
//! section boundary.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::wire::{FrameHeader, WireError, HEADER_LEN, MAGIC_BYTES};

/// Prefix of body cache file names; a random u32 suffix keeps concurrent
/// sections from colliding.
const CACHE_PREFIX: &str = "body-";

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    UnsupportedVersion(u32),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io(e) => write!(f, "body cache io error: {e}"),
            SessionError::UnsupportedVersion(v) => {
                write!(f, "unsupported session protocol version {v:#010x}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// A fully reassembled section.
#[derive(Debug)]
pub struct Section {
    /// The envelope bytes that prefixed the body.
    pub head: Vec<u8>,
    /// Cache file holding the body; empty bodies still get a file.
    pub body_path: PathBuf,
    pub body_size: u64,
}

/// A section whose header is decoded and whose body is still streaming in.
struct OpenSection {
    header: FrameHeader,
    head: Vec<u8>,
    file: File,
    path: PathBuf,
    received: u64,
}

/// Incremental parser for one session stream.
///
/// Feed it every inbound chunk; it returns the sections completed by that
/// chunk. Partial state is retained between calls, so insufficient input is
/// never an error.
pub struct SessionParser {
    cache_dir: PathBuf,
    buf: Vec<u8>,
    open: Option<OpenSection>,
}

impl SessionParser {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        SessionParser {
            cache_dir: cache_dir.into(),
            buf: Vec::new(),
            open: None,
        }
    }

    /// Consume one inbound chunk, returning every section it completes.
    ///
    /// A version mismatch resets the parser; the stream resynchronises on the
    /// next magic sentinel the caller feeds in.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Section>, SessionError> {
        let mut sections = Vec::new();
        let mut rest = data;

        loop {
            if let Some(open) = self.open.as_mut() {
                let needed = (open.header.body_size - open.received) as usize;
                let take = needed.min(rest.len());
                open.file.write_all(&rest[..take])?;
                open.received += take as u64;
                rest = &rest[take..];

                if open.received < open.header.body_size {
                    break;
                }

                let open = self.open.take().expect("open section checked above");
                open.file.sync_all()?;
                vlogd!(
                    "session: section complete, head {} bytes, body {} bytes at {}",
                    open.head.len(),
                    open.header.body_size,
                    open.path.display()
                );
                sections.push(Section {
                    head: open.head,
                    body_path: open.path,
                    body_size: open.header.body_size,
                });
                continue;
            }

            if !rest.is_empty() {
                self.buf.extend_from_slice(rest);
                rest = &[];
            }

            if !self.seek_magic() {
                break;
            }

            if self.buf.len() < HEADER_LEN {
                break;
            }

            let header = match FrameHeader::decode(&self.buf) {
                Ok(header) => header,
                Err(WireError::UnsupportedVersion(v)) => {
                    self.buf.clear();
                    return Err(SessionError::UnsupportedVersion(v));
                }
                // decode only fails on short input or bad magic, and
                // seek_magic has ruled both out here
                Err(_) => unreachable!("header validated by magic scan"),
            };

            let head_end = HEADER_LEN + header.head_size as usize;
            if self.buf.len() < head_end {
                break;
            }

            let head = self.buf[HEADER_LEN..head_end].to_vec();
            let leftover = self.buf.split_off(head_end);
            self.buf.clear();

            let (file, path) = self.create_cache_file()?;
            self.open = Some(OpenSection {
                header,
                head,
                file,
                path,
                received: 0,
            });

            if !leftover.is_empty() {
                sections.extend(self.feed(&leftover)?);
                break;
            }
        }

        Ok(sections)
    }

    /// Discard garbage up to the first magic sentinel. Returns true when the
    /// buffer now starts with a complete sentinel. Keeps a possible sentinel
    /// prefix at the tail so a magic split across chunks still matches.
    fn seek_magic(&mut self) -> bool {
        if let Some(pos) = find_magic(&self.buf) {
            if pos > 0 {
                vlogw!("session: discarding {pos} bytes before magic");
                self.buf.drain(..pos);
            }
            return true;
        }

        let keep = longest_magic_suffix(&self.buf);
        let discard = self.buf.len() - keep;
        if discard > 0 {
            vlogw!("session: discarding {discard} garbage bytes");
            self.buf.drain(..discard);
        }
        false
    }

    fn create_cache_file(&self) -> Result<(File, PathBuf), SessionError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self
            .cache_dir
            .join(format!("{CACHE_PREFIX}{}", rand::random::<u32>()));
        let file = File::create(&path)?;
        vlogd!("session: body cache opened at {}", path.display());
        Ok((file, path))
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC_BYTES.len())
        .position(|window| window == MAGIC_BYTES)
}

/// Length of the longest tail of `buf` that is a proper prefix of the magic
/// sentinel.
fn longest_magic_suffix(buf: &[u8]) -> usize {
    for keep in (1..MAGIC_BYTES.len()).rev() {
        if buf.len() >= keep && buf[buf.len() - keep..] == MAGIC_BYTES[..keep] {
            return keep;
        }
    }
    0
}

/// Remove a consumed body cache file. Failures are logged, not fatal: a
/// leaked cache file costs disk, not correctness.
pub fn discard_body(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        vlogw!("session: could not remove body cache {}: {e}", path.display());
    }
}
