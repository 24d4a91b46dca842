//! StartupMessage handling: the inferred-length heuristic and parameter
//! parsing.
//!
//! The receive window is zero padded, so the true end of the peer's data is
//! not known up front. [`inferred_length`] finds it by scanning for the first
//! all-zero 4-byte word. A payload with a word-aligned run of zeros is
//! misread, and the packet's own trailing terminators are never counted.
//! The decoy's fingerprint depends on this exact behaviour.

use std::collections::HashMap;

use crate::codec::FrameReader;
use crate::error::{HoneyError, HoneyResult};
use crate::protocol::PARAM_USER;

const WORD: usize = 4;

/// Connection parameters from a StartupMessage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParameters {
    params: HashMap<String, String>,
}

impl StartupParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The `user` parameter, if the client sent one.
    pub fn user(&self) -> Option<&str> {
        self.get(PARAM_USER)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for StartupParameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// Inferred extent of meaningful data in a zero-padded window.
///
/// Returns the offset of the first all-zero word minus the trailing zero
/// bytes of the word before it. A leading zero word gives 0; a window with
/// no zero word is taken to be full.
pub fn inferred_length(window: &[u8]) -> usize {
    let mut i = 0;
    while i < window.len() {
        let end = (i + WORD).min(window.len());
        if window[i..end].iter().all(|&b| b == 0) {
            if i == 0 {
                return 0;
            }
            return i - trailing_zeros(&window[i - WORD..i]);
        }
        i += WORD;
    }
    window.len()
}

fn trailing_zeros(word: &[u8]) -> usize {
    word.iter().rev().take_while(|&&b| b == 0).count()
}

/// A decoded StartupMessage header and parameter list. The length field has
/// already been checked against the window by then.
#[derive(Debug, Clone)]
pub struct StartupPacket {
    pub protocol_version: i32,
    pub params: StartupParameters,
}

/// Validate the declared length against [`inferred_length`] and parse the
/// parameters.
///
/// Pairs are read until fewer than two bytes remain or the empty key that
/// terminates the list is reached.
pub fn parse_startup(window: &[u8]) -> HoneyResult<StartupPacket> {
    let inferred = inferred_length(window);
    let mut r = FrameReader::new(window);
    let claimed_length = r.read_i32()?;

    if inferred == 0 || usize::try_from(claimed_length).ok() != Some(inferred) {
        return Err(HoneyError::LengthMismatch {
            claimed: claimed_length,
            inferred,
        });
    }

    let protocol_version = r.read_i32()?;

    let mut params = HashMap::new();
    while r.remaining() >= 2 {
        let key = r.read_string()?;
        if key.is_empty() {
            break;
        }
        let value = r.read_string()?;
        params.insert(key, value);
    }

    Ok(StartupPacket {
        protocol_version,
        params: StartupParameters { params },
    })
}
