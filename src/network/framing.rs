// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Length-delimited JSON framing: a big-endian `u32` byte count followed by
//! that many bytes of UTF-8 JSON. One frame, one [`Message`].

use std::io::Read;
use std::io::Write;
use std::mem;

use static_assertions::const_assert;

use crate::network::protocol::Message;
use crate::prelude::*;

const_assert!(mem::size_of::<usize>() >= mem::size_of::<u32>());

/// Frames larger than this are refused; a well-formed message never
/// approaches it, so a larger claimed length indicates a corrupt stream or a
/// hostile peer, not a legitimate large payload.
pub const MAX_FRAME_BYTES: u32 = 1 << 20;

pub trait Framed: Sized {
    fn framed_write<W: Write>(&self, stream: &mut W) -> Result<()>;
    fn framed_read<R: Read>(stream: &mut R) -> Result<Self>;
}

impl Framed for Message {
    fn framed_write<W: Write>(&self, stream: &mut W) -> Result<()> {
        let payload = serde_json::to_vec(self).location(loc!())?;
        let len = u32::try_from(payload.len())
            .with_context(loc!(), || format!("message of {} bytes exceeds u32 range", payload.len()))?;
        stream.write_all(&len.to_be_bytes()).location(loc!())?;
        stream.write_all(&payload).location(loc!())?;
        stream.flush().location(loc!())
    }

    fn framed_read<R: Read>(stream: &mut R) -> Result<Self> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).location(loc!())?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_BYTES {
            bail!("frame of {len} bytes exceeds max {MAX_FRAME_BYTES}");
        }
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).location(loc!())?;
        serde_json::from_slice(&payload).location(loc!())
    }
}
