// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures while parsing a wire-format consensus message (spec.md §6, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of buffer while reading {0}")]
    Truncated(&'static str),
    #[error("varint overflowed u64")]
    VarintOverflow,
    #[error("payload tag was empty")]
    EmptyTag,
    #[error("unknown payload tag {0}")]
    UnknownTag(u8),
    #[error("trailing bytes after a well-formed message")]
    TrailingBytes,
}
