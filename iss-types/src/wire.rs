// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bit-exact wire encoding for `ConsensusMessage` (spec.md §6):
//! varint epoch/view/block, length-prefixed sender identity, varint
//! timestamp microseconds, tagged oneof payload, length-prefixed signature.
//!
//! gRPC transport is out of scope (spec.md §1): this module only defines
//! the envelope shape needed to parse a consensus message, independent of
//! whatever transport carries the bytes.

use bytes::Bytes;

use iss_config::PeerId;

use crate::digest::PayloadDigest;
use crate::epoch::BlockMetadata;
use crate::errors::ParseError;
use crate::message::{
    Commit, ConsensusMessage, NewView, PbftPayload, PrePrepare, Prepare, PreparedCertificate,
    ViewChange,
};

const TAG_PRE_PREPARE: u8 = 1;
const TAG_PREPARE: u8 = 2;
const TAG_COMMIT: u8 = 3;
const TAG_VIEW_CHANGE: u8 = 4;
const TAG_NEW_VIEW: u8 = 5;

fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, ParseError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or(ParseError::Truncated("varint"))?;
        *pos += 1;
        if shift >= 63 && byte > 1 {
            return Err(ParseError::VarintOverflow);
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Bytes, ParseError> {
    let len = read_varint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|e| *e <= buf.len())
        .ok_or(ParseError::Truncated("length-prefixed bytes"))?;
    let slice = Bytes::copy_from_slice(&buf[*pos..end]);
    *pos = end;
    Ok(slice)
}

fn write_digest(buf: &mut Vec<u8>, digest: &PayloadDigest) {
    buf.extend_from_slice(digest.as_bytes());
}

fn read_digest(buf: &[u8], pos: &mut usize) -> Result<PayloadDigest, ParseError> {
    let end = pos
        .checked_add(32)
        .filter(|e| *e <= buf.len())
        .ok_or(ParseError::Truncated("digest"))?;
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&buf[*pos..end]);
    *pos = end;
    Ok(PayloadDigest::new(bytes))
}

fn write_message(buf: &mut Vec<u8>, msg: &ConsensusMessage) {
    let encoded = encode(msg);
    write_bytes(buf, &encoded);
}

fn read_message(buf: &[u8], pos: &mut usize) -> Result<ConsensusMessage, ParseError> {
    let inner = read_bytes(buf, pos)?;
    decode(&inner)
}

/// Serializes a `ConsensusMessage` to its wire representation.
pub fn encode(msg: &ConsensusMessage) -> Bytes {
    let mut buf = Vec::new();
    write_varint(&mut buf, msg.metadata.epoch);
    write_varint(&mut buf, msg.view);
    write_varint(&mut buf, msg.metadata.block);
    write_bytes(&mut buf, &msg.sender.0.to_be_bytes());
    write_varint(&mut buf, msg.timestamp);

    match &msg.payload {
        PbftPayload::PrePrepare(pp) => {
            buf.push(TAG_PRE_PREPARE);
            write_digest(&mut buf, &pp.digest);
            write_bytes(&mut buf, &pp.payload);
        }
        PbftPayload::Prepare(p) => {
            buf.push(TAG_PREPARE);
            write_digest(&mut buf, &p.digest);
        }
        PbftPayload::Commit(c) => {
            buf.push(TAG_COMMIT);
            write_digest(&mut buf, &c.digest);
        }
        PbftPayload::ViewChange(vc) => {
            buf.push(TAG_VIEW_CHANGE);
            match &vc.prepared {
                None => buf.push(0),
                Some(p) => {
                    buf.push(1);
                    write_varint(&mut buf, p.view);
                    write_digest(&mut buf, &p.digest);
                    write_message(&mut buf, &p.pre_prepare);
                    write_varint(&mut buf, p.prepares.len() as u64);
                    for m in &p.prepares {
                        write_message(&mut buf, m);
                    }
                }
            }
        }
        PbftPayload::NewView(nv) => {
            buf.push(TAG_NEW_VIEW);
            write_varint(&mut buf, nv.view_changes.len() as u64);
            for m in &nv.view_changes {
                write_message(&mut buf, m);
            }
            write_message(&mut buf, &nv.pre_prepare);
        }
    }

    write_bytes(&mut buf, &msg.signature);
    Bytes::from(buf)
}

/// Parses a `ConsensusMessage` from its wire representation.
///
/// `parse(serialize(m)) == m` for every well-formed message (spec.md §8).
/// An empty payload tag is a parse error (spec.md §6).
pub fn decode(buf: &[u8]) -> Result<ConsensusMessage, ParseError> {
    let mut pos = 0usize;
    let epoch = read_varint(buf, &mut pos)?;
    let view = read_varint(buf, &mut pos)?;
    let block = read_varint(buf, &mut pos)?;
    let sender_bytes = read_bytes(buf, &mut pos)?;
    if sender_bytes.len() != 4 {
        return Err(ParseError::Truncated("sender identity"));
    }
    let sender = PeerId(u32::from_be_bytes(sender_bytes[..4].try_into().unwrap()));
    let timestamp = read_varint(buf, &mut pos)?;

    let tag = *buf.get(pos).ok_or(ParseError::EmptyTag)?;
    pos += 1;
    let payload = match tag {
        TAG_PRE_PREPARE => {
            let digest = read_digest(buf, &mut pos)?;
            let payload = read_bytes(buf, &mut pos)?;
            PbftPayload::PrePrepare(PrePrepare { digest, payload })
        }
        TAG_PREPARE => {
            let digest = read_digest(buf, &mut pos)?;
            PbftPayload::Prepare(Prepare { digest })
        }
        TAG_COMMIT => {
            let digest = read_digest(buf, &mut pos)?;
            PbftPayload::Commit(Commit { digest })
        }
        TAG_VIEW_CHANGE => {
            let has_prepared = *buf.get(pos).ok_or(ParseError::Truncated("view_change flag"))?;
            pos += 1;
            let prepared = match has_prepared {
                0 => None,
                _ => {
                    let view = read_varint(buf, &mut pos)?;
                    let digest = read_digest(buf, &mut pos)?;
                    let pre_prepare = Box::new(read_message(buf, &mut pos)?);
                    let count = read_varint(buf, &mut pos)? as usize;
                    let mut prepares = Vec::with_capacity(count);
                    for _ in 0..count {
                        prepares.push(read_message(buf, &mut pos)?);
                    }
                    Some(PreparedCertificate {
                        view,
                        digest,
                        pre_prepare,
                        prepares,
                    })
                }
            };
            PbftPayload::ViewChange(ViewChange { prepared })
        }
        TAG_NEW_VIEW => {
            let count = read_varint(buf, &mut pos)? as usize;
            let mut view_changes = Vec::with_capacity(count);
            for _ in 0..count {
                view_changes.push(read_message(buf, &mut pos)?);
            }
            let pre_prepare = Box::new(read_message(buf, &mut pos)?);
            PbftPayload::NewView(NewView {
                view_changes,
                pre_prepare,
            })
        }
        other => return Err(ParseError::UnknownTag(other)),
    };

    let signature = read_bytes(buf, &mut pos)?;

    if pos != buf.len() {
        return Err(ParseError::TrailingBytes);
    }

    Ok(ConsensusMessage {
        metadata: BlockMetadata { epoch, block },
        view,
        sender,
        timestamp,
        payload,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Commit;

    fn sample_commit() -> ConsensusMessage {
        ConsensusMessage {
            metadata: BlockMetadata { epoch: 5, block: 42 },
            view: 1,
            sender: PeerId(2),
            timestamp: 1_700_000_000_000_000,
            payload: PbftPayload::Commit(Commit {
                digest: PayloadDigest::of(b"hello"),
            }),
            signature: Bytes::from_static(b"sig-bytes"),
        }
    }

    #[test]
    fn round_trips_commit() {
        let msg = sample_commit();
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        assert_eq!(back.metadata, msg.metadata);
        assert_eq!(back.view, msg.view);
        assert_eq!(back.sender, msg.sender);
        assert_eq!(back.timestamp, msg.timestamp);
        assert_eq!(back.signature, msg.signature);
    }

    #[test]
    fn round_trips_pre_prepare() {
        let msg = ConsensusMessage {
            payload: PbftPayload::PrePrepare(PrePrepare {
                digest: PayloadDigest::of(b"payload"),
                payload: Bytes::from_static(b"the actual payload bytes"),
            }),
            ..sample_commit()
        };
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        match back.payload {
            PbftPayload::PrePrepare(pp) => {
                assert_eq!(pp.payload, Bytes::from_static(b"the actual payload bytes"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn round_trips_view_change_with_prepared_certificate() {
        let pre_prepare = sample_commit();
        let msg = ConsensusMessage {
            payload: PbftPayload::ViewChange(ViewChange {
                prepared: Some(PreparedCertificate {
                    view: 0,
                    digest: PayloadDigest::of(b"hello"),
                    pre_prepare: Box::new(pre_prepare.clone()),
                    prepares: vec![pre_prepare.clone(), pre_prepare],
                }),
            }),
            ..sample_commit()
        };
        let bytes = encode(&msg);
        let back = decode(&bytes).unwrap();
        match back.payload {
            PbftPayload::ViewChange(vc) => {
                let prepared = vc.prepared.unwrap();
                assert_eq!(prepared.prepares.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn empty_buffer_is_truncated_not_empty_tag() {
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn zero_tag_is_empty_tag_error() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0); // epoch
        write_varint(&mut buf, 0); // view
        write_varint(&mut buf, 0); // block
        write_bytes(&mut buf, &0u32.to_be_bytes()); // sender
        write_varint(&mut buf, 0); // timestamp
        buf.push(0); // tag 0 is never assigned to a payload kind
        let err = decode(&buf).unwrap_err();
        assert_eq!(err, ParseError::UnknownTag(0));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use proptest_derive::Arbitrary;

    #[derive(Debug, Clone, Arbitrary)]
    struct ArbitraryCommit {
        epoch: u64,
        view: u64,
        block: u64,
        sender: u32,
        timestamp: u64,
        payload: Vec<u8>,
        signature: Vec<u8>,
    }

    fn to_message(input: &ArbitraryCommit) -> ConsensusMessage {
        ConsensusMessage {
            metadata: BlockMetadata {
                epoch: input.epoch,
                block: input.block,
            },
            view: input.view,
            sender: PeerId(input.sender),
            timestamp: input.timestamp,
            payload: PbftPayload::Commit(Commit {
                digest: PayloadDigest::of(&input.payload),
            }),
            signature: Bytes::from(input.signature.clone()),
        }
    }

    proptest! {
        #[test]
        fn encode_decode_round_trips_for_arbitrary_commit(input in any::<ArbitraryCommit>()) {
            let msg = to_message(&input);
            let bytes = encode(&msg);
            let back = decode(&bytes).unwrap();
            prop_assert_eq!(back.metadata, msg.metadata);
            prop_assert_eq!(back.view, msg.view);
            prop_assert_eq!(back.sender, msg.sender);
            prop_assert_eq!(back.timestamp, msg.timestamp);
            prop_assert_eq!(back.signature, msg.signature);
            match back.payload {
                PbftPayload::Commit(c) => prop_assert_eq!(c.digest, PayloadDigest::of(&input.payload)),
                _ => prop_assert!(false, "wrong payload variant"),
            }
        }

        #[test]
        fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes);
        }
    }
}
