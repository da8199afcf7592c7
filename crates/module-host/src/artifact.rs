//! Compiled artifact codec.
//!
//! Wire layout (integers are minimal unsigned-LEB128 varint32 unless noted):
//!
//! ```text
//! magic "mod1" | version u8 | import count | imports | op count | ops | blake3(32)
//! ```
//!
//! Each import is a kind tag (u8) followed by a name string. Each op is a
//! tag (u8) followed by its operands. The trailing 32 bytes are the BLAKE3
//! hash of everything before them. Decoding is fail-closed: bad tags,
//! truncation, non-minimal varints, duplicate imports, out-of-range slot or
//! register references, checksum mismatch, and trailing data are all
//! rejected.

use std::collections::HashSet;

use module_abi::{ImportDeclaration, ImportKind};
use thiserror::Error;

/// Magic "mod1"
pub const MAGIC: [u8; 4] = *b"mod1";

/// The only format version this runtime accepts.
pub const FORMAT_VERSION: u8 = 1;

/// Upper bound on register indices a body may reference.
pub const REGISTER_LIMIT: u32 = 256;

const KIND_CAPABILITY: u8 = 0x01;
const KIND_OUTPUT: u8 = 0x02;
const KIND_MODEL: u8 = 0x03;

const OP_LOAD_LITERAL: u8 = 0x01;
const OP_SET_PARAM: u8 = 0x02;
const OP_GENERATE: u8 = 0x03;
const OP_INFER: u8 = 0x04;
const OP_CONSUME: u8 = 0x05;
const OP_LOG: u8 = 0x06;

#[derive(Debug, Error, PartialEq)]
pub enum ArtifactError {
    #[error("ART-001: bad magic (not a compiled module)")]
    BadMagic,

    #[error("ART-002: unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("ART-003: unexpected end of input")]
    UnexpectedEof,

    #[error("ART-004: non-minimal varint")]
    NonMinimalVarint,

    #[error("ART-005: invalid import kind tag {0:#04x}")]
    InvalidKindTag(u8),

    #[error("ART-006: invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("ART-007: duplicate import: {kind} '{name}'")]
    DuplicateImport { kind: ImportKind, name: String },

    #[error("ART-008: invalid op tag {0:#04x}")]
    InvalidOpTag(u8),

    #[error("ART-009: op {op_index} references {kind} slot {slot} but only {count} declared")]
    SlotOutOfRange {
        op_index: usize,
        kind: ImportKind,
        slot: u32,
        count: u32,
    },

    #[error("ART-010: op {op_index} reads register r{reg} before any write")]
    RegisterUnwritten { op_index: usize, reg: u32 },

    #[error("ART-011: register index r{0} exceeds the limit of 256")]
    RegisterLimit(u32),

    #[error("ART-012: checksum mismatch")]
    ChecksumMismatch,

    #[error("ART-013: trailing data")]
    TrailingData,

    #[error("ART-014: varint value overflows 32 bits")]
    VarintOverflow,
}

type Result<T> = std::result::Result<T, ArtifactError>;

/// One instruction of the module body, as emitted by the external
/// toolchain. Slot indices count imports of the referenced kind in
/// declaration order; registers hold byte buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Place literal bytes in a register.
    LoadLiteral { reg: u32, bytes: Vec<u8> },
    /// Set a named numeric parameter on a capability.
    SetParam { slot: u32, name: String, value: f64 },
    /// Fill a fresh `len`-byte buffer via a capability, store it in `reg`.
    Generate { slot: u32, reg: u32, len: u32 },
    /// Run a model over `input_reg` into a fresh `len`-byte buffer in `reg`.
    Infer {
        slot: u32,
        input_reg: u32,
        reg: u32,
        len: u32,
    },
    /// Hand a register's bytes to an output.
    Consume { slot: u32, reg: u32 },
    /// Invoke the host log hook.
    Log { message: String },
}

/// A parsed, validated artifact. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub imports: Vec<ImportDeclaration>,
    pub ops: Vec<Op>,
    /// Highest register index referenced, plus one. Derived at parse time.
    pub register_count: u32,
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Parse and validate a compiled artifact.
pub fn parse(data: &[u8]) -> Result<Artifact> {
    if data.len() < 4 || data[..4] != MAGIC {
        return Err(ArtifactError::BadMagic);
    }
    if data.len() < 4 + 1 + 1 + 1 + 32 {
        return Err(ArtifactError::UnexpectedEof);
    }

    let (region, trailer) = data.split_at(data.len() - 32);
    if blake3::hash(region).as_bytes() != trailer {
        return Err(ArtifactError::ChecksumMismatch);
    }

    let mut cur = &region[4..];
    let version = take_u8(&mut cur)?;
    if version != FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedVersion(version));
    }

    let imports = decode_imports(&mut cur)?;
    let ops = decode_ops(&mut cur)?;
    if !cur.is_empty() {
        return Err(ArtifactError::TrailingData);
    }

    let register_count = validate_body(&imports, &ops)?;

    Ok(Artifact {
        imports,
        ops,
        register_count,
    })
}

fn decode_imports(cur: &mut &[u8]) -> Result<Vec<ImportDeclaration>> {
    let count = decode_varint32(cur)? as usize;
    let mut imports = Vec::with_capacity(count);
    let mut seen: HashSet<(ImportKind, String)> = HashSet::new();
    for _ in 0..count {
        let kind = match take_u8(cur)? {
            KIND_CAPABILITY => ImportKind::Capability,
            KIND_OUTPUT => ImportKind::Output,
            KIND_MODEL => ImportKind::Model,
            tag => return Err(ArtifactError::InvalidKindTag(tag)),
        };
        let name = decode_string(cur)?;
        if !seen.insert((kind, name.clone())) {
            return Err(ArtifactError::DuplicateImport { kind, name });
        }
        imports.push(ImportDeclaration { kind, name });
    }
    Ok(imports)
}

fn decode_ops(cur: &mut &[u8]) -> Result<Vec<Op>> {
    let count = decode_varint32(cur)? as usize;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let op = match take_u8(cur)? {
            OP_LOAD_LITERAL => {
                let reg = decode_varint32(cur)?;
                let bytes = decode_bytes(cur)?;
                Op::LoadLiteral { reg, bytes }
            }
            OP_SET_PARAM => {
                let slot = decode_varint32(cur)?;
                let name = decode_string(cur)?;
                let value = take_f64(cur)?;
                Op::SetParam { slot, name, value }
            }
            OP_GENERATE => Op::Generate {
                slot: decode_varint32(cur)?,
                reg: decode_varint32(cur)?,
                len: decode_varint32(cur)?,
            },
            OP_INFER => Op::Infer {
                slot: decode_varint32(cur)?,
                input_reg: decode_varint32(cur)?,
                reg: decode_varint32(cur)?,
                len: decode_varint32(cur)?,
            },
            OP_CONSUME => Op::Consume {
                slot: decode_varint32(cur)?,
                reg: decode_varint32(cur)?,
            },
            OP_LOG => Op::Log {
                message: decode_string(cur)?,
            },
            tag => return Err(ArtifactError::InvalidOpTag(tag)),
        };
        ops.push(op);
    }
    Ok(ops)
}

/// Structural validation of the body against the import table: every slot
/// reference must be in range for its kind, every register read must be
/// preceded by a write, and register indices must stay under the limit.
/// Returns the register file size the body needs.
fn validate_body(imports: &[ImportDeclaration], ops: &[Op]) -> Result<u32> {
    let count = |kind: ImportKind| imports.iter().filter(|d| d.kind == kind).count() as u32;
    let caps = count(ImportKind::Capability);
    let outs = count(ImportKind::Output);
    let models = count(ImportKind::Model);

    let check_slot = |op_index: usize, kind: ImportKind, slot: u32, count: u32| {
        if slot >= count {
            Err(ArtifactError::SlotOutOfRange {
                op_index,
                kind,
                slot,
                count,
            })
        } else {
            Ok(())
        }
    };
    let check_reg = |reg: u32| {
        if reg >= REGISTER_LIMIT {
            Err(ArtifactError::RegisterLimit(reg))
        } else {
            Ok(())
        }
    };

    let mut written: HashSet<u32> = HashSet::new();
    let mut max_reg: Option<u32> = None;
    let mut touch = |reg: u32| max_reg = Some(max_reg.map_or(reg, |m| m.max(reg)));

    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::LoadLiteral { reg, .. } => {
                check_reg(*reg)?;
                touch(*reg);
                written.insert(*reg);
            }
            Op::SetParam { slot, .. } => {
                check_slot(i, ImportKind::Capability, *slot, caps)?;
            }
            Op::Generate { slot, reg, .. } => {
                check_slot(i, ImportKind::Capability, *slot, caps)?;
                check_reg(*reg)?;
                touch(*reg);
                written.insert(*reg);
            }
            Op::Infer {
                slot,
                input_reg,
                reg,
                ..
            } => {
                check_slot(i, ImportKind::Model, *slot, models)?;
                check_reg(*input_reg)?;
                check_reg(*reg)?;
                if !written.contains(input_reg) {
                    return Err(ArtifactError::RegisterUnwritten {
                        op_index: i,
                        reg: *input_reg,
                    });
                }
                touch(*input_reg);
                touch(*reg);
                written.insert(*reg);
            }
            Op::Consume { slot, reg } => {
                check_slot(i, ImportKind::Output, *slot, outs)?;
                check_reg(*reg)?;
                if !written.contains(reg) {
                    return Err(ArtifactError::RegisterUnwritten {
                        op_index: i,
                        reg: *reg,
                    });
                }
                touch(*reg);
            }
            Op::Log { .. } => {}
        }
    }

    Ok(max_reg.map_or(0, |m| m + 1))
}

fn take_u8(cur: &mut &[u8]) -> Result<u8> {
    if cur.is_empty() {
        return Err(ArtifactError::UnexpectedEof);
    }
    let b = cur[0];
    *cur = &cur[1..];
    Ok(b)
}

fn take_f64(cur: &mut &[u8]) -> Result<f64> {
    if cur.len() < 8 {
        return Err(ArtifactError::UnexpectedEof);
    }
    let (bits, rest) = cur.split_at(8);
    *cur = rest;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bits);
    Ok(f64::from_bits(u64::from_be_bytes(arr)))
}

fn decode_bytes(cur: &mut &[u8]) -> Result<Vec<u8>> {
    let len = decode_varint32(cur)? as usize;
    if cur.len() < len {
        return Err(ArtifactError::UnexpectedEof);
    }
    let (bytes, rest) = cur.split_at(len);
    *cur = rest;
    Ok(bytes.to_vec())
}

fn decode_string(cur: &mut &[u8]) -> Result<String> {
    let bytes = decode_bytes(cur)?;
    String::from_utf8(bytes).map_err(|_| ArtifactError::InvalidUtf8)
}

fn decode_varint32(cur: &mut &[u8]) -> Result<u32> {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = take_u8(cur)?;
        // A minimal base-128 encoding never ends in a zero payload byte.
        if shift > 0 && byte == 0x00 {
            return Err(ArtifactError::NonMinimalVarint);
        }
        // The fifth byte carries bits 28..32: only 4 payload bits fit, and
        // a continuation bit there would push past 32 bits either way.
        if shift == 28 && byte > 0x0F {
            return Err(ArtifactError::VarintOverflow);
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode side of the artifact format, used by the external toolchain and
/// the test suite. Performs no validation; `parse` is the authority.
#[derive(Debug, Default)]
pub struct ArtifactBuilder {
    imports: Vec<ImportDeclaration>,
    ops: Vec<Op>,
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import(mut self, kind: ImportKind, name: impl Into<String>) -> Self {
        self.imports.push(ImportDeclaration::new(kind, name));
        self
    }

    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);

        encode_varint32(&mut buf, self.imports.len() as u32);
        for decl in &self.imports {
            buf.push(match decl.kind {
                ImportKind::Capability => KIND_CAPABILITY,
                ImportKind::Output => KIND_OUTPUT,
                ImportKind::Model => KIND_MODEL,
            });
            encode_bytes(&mut buf, decl.name.as_bytes());
        }

        encode_varint32(&mut buf, self.ops.len() as u32);
        for op in &self.ops {
            match op {
                Op::LoadLiteral { reg, bytes } => {
                    buf.push(OP_LOAD_LITERAL);
                    encode_varint32(&mut buf, *reg);
                    encode_bytes(&mut buf, bytes);
                }
                Op::SetParam { slot, name, value } => {
                    buf.push(OP_SET_PARAM);
                    encode_varint32(&mut buf, *slot);
                    encode_bytes(&mut buf, name.as_bytes());
                    buf.extend_from_slice(&value.to_bits().to_be_bytes());
                }
                Op::Generate { slot, reg, len } => {
                    buf.push(OP_GENERATE);
                    encode_varint32(&mut buf, *slot);
                    encode_varint32(&mut buf, *reg);
                    encode_varint32(&mut buf, *len);
                }
                Op::Infer {
                    slot,
                    input_reg,
                    reg,
                    len,
                } => {
                    buf.push(OP_INFER);
                    encode_varint32(&mut buf, *slot);
                    encode_varint32(&mut buf, *input_reg);
                    encode_varint32(&mut buf, *reg);
                    encode_varint32(&mut buf, *len);
                }
                Op::Consume { slot, reg } => {
                    buf.push(OP_CONSUME);
                    encode_varint32(&mut buf, *slot);
                    encode_varint32(&mut buf, *reg);
                }
                Op::Log { message } => {
                    buf.push(OP_LOG);
                    encode_bytes(&mut buf, message.as_bytes());
                }
            }
        }

        let checksum = blake3::hash(&buf);
        buf.extend_from_slice(checksum.as_bytes());
        buf
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn encode_varint32(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push(value as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}
