//! Decode a byte buffer against a compiled map, writing a line-oriented trace.
//!
//! The [`Decoder`] only borrows the map and the evaluator. Everything that changes while a buffer
//! is decoded (cursor, scope frames, addresses of fields already read, hidden depth) lives in a
//! `DecodeContext` created per call, so one map can be decoded against many buffers at once.
//!
//! Failures unwind with `?`. Lines written before the failure stay in the sink.

use crate::ast::*;
use crate::cursor::{BitCursor, Endianness};
use crate::expr::{DefineResolver, Evaluator, ExprEvaluator, Number, Resolver};
use crate::format::{escape_units, format_scalar, indent};
use crate::value::{read_chars, read_number, read_strz, Scalar};
use crate::walk::match_child;
use std::io::Write;

/// Char arrays at least this long print only their name and length.
const LONG_CHAR_ARRAY: usize = 256;

/// Deepest chain of nested struct activations a decode may build.
const MAX_NESTING: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("insufficient data at byte {offset}: {needed_bits} more bits needed")]
    InsufficientData { offset: usize, needed_bits: u64 },
    #[error("value mismatch in '{field}': expected {expected}, found {found}")]
    ConstraintViolation { field: String, expected: String, found: String },
    #[error("no '{0}' struct defined")]
    MissingEntry(String),
    /// A struct was re-entered without consuming data, or nesting went past the limit.
    #[error("'{name}' at byte {offset} nests without end")]
    Recursion { name: String, offset: usize },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    pub endianness: Endianness,
    /// Name of the struct to start from.
    pub entry: String,
    /// Decode at most this many bytes of the buffer.
    pub limit: Option<usize>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions { endianness: Endianness::Little, entry: "Main".to_string(), limit: None }
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes consumed, a partially read trailing byte included.
    pub consumed: usize,
}

pub struct Decoder<'m> {
    map: &'m StructMap,
    evaluator: &'m dyn Evaluator,
}

/// Where a member's value was read, by member index within its frame.
#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Read { bit: u64, count: usize },
    /// Slots of a condition that evaluated true.
    Condition(Vec<Slot>),
}

/// One struct or condition activation.
struct Frame<'m> {
    members: &'m [Member],
    processed: usize,
    slots: Vec<Slot>,
}

impl<'m> Frame<'m> {
    fn new(members: &'m [Member]) -> Self {
        Frame { members, processed: 0, slots: vec![Slot::Empty; members.len()] }
    }
}

struct DecodeContext<'d, 'm> {
    data: &'d [u8],
    cursor: BitCursor<'d>,
    endianness: Endianness,
    frames: Vec<Frame<'m>>,
    /// Struct activations in progress with the bit position each started at.
    active: Vec<(StructId, u64)>,
    /// Non-zero while inside a hidden nested struct.
    hidden: usize,
    out: &'d mut dyn Write,
}

impl<'d, 'm> DecodeContext<'d, 'm> {
    fn frame(&mut self) -> Option<&mut Frame<'m>> {
        self.frames.last_mut()
    }

    fn record(&mut self, index: usize, slot: Slot) {
        if let Some(f) = self.frame() {
            f.slots[index] = slot;
        }
    }

    fn consumed(&self) -> usize {
        self.cursor.bit_position().div_ceil(8) as usize
    }

    /// Bits a whole-width read may still use once the cursor is aligned.
    fn available_bits(&self, basic: Option<&Basic>) -> u64 {
        match basic {
            Some(b) if b.is_bitfield() => self.cursor.remaining_bits(),
            _ => self.cursor.remaining_bits() / 8 * 8,
        }
    }

    fn line(&mut self, depth: usize, text: std::fmt::Arguments) -> Result<(), DecodeError> {
        if self.hidden == 0 {
            writeln!(self.out, "{}{}", indent(depth), text)?;
        }
        Ok(())
    }
}

/// Name lookup over the active frames (innermost first), then `#define`s.
struct ScopeResolver<'c, 'm> {
    frames: &'c [Frame<'m>],
    data: &'c [u8],
    endianness: Endianness,
    defines: DefineResolver<'c>,
}

impl Resolver for ScopeResolver<'_, '_> {
    fn lookup(&self, name: &str) -> Option<Number> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| self.find_in(&f.members[..f.processed], &f.slots, name))
            .or_else(|| self.defines.lookup(name))
    }
}

impl ScopeResolver<'_, '_> {
    fn find_in(&self, members: &[Member], slots: &[Slot], name: &str) -> Option<Number> {
        members.iter().zip(slots).find_map(|(member, slot)| match (member, slot) {
            (Member::Var(var), Slot::Read { bit, count }) if var.name.eq_ignore_ascii_case(name) => {
                self.value_at(var, *bit, *count)
            }
            (Member::Condition(cond), Slot::Condition(inner)) => self.find_in(&cond.members, inner, name),
            _ => None,
        })
    }

    /// Re-read the first element of `var` from the address recorded when it was decoded.
    fn value_at(&self, var: &VarDef, bit: u64, count: usize) -> Option<Number> {
        let basic = var.ty.basic()?;
        let mut c = BitCursor::at_bit(self.data, bit);
        let v = match basic.kind {
            BasicKind::Char => read_chars(&mut c, basic, count, self.endianness),
            BasicKind::StrZ => read_strz(&mut c, basic, self.endianness),
            _ => read_number(&mut c, basic, self.endianness),
        }
        .ok()?;
        Some(match v {
            Scalar::Float(_) | Scalar::Double(_) => Number::Float(v.as_f64()),
            _ => Number::Int(v.as_i64()),
        })
    }
}

impl<'m> Decoder<'m> {
    pub fn new(map: &'m StructMap, evaluator: &'m dyn Evaluator) -> Self {
        Decoder { map, evaluator }
    }

    /// Decode `data` starting at `options.entry`, writing the trace to `out`.
    ///
    /// When the entry struct is missing a single diagnostic line is written and nothing is read.
    pub fn decode(&self, data: &[u8], options: &DecodeOptions, out: &mut dyn Write) -> Result<Decoded, DecodeError> {
        let id = match self.map.find(&options.entry) {
            Some(id) => id,
            None => {
                if options.entry.eq_ignore_ascii_case("main") {
                    writeln!(out, "No main defined.")?;
                } else {
                    writeln!(out, "No '{}' defined.", options.entry)?;
                }
                return Err(DecodeError::MissingEntry(options.entry.clone()));
            }
        };
        let (consumed, result) = self.decode_with_extent(id, data, options, out);
        result.map(|()| Decoded { consumed })
    }

    /// Decode one struct and return `(bytes_consumed, result)`; the byte count is meaningful
    /// on failure too.
    pub fn decode_with_extent(
        &self,
        id: StructId,
        data: &[u8],
        options: &DecodeOptions,
        out: &mut dyn Write,
    ) -> (usize, Result<(), DecodeError>) {
        let data = match options.limit {
            Some(n) => &data[..n.min(data.len())],
            None => data,
        };
        let mut ctx = DecodeContext {
            data,
            cursor: BitCursor::new(data),
            endianness: options.endianness,
            frames: Vec::new(),
            active: Vec::new(),
            hidden: 0,
            out,
        };
        tracing::debug!(entry = %self.map.get(id).name, len = data.len(), "decode start");
        let result = self.decode_struct(&mut ctx, id, 0);
        if let Err(e) = &result {
            tracing::debug!(error = %e, offset = ctx.cursor.byte_offset(), "decode stopped");
        }
        (ctx.consumed(), result)
    }

    fn decode_struct(&self, ctx: &mut DecodeContext<'_, 'm>, id: StructId, depth: usize) -> Result<(), DecodeError> {
        let def = self.map.get(id);
        let start = (id, ctx.cursor.bit_position());
        if ctx.active.len() >= MAX_NESTING || ctx.active.contains(&start) {
            return Err(DecodeError::Recursion { name: def.name.clone(), offset: ctx.cursor.byte_offset() });
        }
        ctx.active.push(start);
        ctx.frames.push(Frame::new(&def.members));
        let result = self.decode_members(ctx, &def.members, depth);
        ctx.frames.pop();
        ctx.active.pop();
        result
    }

    fn decode_members(&self, ctx: &mut DecodeContext<'_, 'm>, members: &'m [Member], depth: usize) -> Result<(), DecodeError> {
        for (i, member) in members.iter().enumerate() {
            if ctx.cursor.remaining_bits() == 0 {
                break;
            }
            if let Some(f) = ctx.frame() {
                f.processed = i;
            }
            match member {
                Member::Var(var) => self.decode_var(ctx, i, var, depth)?,
                Member::Condition(cond) => self.decode_condition(ctx, i, cond, depth)?,
            }
        }
        Ok(())
    }

    fn evaluate(&self, ctx: &DecodeContext<'_, 'm>, text: &str) -> Result<Number, crate::expr::EvalError> {
        let resolver = ScopeResolver {
            frames: &ctx.frames,
            data: ctx.data,
            endianness: ctx.endianness,
            defines: DefineResolver::new(self.map.defines(), self.evaluator),
        };
        self.evaluator.evaluate(text, &resolver)
    }

    /// Evaluate an expression, writing the error line and falling back to `None` on failure.
    fn evaluate_or_report(&self, ctx: &mut DecodeContext<'_, 'm>, text: &str, depth: usize) -> Result<Option<Number>, DecodeError> {
        match self.evaluate(ctx, text) {
            Ok(n) => Ok(Some(n)),
            Err(e) => {
                tracing::warn!(expression = text, error = %e, "expression failed");
                writeln!(ctx.out, "{}Error: evaluating the expression '{}'", indent(depth), text)?;
                Ok(None)
            }
        }
    }

    /// Flattened element count, clamped to what the remaining data can hold. Scalars are
    /// always 1 so that a short buffer fails the read instead.
    fn array_length(&self, ctx: &mut DecodeContext<'_, 'm>, var: &VarDef, depth: usize) -> Result<usize, DecodeError> {
        if !var.ty.is_array() {
            return Ok(1);
        }
        let mut length = 1u64;
        for dim in &var.ty.dims {
            let n = match dim.constant() {
                Some(n) => n,
                None => match self.evaluate_or_report(ctx, &dim.expression(), depth)? {
                    Some(v) => v.as_i64().max(0) as u64,
                    None => 0,
                },
            };
            length = length.saturating_mul(n);
        }
        let element_bits = match &var.ty.element {
            ElementType::Basic(b) => Some(b.element_bits()),
            ElementType::Complex(id) => self.map.sizeof(*id, self.evaluator).and_then(|n| (n as u64).checked_mul(8)),
        };
        if let Some(bits) = element_bits.filter(|&b| b > 0) {
            let available = ctx.available_bits(var.ty.basic());
            if length.saturating_mul(bits) > available {
                length = available / bits;
            }
        }
        Ok(length as usize)
    }

    fn decode_var(&self, ctx: &mut DecodeContext<'_, 'm>, index: usize, var: &VarDef, depth: usize) -> Result<(), DecodeError> {
        let length = self.array_length(ctx, var, depth)?;
        tracing::trace!(member = %var.name, length, offset = ctx.cursor.byte_offset(), "member");
        if var.debug {
            tracing::debug!(member = %var.name, offset = ctx.cursor.byte_offset(), "debug breakpoint");
        }
        if length == 0 {
            return Ok(());
        }
        match &var.ty.element {
            ElementType::Basic(basic) => self.decode_basic(ctx, index, var, basic, length, depth),
            ElementType::Complex(id) => self.decode_complex(ctx, var, *id, length, depth),
        }
    }

    fn decode_basic(
        &self,
        ctx: &mut DecodeContext<'_, 'm>,
        index: usize,
        var: &VarDef,
        basic: &Basic,
        length: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        ctx.cursor.align_for(basic)?;
        ctx.record(index, Slot::Read { bit: ctx.cursor.bit_position(), count: length });
        let e = ctx.endianness;
        let show = !var.hidden;

        if basic.kind == BasicKind::Char {
            let v = read_chars(&mut ctx.cursor, basic, length, e)?;
            if show {
                if length >= LONG_CHAR_ARRAY {
                    ctx.line(depth, format_args!("{}[{}]", var.name, length))?;
                } else if let Scalar::Text(units) = &v {
                    ctx.line(depth, format_args!("{} = '{}'", var.name, escape_units(units)))?;
                }
            }
            return self.check(ctx, var, &v, depth);
        }

        // strz64 runs are skipped silently.
        let show = show && !(basic.kind == BasicKind::StrZ && basic.byte_width >= 8);
        let array = length > 1;
        if show && array {
            ctx.line(depth, format_args!("{}:", var.name))?;
        }
        for n in 0..length {
            ctx.cursor.align_for(basic)?;
            let v = match basic.kind {
                BasicKind::StrZ => read_strz(&mut ctx.cursor, basic, e)?,
                _ => read_number(&mut ctx.cursor, basic, e)?,
            };
            if show {
                if array {
                    ctx.line(depth, format_args!("  [{}] = {}", n, format_scalar(&v)))?;
                } else {
                    ctx.line(depth, format_args!("{} = {}", var.name, format_scalar(&v)))?;
                }
            }
            self.check(ctx, var, &v, depth)?;
            if ctx.cursor.remaining_bits() == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Compare against the declared literal; a mismatch writes `Value Mismatch!` and fails.
    fn check(&self, ctx: &mut DecodeContext<'_, 'm>, var: &VarDef, v: &Scalar, depth: usize) -> Result<(), DecodeError> {
        let Some(expected) = &var.constraint else {
            return Ok(());
        };
        if v.matches_literal(expected) {
            return Ok(());
        }
        writeln!(ctx.out, "{}Value Mismatch!", indent(depth))?;
        Err(DecodeError::ConstraintViolation {
            field: var.name.clone(),
            expected: expected.clone(),
            found: format_scalar(v),
        })
    }

    fn decode_complex(
        &self,
        ctx: &mut DecodeContext<'_, 'm>,
        var: &VarDef,
        base: StructId,
        length: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        if var.hidden {
            ctx.hidden += 1;
        }
        let result = self.decode_complex_elements(ctx, var, base, length, depth);
        if var.hidden {
            ctx.hidden -= 1;
        }
        result
    }

    fn decode_complex_elements(
        &self,
        ctx: &mut DecodeContext<'_, 'm>,
        var: &VarDef,
        base: StructId,
        length: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let mut chosen = self.select(ctx, base);
        let off = ctx.cursor.byte_offset();
        ctx.line(depth, format_args!("{}.{} (@ {}/0x{:x}) =", var.name, self.map.get(chosen).name, off, off))?;

        if length == 1 {
            ctx.line(depth, format_args!("{{"))?;
            self.decode_struct(ctx, chosen, depth + 1)?;
            return ctx.line(depth, format_args!("}}"));
        }

        for i in 0..length {
            if ctx.cursor.remaining_bits() == 0 {
                break;
            }
            if i > 0 {
                chosen = self.select(ctx, base);
            }
            let off = ctx.cursor.byte_offset();
            ctx.line(depth, format_args!("  [{}] ({} @ {}/0x{:x})", i, self.map.get(chosen).name, off, off))?;
            let before = ctx.cursor.bit_position();
            self.decode_struct(ctx, chosen, depth + 2)?;
            if ctx.cursor.bit_position() == before {
                break;
            }
        }
        Ok(())
    }

    /// The matching specialization of `base` at the cursor, or `base` itself.
    fn select(&self, ctx: &DecodeContext<'_, 'm>, base: StructId) -> StructId {
        match_child(self.map, base, ctx.cursor, ctx.endianness, self.evaluator).unwrap_or(base)
    }

    fn decode_condition(
        &self,
        ctx: &mut DecodeContext<'_, 'm>,
        index: usize,
        cond: &'m ConditionDef,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let text = cond.expression();
        let truth = self
            .evaluate_or_report(ctx, &text, depth)?
            .is_some_and(|n| n.is_truthy());
        ctx.line(depth, format_args!("// Expression: {} = {}", text, truth as u8))?;
        if !truth {
            return Ok(());
        }
        ctx.frames.push(Frame::new(&cond.members));
        let result = self.decode_members(ctx, &cond.members, depth);
        let slots = ctx.frames.pop().map(|f| f.slots).unwrap_or_default();
        ctx.record(index, Slot::Condition(slots));
        result
    }
}

/// Decode with the bundled evaluator and return the whole trace, partial output after a
/// failure included.
pub fn visualise(map: &StructMap, data: &[u8], options: &DecodeOptions) -> String {
    let evaluator = ExprEvaluator::new();
    let mut out = Vec::new();
    let _ = Decoder::new(map, &evaluator).decode(data, options, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}
