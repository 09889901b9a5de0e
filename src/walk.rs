//! Structure-only walks over a compiled map.
//!
//! Nothing here writes trace output or keeps decoded values. Two walks live in this module:
//!
//! - **Specialization matching** ([`match_child`]): when a member's type has specializations
//!   (`struct X : inherits Y`), each child is walked against a *copy* of the decoder's cursor,
//!   checking only its literal-constrained fields. The first child whose constrained fields all
//!   compare equal (and that has at least one) is selected.
//! - **Static size** ([`StructMap::sizeof`]): the layout size of a struct when every member has a
//!   size known at compile time. Array dimensions may use `#define` names.
//!
//! Both walks resolve array lengths without any decoded field values: a dimension must be an
//! integer literal or an expression over `#define`s, otherwise the walk stops there.

use crate::ast::*;
use crate::cursor::{BitCursor, Endianness};
use crate::expr::{DefineResolver, Evaluator};
use crate::value::{read_chars, read_number, read_strz};

/// Outcome of walking one member.
enum Step {
    Next,
    /// Nothing further can be checked statically; keep what was seen so far.
    Stop,
    Mismatch,
}

struct Matcher<'a> {
    map: &'a StructMap,
    evaluator: &'a dyn Evaluator,
    endianness: Endianness,
}

/// Pick the first specialization of `id` whose constrained fields match the bytes at `cursor`.
/// The cursor is taken by value, so the caller's position never moves.
pub fn match_child(
    map: &StructMap,
    id: StructId,
    cursor: BitCursor,
    endianness: Endianness,
    evaluator: &dyn Evaluator,
) -> Option<StructId> {
    let m = Matcher { map, evaluator, endianness };
    map.get(id).children.iter().copied().find(|&child| {
        let mut peek = cursor;
        let matched = m.matches(child, &mut peek);
        tracing::trace!(child = %map.get(child).name, matched, "specialization probe");
        matched
    })
}

impl Matcher<'_> {
    fn matches(&self, id: StructId, cursor: &mut BitCursor) -> bool {
        let mut seen = false;
        match self.walk(&self.map.get(id).members, cursor, &mut seen) {
            Step::Mismatch => false,
            Step::Next | Step::Stop => seen,
        }
    }

    fn walk(&self, members: &[Member], cursor: &mut BitCursor, seen: &mut bool) -> Step {
        for member in members {
            let step = match member {
                Member::Var(var) => self.walk_var(var, cursor, seen),
                Member::Condition(_) => Step::Stop,
            };
            if !matches!(step, Step::Next) {
                return step;
            }
        }
        Step::Next
    }

    fn walk_var(&self, var: &VarDef, cursor: &mut BitCursor, seen: &mut bool) -> Step {
        let length = match static_length(&var.ty.dims, self.map, self.evaluator) {
            Some(0) | None => return Step::Stop,
            Some(n) => n as usize,
        };
        match &var.ty.element {
            ElementType::Complex(inner) => {
                for _ in 0..length {
                    let before = cursor.bit_position();
                    match self.walk(&self.map.get(*inner).members, cursor, seen) {
                        Step::Next => {}
                        other => return other,
                    }
                    if cursor.bit_position() == before {
                        return Step::Stop;
                    }
                }
                Step::Next
            }
            ElementType::Basic(basic) => match &var.constraint {
                Some(literal) => self.check(basic, length, literal, cursor, seen),
                None => skip(basic, length, cursor, self.endianness),
            },
        }
    }

    fn check(&self, basic: &Basic, length: usize, literal: &str, cursor: &mut BitCursor, seen: &mut bool) -> Step {
        if cursor.align_for(basic).is_err() {
            return Step::Mismatch;
        }
        let equal = match basic.kind {
            BasicKind::Char => read_chars(cursor, basic, length, self.endianness)
                .map(|v| v.matches_literal(literal))
                .unwrap_or(false),
            BasicKind::StrZ => (0..length).all(|_| {
                cursor.remaining_bytes() > 0
                    && read_strz(cursor, basic, self.endianness)
                        .map(|v| v.matches_literal(literal))
                        .unwrap_or(false)
            }),
            _ => (0..length).all(|_| {
                cursor.align_for(basic).is_ok()
                    && read_number(cursor, basic, self.endianness)
                        .map(|v| v.matches_literal(literal))
                        .unwrap_or(false)
            }),
        };
        if equal {
            *seen = true;
            Step::Next
        } else {
            Step::Mismatch
        }
    }
}

fn skip(basic: &Basic, length: usize, cursor: &mut BitCursor, endianness: Endianness) -> Step {
    for _ in 0..length {
        if cursor.remaining_bits() == 0 {
            return Step::Stop;
        }
        let moved = match basic.kind {
            BasicKind::StrZ => cursor
                .align_for(basic)
                .and_then(|_| read_strz(cursor, basic, endianness).map(|_| ())),
            _ => cursor.align_for(basic).and_then(|_| cursor.seek(basic)),
        };
        if moved.is_err() {
            return Step::Stop;
        }
    }
    Step::Next
}

/// Flattened length of `dims` when every dimension is a literal or a define-only expression.
pub(crate) fn static_length(dims: &[ArrayDimension], map: &StructMap, evaluator: &dyn Evaluator) -> Option<u64> {
    let defines = DefineResolver::new(map.defines(), evaluator);
    dims.iter().try_fold(1u64, |acc, dim| {
        let n = match dim.constant() {
            Some(n) => n,
            None => {
                let v = evaluator.evaluate(&dim.expression(), &defines).ok()?.as_i64();
                v.max(0) as u64
            }
        };
        Some(acc.saturating_mul(n))
    })
}

impl StructMap {
    /// Static byte size of `id`, honouring whole-width alignment after bitfields.
    ///
    /// `None` when the layout depends on the data: conditions, strz fields, array lengths that
    /// are not define-resolvable, or nested types with specializations.
    pub fn sizeof(&self, id: StructId, evaluator: &dyn Evaluator) -> Option<usize> {
        let mut bits = 0u64;
        self.layout(id, evaluator, &mut bits)?;
        usize::try_from(bits.div_ceil(8)).ok()
    }

    /// Advance `bits` past one instance of `id`. `None` also when the size overflows.
    fn layout(&self, id: StructId, evaluator: &dyn Evaluator, bits: &mut u64) -> Option<()> {
        for member in &self.get(id).members {
            let var = match member {
                Member::Var(v) => v,
                Member::Condition(_) => return None,
            };
            let length = static_length(&var.ty.dims, self, evaluator)?;
            if length == 0 {
                continue;
            }
            match &var.ty.element {
                ElementType::Complex(inner) => {
                    if !self.get(*inner).children.is_empty() {
                        return None;
                    }
                    self.layout_array(*inner, length, evaluator, bits)?;
                }
                ElementType::Basic(basic) => {
                    if basic.kind == BasicKind::StrZ {
                        return None;
                    }
                    if !basic.is_bitfield() {
                        *bits = bits.div_ceil(8).checked_mul(8)?;
                    }
                    *bits = bits.checked_add(basic.element_bits().checked_mul(length)?)?;
                }
            }
        }
        Some(())
    }

    /// `length` consecutive instances of `id`. An element's size depends only on the bit phase
    /// it starts at, so once a phase repeats the rest of the array is whole cycles plus a tail.
    fn layout_array(&self, id: StructId, length: u64, evaluator: &dyn Evaluator, bits: &mut u64) -> Option<()> {
        let mut first_seen: [Option<(u64, u64)>; 8] = [None; 8];
        let mut i = 0u64;
        while i < length {
            let phase = (*bits % 8) as usize;
            if let Some((start_i, start_bits)) = first_seen[phase] {
                let (period, span) = (i - start_i, *bits - start_bits);
                let cycles = (length - i) / period;
                *bits = bits.checked_add(span.checked_mul(cycles)?)?;
                i += cycles * period;
                first_seen = [None; 8];
                if i >= length {
                    break;
                }
            }
            first_seen[(*bits % 8) as usize] = Some((i, *bits));
            self.layout(id, evaluator, bits)?;
            i += 1;
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::expr::ExprEvaluator;

    fn map(src: &str) -> StructMap {
        let c = compile(src, &CompileOptions::default());
        assert!(c.success(), "{}", c.error_log());
        c.map
    }

    #[test]
    fn sizeof_sums_members() {
        let m = map("struct Main { uint32 a; uint16 b[3]; char4 c; double d; };");
        let id = m.find("Main").unwrap();
        assert_eq!(m.sizeof(id, &ExprEvaluator::new()), Some(4 + 6 + 4 + 8));
    }

    #[test]
    fn sizeof_aligns_after_bitfields() {
        let m = map("struct Main { uint8 a:3; uint8 b:4; uint16 c; uint8 d:1; };");
        let id = m.find("Main").unwrap();
        assert_eq!(m.sizeof(id, &ExprEvaluator::new()), Some(1 + 2 + 1));
    }

    #[test]
    fn sizeof_uses_defines_and_nested_structs() {
        let m = map(
            "#define N 2*2\n\
             struct Pair { uint8 x; uint8 y; };\n\
             struct Main { Pair p[N]; uint8 tail; };",
        );
        let id = m.find("Main").unwrap();
        assert_eq!(m.sizeof(id, &ExprEvaluator::new()), Some(9));
    }

    #[test]
    fn sizeof_is_none_for_dynamic_layouts() {
        let m = map(
            "struct A { uint8 n; uint8 data[n]; };\n\
             struct B { uint8 f; if (f) { uint8 x; } };\n\
             struct C { strz s; };",
        );
        let e = ExprEvaluator::new();
        for name in ["A", "B", "C"] {
            assert_eq!(m.sizeof(m.find(name).unwrap(), &e), None, "{name}");
        }
    }

    #[test]
    fn sizeof_is_none_when_the_size_overflows() {
        let m = map(
            "struct Big { uint8 x[0x4000000000000000]; };\n\
             struct Main { Big b[2]; };\n\
             struct Half { uint8 x[0x1000000000000000]; };\n\
             struct Twice { Half h[2]; };",
        );
        let e = ExprEvaluator::new();
        assert_eq!(m.sizeof(m.find("Big").unwrap(), &e), None);
        assert_eq!(m.sizeof(m.find("Main").unwrap(), &e), None);
        assert_eq!(m.sizeof(m.find("Half").unwrap(), &e), Some(0x1000_0000_0000_0000));
        assert_eq!(m.sizeof(m.find("Twice").unwrap(), &e), None);
    }

    #[test]
    fn sizeof_multiplies_long_struct_arrays() {
        let m = map(
            "struct Pair { uint8 a; uint8 b; };\n\
             struct Bits { uint8 v:3; };\n\
             struct Wide { Pair p[0x100000000]; };\n\
             struct Packed { Bits b[9]; };\n\
             struct Mixed { Bits b[5]; uint8 tail; };",
        );
        let e = ExprEvaluator::new();
        assert_eq!(m.sizeof(m.find("Wide").unwrap(), &e), Some(0x2_0000_0000));
        assert_eq!(m.sizeof(m.find("Packed").unwrap(), &e), Some(4));
        assert_eq!(m.sizeof(m.find("Mixed").unwrap(), &e), Some(3));
    }

    #[test]
    fn matching_stops_at_the_end_of_data() {
        let m = map(
            "struct R { uint8 tag; };\n\
             struct C : inherits R { strz s[0x7fffffffffffffff]; uint8 t = 1; };",
        );
        let r = m.find("R").unwrap();
        let got = match_child(&m, r, BitCursor::new(b"ab\0"), Endianness::Little, &ExprEvaluator::new());
        assert_eq!(got, None);
    }

    #[test]
    fn matching_stops_at_elements_that_consume_nothing() {
        let m = map(
            "struct Empty { };\n\
             struct R { uint8 tag; };\n\
             struct C : inherits R { uint8 tag = 1; Empty e[0x7fffffffffffffff]; uint8 t = 2; };",
        );
        let r = m.find("R").unwrap();
        let got = match_child(&m, r, BitCursor::new(&[1, 9]), Endianness::Little, &ExprEvaluator::new());
        assert_eq!(got, m.find("C"));
    }

    #[test]
    fn first_matching_child_wins() {
        let m = map(
            "struct Rec { uint8 tag; uint8 body; };\n\
             struct One : inherits Rec { uint8 tag = 1; uint8 a; };\n\
             struct Two : inherits Rec { uint8 tag = 2; uint8 b; };\n\
             struct AlsoTwo : inherits Rec { uint8 tag = 2; uint16 c; };",
        );
        let rec = m.find("Rec").unwrap();
        let e = ExprEvaluator::new();
        let data = [2u8, 9];
        let got = match_child(&m, rec, BitCursor::new(&data), Endianness::Little, &e);
        assert_eq!(got, m.find("Two"));
        let none = [7u8, 9];
        assert_eq!(match_child(&m, rec, BitCursor::new(&none), Endianness::Little, &e), None);
    }

    #[test]
    fn children_without_constraints_never_match() {
        let m = map(
            "struct Rec { uint8 tag; };\n\
             struct Loose : inherits Rec { uint8 anything; };",
        );
        let rec = m.find("Rec").unwrap();
        let data = [0u8];
        let got = match_child(&m, rec, BitCursor::new(&data), Endianness::Little, &ExprEvaluator::new());
        assert_eq!(got, None);
    }

    #[test]
    fn matching_skips_unconstrained_fields_and_reads_strings() {
        let m = map(
            "struct Chunk { char4 id; };\n\
             struct Data : inherits Chunk { uint16 pad; char4 id = \"data\"; };",
        );
        let chunk = m.find("Chunk").unwrap();
        let data = *b"\0\0DATA";
        let got = match_child(&m, chunk, BitCursor::new(&data), Endianness::Little, &ExprEvaluator::new());
        assert_eq!(got, m.find("Data"));
    }

    #[test]
    fn matching_never_moves_the_callers_cursor() {
        let m = map(
            "struct Rec { uint8 tag; };\n\
             struct One : inherits Rec { uint8 tag = 1; };",
        );
        let data = [1u8];
        let cursor = BitCursor::new(&data);
        let rec = m.find("Rec").unwrap();
        assert!(match_child(&m, rec, cursor, Endianness::Big, &ExprEvaluator::new()).is_some());
        assert_eq!(cursor.byte_offset(), 0);
    }
}
