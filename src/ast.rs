//! Compiled form of a structure map.
//!
//! Nodes are built once by the [compiler](crate::compiler) and are read-only afterwards; nothing
//! produced while decoding is stored here, so one [`StructMap`] can be decoded against many
//! buffers at the same time.

use std::collections::HashMap;

/// Primitive kind of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicKind {
    Integer,
    Float,
    Char,
    StrZ,
    Nibble,
}

/// Primitive type descriptor.
///
/// `bit_width == 0` means the whole `byte_width` word is read; otherwise the field is a bitfield
/// of `bit_width` bits packed inside `byte_width`-sized words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Basic {
    pub kind: BasicKind,
    pub byte_width: u8,
    pub bit_width: u8,
    pub signed: bool,
}

impl Basic {
    pub fn integer(byte_width: u8, signed: bool) -> Self {
        Basic { kind: BasicKind::Integer, byte_width, bit_width: 0, signed }
    }

    pub fn is_bitfield(&self) -> bool {
        self.bit_width > 0
    }

    /// Bits one element occupies in the buffer (strz: one character unit).
    pub fn element_bits(&self) -> u64 {
        if self.is_bitfield() {
            self.bit_width as u64
        } else {
            self.byte_width as u64 * 8
        }
    }

    /// Width in bits of the decoded value (de-nibbled values are half their storage).
    pub fn value_bits(&self) -> u32 {
        match self.kind {
            BasicKind::Nibble => self.byte_width as u32 * 4,
            _ if self.is_bitfield() => self.bit_width as u32,
            _ => self.byte_width as u32 * 8,
        }
    }
}

/// One array-length expression, kept as tokens until decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDimension {
    pub tokens: Vec<String>,
}

impl ArrayDimension {
    pub fn literal(n: u64) -> Self {
        ArrayDimension { tokens: vec![n.to_string()] }
    }

    pub fn expression(&self) -> String {
        self.tokens.join(" ")
    }

    /// The length when the dimension is a single integer literal.
    pub fn constant(&self) -> Option<u64> {
        match self.tokens.as_slice() {
            [only] => parse_int_literal(only).and_then(|n| u64::try_from(n).ok()),
            _ => None,
        }
    }
}

/// Index of a struct inside its [`StructMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Basic(Basic),
    Complex(StructId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDefType {
    pub element: ElementType,
    pub dims: Vec<ArrayDimension>,
}

impl VarDefType {
    pub fn basic(&self) -> Option<&Basic> {
        match &self.element {
            ElementType::Basic(b) => Some(b),
            ElementType::Complex(_) => None,
        }
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDef {
    pub name: String,
    pub ty: VarDefType,
    /// Quote-stripped literal the decoded value must equal.
    pub constraint: Option<String>,
    pub hidden: bool,
    pub debug: bool,
}

/// A group of members present only when `tokens` evaluates truthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDef {
    pub tokens: Vec<String>,
    pub members: Vec<Member>,
}

impl ConditionDef {
    pub fn expression(&self) -> String {
        self.tokens.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Var(VarDef),
    Condition(ConditionDef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub base: Option<String>,
    pub members: Vec<Member>,
    /// Specializations declared with `: inherits <this>`, in declaration order.
    pub children: Vec<StructId>,
}

/// The compiled set: an arena of structs, the top-level ones by name, and `#define` bindings.
#[derive(Debug, Clone, Default)]
pub struct StructMap {
    structs: Vec<StructDef>,
    roots: Vec<StructId>,
    defines: HashMap<String, String>,
}

impl StructMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    /// Top-level structs in declaration order (specializations are reached through `children`).
    pub fn roots(&self) -> impl Iterator<Item = (StructId, &StructDef)> {
        self.roots.iter().map(move |&id| (id, self.get(id)))
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Depth-first, case-insensitive lookup through every root and its specializations.
    pub fn find(&self, name: &str) -> Option<StructId> {
        self.roots.iter().find_map(|&id| self.find_in(id, name))
    }

    fn find_in(&self, id: StructId, name: &str) -> Option<StructId> {
        let s = self.get(id);
        if s.name.eq_ignore_ascii_case(name) {
            return Some(id);
        }
        s.children.iter().find_map(|&c| self.find_in(c, name))
    }

    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    pub fn defines(&self) -> &HashMap<String, String> {
        &self.defines
    }

    pub(crate) fn insert_define(&mut self, name: String, value: String) {
        self.defines.insert(name, value);
    }

    /// Add a top-level struct. Fails with the existing id when the name is taken.
    pub(crate) fn insert_root(&mut self, def: StructDef) -> Result<StructId, StructId> {
        if let Some(existing) = self
            .roots
            .iter()
            .copied()
            .find(|&id| self.get(id).name.eq_ignore_ascii_case(&def.name))
        {
            return Err(existing);
        }
        let id = self.push(def);
        self.roots.push(id);
        Ok(id)
    }

    /// Add a specialization under `parent`.
    pub(crate) fn insert_child(&mut self, parent: StructId, def: StructDef) -> StructId {
        let id = self.push(def);
        self.structs[parent.0].children.push(id);
        id
    }

    fn push(&mut self, def: StructDef) -> StructId {
        self.structs.push(def);
        StructId(self.structs.len() - 1)
    }
}

/// Parse a decimal or `0x` hex integer literal (optionally negative).
pub fn parse_int_literal(s: &str) -> Option<i128> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let n = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<i128>().ok()?
    };
    Some(if neg { -n } else { n })
}
