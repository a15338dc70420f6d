//! Minimal reader for CPython's `marshal` format.
//!
//! Only the subset needed to walk a PYZ index is understood: scalars,
//! integers, floats, every string flavour and the sequence types. Code
//! objects, dicts, sets and longs are rejected since their layout would have
//! to be known to skip them.

use std::sync::Arc;

use crate::error::MarshalError;

pub const TYPE_NULL: u8 = b'0';
pub const TYPE_NONE: u8 = b'N';
pub const TYPE_FALSE: u8 = b'F';
pub const TYPE_TRUE: u8 = b'T';
pub const TYPE_STOPITER: u8 = b'S';
pub const TYPE_ELLIPSIS: u8 = b'.';
pub const TYPE_INT: u8 = b'i';
pub const TYPE_FLOAT: u8 = b'f';
pub const TYPE_BINARY_FLOAT: u8 = b'g';
pub const TYPE_STRING: u8 = b's';
pub const TYPE_INTERNED: u8 = b't';
pub const TYPE_REF: u8 = b'r';
pub const TYPE_TUPLE: u8 = b'(';
pub const TYPE_LIST: u8 = b'[';
pub const TYPE_UNICODE: u8 = b'u';
pub const TYPE_ASCII: u8 = b'a';
pub const TYPE_ASCII_INTERNED: u8 = b'A';
pub const TYPE_SMALL_TUPLE: u8 = b')';
pub const TYPE_SHORT_ASCII: u8 = b'z';
pub const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';

/// With a type, add the object to the reference table.
pub const FLAG_REF: u8 = 0x80;

/// Deepest nesting accepted before giving up. PYZ indexes nest three levels.
pub const MAX_DEPTH: usize = 256;

/// A decoded marshal value.
///
/// Lists, tuples and small tuples all decode to [`Object::Seq`]. Strings keep
/// their raw bytes. Payloads are shared so that back-references stay cheap no
/// matter how often an object is referenced.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    None,
    Bool(bool),
    StopIteration,
    Ellipsis,
    Int(i32),
    Float(f64),
    Str(Arc<[u8]>),
    Seq(Arc<[Object]>),
}

impl Object {
    pub fn str(bytes: &[u8]) -> Object {
        Object::Str(Arc::from(bytes))
    }

    pub fn seq(items: Vec<Object>) -> Object {
        Object::Seq(Arc::from(items))
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Object::Int(v) => Some(*v),
            Object::Bool(b) => Some(i32::from(*b)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::Str(s) => Some(&s[..]),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Object]> {
        match self {
            Object::Seq(items) => Some(&items[..]),
            _ => None,
        }
    }
}

/// One decode session: the input, the read cursor and the reference table.
pub struct Unmarshaler<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Object>,
    depth: usize,
}

impl<'a> Unmarshaler<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Starts reading at `pos` within `data`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            refs: Vec::new(),
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn refs(&self) -> &[Object] {
        &self.refs
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MarshalError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(MarshalError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, MarshalError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    /// Reads a 4 byte length and checks it against the remaining input.
    fn read_len(&mut self) -> Result<usize, MarshalError> {
        let offset = self.pos;
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| MarshalError::NegativeLength { length, offset })
    }

    /// Decodes the value at the cursor.
    pub fn read_object(&mut self) -> Result<Object, MarshalError> {
        if self.depth >= MAX_DEPTH {
            return Err(MarshalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Object, MarshalError> {
        let offset = self.pos;
        let code = self.read_u8()?;
        let add_ref = code & FLAG_REF != 0;
        let tag = code & !FLAG_REF;

        let obj = match tag {
            TYPE_NULL => Object::Null,
            TYPE_NONE => Object::None,
            TYPE_FALSE => Object::Bool(false),
            TYPE_TRUE => Object::Bool(true),
            TYPE_STOPITER => Object::StopIteration,
            TYPE_ELLIPSIS => Object::Ellipsis,

            TYPE_INT => Object::Int(self.read_i32()?),

            TYPE_BINARY_FLOAT => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.take(8)?);
                Object::Float(f64::from_le_bytes(buf))
            }
            TYPE_FLOAT => {
                let n = usize::from(self.read_u8()?);
                let text = self.take(n)?;
                let value = std::str::from_utf8(text)
                    .ok()
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .ok_or(MarshalError::InvalidFloat { offset })?;
                Object::Float(value)
            }

            TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
                let n = usize::from(self.read_u8()?);
                Object::str(self.take(n)?)
            }
            TYPE_STRING | TYPE_INTERNED | TYPE_UNICODE | TYPE_ASCII | TYPE_ASCII_INTERNED => {
                let n = self.read_len()?;
                Object::str(self.take(n)?)
            }

            TYPE_LIST | TYPE_TUPLE | TYPE_SMALL_TUPLE => {
                let count = if tag == TYPE_SMALL_TUPLE {
                    usize::from(self.read_u8()?)
                } else {
                    self.read_len()?
                };
                // every item needs at least its type byte
                let remaining = self.data.len() - self.pos;
                if count > remaining {
                    return Err(MarshalError::UnexpectedEof {
                        offset: self.pos,
                        needed: count,
                    });
                }

                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_object()?);
                }
                Object::seq(items)
            }

            TYPE_REF => {
                let index = self.read_i32()?;
                let slot = usize::try_from(index)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| self.refs.get(n))
                    .ok_or(MarshalError::BadReference {
                        index,
                        len: self.refs.len(),
                    })?;
                slot.clone()
            }

            _ => {
                return Err(MarshalError::UnknownType {
                    tag,
                    printable: char::from(tag),
                    offset,
                });
            }
        };

        if add_ref {
            self.refs.push(obj.clone());
        }
        Ok(obj)
    }
}

/// Decodes a single value from the start of `data`.
pub fn loads(data: &[u8]) -> Result<Object, MarshalError> {
    Unmarshaler::new(data).read_object()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> Vec<u8> {
        let mut out = vec![TYPE_INT];
        out.extend_from_slice(&v.to_le_bytes());
        out
    }

    fn long_str(tag: u8, s: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(s.len() as i32).to_le_bytes());
        out.extend_from_slice(s);
        out
    }

    fn short_str(tag: u8, s: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, s.len() as u8];
        out.extend_from_slice(s);
        out
    }

    fn list(tag: u8, items: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![tag];
        if tag == TYPE_SMALL_TUPLE {
            out.push(items.len() as u8);
        } else {
            out.extend_from_slice(&(items.len() as i32).to_le_bytes());
        }
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }

    fn reference(n: i32) -> Vec<u8> {
        let mut out = vec![TYPE_REF];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }

    #[test]
    fn scalars() {
        assert_eq!(loads(b"N").unwrap(), Object::None);
        assert_eq!(loads(b"0").unwrap(), Object::Null);
        assert_eq!(loads(b"T").unwrap(), Object::Bool(true));
        assert_eq!(loads(b"F").unwrap(), Object::Bool(false));
        assert_eq!(loads(b"S").unwrap(), Object::StopIteration);
        assert_eq!(loads(b".").unwrap(), Object::Ellipsis);
        assert_eq!(loads(&int(-7)).unwrap(), Object::Int(-7));
        assert_eq!(loads(&int(i32::MAX)).unwrap(), Object::Int(i32::MAX));
    }

    #[test]
    fn floats() {
        let mut g = vec![TYPE_BINARY_FLOAT];
        g.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(loads(&g).unwrap(), Object::Float(1.5));

        assert_eq!(loads(&short_str(TYPE_FLOAT, b"-0.25")).unwrap(), Object::Float(-0.25));
        assert!(matches!(
            loads(&short_str(TYPE_FLOAT, b"abc")),
            Err(MarshalError::InvalidFloat { offset: 0 })
        ));
    }

    #[test]
    fn every_string_flavour() {
        for tag in [TYPE_STRING, TYPE_INTERNED, TYPE_UNICODE, TYPE_ASCII, TYPE_ASCII_INTERNED] {
            assert_eq!(loads(&long_str(tag, b"pkg.mod")).unwrap(), Object::str(b"pkg.mod"));
        }
        for tag in [TYPE_SHORT_ASCII, TYPE_SHORT_ASCII_INTERNED] {
            assert_eq!(loads(&short_str(tag, b"os")).unwrap(), Object::str(b"os"));
        }
        assert_eq!(loads(&long_str(TYPE_STRING, b"")).unwrap(), Object::str(b""));
    }

    #[test]
    fn sequences_nest() {
        let inner = list(TYPE_SMALL_TUPLE, &[int(1), short_str(TYPE_SHORT_ASCII, b"x")]);
        let middle = list(TYPE_TUPLE, &[inner, b"N".to_vec()]);
        let outer = list(TYPE_LIST, &[middle, int(3)]);

        let expected = Object::seq(vec![
            Object::seq(vec![
                Object::seq(vec![Object::Int(1), Object::str(b"x")]),
                Object::None,
            ]),
            Object::Int(3),
        ]);
        assert_eq!(loads(&outer).unwrap(), expected);
    }

    #[test]
    fn back_reference_resolves_to_registered_value() {
        let mut flagged = short_str(TYPE_SHORT_ASCII_INTERNED, b"encodings");
        flagged[0] |= FLAG_REF;
        let data = list(TYPE_LIST, &[flagged, reference(1)]);

        let obj = loads(&data).unwrap();
        let items = obj.as_seq().unwrap();
        assert_eq!(items[0], items[1]);
        assert_eq!(items[1], Object::str(b"encodings"));
    }

    #[test]
    fn containers_register_after_their_children() {
        let mut child = int(5);
        child[0] |= FLAG_REF;
        let mut tuple = list(TYPE_SMALL_TUPLE, &[child]);
        tuple[0] |= FLAG_REF;
        let data = list(TYPE_LIST, &[tuple, reference(1), reference(2)]);

        let mut u = Unmarshaler::new(&data);
        let obj = u.read_object().unwrap();
        let items = obj.as_seq().unwrap();
        assert_eq!(items[1], Object::Int(5));
        assert_eq!(items[2], Object::seq(vec![Object::Int(5)]));
        assert_eq!(u.refs().len(), 2);
    }

    #[test]
    fn bad_references_are_fatal() {
        let mut flagged = int(1);
        flagged[0] |= FLAG_REF;

        let zero = list(TYPE_LIST, &[flagged.clone(), reference(0)]);
        assert_eq!(
            loads(&zero),
            Err(MarshalError::BadReference { index: 0, len: 1 })
        );

        let past_end = list(TYPE_LIST, &[flagged, reference(2)]);
        assert_eq!(
            loads(&past_end),
            Err(MarshalError::BadReference { index: 2, len: 1 })
        );

        assert_eq!(
            loads(&reference(-1)),
            Err(MarshalError::BadReference { index: -1, len: 0 })
        );
    }

    #[test]
    fn unknown_type_is_fatal() {
        assert_eq!(
            loads(b"{0"),
            Err(MarshalError::UnknownType {
                tag: b'{',
                printable: '{',
                offset: 0
            })
        );
        // the ref flag is masked before the lookup
        assert!(matches!(
            loads(&[b'c' | FLAG_REF]),
            Err(MarshalError::UnknownType { tag: b'c', .. })
        ));
    }

    #[test]
    fn lengths_are_bounded() {
        let mut huge = vec![TYPE_STRING];
        huge.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(loads(&huge), Err(MarshalError::UnexpectedEof { .. })));

        let mut negative = vec![TYPE_LIST];
        negative.extend_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(
            loads(&negative),
            Err(MarshalError::NegativeLength { length: -1, offset: 1 })
        );

        let mut many = vec![TYPE_LIST];
        many.extend_from_slice(&1_000_000i32.to_le_bytes());
        many.push(b'N');
        assert!(matches!(loads(&many), Err(MarshalError::UnexpectedEof { .. })));
    }

    #[test]
    fn truncated_input_is_fatal() {
        assert!(matches!(loads(b""), Err(MarshalError::UnexpectedEof { offset: 0, needed: 1 })));
        assert!(matches!(loads(&[TYPE_INT, 1, 2]), Err(MarshalError::UnexpectedEof { .. })));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let data = vec![TYPE_SMALL_TUPLE, 1].repeat(MAX_DEPTH + 1);
        assert_eq!(loads(&data), Err(MarshalError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn decoding_starts_at_offset() {
        let mut data = vec![0xFF; 3];
        data.extend_from_slice(&int(42));
        let mut u = Unmarshaler::at(&data, 3);
        assert_eq!(u.read_object().unwrap(), Object::Int(42));
        assert_eq!(u.position(), 8);
    }
}
