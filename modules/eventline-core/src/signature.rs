//! Canonical handler identities.
//!
//! A signature is `declaring_type#name(params)returns`, where every type is
//! written as a compact descriptor: one reserved character per primitive,
//! `[` per array dimension, and `L<path>;` for everything else with Rust
//! path separators written as `/`.
//!
//! The encoding is the only thing that decides whether two registrations are
//! "the same handler", so it must stay injective. Characters that would end a
//! field early (`#` in the declaring type, `(` in the name, `;` and `/` in a
//! path, and `\` itself) are escaped with `\`.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Serialize, Serializer};

use crate::error::SignatureError;

/// Structural description of a parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Int,
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Double,
    Float,
    Long,
    Array(Box<TypeDescriptor>),
    /// Fully-qualified type path, with `::` separators.
    Reference(String),
}

impl TypeDescriptor {
    /// Describe a Rust type. Signed integers, floats, `bool`, `char` and `()`
    /// map onto the primitive codes; everything else is a reference.
    pub fn of<T: ?Sized + 'static>() -> Self {
        let id = TypeId::of::<T>();
        let primitives = [
            (TypeId::of::<i32>(), TypeDescriptor::Int),
            (TypeId::of::<()>(), TypeDescriptor::Void),
            (TypeId::of::<bool>(), TypeDescriptor::Boolean),
            (TypeId::of::<i8>(), TypeDescriptor::Byte),
            (TypeId::of::<char>(), TypeDescriptor::Char),
            (TypeId::of::<i16>(), TypeDescriptor::Short),
            (TypeId::of::<f64>(), TypeDescriptor::Double),
            (TypeId::of::<f32>(), TypeDescriptor::Float),
            (TypeId::of::<i64>(), TypeDescriptor::Long),
        ];

        primitives
            .into_iter()
            .find_map(|(prim, descriptor)| (prim == id).then_some(descriptor))
            .unwrap_or_else(|| TypeDescriptor::Reference(type_path(id, type_name::<T>())))
    }

    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    pub fn reference(path: impl Into<String>) -> Self {
        TypeDescriptor::Reference(path.into())
    }

    fn primitive_code(&self) -> Option<char> {
        let code = match self {
            TypeDescriptor::Int => 'I',
            TypeDescriptor::Void => 'V',
            TypeDescriptor::Boolean => 'Z',
            TypeDescriptor::Byte => 'B',
            TypeDescriptor::Char => 'C',
            TypeDescriptor::Short => 'S',
            TypeDescriptor::Double => 'D',
            TypeDescriptor::Float => 'F',
            TypeDescriptor::Long => 'J',
            TypeDescriptor::Array(_) | TypeDescriptor::Reference(_) => return None,
        };
        Some(code)
    }

    fn from_code(code: char) -> Option<Self> {
        let descriptor = match code {
            'I' => TypeDescriptor::Int,
            'V' => TypeDescriptor::Void,
            'Z' => TypeDescriptor::Boolean,
            'B' => TypeDescriptor::Byte,
            'C' => TypeDescriptor::Char,
            'S' => TypeDescriptor::Short,
            'D' => TypeDescriptor::Double,
            'F' => TypeDescriptor::Float,
            'J' => TypeDescriptor::Long,
            _ => return None,
        };
        Some(descriptor)
    }

    /// Append this type's descriptor to `buf`.
    pub fn encode_into(&self, buf: &mut String) {
        let mut current = self;
        loop {
            match current {
                TypeDescriptor::Array(element) => {
                    buf.push('[');
                    current = element;
                }
                TypeDescriptor::Reference(path) => {
                    buf.push('L');
                    push_path(buf, path);
                    buf.push(';');
                    return;
                }
                primitive => {
                    buf.extend(primitive.primitive_code());
                    return;
                }
            }
        }
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        self.encode_into(&mut buf);
        buf
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Process-unique path for a type.
///
/// `type_name` is not unique: same-named items declared in different blocks
/// of one function share it. The first type seen under a name keeps it; later
/// ones get a `~N` suffix, which no Rust type name contains.
pub(crate) fn type_path(id: TypeId, name: &'static str) -> String {
    static SEEN: OnceLock<Mutex<HashMap<&'static str, Vec<TypeId>>>> = OnceLock::new();

    let mut seen = SEEN
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let ids = seen.entry(name).or_default();
    let index = match ids.iter().position(|known| *known == id) {
        Some(index) => index,
        None => {
            ids.push(id);
            ids.len() - 1
        }
    };
    match index {
        0 => name.to_string(),
        n => format!("{name}~{n}"),
    }
}

pub(crate) fn type_path_of<T: ?Sized + 'static>() -> String {
    type_path(TypeId::of::<T>(), type_name::<T>())
}

fn push_escaped(buf: &mut String, text: &str, stop: char) {
    for c in text.chars() {
        if c == '\\' || c == stop {
            buf.push('\\');
        }
        buf.push(c);
    }
}

fn push_path(buf: &mut String, path: &str) {
    let mut rest = path;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("::") {
            buf.push('/');
            rest = tail;
            continue;
        }
        if matches!(c, '\\' | ';' | '/') {
            buf.push('\\');
        }
        buf.push(c);
        rest = &rest[c.len_utf8()..];
    }
}

/// Read escaped text starting at `from` up to the first unescaped `stop`.
/// Returns the unescaped text and the offset of `stop`. In paths an
/// unescaped `/` reads back as `::`.
fn read_escaped(input: &str, from: usize, stop: char, path: bool) -> Option<(String, usize)> {
    let mut text = String::new();
    let mut chars = input[from..].char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => text.push(chars.next()?.1),
            c if c == stop => return Some((text, from + offset)),
            '/' if path => text.push_str("::"),
            c => text.push(c),
        }
    }
    None
}

/// `(params)returns` part of a signature.
pub fn method_descriptor(params: &[TypeDescriptor], returns: &TypeDescriptor) -> String {
    let mut buf = String::from("(");
    for param in params {
        param.encode_into(&mut buf);
    }
    buf.push(')');
    returns.encode_into(&mut buf);
    buf
}

/// Canonical identity of one handler. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Arc<str>);

impl Signature {
    pub fn encode(
        declaring_type: &str,
        name: &str,
        params: &[TypeDescriptor],
        returns: &TypeDescriptor,
    ) -> Self {
        let mut encoded = String::new();
        push_escaped(&mut encoded, declaring_type, '#');
        encoded.push('#');
        push_escaped(&mut encoded, name, '(');
        encoded.push_str(&method_descriptor(params, returns));
        Signature(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the signature back into its parts.
    pub fn decode(&self) -> Result<DecodedSignature, SignatureError> {
        DecodedSignature::parse(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// The structural parts a [`Signature`] was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    pub declaring_type: String,
    pub name: String,
    pub params: Vec<TypeDescriptor>,
    pub returns: TypeDescriptor,
}

impl DecodedSignature {
    pub fn parse(input: &str) -> Result<Self, SignatureError> {
        if input.is_empty() {
            return Err(SignatureError::Empty);
        }
        let (declaring_type, hash) = read_escaped(input, 0, '#', false)
            .ok_or_else(|| SignatureError::MissingSeparator(input.to_string()))?;
        let (name, open) = read_escaped(input, hash + 1, '(', false)
            .ok_or_else(|| SignatureError::MissingParameters(input.to_string()))?;

        // Offsets below are relative to `input` so errors point at the right place.
        let mut pos = open + 1;
        let mut params = Vec::new();
        loop {
            match input[pos..].chars().next() {
                Some(')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(parse_type(input, &mut pos)?),
                None => return Err(SignatureError::MissingParameters(input.to_string())),
            }
        }
        let returns = parse_type(input, &mut pos)?;
        if pos != input.len() {
            return Err(SignatureError::TrailingInput(input[pos..].to_string()));
        }

        Ok(Self {
            declaring_type,
            name,
            params,
            returns,
        })
    }

    pub fn encode(&self) -> Signature {
        Signature::encode(&self.declaring_type, &self.name, &self.params, &self.returns)
    }
}

fn parse_type(input: &str, pos: &mut usize) -> Result<TypeDescriptor, SignatureError> {
    let mut dimensions = 0usize;
    loop {
        let start = *pos;
        let code = input[start..]
            .chars()
            .next()
            .ok_or(SignatureError::UnexpectedEnd)?;
        *pos += code.len_utf8();

        let base = match code {
            '[' => {
                dimensions += 1;
                continue;
            }
            'L' => {
                let (path, end) = read_escaped(input, *pos, ';', true)
                    .ok_or(SignatureError::UnterminatedReference { offset: start })?;
                *pos = end + 1;
                TypeDescriptor::Reference(path)
            }
            other => TypeDescriptor::from_code(other).ok_or(SignatureError::UnknownTypeCode {
                code: other,
                offset: start,
            })?,
        };

        return Ok((0..dimensions).fold(base, |element, _| TypeDescriptor::array(element)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_use_reserved_codes() {
        let encoded: String = [
            TypeDescriptor::of::<i32>(),
            TypeDescriptor::of::<()>(),
            TypeDescriptor::of::<bool>(),
            TypeDescriptor::of::<i8>(),
            TypeDescriptor::of::<char>(),
            TypeDescriptor::of::<i16>(),
            TypeDescriptor::of::<f64>(),
            TypeDescriptor::of::<f32>(),
            TypeDescriptor::of::<i64>(),
        ]
        .iter()
        .map(TypeDescriptor::encode)
        .collect();
        assert_eq!(encoded, "IVZBCSDFJ");
    }

    #[test]
    fn unsigned_types_are_references() {
        assert_eq!(TypeDescriptor::of::<u8>(), TypeDescriptor::reference("u8"));
        assert_eq!(TypeDescriptor::of::<u8>().encode(), "Lu8;");
    }

    #[test]
    fn reference_paths_use_slash_separators() {
        let descriptor = TypeDescriptor::reference("app::events::Started");
        assert_eq!(descriptor.encode(), "Lapp/events/Started;");
    }

    #[test]
    fn arrays_prefix_one_bracket_per_dimension() {
        let two_d = TypeDescriptor::array(TypeDescriptor::array(TypeDescriptor::Long));
        assert_eq!(two_d.encode(), "[[J");

        let names = TypeDescriptor::array(TypeDescriptor::reference("app::Name"));
        assert_eq!(names.encode(), "[Lapp/Name;");
    }

    #[test]
    fn signature_layout() {
        let signature = Signature::encode(
            "app::Clock",
            "on_start",
            &[TypeDescriptor::reference("app::Start")],
            &TypeDescriptor::Void,
        );
        assert_eq!(signature.as_str(), "app::Clock#on_start(Lapp/Start;)V");
    }

    #[test]
    fn decode_recovers_parts() {
        let params = vec![
            TypeDescriptor::reference("app::Start"),
            TypeDescriptor::array(TypeDescriptor::Int),
        ];
        let signature = Signature::encode("app::Clock", "on_start", &params, &TypeDescriptor::Boolean);
        let decoded = signature.decode().unwrap();

        assert_eq!(decoded.declaring_type, "app::Clock");
        assert_eq!(decoded.name, "on_start");
        assert_eq!(decoded.params, params);
        assert_eq!(decoded.returns, TypeDescriptor::Boolean);
        assert_eq!(decoded.encode(), signature);
    }

    #[test]
    fn decode_handles_semicolons_inside_array_paths() {
        let odd = TypeDescriptor::reference("app::Wrapper<[u8; 4]>");
        assert_eq!(odd.encode(), "Lapp/Wrapper<[u8\\; 4]>;");
        let signature = Signature::encode("app::T", "f", &[odd.clone()], &TypeDescriptor::Void);
        assert_eq!(signature.decode().unwrap().params, vec![odd]);
    }

    #[test]
    fn reference_names_cannot_split_into_several_types() {
        let void = TypeDescriptor::Void;
        let joined = [TypeDescriptor::reference("a;Lb")];
        let split = [TypeDescriptor::reference("a"), TypeDescriptor::reference("b")];
        assert_ne!(method_descriptor(&joined, &void), method_descriptor(&split, &void));

        let unbalanced = [TypeDescriptor::reference("a["), TypeDescriptor::reference("b")];
        let swallowed = [TypeDescriptor::reference("a[;Lb")];
        assert_ne!(method_descriptor(&unbalanced, &void), method_descriptor(&swallowed, &void));

        for params in [&joined[..], &split[..], &unbalanced[..], &swallowed[..]] {
            let signature = Signature::encode("app::T", "f", params, &void);
            assert_eq!(signature.decode().unwrap().params, params);
        }
    }

    #[test]
    fn slashes_and_separators_stay_distinct() {
        let slash = TypeDescriptor::reference("a/b");
        let path = TypeDescriptor::reference("a::b");
        assert_ne!(slash.encode(), path.encode());

        let triple = TypeDescriptor::reference("a:::b");
        let params = [slash.clone(), path.clone(), triple.clone()];
        let signature = Signature::encode("x", "f", &params, &TypeDescriptor::Void);
        assert_eq!(signature.decode().unwrap().params, vec![slash, path, triple]);
    }

    #[test]
    fn declaring_type_and_name_are_escaped() {
        let a = Signature::encode("x#y", "f", &[], &TypeDescriptor::Void);
        let b = Signature::encode("x", "y#f", &[], &TypeDescriptor::Void);
        assert_ne!(a, b);
        assert_eq!(a.decode().unwrap().declaring_type, "x#y");
        assert_eq!(b.decode().unwrap().name, "y#f");

        let odd_name = Signature::encode("x", "f(I)V", &[], &TypeDescriptor::Void);
        let decoded = odd_name.decode().unwrap();
        assert_eq!(decoded.name, "f(I)V");
        assert!(decoded.params.is_empty());
    }

    #[test]
    fn same_type_name_with_different_ids_gets_distinct_paths() {
        let first = {
            struct Local;
            type_path_of::<Local>()
        };
        let second = {
            struct Local;
            type_path_of::<Local>()
        };
        assert_ne!(first, second);
        assert!(first.ends_with("Local") || second.ends_with("Local"));
    }

    #[test]
    fn decode_handles_fn_pointer_arrows() {
        let odd = TypeDescriptor::reference("[fn() -> u8; 3]");
        let signature = Signature::encode("app::T", "f", &[odd.clone()], &TypeDescriptor::Void);
        assert_eq!(signature.decode().unwrap().params, vec![odd]);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert_eq!(DecodedSignature::parse(""), Err(SignatureError::Empty));
        assert!(matches!(
            DecodedSignature::parse("app::T"),
            Err(SignatureError::MissingSeparator(_))
        ));
        assert!(matches!(
            DecodedSignature::parse("app::T#f"),
            Err(SignatureError::MissingParameters(_))
        ));
        assert_eq!(
            DecodedSignature::parse("app::T#f(Q)V"),
            Err(SignatureError::UnknownTypeCode { code: 'Q', offset: 9 })
        );
        assert_eq!(
            DecodedSignature::parse("app::T#f(Lapp/E)V"),
            Err(SignatureError::UnterminatedReference { offset: 9 })
        );
        assert_eq!(
            DecodedSignature::parse("app::T#f()"),
            Err(SignatureError::UnexpectedEnd)
        );
        assert!(matches!(
            DecodedSignature::parse("app::T#f()VV"),
            Err(SignatureError::TrailingInput(_))
        ));
    }
}
