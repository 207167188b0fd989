//! Signature mangling codec.
//!
//! Overloads are disambiguated across the engine boundary by a textual
//! key of the form `<name>_<codes>`, one category code character per
//! parameter. The declaration side and the call site build their keys
//! through the same [`ParamKind`] classification, so a bound method is
//! found exactly when the actual argument categories match the declared
//! ones. Instance methods carry an extra leading `c` modeling the
//! implicit receiver.

use crate::error::MangleError;

/// Parameter category of a bound method.
///
/// The set is closed: a method declaration cannot name a category the
/// codec does not understand, so the "unmangleable declared type" case
/// cannot arise at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Engine boolean, code `b`.
    Boolean,
    /// Any numeric value, integer or floating point, code `n`.
    Number,
    /// Engine string, code `s`.
    Text,
    /// Bridge object reference, code `c`.
    Object,
}

impl ParamKind {
    /// One-character mangling code.
    pub const fn code(self) -> char {
        match self {
            ParamKind::Boolean => 'b',
            ParamKind::Number => 'n',
            ParamKind::Text => 's',
            ParamKind::Object => 'c',
        }
    }

    /// Human-readable category label used by [`demangle`].
    pub const fn label(self) -> &'static str {
        match self {
            ParamKind::Boolean => "Boolean",
            ParamKind::Number => "Number",
            ParamKind::Text => "Text",
            ParamKind::Object => "Object",
        }
    }

    /// Inverse of [`ParamKind::code`].
    pub fn from_code(code: char) -> Option<ParamKind> {
        match code {
            'b' => Some(ParamKind::Boolean),
            'n' => Some(ParamKind::Number),
            's' => Some(ParamKind::Text),
            'c' => Some(ParamKind::Object),
            _ => None,
        }
    }
}

/// Build the lookup key for a method declaration.
///
/// Non-static methods get a leading `c` for the implicit receiver.
pub fn mangle_declaration(name: &str, is_static: bool, params: &[ParamKind]) -> String {
    let mut key = String::with_capacity(name.len() + params.len() + 2);
    key.push_str(name);
    key.push('_');
    if !is_static {
        key.push(ParamKind::Object.code());
    }
    for param in params {
        key.push(param.code());
    }
    key
}

/// Build the lookup key for an actual call site.
///
/// `kinds` are the classified categories of the values currently on the
/// engine stack, in order; for an instance call the receiver appears as
/// a leading [`ParamKind::Object`] naturally, since it sits on the stack
/// like any other argument.
pub fn mangle_call_site(name: &str, kinds: &[ParamKind]) -> String {
    mangle_declaration(name, true, kinds)
}

/// Decode a mangled key back into `name(Category,Category,...)` form.
///
/// Exact round trip of [`mangle_declaration`]: the name and the category
/// sequence are both recovered. Splits on the last `_`, since category
/// codes never contain one but names may.
pub fn demangle(key: &str) -> Result<String, MangleError> {
    let separator = key
        .rfind('_')
        .ok_or_else(|| MangleError::MissingSeparator(key.to_owned()))?;
    let (name, codes) = (&key[..separator], &key[separator + 1..]);

    let mut readable = String::with_capacity(key.len() + codes.len() * 8);
    readable.push_str(name);
    readable.push('(');
    for (i, code) in codes.chars().enumerate() {
        let kind = ParamKind::from_code(code).ok_or_else(|| MangleError::InvalidCode {
            key: key.to_owned(),
            code,
        })?;
        if i > 0 {
            readable.push(',');
        }
        readable.push_str(kind.label());
    }
    readable.push(')');
    Ok(readable)
}
