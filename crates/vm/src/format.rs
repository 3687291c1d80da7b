//! `repr`, `str`, the format-spec mini-language and printf-style `%`.

use crate::{
    PyResult, Unwind, VirtualMachine,
    class::PyClass,
    function::FuncArgs,
    value::{PyDescriptor, Value},
};
use alloc::rc::Rc;
use bitflags::bitflags;
use core::iter::{self, Peekable};
use itertools::Itertools;
use malachite_bigint::BigInt;
use num_complex::Complex64;
use num_traits::{FromPrimitive, Signed, ToPrimitive};

/// Python's `repr` of a float: shortest round-trip digits, exponent form
/// outside `[1e-4, 1e16)`.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return python_exponent(&format!("{value:e}"));
    }
    let repr = value.to_string();
    if repr.contains('.') {
        repr
    } else {
        format!("{repr}.0")
    }
}

/// Rewrites Rust's `1.5e-7` exponent into Python's `1.5e-07`.
fn python_exponent(formatted: &str) -> String {
    let Some(position) = formatted.find(['e', 'E']) else {
        return formatted.to_owned();
    };
    let (mantissa, rest) = formatted.split_at(position);
    let (marker, exponent) = rest.split_at(1);
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent.trim_start_matches('+')),
    };
    format!("{mantissa}{marker}{sign}{digits:0>2}")
}

fn complex_repr(value: Complex64) -> String {
    let part = |value: f64| {
        let repr = float_repr(value);
        match repr.strip_suffix(".0") {
            Some(integral) => integral.to_owned(),
            None => repr,
        }
    };
    let imag = part(value.im);
    if value.re == 0.0 && value.re.is_sign_positive() {
        return format!("{imag}j");
    }
    let sign = if imag.starts_with('-') { "" } else { "+" };
    format!("({}{sign}{imag}j)", part(value.re))
}

pub(crate) fn quote_str(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(value: &[u8]) -> String {
    let quote = if value.contains(&b'\'') && !value.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::from("b");
    out.push(char::from(quote));
    for &byte in value {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            byte if byte == quote => {
                out.push('\\');
                out.push(char::from(byte));
            }
            0x20..0x7f => out.push(char::from(byte)),
            byte => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(char::from(quote));
    out
}

fn escape_non_ascii(repr: &str) -> String {
    let mut out = String::with_capacity(repr.len());
    for c in repr.chars() {
        match c as u32 {
            0..0x80 => out.push(c),
            code @ 0x80..0x100 => out.push_str(&format!("\\x{code:02x}")),
            code @ 0x100..0x10000 => out.push_str(&format!("\\u{code:04x}")),
            code => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

fn class_path(class: &PyClass) -> String {
    match class.attributes.borrow().get("__module__") {
        Some(Value::Str(module)) if &**module != "builtins" => {
            format!("{module}.{}", class.qualname)
        }
        _ => class.qualname.clone(),
    }
}

impl VirtualMachine {
    fn guarded(
        &self,
        value: &Value,
        placeholder: &str,
        render: impl FnOnce() -> PyResult<String>,
    ) -> PyResult<String> {
        let Some(address) = value.address() else {
            return render();
        };
        if self.repr_guard.borrow().contains(&address) {
            return Ok(placeholder.to_owned());
        }
        self.repr_guard.borrow_mut().push(address);
        let result = render();
        self.repr_guard.borrow_mut().retain(|&entered| entered != address);
        result
    }

    fn join_reprs<'a>(&self, items: impl IntoIterator<Item = &'a Value>) -> PyResult<String> {
        Ok(items
            .into_iter()
            .map(|item| self.repr(item))
            .collect::<PyResult<Vec<_>>>()?
            .join(", "))
    }

    pub fn repr(&self, value: &Value) -> PyResult<String> {
        let address = value.address().unwrap_or_default();
        Ok(match value {
            Value::None => "None".to_owned(),
            Value::Ellipsis => "Ellipsis".to_owned(),
            Value::NotImplemented => "NotImplemented".to_owned(),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => float_repr(*value),
            Value::Complex(value) => complex_repr(*value),
            Value::Str(value) => quote_str(value),
            Value::Bytes(value) => bytes_repr(value),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", self.repr(&items[0])?),
            Value::Tuple(items) => format!("({})", self.join_reprs(items.iter())?),
            Value::List(items) => self.guarded(value, "[...]", || {
                let items = items.borrow().clone();
                Ok(format!("[{}]", self.join_reprs(&items)?))
            })?,
            Value::Dict(dict) => self.guarded(value, "{...}", || {
                let dict = dict.borrow().clone();
                let entries = dict
                    .items()
                    .map(|(_, key, value)| Ok(format!("{}: {}", self.repr(key)?, self.repr(value)?)))
                    .collect::<PyResult<Vec<_>>>()?;
                Ok(format!("{{{}}}", entries.join(", ")))
            })?,
            Value::Set(set) => {
                let items = set.borrow().values();
                if items.is_empty() {
                    "set()".to_owned()
                } else {
                    format!("{{{}}}", self.join_reprs(&items)?)
                }
            }
            Value::Range(range) => {
                if range.step == BigInt::from(1) {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Slice(slice) => format!(
                "slice({}, {}, {})",
                self.repr(&slice.start)?,
                self.repr(&slice.stop)?,
                self.repr(&slice.step)?
            ),
            Value::Function(function) => {
                format!("<function {} at {address:#x}>", function.qualname)
            }
            Value::BoundMethod(method) => {
                let name = match self.get_attribute_opt(&method.function, "__qualname__")? {
                    Some(Value::Str(name)) => name.to_string(),
                    _ => "?".to_owned(),
                };
                format!("<bound method {name} of {}>", self.repr(&method.receiver)?)
            }
            Value::Builtin(builtin) => match &builtin.receiver {
                Some(receiver) => format!(
                    "<built-in method {} of {} object at {:#x}>",
                    builtin.name,
                    self.class_of(receiver).name,
                    receiver.address().unwrap_or_default()
                ),
                None => format!("<built-in function {}>", builtin.name),
            },
            Value::Class(class) => format!("<class '{}'>", class_path(class)),
            Value::Instance(instance) => {
                if let Some(method) = self.get_special_method(value, "__repr__")? {
                    return match self.call(&method, Vec::new())? {
                        Value::Str(repr) => Ok(repr.to_string()),
                        other => Err(self.new_type_error(format!(
                            "__repr__ returned non-string (type {})",
                            self.class_of(&other).name
                        ))),
                    };
                }
                if self.is_exception_class(&instance.class) {
                    let args = match instance.get_attr("args") {
                        Some(Value::Tuple(args)) => self.join_reprs(args.iter())?,
                        _ => String::new(),
                    };
                    format!("{}({args})", instance.class.name)
                } else {
                    format!("<{} object at {address:#x}>", class_path(&instance.class))
                }
            }
            Value::Generator(generator) => {
                format!("<generator object {} at {address:#x}>", generator.qualname)
            }
            Value::Iterator(_) => format!("<iterator object at {address:#x}>"),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::Super(sup) => format!(
                "<super: <class '{}'>, {}>",
                sup.class.name,
                self.repr(&sup.obj)?
            ),
            Value::Descriptor(descriptor) => {
                let kind = match **descriptor {
                    PyDescriptor::Property { .. } => "property",
                    PyDescriptor::StaticMethod(_) => "staticmethod",
                    PyDescriptor::ClassMethod(_) => "classmethod",
                };
                format!("<{kind} object at {address:#x}>")
            }
        })
    }

    pub fn to_str(&self, value: &Value) -> PyResult<String> {
        match value {
            Value::Str(value) => Ok(value.to_string()),
            Value::Instance(instance) => {
                if let Some(method) = self.get_special_method(value, "__str__")? {
                    return match self.call(&method, Vec::new())? {
                        Value::Str(text) => Ok(text.to_string()),
                        other => Err(self.new_type_error(format!(
                            "__str__ returned non-string (type {})",
                            self.class_of(&other).name
                        ))),
                    };
                }
                if self.is_exception_class(&instance.class) {
                    self.exception_str(instance)
                } else {
                    self.repr(value)
                }
            }
            _ => self.repr(value),
        }
    }

    pub fn ascii(&self, value: &Value) -> PyResult<String> {
        Ok(escape_non_ascii(&self.repr(value)?))
    }

    /// The `format(value, spec)` builtin.
    pub fn format_value(&self, value: &Value, spec: &str) -> PyResult<String> {
        if let Value::Instance(_) = value
            && let Some(method) = self.get_special_method(value, "__format__")?
        {
            return match self.call(&method, vec![Value::new_str(spec)])? {
                Value::Str(text) => Ok(text.to_string()),
                other => Err(self.new_type_error(format!(
                    "__format__ must return a str, not {}",
                    self.class_of(&other).name
                ))),
            };
        }
        if spec.is_empty() {
            return self.to_str(value);
        }
        let parsed = FormatSpec::parse(spec).map_err(|message| self.new_value_error(message))?;
        let formatted = match value {
            Value::Bool(_) | Value::Int(_) => {
                let int = self.to_bigint(value)?;
                match parsed.kind {
                    Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
                        parsed.format_float(self.int_to_float(&int)?, "int")
                    }
                    _ => parsed.format_int(&int),
                }
            }
            Value::Float(value) => parsed.format_float(*value, "float"),
            Value::Str(value) => parsed.format_str(value),
            _ => {
                return Err(self.new_type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    self.class_of(value).name
                )));
            }
        };
        formatted.map_err(|message| self.new_value_error(message))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    /// `=`: padding goes between the sign and the digits.
    AfterSign,
}

#[derive(Clone, Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_align(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

fn parse_number(chars: &mut Peekable<impl Iterator<Item = char>>) -> Option<usize> {
    let mut number: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        number = Some(number.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
    }
    number
}

/// Inserts `separator` every `every` digits of the leading run of digits.
fn group_digits(body: &str, separator: char, every: usize) -> String {
    let split = body
        .find(|c: char| !c.is_ascii_alphanumeric() || c == 'e' || c == 'E')
        .unwrap_or(body.len());
    let (digits, rest) = body.split_at(split);
    let count = digits.chars().count();
    let mut out = String::with_capacity(body.len() + count / every);
    for (index, c) in digits.chars().enumerate() {
        if index > 0 && (count - index) % every == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

fn format_fixed(magnitude: f64, precision: usize, alternate: bool) -> String {
    if !magnitude.is_finite() {
        return float_special(magnitude);
    }
    let mut body = format!("{magnitude:.precision$}");
    if alternate && precision == 0 {
        body.push('.');
    }
    body
}

fn format_exponent(magnitude: f64, precision: usize, alternate: bool) -> String {
    if !magnitude.is_finite() {
        return float_special(magnitude);
    }
    let mut body = python_exponent(&format!("{magnitude:.precision$e}"));
    if alternate
        && precision == 0
        && let Some(position) = body.find('e')
    {
        body.insert(position, '.');
    }
    body
}

fn format_general(magnitude: f64, precision: usize, alternate: bool) -> String {
    if !magnitude.is_finite() {
        return float_special(magnitude);
    }
    let precision = precision.max(1);
    let exponent = if magnitude == 0.0 {
        0
    } else {
        let formatted = format!("{:.*e}", precision - 1, magnitude);
        formatted
            .split_once('e')
            .and_then(|(_, exponent)| exponent.parse::<i64>().ok())
            .unwrap_or(0)
    };
    let mut body = if (-4..precision as i64).contains(&exponent) {
        format!("{:.*}", (precision as i64 - 1 - exponent) as usize, magnitude)
    } else {
        python_exponent(&format!("{:.*e}", precision - 1, magnitude))
    };
    if !alternate {
        let (mantissa, exponent) = match body.find('e') {
            Some(position) => body.split_at(position),
            None => (body.as_str(), ""),
        };
        if mantissa.contains('.') {
            let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
            body = format!("{trimmed}{exponent}");
        }
    }
    body
}

fn float_special(magnitude: f64) -> String {
    if magnitude.is_nan() { "nan" } else { "inf" }.to_owned()
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, String> {
        let mut parsed = Self::default();
        let chars: Vec<char> = spec.chars().collect();
        let mut rest = chars.as_slice();
        if let [fill, align, tail @ ..] = rest
            && let Some(align) = parse_align(*align)
        {
            parsed.fill = Some(*fill);
            parsed.align = Some(align);
            rest = tail;
        } else if let [align, tail @ ..] = rest
            && let Some(align) = parse_align(*align)
        {
            parsed.align = Some(align);
            rest = tail;
        }
        let mut chars = rest.iter().copied().peekable();
        if let Some(sign) = chars.next_if(|c| matches!(c, '+' | '-' | ' ')) {
            parsed.sign = Some(sign);
        }
        parsed.alternate = chars.next_if_eq(&'#').is_some();
        parsed.zero = chars.next_if_eq(&'0').is_some();
        parsed.width = parse_number(&mut chars).unwrap_or(0);
        parsed.grouping = chars.next_if(|c| matches!(c, ',' | '_'));
        if chars.next_if_eq(&'.').is_some() {
            parsed.precision =
                Some(parse_number(&mut chars).ok_or("Format specifier missing precision")?);
        }
        parsed.kind = chars.next();
        if chars.next().is_some() {
            return Err("Invalid format specifier".to_owned());
        }
        Ok(parsed)
    }

    fn pad(&self, sign: &str, body: &str, default: Align) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let count = self.width - len;
        let (fill, align) = match self.align {
            Some(align) => (self.fill.unwrap_or(if self.zero { '0' } else { ' ' }), align),
            None if self.zero => ('0', Align::AfterSign),
            None => (self.fill.unwrap_or(' '), default),
        };
        let fill = |count| iter::repeat_n(fill, count).collect::<String>();
        match align {
            Align::Left => format!("{sign}{body}{}", fill(count)),
            Align::Right => format!("{}{sign}{body}", fill(count)),
            Align::Center => format!("{}{sign}{body}{}", fill(count / 2), fill(count - count / 2)),
            Align::AfterSign => format!("{sign}{}{body}", fill(count)),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }

    fn format_str(&self, value: &str) -> Result<String, String> {
        if let Some(kind) = self.kind.filter(|&kind| kind != 's') {
            return Err(format!("Unknown format code '{kind}' for object of type 'str'"));
        }
        if self.sign.is_some() {
            return Err("Sign not allowed in string format specifier".to_owned());
        }
        if self.align == Some(Align::AfterSign) {
            return Err("'=' alignment not allowed in string format specifier".to_owned());
        }
        let body: String = match self.precision {
            Some(precision) => value.chars().take(precision).collect(),
            None => value.to_owned(),
        };
        Ok(self.pad("", &body, Align::Left))
    }

    fn format_int(&self, value: &BigInt) -> Result<String, String> {
        if self.precision.is_some() {
            return Err("Precision not allowed in integer format specifier".to_owned());
        }
        let magnitude = value.abs();
        let (prefix, digits, every) = match self.kind {
            None | Some('d' | 'n') => ("", magnitude.to_string(), 3),
            Some('b') => ("0b", format!("{magnitude:b}"), 4),
            Some('o') => ("0o", format!("{magnitude:o}"), 4),
            Some('x') => ("0x", format!("{magnitude:x}"), 4),
            Some('X') => ("0X", format!("{magnitude:X}"), 4),
            Some('c') => {
                let c = value
                    .to_u32()
                    .and_then(char::from_u32)
                    .ok_or("%c arg not in range(0x110000)")?;
                return Ok(self.pad("", &c.to_string(), Align::Left));
            }
            Some(kind) => {
                return Err(format!("Unknown format code '{kind}' for object of type 'int'"));
            }
        };
        let digits = match self.grouping {
            Some(separator) => group_digits(&digits, separator, every),
            None => digits,
        };
        let prefix = if self.alternate { prefix } else { "" };
        let sign = format!("{}{prefix}", self.sign_for(value.is_negative()));
        Ok(self.pad(&sign, &digits, Align::Right))
    }

    fn format_float(&self, value: f64, type_name: &str) -> Result<String, String> {
        let magnitude = value.abs();
        let mut body = match self.kind {
            None => match self.precision {
                None => float_repr(magnitude),
                Some(precision) => format_general(magnitude, precision, self.alternate),
            },
            Some('f' | 'F') => format_fixed(magnitude, self.precision.unwrap_or(6), self.alternate),
            Some('e' | 'E') => {
                format_exponent(magnitude, self.precision.unwrap_or(6), self.alternate)
            }
            Some('g' | 'G') => {
                format_general(magnitude, self.precision.unwrap_or(6), self.alternate)
            }
            Some('%') => {
                let percent = format_fixed(magnitude * 100.0, self.precision.unwrap_or(6), self.alternate);
                format!("{percent}%")
            }
            Some(kind) => {
                return Err(format!(
                    "Unknown format code '{kind}' for object of type '{type_name}'"
                ));
            }
        };
        if matches!(self.kind, Some('F' | 'E' | 'G')) {
            body = body.to_uppercase();
        }
        if let Some(separator) = self.grouping {
            body = group_digits(&body, separator, 3);
        }
        let negative = value.is_sign_negative() && !value.is_nan();
        Ok(self.pad(self.sign_for(negative), &body, Align::Right))
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct ConversionFlags: u8 {
        const ALTERNATE_FORM = 0b0000_0001;
        const ZERO_PAD = 0b0000_0010;
        const LEFT_ADJUST = 0b0000_0100;
        const BLANK_SIGN = 0b0000_1000;
        const SIGN_CHAR = 0b0001_0000;
    }
}

impl ConversionFlags {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '#' => Self::ALTERNATE_FORM,
            '0' => Self::ZERO_PAD,
            '-' => Self::LEFT_ADJUST,
            ' ' => Self::BLANK_SIGN,
            '+' => Self::SIGN_CHAR,
            _ => return None,
        })
    }

    fn spec(self, width: usize, precision: Option<usize>, kind: char) -> FormatSpec {
        let left = self.contains(Self::LEFT_ADJUST);
        FormatSpec {
            fill: Some(' '),
            align: Some(if left { Align::Left } else { Align::Right }),
            sign: if self.contains(Self::SIGN_CHAR) {
                Some('+')
            } else if self.contains(Self::BLANK_SIGN) {
                Some(' ')
            } else {
                None
            },
            alternate: self.contains(Self::ALTERNATE_FORM),
            zero: false,
            width,
            grouping: None,
            precision,
            kind: Some(kind),
        }
        .zero_padded(self.contains(Self::ZERO_PAD) && !left)
    }
}

impl FormatSpec {
    fn zero_padded(mut self, zero: bool) -> Self {
        if zero {
            self.fill = Some('0');
            self.align = Some(Align::AfterSign);
        }
        self
    }
}

/// Printf-style `template % args`.
pub(crate) fn printf(vm: &VirtualMachine, template: &str, args: &Value) -> PyResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(_) => Some(args),
        Value::Instance(_) if vm.get_special_method(args, "__getitem__")?.is_some() => Some(args),
        _ => None,
    };
    let mut next_arg = 0;
    let mut take_arg = || -> PyResult<Value> {
        let arg = positional
            .get(next_arg)
            .cloned()
            .ok_or_else(|| vm.new_type_error("not enough arguments for format string"))?;
        next_arg += 1;
        Ok(arg)
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut key = None;
        if chars.next_if(|&(_, c)| c == '(').is_some() {
            let mut name = String::new();
            let mut depth = 1;
            loop {
                match chars.next() {
                    None => return Err(vm.new_value_error("incomplete format key")),
                    Some((_, '(')) => {
                        depth += 1;
                        name.push('(');
                    }
                    Some((_, ')')) => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        name.push(')');
                    }
                    Some((_, c)) => name.push(c),
                }
            }
            key = Some(name);
        }
        let mut flags = ConversionFlags::empty();
        while let Some((_, c)) = chars.next_if(|&(_, c)| ConversionFlags::from_char(c).is_some()) {
            flags |= ConversionFlags::from_char(c).unwrap_or(ConversionFlags::empty());
        }
        let mut number = |chars: &mut Peekable<core::str::CharIndices<'_>>| -> PyResult<Option<usize>> {
            if chars.next_if(|&(_, c)| c == '*').is_some() {
                let value = take_arg()?;
                let value = vm.to_isize(&value)?;
                return Ok(Some(value.unsigned_abs()));
            }
            let mut digits = String::new();
            while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_digit()) {
                digits.push(c);
            }
            Ok(digits.parse().ok())
        };
        let width = number(&mut chars)?.unwrap_or(0);
        let precision = if chars.next_if(|&(_, c)| c == '.').is_some() {
            Some(number(&mut chars)?.unwrap_or(0))
        } else {
            None
        };
        while chars.next_if(|&(_, c)| matches!(c, 'h' | 'l' | 'L')).is_some() {}
        let Some((index, kind)) = chars.next() else {
            return Err(vm.new_value_error("incomplete format"));
        };
        if kind == '%' {
            out.push('%');
            continue;
        }
        let value = match &key {
            Some(key) => match mapping {
                Some(mapping) => vm.get_item(mapping, Value::new_str(key))?,
                None => return Err(vm.new_type_error("format requires a mapping")),
            },
            None => take_arg()?,
        };
        let spec = flags.spec(width, precision, kind);
        out.push_str(&printf_value(vm, &spec, kind, index, &value)?);
    }
    if next_arg < positional.len() && mapping.is_none() {
        return Err(vm.new_type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

fn printf_value(
    vm: &VirtualMachine,
    spec: &FormatSpec,
    kind: char,
    index: usize,
    value: &Value,
) -> PyResult<String> {
    let as_int = |value: &Value| -> PyResult<BigInt> {
        match value {
            Value::Float(float) => BigInt::from_f64(float.trunc()).ok_or_else(|| {
                vm.new_overflow_error("cannot convert float infinity or nan to integer")
            }),
            Value::Int(_) | Value::Bool(_) | Value::Instance(_) => vm.to_bigint(value),
            _ => Err(vm.new_type_error(format!(
                "%{kind} format: a real number is required, not {}",
                vm.class_of(value).name
            ))),
        }
    };
    let text = |text: String| {
        let mut spec = spec.clone().zero_padded(false);
        spec.kind = None;
        spec.sign = None;
        if spec.align == Some(Align::AfterSign) {
            spec.align = Some(Align::Right);
            spec.fill = Some(' ');
        }
        spec.format_str(&text).map_err(|message| vm.new_value_error(message))
    };
    match kind {
        's' => text(vm.to_str(value)?),
        'r' => text(vm.repr(value)?),
        'a' => text(vm.ascii(value)?),
        'c' => match value {
            Value::Str(c) if c.chars().count() == 1 => text(c.to_string()),
            _ => {
                let code = as_int(value)?;
                let c = code
                    .to_u32()
                    .and_then(char::from_u32)
                    .ok_or_else(|| vm.new_overflow_error("%c arg not in range(0x110000)"))?;
                text(c.to_string())
            }
        },
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
            let int = as_int(value)?;
            let magnitude = int.abs();
            let (prefix, mut digits) = match kind {
                'x' => ("0x", format!("{magnitude:x}")),
                'X' => ("0X", format!("{magnitude:X}")),
                'o' => ("0o", format!("{magnitude:o}")),
                _ => ("", magnitude.to_string()),
            };
            if let Some(precision) = spec.precision
                && digits.len() < precision
            {
                digits = format!("{digits:0>precision$}");
            }
            let prefix = if spec.alternate { prefix } else { "" };
            let sign = format!("{}{prefix}", spec.sign_for(int.is_negative()));
            Ok(spec.pad(&sign, &digits, Align::Right))
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let float = vm.to_f64(value)?;
            let mut spec = spec.clone();
            spec.precision = Some(spec.precision.unwrap_or(6));
            spec.format_float(float, "float")
                .map_err(|message| vm.new_value_error(message))
        }
        _ => Err(vm.new_value_error(format!(
            "unsupported format character '{kind}' ({:#x}) at index {index}",
            kind as u32
        ))),
    }
}

/// `str.format`: `{}` fields with auto or explicit numbering, keyword
/// names, `.attr` and `[key]` access, `!r`/`!s`/`!a` and a nested spec.
pub(crate) fn format_template(vm: &VirtualMachine, template: &str, args: &FuncArgs) -> PyResult<String> {
    let mut auto_index = 0;
    format_with_index(vm, template, args, &mut auto_index)
}

fn format_with_index(
    vm: &VirtualMachine,
    template: &str,
    args: &FuncArgs,
    auto_index: &mut usize,
) -> PyResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.next_if_eq(&'{').is_some() => out.push('{'),
            '}' if chars.next_if_eq(&'}').is_some() => out.push('}'),
            '}' => return Err(vm.new_value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        None => {
                            return Err(vm.new_value_error("expected '}' before end of string"));
                        }
                        Some('{') => {
                            depth += 1;
                            field.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            field.push('}');
                        }
                        Some(c) => field.push(c),
                    }
                }
                out.push_str(&format_field(vm, &field, args, auto_index)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_field(
    vm: &VirtualMachine,
    field: &str,
    args: &FuncArgs,
    auto_index: &mut usize,
) -> PyResult<String> {
    let (name, spec) = field.split_once(':').unwrap_or((field, ""));
    let (name, conversion) = match name.rsplit_once('!') {
        Some((name, conversion)) => (name, Some(conversion)),
        None => (name, None),
    };
    let split = name.find(['.', '[']).unwrap_or(name.len());
    let (key, mut accessors) = name.split_at(split);

    let mut value = if key.is_empty() || key.chars().all(|c| c.is_ascii_digit()) {
        let index = if key.is_empty() {
            let index = *auto_index;
            *auto_index += 1;
            index
        } else {
            key.parse()
                .map_err(|_| vm.new_value_error("Too many decimal digits in format string"))?
        };
        args.args.get(index).cloned().ok_or_else(|| {
            vm.new_index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })?
    } else {
        args.kwargs
            .get(key)
            .cloned()
            .ok_or_else(|| vm.new_key_error(Value::new_str(key)))?
    };

    while !accessors.is_empty() {
        if let Some(rest) = accessors.strip_prefix('.') {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            value = vm.get_attribute(&value, &rest[..end])?;
            accessors = &rest[end..];
        } else if let Some(rest) = accessors.strip_prefix('[') {
            let Some((item, rest)) = rest.split_once(']') else {
                return Err(vm.new_value_error("Missing ']' in format string"));
            };
            let item = match item.parse::<i64>() {
                Ok(index) => Value::from(index),
                Err(_) => Value::new_str(item),
            };
            value = vm.get_item(&value, item)?;
            accessors = rest;
        } else {
            return Err(vm.new_value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }

    let value = match conversion {
        None => value,
        Some("r") => Value::from(vm.repr(&value)?),
        Some("s") => Value::from(vm.to_str(&value)?),
        Some("a") => Value::from(vm.ascii(&value)?),
        Some(other) => {
            return Err(vm.new_value_error(format!(
                "Unknown conversion specifier {other}"
            )));
        }
    };
    let spec = if spec.contains('{') {
        format_with_index(vm, spec, args, auto_index)?
    } else {
        spec.to_owned()
    };
    vm.format_value(&value, &spec)
}

pub(crate) fn join_str(vm: &VirtualMachine, separator: &str, items: &[Value]) -> PyResult<String> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Str(value) => Ok(Rc::clone(value)),
            other => Err(vm.new_type_error(format!(
                "sequence item {index}: expected str instance, {} found",
                vm.class_of(other).name
            ))),
        })
        .collect::<Result<Vec<_>, Unwind>>()
        .map(|parts| parts.iter().join(separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interpreter, Settings};

    #[test]
    fn float_reprs_match_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(123456.789), "123456.789");
        assert_eq!(complex_repr(Complex64::new(0.0, 2.0)), "2j");
        assert_eq!(complex_repr(Complex64::new(1.0, -2.5)), "(1-2.5j)");
    }

    #[test]
    fn strings_pick_the_other_quote() {
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(bytes_repr(b"a\x00"), "b'a\\x00'");
    }

    #[test]
    fn format_specs() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let format = |value: Value, spec: &str| vm.format_value(&value, spec).unwrap();
            assert_eq!(format(Value::from(42i64), ">6"), "    42");
            assert_eq!(format(Value::from(-42i64), "06"), "-00042");
            assert_eq!(format(Value::from(255i64), "#x"), "0xff");
            assert_eq!(format(Value::from(1234567i64), ","), "1,234,567");
            assert_eq!(format(Value::Float(3.14159), ".2f"), "3.14");
            assert_eq!(format(Value::Float(0.5), ".1%"), "50.0%");
            assert_eq!(format(Value::Float(1234.5), ".3g"), "1.23e+03");
            assert_eq!(format(Value::Float(0.0001), "g"), "0.0001");
            assert_eq!(format(Value::from("ab"), "*^6"), "**ab**");
            assert!(vm.format_value(&Value::from("ab"), "d").is_err());
        });
    }

    #[test]
    fn printf_formatting() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let args = Value::new_tuple(vec![Value::from("x"), Value::from(7i64), Value::Float(2.5)]);
            assert_eq!(
                printf(vm, "%s=%03d (%.2f) 100%%", &args).unwrap(),
                "x=007 (2.50) 100%"
            );
            assert_eq!(printf(vm, "%-4s|", &Value::from("a")).unwrap(), "a   |");
            assert!(printf(vm, "%s %s", &Value::from("a")).is_err());
            assert!(printf(vm, "no fields", &Value::from(1i64)).is_err());
        });
    }

    #[test]
    fn str_format_fields() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let mut args = FuncArgs::from(vec![Value::from(1i64), Value::from("b")]);
            args.kwargs.insert("name".to_owned(), Value::from("arbor"));
            assert_eq!(
                format_template(vm, "{} {!r} {name:>6} {{}}", &args).unwrap(),
                "1 'b'  arbor {}"
            );
            assert_eq!(format_template(vm, "{1}{0}", &args).unwrap(), "b1");
        });
    }
}
