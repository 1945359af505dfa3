use std::fmt;

/// Types of values that can be on the WASM operand stack of a translated method
///
/// JVM object references get lowered into 32-bit pointers, so they are tracked separately only
/// to catch mistakes earlier. Once erased (see [`ValueType::erase`]), they are just `i32`.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    Ref,
}

/// What is left of a [`ValueType`] after references are erased
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum StackCategory {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// Collapse a type into the category of WASM value that will hold it at runtime
    pub const fn erase(self) -> StackCategory {
        match self {
            ValueType::I32 | ValueType::Ref => StackCategory::I32,
            ValueType::I64 => StackCategory::I64,
            ValueType::F32 => StackCategory::F32,
            ValueType::F64 => StackCategory::F64,
        }
    }

    /// Check if a value of this type can flow into a place expecting `other`
    ///
    /// When `strict` is set, references are kept distinct from `i32`.
    pub fn matches(self, other: ValueType, strict: bool) -> bool {
        if strict {
            self == other
        } else {
            self.erase() == other.erase()
        }
    }

    /// Name used when pretty-printing (and parsing) the type
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Ref => "ref",
        }
    }

    /// Inverse of [`ValueType::name`]
    pub fn from_name(name: &str) -> Option<ValueType> {
        Some(match name {
            "i32" => ValueType::I32,
            "i64" => ValueType::I64,
            "f32" => ValueType::F32,
            "f64" => ValueType::F64,
            "ref" => ValueType::Ref,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check that two stacks have the same shape (see [`ValueType::matches`])
pub fn stacks_match(actual: &[ValueType], expected: &[ValueType], strict: bool) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| a.matches(*e, strict))
}

/// Check that the top of a stack matches some expected values (see [`ValueType::matches`])
pub fn stack_ends_with(actual: &[ValueType], expected: &[ValueType], strict: bool) -> bool {
    actual.len() >= expected.len()
        && stacks_match(&actual[actual.len() - expected.len()..], expected, strict)
}

/// Type of a function
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub inputs: Vec<ValueType>,
    pub outputs: Vec<ValueType>,
}

/// Signature of the method whose control flow is being structured
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    /// Class containing the method, written as `my/pkg/Klass`
    pub class: String,

    /// Method name (eg. `<init>` or `toString`)
    pub name: String,

    /// JVM method descriptor (eg. `(II)I`)
    pub descriptor: String,

    /// Values left on the stack by a `return` in the translated method
    pub results: Vec<ValueType>,
}

impl MethodSignature {
    pub fn new(
        class: &str,
        name: &str,
        descriptor: &str,
        results: Vec<ValueType>,
    ) -> MethodSignature {
        MethodSignature {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            results,
        }
    }

    /// Name of the method that is safe to use in file names and WASM identifiers
    pub fn mangled_name(&self) -> String {
        let full = format!("{}_{}_{}", self.class, self.name, self.descriptor);
        full.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}
