use digit_layout::{types as ty, DigitLayout};
use std::{fmt, str::FromStr};

/// 元素类型描述，与 `DLDataType` 二进制兼容。
///
/// | field | type | meaning            |
/// |:-----:|:----:|:------------------:|
/// | code  | u8   | [DataTypeCode]     |
/// | bits  | u8   | 单个通道的位宽     |
/// | lanes | u16  | 向量通道数         |
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(C)]
pub struct DataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum DataTypeCode {
    Int = 0,
    UInt = 1,
    Float = 2,
    OpaqueHandle = 3,
    BFloat = 4,
    Complex = 5,
    Bool = 6,
}

impl DataTypeCode {
    #[inline]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Int),
            1 => Some(Self::UInt),
            2 => Some(Self::Float),
            3 => Some(Self::OpaqueHandle),
            4 => Some(Self::BFloat),
            5 => Some(Self::Complex),
            6 => Some(Self::Bool),
            _ => None,
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::OpaqueHandle => "handle",
            Self::BFloat => "bfloat",
            Self::Complex => "complex",
            Self::Bool => "bool",
        }
    }
}

impl DataType {
    #[inline]
    pub const fn new(code: DataTypeCode, bits: u8, lanes: u16) -> Self {
        Self {
            code: code as _,
            bits,
            lanes,
        }
    }

    pub const I8: Self = Self::new(DataTypeCode::Int, 8, 1);
    pub const I16: Self = Self::new(DataTypeCode::Int, 16, 1);
    pub const I32: Self = Self::new(DataTypeCode::Int, 32, 1);
    pub const I64: Self = Self::new(DataTypeCode::Int, 64, 1);
    pub const U8: Self = Self::new(DataTypeCode::UInt, 8, 1);
    pub const U16: Self = Self::new(DataTypeCode::UInt, 16, 1);
    pub const U32: Self = Self::new(DataTypeCode::UInt, 32, 1);
    pub const U64: Self = Self::new(DataTypeCode::UInt, 64, 1);
    pub const F16: Self = Self::new(DataTypeCode::Float, 16, 1);
    pub const BF16: Self = Self::new(DataTypeCode::BFloat, 16, 1);
    pub const F32: Self = Self::new(DataTypeCode::Float, 32, 1);
    pub const F64: Self = Self::new(DataTypeCode::Float, 64, 1);
    pub const BOOL: Self = Self::new(DataTypeCode::Bool, 8, 1);

    #[inline]
    pub const fn code(&self) -> Option<DataTypeCode> {
        DataTypeCode::from_u8(self.code)
    }

    /// 单个元素占用的字节数，按字节向上取整。
    #[inline]
    pub const fn nbytes(&self) -> usize {
        (self.bits as usize * self.lanes as usize + 7) / 8
    }

    /// 映射到标量数字布局。向量类型和不透明类型没有对应的布局。
    pub fn digit_layout(&self) -> Option<DigitLayout> {
        if self.lanes != 1 {
            return None;
        }
        use DataTypeCode as C;
        match (self.code()?, self.bits) {
            (C::Int, 8) => Some(ty::I8),
            (C::Int, 16) => Some(ty::I16),
            (C::Int, 32) => Some(ty::I32),
            (C::Int, 64) => Some(ty::I64),
            (C::UInt, 8) => Some(ty::U8),
            (C::UInt, 16) => Some(ty::U16),
            (C::UInt, 32) => Some(ty::U32),
            (C::UInt, 64) => Some(ty::U64),
            (C::Float, 16) => Some(ty::F16),
            (C::Float, 32) => Some(ty::F32),
            (C::Float, 64) => Some(ty::F64),
            (C::BFloat, 16) => Some(ty::BF16),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.code() {
            Some(DataTypeCode::Bool) if self.bits == 8 => write!(f, "bool")?,
            Some(code) => write!(f, "{}{}", code.prefix(), self.bits)?,
            None => write!(f, "unknown({}){}", self.code, self.bits)?,
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParseDataTypeError(pub String);

impl fmt::Display for ParseDataTypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid data type \"{}\"", self.0)
    }
}

impl std::error::Error for ParseDataTypeError {}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDataTypeError(s.into());

        let (scalar, lanes) = match s.split_once('x') {
            Some((scalar, lanes)) => (scalar, lanes.parse::<u16>().map_err(|_| err())?),
            None => (s, 1),
        };
        if lanes == 0 {
            return Err(err());
        }
        if scalar == "bool" {
            return Ok(Self::new(DataTypeCode::Bool, 8, lanes));
        }

        // 前缀有包含关系，长前缀必须先匹配
        use DataTypeCode as C;
        let (code, bits) = [
            ("uint", C::UInt),
            ("int", C::Int),
            ("bfloat", C::BFloat),
            ("float", C::Float),
            ("complex", C::Complex),
        ]
        .into_iter()
        .find_map(|(prefix, code)| scalar.strip_prefix(prefix).map(|bits| (code, bits)))
        .ok_or_else(err)?;
        let bits = bits.parse::<u8>().map_err(|_| err())?;
        if bits == 0 {
            return Err(err());
        }
        Ok(Self::new(code, bits, lanes))
    }
}
