use crate::{args_not_support, signature_mismatch, Arg, Error};
use dlpack::DataType;
use std::{fmt, rc::Rc, sync::Arc};

/// 可按位置传入张量参数调用的函数。
///
/// 输出张量作为最后的参数传入，由函数就地写入。调用是同步阻塞的。
pub trait Function {
    /// 函数在模块中的名字。
    fn name(&self) -> &str;

    /// 函数声明的调用约定。无法内省的函数返回 [None]。
    fn signature(&self) -> Option<&Signature> {
        None
    }

    fn call(&self, args: &mut [Arg]) -> Result<(), Error>;
}

macro_rules! impl_function_for_pointer {
    ($($ptr:ident)+) => {
        $(
            impl<F: Function + ?Sized> Function for $ptr<F> {
                #[inline]
                fn name(&self) -> &str {
                    (**self).name()
                }
                #[inline]
                fn signature(&self) -> Option<&Signature> {
                    (**self).signature()
                }
                #[inline]
                fn call(&self, args: &mut [Arg]) -> Result<(), Error> {
                    (**self).call(args)
                }
            }
        )+
    };
}

impl_function_for_pointer! { Box Rc Arc }

/// 单个位置参数的约定。`ndim` 为 [None] 时接受任意维数。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArgSpec {
    pub dt: DataType,
    pub ndim: Option<usize>,
}

impl ArgSpec {
    #[inline]
    pub const fn new(dt: DataType, ndim: usize) -> Self {
        Self {
            dt,
            ndim: Some(ndim),
        }
    }

    #[inline]
    pub const fn any_rank(dt: DataType) -> Self {
        Self { dt, ndim: None }
    }

    /// 声明方 `self` 能否接受调用方约定的 `expected`。
    #[inline]
    fn accepts(&self, expected: &ArgSpec) -> bool {
        self.dt == expected.dt
            && match (self.ndim, expected.ndim) {
                (None, _) => true,
                (Some(a), Some(b)) => a == b,
                (Some(_), None) => false,
            }
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ndim {
            Some(ndim) => write!(f, "{}[{ndim}d]", self.dt),
            None => write!(f, "{}[*]", self.dt),
        }
    }
}

/// 函数的位置参数约定。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature(Box<[ArgSpec]>);

impl Signature {
    #[inline]
    pub fn new(args: impl IntoIterator<Item = ArgSpec>) -> Self {
        Self(args.into_iter().collect())
    }

    /// `n` 个相同约定的参数。
    #[inline]
    pub fn uniform(n: usize, spec: ArgSpec) -> Self {
        Self(vec![spec; n].into())
    }

    #[inline]
    pub fn args(&self) -> &[ArgSpec] {
        &self.0
    }

    /// 解析时检查：声明方签名能否满足调用方期望的签名。
    pub fn check_compatible(&self, expected: &Signature) -> Result<(), Error> {
        if self.0.len() == expected.0.len()
            && self.0.iter().zip(&*expected.0).all(|(a, b)| a.accepts(b))
        {
            Ok(())
        } else {
            Err(signature_mismatch(format!(
                "function takes {self}, caller expects {expected}"
            )))
        }
    }

    /// 调用时检查实际参数。
    pub fn check_args(&self, args: &[Arg]) -> Result<(), Error> {
        if args.len() != self.0.len() {
            return Err(args_not_support(format!(
                "{} args given, {} expected",
                args.len(),
                self.0.len()
            )));
        }
        for (i, (arg, spec)) in args.iter().zip(&*self.0).enumerate() {
            let actual = ArgSpec::new(arg.dt(), arg.shape().len());
            if !spec.accepts(&actual) {
                return Err(signature_mismatch(format!(
                    "arg {i} is {actual}, {spec} expected"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?
            }
            write!(f, "{arg}")?
        }
        write!(f, ")")
    }
}
