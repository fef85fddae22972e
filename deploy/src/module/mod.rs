//! 可调用函数的来源。

mod dylib;
mod packed;

pub use crate::system::SystemLib;
pub use dylib::DylibModule;
pub use packed::{PackedCFunc, PackedFunc, Value, TYPE_CODE_NULL, TYPE_CODE_TENSOR};

use crate::{Error, Function};

/// 模块：按名字解析出可调用函数。
///
/// 模块在整个运行期间只读共享，同一个函数可以被反复解析和调用。
pub trait Module {
    /// 解析名为 `name` 的函数。名字不存在时返回 [SymbolNotFound](crate::ErrorKind::SymbolNotFound)，
    /// 不会产生可调用对象。
    fn get_function(&self, name: &str) -> Result<Box<dyn Function + '_>, Error>;

    /// 模块中是否存在名为 `name` 的函数。
    fn contains(&self, name: &str) -> bool {
        self.get_function(name).is_ok()
    }
}

impl<M: Module + ?Sized> Module for &M {
    #[inline]
    fn get_function(&self, name: &str) -> Result<Box<dyn Function + '_>, Error> {
        (**self).get_function(name)
    }
}
