use crate::{execution_failed, Arg, Error, Function};
use libloading::Library;
use std::{
    ffi::{c_char, c_int, c_void},
    sync::Arc,
};

/// 打包调用约定中的参数值。
#[derive(Clone, Copy)]
#[repr(C)]
#[allow(dead_code)]
pub union Value {
    pub v_int64: i64,
    pub v_float64: f64,
    pub v_handle: *mut c_void,
    pub v_str: *const c_char,
}

/// 参数类型码：张量描述符指针。
pub const TYPE_CODE_TENSOR: c_int = 7;
/// 返回值类型码：无返回值。
pub const TYPE_CODE_NULL: c_int = 4;

/// 导出符号的打包调用约定：
///
/// ```c
/// int f(Value *args, int *type_codes, int num_args,
///       Value *ret, int *ret_type_code, void *resource_handle);
/// ```
///
/// 返回 0 表示成功。
pub type PackedCFunc = unsafe extern "C" fn(
    *mut Value,
    *mut c_int,
    c_int,
    *mut Value,
    *mut c_int,
    *mut c_void,
) -> c_int;

/// 遵循打包调用约定的函数。
///
/// 从动态库解析出的函数持有库的引用计数，函数存活期间库不会被卸载。
#[derive(Clone)]
pub struct PackedFunc {
    name: String,
    func: PackedCFunc,
    _lib: Option<Arc<Library>>,
}

impl PackedFunc {
    #[inline]
    pub(super) fn from_library(
        name: impl Into<String>,
        func: PackedCFunc,
        lib: Arc<Library>,
    ) -> Self {
        Self {
            name: name.into(),
            func,
            _lib: Some(lib),
        }
    }

    /// 包装链接进本进程的打包函数。
    #[inline]
    pub fn linked(name: impl Into<String>, func: PackedCFunc) -> Self {
        Self {
            name: name.into(),
            func,
            _lib: None,
        }
    }
}

impl Function for PackedFunc {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &mut [Arg]) -> Result<(), Error> {
        let mut values = args
            .iter_mut()
            .map(|arg| Value {
                v_handle: arg.as_mut_ptr().cast(),
            })
            .collect::<Vec<_>>();
        let mut type_codes = vec![TYPE_CODE_TENSOR; values.len()];
        let mut ret = Value { v_int64: 0 };
        let mut ret_code = TYPE_CODE_NULL;

        let status = unsafe {
            (self.func)(
                values.as_mut_ptr(),
                type_codes.as_mut_ptr(),
                values.len() as _,
                &mut ret,
                &mut ret_code,
                std::ptr::null_mut(),
            )
        };
        if status == 0 {
            Ok(())
        } else {
            Err(execution_failed(format!(
                "{} returned status {status}",
                self.name
            )))
        }
    }
}
