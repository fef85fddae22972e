use crate::{DataType, Device};
use ndarray_layout::ArrayLayout;
use std::{ffi::c_void, ptr::null_mut};

/// 张量描述符，与 `DLTensor` 二进制兼容。
///
/// 描述符不拥有 `data` 和 `shape` 指向的存储，由构造者保证它们在使用期间有效。
/// `strides` 为空指针表示紧密排布的行主序。
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct DLTensor {
    pub data: *mut c_void,
    pub device: Device,
    pub ndim: i32,
    pub dtype: DataType,
    pub shape: *mut i64,
    pub strides: *mut i64,
    pub byte_offset: u64,
}

impl DLTensor {
    /// 构造紧密排布的描述符。
    #[inline]
    pub fn new_compact(data: *mut c_void, device: Device, dtype: DataType, shape: &[i64]) -> Self {
        Self {
            data,
            device,
            ndim: shape.len() as _,
            dtype,
            shape: shape.as_ptr().cast_mut(),
            strides: null_mut(),
            byte_offset: 0,
        }
    }
}

/// 张量的逻辑布局：元素类型和以字节为单位的形状步长。
#[derive(Clone)]
pub struct TensorLayout {
    pub dt: DataType,
    pub layout: ArrayLayout<4>,
}

impl TensorLayout {
    pub fn new(dt: DataType, shape: &[usize], strides: &[isize]) -> Self {
        Self {
            dt,
            layout: ArrayLayout::new(shape, strides, 0),
        }
    }

    /// 行主序紧密排布的布局。字节数超出 `isize` 表示范围时返回 [None]。
    pub fn new_contiguous(dt: DataType, shape: &[usize]) -> Option<Self> {
        let mut strides = vec![0isize; shape.len()];
        let mut mul = isize::try_from(dt.nbytes()).ok()?;
        for (stride, &d) in strides.iter_mut().zip(shape).rev() {
            *stride = mul;
            mul = mul.checked_mul(isize::try_from(d).ok()?)?;
        }
        Some(Self::new(dt, shape, &strides))
    }

    #[inline]
    pub fn dt(&self) -> DataType {
        self.dt
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// 元素总数，溢出时返回 [None]。
    #[inline]
    pub fn count(&self) -> Option<usize> {
        self.shape()
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// 紧密排布时占用的字节数，溢出时返回 [None]。
    #[inline]
    pub fn nbytes(&self) -> Option<usize> {
        self.count()?.checked_mul(self.dt.nbytes())
    }
}
