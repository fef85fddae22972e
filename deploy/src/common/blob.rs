use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 主存上按指定边界对齐、零初始化的字节块。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
}

impl Blob {
    /// 分配失败或对齐不是 2 的幂时返回 [None]。
    pub fn new(size: usize, align: usize) -> Option<Self> {
        let layout = layout(size, align)?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self {
            ptr,
            len: size,
            align,
        })
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len, align } = self;
        // 构造时已经验证过
        if let Some(layout) = layout(len, align) {
            unsafe { dealloc(ptr.as_ptr(), layout) }
        }
    }
}

// 零长度的块也占用一个对齐单元，使指针始终可解引用
#[inline(always)]
fn layout(size: usize, align: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(align), align).ok()
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_blob() {
    let mut blob = Blob::new(100, 64).unwrap();
    assert_eq!(blob.len(), 100);
    assert_eq!(blob.as_ptr() as usize % 64, 0);
    assert!(blob.iter().all(|&b| b == 0));
    blob[99] = 1;
    assert_eq!(blob[99], 1);

    let empty = Blob::new(0, 64).unwrap();
    assert!(empty.is_empty());

    assert!(Blob::new(8, 3).is_none());
}
