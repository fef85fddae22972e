use crate::{alloc_failed, device_not_support, Blob, Error};
use dlpack::{Device, DeviceType};
use log::debug;
use std::ops::DerefMut;

/// DLPack 约定的数据指针对齐边界。
pub const ALLOC_ALIGNMENT: usize = 64;

/// 张量存储分配器。
///
/// 分配出的对象表示对某块存储区域的所有权，必须通过同一个分配器的 [Alloc::free] 归还。
/// 存储起始地址应按 [ALLOC_ALIGNMENT] 对齐，未对齐的存储在按元素访问时返回
/// [TypeNotSupport](crate::ErrorKind::TypeNotSupport)。
pub trait Alloc {
    /// 分配器分配和回收的对象。
    type Mem: DerefMut<Target = [u8]>;

    fn alloc(&self, size: usize, device: Device) -> Result<Self::Mem, Error>;
    fn free(&self, mem: Self::Mem);
}

impl<A: Alloc + ?Sized> Alloc for &A {
    type Mem = A::Mem;

    #[inline]
    fn alloc(&self, size: usize, device: Device) -> Result<Self::Mem, Error> {
        (**self).alloc(size, device)
    }

    #[inline]
    fn free(&self, mem: Self::Mem) {
        (**self).free(mem)
    }
}

/// 主存分配器，只服务 CPU 设备。
#[derive(Clone, Copy, Default, Debug)]
pub struct HostAlloc;

impl Alloc for HostAlloc {
    type Mem = Blob;

    fn alloc(&self, size: usize, device: Device) -> Result<Blob, Error> {
        if device.ty != DeviceType::Cpu {
            return Err(device_not_support(format!(
                "host allocator cannot serve {device}"
            )));
        }
        debug!("alloc {size} bytes on {device}");
        Blob::new(size, ALLOC_ALIGNMENT)
            .ok_or_else(|| alloc_failed(format!("{size} bytes on {device}")))
    }

    #[inline]
    fn free(&self, mem: Blob) {
        debug!("free {} bytes", mem.len());
        drop(mem)
    }
}


#[test]
fn test_host_alloc() {
    let mem = HostAlloc.alloc(4 * 64 * 64, Device::cpu(0)).unwrap();
    assert_eq!(mem.len(), 4 * 64 * 64);
    assert_eq!(mem.as_ptr() as usize % ALLOC_ALIGNMENT, 0);
    HostAlloc.free(mem);

    let err = HostAlloc.alloc(16, Device::cuda(0)).err().unwrap();
    assert_eq!(err.kind, crate::ErrorKind::DeviceNotSupport);
}
