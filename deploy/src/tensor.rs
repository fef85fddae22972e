use crate::{
    alloc_failed, device_not_support, shape_mismatch, type_not_support, Alloc, Error,
};
use digit_layout::types as ty;
use dlpack::{DLTensor, DataType, Device, DeviceType, TensorLayout};
use half::{bf16, f16};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};
use std::{
    fmt::Display,
    io::Write,
    marker::PhantomData,
    mem::{align_of, size_of, ManuallyDrop},
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 能直接存放在张量中的标量类型。
pub trait Element: Copy + Send + Sync + Display + 'static {
    const DT: DataType;

    /// 用扁平序号构造元素，超出表示范围时按类型自身的转换规则截断。
    fn from_index(i: usize) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($( $ty:ty => $dt:ident )+) => {
        $(
            impl Element for $ty {
                const DT: DataType = DataType::$dt;
                #[inline]
                fn from_index(i: usize) -> Self {
                    i as _
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self as _
                }
            }
        )+
    };
}

impl_element! {
    i8  => I8  i16 => I16 i32 => I32 i64 => I64
    u8  => U8  u16 => U16 u32 => U32 u64 => U64
    f32 => F32 f64 => F64
}

impl Element for f16 {
    const DT: DataType = DataType::F16;
    #[inline]
    fn from_index(i: usize) -> Self {
        f16::from_f64(i as _)
    }
    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
}

impl Element for bf16 {
    const DT: DataType = DataType::BF16;
    #[inline]
    fn from_index(i: usize) -> Self {
        bf16::from_f64(i as _)
    }
    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
}

/// 按元素类型分发到泛型实现，`$f` 的第一个泛型参数是元素类型。
macro_rules! dispatch {
    ($dt:expr => $f:ident ($($arg:expr),*)) => {
        match $dt.digit_layout() {
            Some(ty::I8 ) => $f::<i8 >($($arg),*),
            Some(ty::I16) => $f::<i16>($($arg),*),
            Some(ty::I32) => $f::<i32>($($arg),*),
            Some(ty::I64) => $f::<i64>($($arg),*),
            Some(ty::U8 ) => $f::<u8 >($($arg),*),
            Some(ty::U16) => $f::<u16>($($arg),*),
            Some(ty::U32) => $f::<u32>($($arg),*),
            Some(ty::U64) => $f::<u64>($($arg),*),
            Some(ty::F16 ) => $f::<f16 >($($arg),*),
            Some(ty::BF16) => $f::<bf16>($($arg),*),
            Some(ty::F32 ) => $f::<f32 >($($arg),*),
            Some(ty::F64 ) => $f::<f64 >($($arg),*),
            _ => Err(type_not_support(format!("element type {}", $dt))),
        }
    };
}

/// 拥有存储的张量。
///
/// 存储在构造时从分配器获得，在析构时归还同一个分配器，
/// 因此任何退出路径上都恰好释放一次。
pub struct Tensor<'a, A: Alloc> {
    layout: TensorLayout,
    shape: Box<[i64]>,
    device: Device,
    mem: ManuallyDrop<A::Mem>,
    alloc: &'a A,
}

impl<'a, A: Alloc> Tensor<'a, A> {
    pub fn new(
        alloc: &'a A,
        dt: DataType,
        shape: &[usize],
        device: Device,
    ) -> Result<Self, Error> {
        let (layout, size) = TensorLayout::new_contiguous(dt, shape)
            .and_then(|layout| layout.nbytes().map(|size| (layout, size)))
            .ok_or_else(|| alloc_failed(format!("{dt}{shape:?} exceeds address space")))?;
        let mem = alloc.alloc(size, device)?;
        Ok(Self {
            shape: shape.iter().map(|&d| d as i64).collect(),
            layout,
            device,
            mem: ManuallyDrop::new(mem),
            alloc,
        })
    }

    #[inline]
    pub fn dt(&self) -> DataType {
        self.layout.dt()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// 借出作为位置参数的描述符，借用期间张量不可被其他代码访问。
    pub fn arg(&mut self) -> Arg<'_> {
        let dt = self.layout.dt();
        let data = self.mem.as_mut_ptr().cast();
        Arg {
            raw: DLTensor::new_compact(data, self.device, dt, &self.shape),
            _borrow: PhantomData,
        }
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T], Error> {
        check_host::<T>(self.dt(), self.device)?;
        cast(&self.mem)
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], Error> {
        check_host::<T>(self.dt(), self.device)?;
        cast_mut(&mut self.mem)
    }

    /// 将扁平序号 `k` 处的元素设为 `k`。对 `(R, R)` 张量即 `(i, j)` 处为 `i * R + j`。
    pub fn fill_with_index(&mut self) -> Result<(), Error> {
        fn fill<T: Element>(bytes: &mut [u8]) -> Result<(), Error> {
            cast_mut::<T>(bytes)?
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, x)| *x = T::from_index(i));
            Ok(())
        }

        check_host_device(self.device)?;
        let dt = self.dt();
        dispatch!(dt => fill(&mut self.mem))
    }

    /// 按行主序读出全部元素。
    pub fn to_f64(&self) -> Result<Vec<f64>, Error> {
        fn read<T: Element>(bytes: &[u8]) -> Result<Vec<f64>, Error> {
            Ok(cast::<T>(bytes)?.iter().map(|x| x.to_f64()).collect())
        }

        check_host_device(self.device)?;
        let dt = self.dt();
        dispatch!(dt => read(&self.mem))
    }

    /// 以最后一维为行输出全部元素，行内以 `", "` 分隔，每行以换行结束。
    pub fn write_rows(&self, w: &mut impl Write) -> Result<(), Error> {
        fn write<T: Element>(bytes: &[u8], row: usize, w: &mut dyn Write) -> Result<(), Error> {
            for line in cast::<T>(bytes)?.chunks(row) {
                let mut first = true;
                for x in line {
                    if !first {
                        write!(w, ", ")?
                    }
                    write!(w, "{x}")?;
                    first = false;
                }
                writeln!(w)?
            }
            Ok(())
        }

        check_host_device(self.device)?;
        let row = self.shape().last().copied().unwrap_or(1).max(1);
        let dt = self.dt();
        dispatch!(dt => write(&self.mem, row, w))
    }
}

impl<A: Alloc> Drop for Tensor<'_, A> {
    #[inline]
    fn drop(&mut self) {
        self.alloc.free(unsafe { ManuallyDrop::take(&mut self.mem) })
    }
}

/// 按位置传递给可调用对象的张量参数。
///
/// 描述符中的指针借用自一个 [Tensor]，生命周期保证调用期间存储有效且无别名。
pub struct Arg<'a> {
    raw: DLTensor,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl Arg<'_> {
    #[inline]
    pub fn raw(&self) -> &DLTensor {
        &self.raw
    }

    /// 传给外部函数的描述符指针。通过指针修改描述符是未定义行为。
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut DLTensor {
        &mut self.raw
    }

    #[inline]
    pub fn dt(&self) -> DataType {
        self.raw.dtype
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.raw.device
    }

    #[inline]
    pub fn shape(&self) -> &[i64] {
        unsafe { from_raw_parts(self.raw.shape, self.raw.ndim as _) }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.shape().iter().product::<i64>() as _
    }

    pub fn data<T: Element>(&self) -> Result<&[T], Error> {
        check_host::<T>(self.dt(), self.device())?;
        check_aligned::<T>(self.raw.data.cast())?;
        Ok(unsafe { from_raw_parts(self.raw.data.cast(), self.count()) })
    }

    pub fn data_mut<T: Element>(&mut self) -> Result<&mut [T], Error> {
        check_host::<T>(self.dt(), self.device())?;
        check_aligned::<T>(self.raw.data.cast())?;
        Ok(unsafe { from_raw_parts_mut(self.raw.data.cast(), self.count()) })
    }
}

/// 检查一组参数形状完全一致，返回共同的形状。
pub(crate) fn shape_distinct<'a>(args: &'a [&Arg]) -> Result<&'a [i64], Error> {
    let [first, tail @ ..] = args else {
        unreachable!("args empty");
    };
    let shape = first.shape();
    if tail.iter().all(|it| it.shape() == shape) {
        Ok(shape)
    } else {
        let shapes = args.iter().map(|it| it.shape()).collect::<Vec<_>>();
        Err(shape_mismatch(format!("{shapes:?} are not distinct")))
    }
}

#[inline]
fn check_host_device(device: Device) -> Result<(), Error> {
    if device.ty == DeviceType::Cpu {
        Ok(())
    } else {
        Err(device_not_support(format!("{device} is not host accessible")))
    }
}

fn cast<T: Element>(bytes: &[u8]) -> Result<&[T], Error> {
    check_aligned::<T>(bytes.as_ptr())?;
    let ([], data, []) = (unsafe { bytes.align_to::<T>() }) else {
        return Err(misaligned::<T>(bytes.as_ptr()));
    };
    Ok(data)
}

fn cast_mut<T: Element>(bytes: &mut [u8]) -> Result<&mut [T], Error> {
    check_aligned::<T>(bytes.as_ptr())?;
    let ptr = bytes.as_ptr();
    let ([], data, []) = (unsafe { bytes.align_to_mut::<T>() }) else {
        return Err(misaligned::<T>(ptr));
    };
    Ok(data)
}

#[inline]
fn check_aligned<T: Element>(ptr: *const u8) -> Result<(), Error> {
    if ptr as usize % align_of::<T>() == 0 {
        Ok(())
    } else {
        Err(misaligned::<T>(ptr))
    }
}

fn misaligned<T: Element>(ptr: *const u8) -> Error {
    type_not_support(format!("{ptr:p} is not aligned for {}", T::DT))
}

#[inline]
fn check_host<T: Element>(dt: DataType, device: Device) -> Result<(), Error> {
    check_host_device(device)?;
    debug_assert_eq!(size_of::<T>(), T::DT.nbytes());
    if dt == T::DT {
        Ok(())
    } else {
        Err(type_not_support(format!("{dt} accessed as {}", T::DT)))
    }
}

#[cfg(test)]
mod test {
    use super::Tensor;
    use crate::{alloc::test_alloc::CountingAlloc, Alloc, Blob, Error, ErrorKind, HostAlloc};
    use dlpack::{DataType, Device};
    use std::ops::{Deref, DerefMut};

    #[test]
    fn test_fill_deterministic() {
        const R: usize = 64;
        let alloc = HostAlloc;
        let mut a = Tensor::new(&alloc, DataType::F32, &[R, R], Device::cpu(0)).unwrap();
        let mut b = Tensor::new(&alloc, DataType::F32, &[R, R], Device::cpu(0)).unwrap();
        a.fill_with_index().unwrap();
        b.fill_with_index().unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());

        let data = a.as_slice::<f32>().unwrap();
        for i in 0..R {
            for j in 0..R {
                assert_eq!(data[i * R + j], (i * R + j) as f32);
            }
        }

        a.fill_with_index().unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_fill_types() {
        let alloc = HostAlloc;
        for dt in [DataType::F16, DataType::F64, DataType::I32, DataType::U8] {
            let mut t = Tensor::new(&alloc, dt, &[3, 4], Device::cpu(0)).unwrap();
            t.fill_with_index().unwrap();
            assert_eq!(
                t.to_f64().unwrap(),
                (0..12).map(|i| i as f64).collect::<Vec<_>>()
            );
        }

        let mut t = Tensor::new(&alloc, DataType::BOOL, &[2], Device::cpu(0)).unwrap();
        let err = t.fill_with_index().unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeNotSupport);
    }

    #[test]
    fn test_release_once() {
        let alloc = CountingAlloc::default();
        {
            let _a = Tensor::new(&alloc, DataType::F32, &[2, 2], Device::cpu(0)).unwrap();
            let _b = Tensor::new(&alloc, DataType::F64, &[8], Device::cpu(0)).unwrap();
            assert_eq!(alloc.live(), 2);
            assert_eq!(alloc.bytes.get(), 16 + 64);
        }
        assert_eq!(alloc.allocs.get(), 2);
        assert_eq!(alloc.frees.get(), 2);

        assert!(Tensor::new(&alloc, DataType::F32, &[2], Device::cuda(0)).is_err());
        assert_eq!(alloc.allocs.get(), 2);
        assert_eq!(alloc.frees.get(), 2);
    }

    #[test]
    fn test_write_rows() {
        let alloc = HostAlloc;
        let mut t = Tensor::new(&alloc, DataType::F32, &[2, 3], Device::cpu(0)).unwrap();
        t.fill_with_index().unwrap();
        let mut out = Vec::new();
        t.write_rows(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0, 1, 2\n3, 4, 5\n");
    }

    #[test]
    fn test_arg() {
        let alloc = HostAlloc;
        let mut t = Tensor::new(&alloc, DataType::F32, &[2, 2], Device::cpu(0)).unwrap();
        {
            let mut arg = t.arg();
            assert_eq!(arg.shape(), &[2, 2]);
            assert_eq!(arg.count(), 4);
            arg.data_mut::<f32>().unwrap().copy_from_slice(&[1., 2., 3., 4.]);
            assert_eq!(
                arg.data::<f64>().unwrap_err().kind,
                ErrorKind::TypeNotSupport
            );

            let ptr = arg.as_mut_ptr();
            assert_eq!(ptr.cast_const(), arg.raw() as *const _);
            assert_eq!(unsafe { (*ptr).ndim }, 2);
        }
        assert_eq!(t.as_slice::<f32>().unwrap(), &[1., 2., 3., 4.]);
    }

    #[test]
    fn test_too_large() {
        let alloc = CountingAlloc::default();
        let huge = 1usize << 32;
        let err = Tensor::new(&alloc, DataType::F32, &[huge, huge], Device::cpu(0))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::AllocFailed);
        assert_eq!(alloc.allocs.get(), 0);

        let err = Tensor::new(&HostAlloc, DataType::U8, &[usize::MAX], Device::cpu(0))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::AllocFailed);
    }

    /// 返回错开一个字节的存储。
    struct Shifted;

    struct ShiftedMem(Blob, usize);

    impl Deref for ShiftedMem {
        type Target = [u8];
        fn deref(&self) -> &[u8] {
            &self.0[1..=self.1]
        }
    }

    impl DerefMut for ShiftedMem {
        fn deref_mut(&mut self) -> &mut [u8] {
            &mut self.0[1..=self.1]
        }
    }

    impl Alloc for Shifted {
        type Mem = ShiftedMem;

        fn alloc(&self, size: usize, device: Device) -> Result<ShiftedMem, Error> {
            Ok(ShiftedMem(HostAlloc.alloc(size + 1, device)?, size))
        }

        fn free(&self, mem: ShiftedMem) {
            drop(mem)
        }
    }

    #[test]
    fn test_misaligned() {
        let mut t = Tensor::new(&Shifted, DataType::F32, &[2, 2], Device::cpu(0)).unwrap();
        let misaligned = |e: Error| assert_eq!(e.kind, ErrorKind::TypeNotSupport);

        misaligned(t.fill_with_index().unwrap_err());
        misaligned(t.as_slice::<f32>().unwrap_err());
        misaligned(t.as_slice_mut::<f32>().unwrap_err());
        misaligned(t.to_f64().unwrap_err());
        misaligned(t.write_rows(&mut std::io::sink()).unwrap_err());

        let mut arg = t.arg();
        misaligned(arg.data::<f32>().unwrap_err());
        misaligned(arg.data_mut::<f32>().unwrap_err());

        // 单字节元素不受影响
        let mut t = Tensor::new(&Shifted, DataType::U8, &[3], Device::cpu(0)).unwrap();
        t.fill_with_index().unwrap();
        assert_eq!(t.as_slice::<u8>().unwrap(), &[0, 1, 2]);
    }
}
