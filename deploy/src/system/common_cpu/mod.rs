//! 内置的 CPU 函数。

use crate::{
    args_not_support, shape_distinct, shape_mismatch, type_not_support, Arg, ArgSpec, Element,
    Error, Function, Signature,
};
use digit_layout::types as ty;
use dlpack::DataType;
use half::f16;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};
use std::ops::Add;

pub(super) fn builtins() -> Vec<Box<dyn Function>> {
    let mut ans = Vec::<Box<dyn Function>>::with_capacity(2);
    if let Ok(f) = MatMulAdd::new("matmul_add_sys", DataType::F32) {
        ans.push(Box::new(f))
    }
    if let Ok(f) = Add3::new("add3", DataType::F32) {
        ans.push(Box::new(f))
    }
    ans
}

/// out = a · b + c
///
/// a: `[m, k]`，b: `[k, n]`，c 和 out: `[m, n]`，均为行主序紧密排布。
pub struct MatMulAdd {
    name: String,
    signature: Signature,
}

impl MatMulAdd {
    pub fn new(name: impl Into<String>, dt: DataType) -> Result<Self, Error> {
        match dt.digit_layout() {
            Some(ty::F16 | ty::F32 | ty::F64) => Ok(Self {
                name: name.into(),
                signature: Signature::uniform(4, ArgSpec::new(dt, 2)),
            }),
            _ => Err(type_not_support(format!("matmul_add on {dt}"))),
        }
    }
}

impl Function for MatMulAdd {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn signature(&self) -> Option<&Signature> {
        Some(&self.signature)
    }

    fn call(&self, args: &mut [Arg]) -> Result<(), Error> {
        self.signature.check_args(args)?;
        let [a, b, c, out] = args else {
            return Err(args_not_support("matmul_add takes 4 args"));
        };

        let &[m, k] = a.shape() else { unreachable!() };
        let &[k_, n] = b.shape() else { unreachable!() };
        if k != k_ || c.shape() != [m, n] || out.shape() != [m, n] {
            return Err(shape_mismatch(format!(
                "a: {:?}, b: {:?}, c: {:?}, out: {:?}",
                a.shape(),
                b.shape(),
                c.shape(),
                out.shape(),
            )));
        }
        let (m, n, k) = (m as usize, n as usize, k as usize);

        macro_rules! gemm {
            ($t:ty => $g:ty, $one:expr) => {{
                out.data_mut::<$t>()?.copy_from_slice(c.data::<$t>()?);
                let dst = out.data_mut::<$t>()?.as_mut_ptr().cast::<$g>();
                let lhs = a.data::<$t>()?.as_ptr().cast::<$g>();
                let rhs = b.data::<$t>()?.as_ptr().cast::<$g>();
                unsafe {
                    gemm::gemm(
                        m,
                        n,
                        k,
                        dst,
                        1,
                        n as isize,
                        true,
                        lhs,
                        1,
                        k as isize,
                        rhs,
                        1,
                        n as isize,
                        $one,
                        $one,
                        false,
                        false,
                        false,
                        gemm::Parallelism::Rayon(0),
                    )
                }
            }};
        }

        match a.dt().digit_layout() {
            Some(ty::F16) => gemm!(f16 => gemm::f16, gemm::f16::ONE),
            Some(ty::F32) => gemm!(f32 => f32, 1.),
            Some(ty::F64) => gemm!(f64 => f64, 1.),
            _ => return Err(type_not_support(format!("matmul_add on {}", a.dt()))),
        }
        Ok(())
    }
}

/// out = a + b + c，逐元素，任意维数。
pub struct Add3 {
    name: String,
    signature: Signature,
}

impl Add3 {
    pub fn new(name: impl Into<String>, dt: DataType) -> Result<Self, Error> {
        match dt.digit_layout() {
            Some(ty::F16 | ty::F32 | ty::F64 | ty::I32 | ty::I64) => Ok(Self {
                name: name.into(),
                signature: Signature::uniform(4, ArgSpec::any_rank(dt)),
            }),
            _ => Err(type_not_support(format!("add3 on {dt}"))),
        }
    }
}

impl Function for Add3 {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn signature(&self) -> Option<&Signature> {
        Some(&self.signature)
    }

    fn call(&self, args: &mut [Arg]) -> Result<(), Error> {
        fn add3<T: Element + Add<Output = T>>(
            a: &Arg,
            b: &Arg,
            c: &Arg,
            out: &mut Arg,
        ) -> Result<(), Error> {
            let (a, b, c) = (a.data::<T>()?, b.data::<T>()?, c.data::<T>()?);
            out.data_mut::<T>()?
                .par_iter_mut()
                .zip(a)
                .zip(b)
                .zip(c)
                .for_each(|(((y, &a), &b), &c)| *y = a + b + c);
            Ok(())
        }

        self.signature.check_args(args)?;
        let [a, b, c, out] = args else {
            return Err(args_not_support("add3 takes 4 args"));
        };
        shape_distinct(&[&*a, &*b, &*c, &*out])?;

        match a.dt().digit_layout() {
            Some(ty::F16) => add3::<f16>(a, b, c, out),
            Some(ty::F32) => add3::<f32>(a, b, c, out),
            Some(ty::F64) => add3::<f64>(a, b, c, out),
            Some(ty::I32) => add3::<i32>(a, b, c, out),
            Some(ty::I64) => add3::<i64>(a, b, c, out),
            _ => Err(type_not_support(format!("add3 on {}", a.dt()))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Add3, MatMulAdd};
    use crate::{Diff, ErrorCollector, ErrorKind, Function, HostAlloc, Tensor};
    use dlpack::{DataType, Device};
    use rand::Rng;

    #[test]
    fn test_add3() {
        let alloc = HostAlloc;
        let dev = Device::cpu(0);
        let mut a = Tensor::new(&alloc, DataType::F32, &[2, 2], dev).unwrap();
        let mut b = Tensor::new(&alloc, DataType::F32, &[2, 2], dev).unwrap();
        let mut c = Tensor::new(&alloc, DataType::F32, &[2, 2], dev).unwrap();
        let mut out = Tensor::new(&alloc, DataType::F32, &[2, 2], dev).unwrap();
        for t in [&mut a, &mut b, &mut c] {
            t.fill_with_index().unwrap();
        }

        let f = Add3::new("add3", DataType::F32).unwrap();
        f.call(&mut [a.arg(), b.arg(), c.arg(), out.arg()]).unwrap();
        assert_eq!(out.as_slice::<f32>().unwrap(), &[0., 3., 6., 9.]);

        let mut d = Tensor::new(&alloc, DataType::F32, &[4], dev).unwrap();
        let err = f
            .call(&mut [a.arg(), b.arg(), c.arg(), d.arg()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShapeMismatch);

        let err = f.call(&mut [a.arg(), b.arg(), c.arg()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArgsNotSupport);
    }

    #[test]
    fn test_matmul_add() {
        const M: usize = 7;
        const K: usize = 5;
        const N: usize = 3;

        let alloc = HostAlloc;
        let dev = Device::cpu(0);
        let mut a = Tensor::new(&alloc, DataType::F64, &[M, K], dev).unwrap();
        let mut b = Tensor::new(&alloc, DataType::F64, &[K, N], dev).unwrap();
        let mut c = Tensor::new(&alloc, DataType::F64, &[M, N], dev).unwrap();
        let mut out = Tensor::new(&alloc, DataType::F64, &[M, N], dev).unwrap();

        let mut rng = rand::thread_rng();
        for t in [&mut a, &mut b, &mut c] {
            rng.fill(t.as_slice_mut::<f64>().unwrap());
        }

        let f = MatMulAdd::new("matmul_add", DataType::F64).unwrap();
        f.call(&mut [a.arg(), b.arg(), c.arg(), out.arg()]).unwrap();

        let a = a.as_slice::<f64>().unwrap();
        let b = b.as_slice::<f64>().unwrap();
        let c = c.as_slice::<f64>().unwrap();
        let mut ec = ErrorCollector::new(f64::EPSILON, 1e-9);
        for (idx, &ans) in out.as_slice::<f64>().unwrap().iter().enumerate() {
            let (i, j) = (idx / N, idx % N);
            let expected = (0..K).map(|k| a[i * K + k] * b[k * N + j]).sum::<f64>() + c[idx];
            ec.push(Diff::new(expected, ans));
        }
        println!("{ec}");
        assert_eq!(ec.summary(), (0, M * N));
    }

    #[test]
    fn test_matmul_add_shape() {
        let alloc = HostAlloc;
        let dev = Device::cpu(0);
        let mut a = Tensor::new(&alloc, DataType::F32, &[2, 3], dev).unwrap();
        let mut b = Tensor::new(&alloc, DataType::F32, &[2, 3], dev).unwrap();
        let mut c = Tensor::new(&alloc, DataType::F32, &[2, 3], dev).unwrap();
        let mut out = Tensor::new(&alloc, DataType::F32, &[2, 3], dev).unwrap();

        let f = MatMulAdd::new("matmul_add", DataType::F32).unwrap();
        let err = f
            .call(&mut [a.arg(), b.arg(), c.arg(), out.arg()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShapeMismatch);

        let f = MatMulAdd::new("matmul_add", DataType::F64).unwrap();
        let err = f
            .call(&mut [a.arg(), b.arg(), c.arg(), out.arg()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SignatureMismatch);

        assert!(MatMulAdd::new("matmul_add", DataType::I32).is_err());
    }
}
