use crate::{
    module::Module,
    profiling::{Profiler, Report},
    Alloc, Arg, Diff, Error, ErrorCollector, Function, HarnessConfig, HostAlloc, Tensor,
};
use log::{debug, info, warn};
use std::io::Write;

/// 与参考实现比对时使用的误差容限。
pub const VERIFY_ABS: f64 = 1e-6;
pub const VERIFY_REL: f64 = 1e-3;

/// 一次调用的结果。
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// 按行主序读出的输出张量。
    pub values: Vec<f64>,
    /// 与参考实现比对的 `(超差数, 总数)`。
    pub verification: Option<(usize, usize)>,
}

/// 调用驱动：解析函数，按配置分配并填充参数，调用并输出结果。
pub struct Harness<'m, A: Alloc = HostAlloc> {
    config: HarnessConfig,
    function: Box<dyn Function + 'm>,
    reference: Option<Box<dyn Function + 'm>>,
    alloc: A,
}

impl<'m> Harness<'m> {
    #[inline]
    pub fn new<M: Module + ?Sized>(module: &'m M, config: HarnessConfig) -> Result<Self, Error> {
        Self::with_alloc(module, config, HostAlloc)
    }
}

impl<'m, A: Alloc> Harness<'m, A> {
    /// 从 `module` 中解析 `config.function`。
    ///
    /// 能内省调用约定的函数在此处检查，不匹配时不会分配任何存储。
    pub fn with_alloc<M: Module + ?Sized>(
        module: &'m M,
        config: HarnessConfig,
        alloc: A,
    ) -> Result<Self, Error> {
        let function = module.get_function(&config.function)?;
        check_signature(&*function, &config)?;
        Ok(Self {
            config,
            function,
            reference: None,
            alloc,
        })
    }

    /// 设置参考实现，每次调用后在同样的输入上运行并比对输出。
    pub fn with_reference(mut self, reference: Box<dyn Function + 'm>) -> Result<Self, Error> {
        check_signature(&*reference, &self.config)?;
        self.reference = Some(reference);
        Ok(self)
    }

    #[inline]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[inline]
    pub fn function(&self) -> &dyn Function {
        &*self.function
    }

    #[inline]
    pub fn alloc(&self) -> &A {
        &self.alloc
    }

    /// 调用一次并输出结果。
    pub fn run<W: Write>(&self, w: &mut W) -> Result<RunSummary, Error> {
        self.execute(w, |f, args, _| f.call(args))
            .map(|(summary, ())| summary)
    }

    /// 预热一次，然后在 `profiler` 的一个命名区间内调用一次。
    ///
    /// `profiler` 必须处于 [Idle](crate::profiling::ProfilerState::Idle) 状态，返回时已停止。
    pub fn run_profiled<W: Write>(
        &self,
        profiler: &mut Profiler,
        w: &mut W,
    ) -> Result<(RunSummary, Report), Error> {
        let device = self.config.device;
        let (summary, report) = self.execute(w, |f, args, w| {
            f.call(args)?;
            writeln!(w, "Warmup performed")?;

            profiler.start()?;
            profiler.measure(f.name(), device, || f.call(args))?;
            profiler.stop()
        })?;
        Ok((summary, report))
    }

    fn execute<W: Write, T>(
        &self,
        w: &mut W,
        invoke: impl FnOnce(&dyn Function, &mut [Arg], &mut W) -> Result<T, Error>,
    ) -> Result<(RunSummary, T), Error> {
        let HarnessConfig {
            inputs, dt, device, ..
        } = self.config;
        let shape = self.config.shape();

        let mut tensors = (0..=inputs)
            .map(|_| Tensor::new(&self.alloc, dt, &shape, device))
            .collect::<Result<Vec<_>, _>>()?;
        writeln!(w, "Arrays have been allocated")?;

        for t in &mut tensors[..inputs] {
            t.fill_with_index()?
        }
        writeln!(w, "Arrays have been set")?;

        let ans = {
            let mut args = tensors.iter_mut().map(Tensor::arg).collect::<Vec<_>>();
            invoke(&*self.function, &mut args, w)?
        };
        writeln!(w, "Function has been run")?;
        info!("{} finished on {device}", self.function.name());

        let output = &tensors[inputs];
        output.write_rows(w)?;

        let verification = match &self.reference {
            Some(reference) => {
                let mut expected = Tensor::new(&self.alloc, dt, &shape, device)?;
                let mut args = tensors[..inputs]
                    .iter_mut()
                    .map(Tensor::arg)
                    .chain([expected.arg()])
                    .collect::<Vec<_>>();
                reference.call(&mut args)?;
                drop(args);

                let mut ec = ErrorCollector::new(VERIFY_ABS, VERIFY_REL);
                for (e, a) in expected.to_f64()?.into_iter().zip(tensors[inputs].to_f64()?) {
                    ec.push(Diff::new(e, a))
                }
                let summary = ec.summary();
                if summary.0 == 0 {
                    info!("verified against {}: {ec}", reference.name())
                } else {
                    let head = &ec.outliers()[..summary.0.min(8)];
                    warn!(
                        "verification against {} failed: {ec}, first at {head:?}",
                        reference.name()
                    )
                }
                Some(summary)
            }
            None => None,
        };

        Ok((
            RunSummary {
                values: tensors[inputs].to_f64()?,
                verification,
            },
            ans,
        ))
    }
}

fn check_signature(function: &dyn Function, config: &HarnessConfig) -> Result<(), Error> {
    match function.signature() {
        Some(signature) => signature.check_compatible(&config.signature()),
        None => {
            debug!("{} does not declare a signature", function.name());
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::Harness;
    use crate::{
        alloc::test_alloc::CountingAlloc,
        execution_failed,
        module::{Module, SystemLib},
        profiling::{test::Delta, Metric, Profiler, ProfilerState},
        system::common_cpu::{Add3, MatMulAdd},
        Arg, Error, ErrorKind, Function, HarnessConfig,
    };
    use dlpack::{DataType, Device};
    use std::{cell::Cell, rc::Rc};

    fn config(function: &str, rows: usize) -> HarnessConfig {
        HarnessConfig {
            function: function.into(),
            rows,
            ..Default::default()
        }
    }

    /// 记录调用次数，可选地总是失败。
    struct Counted {
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl Function for Counted {
        fn name(&self) -> &str {
            "counted"
        }

        fn call(&self, _args: &mut [Arg]) -> Result<(), Error> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(execution_failed("always fails"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_run() {
        let lib = SystemLib::with_builtins();
        let harness = Harness::new(&lib, config("add3", 2)).unwrap();

        let mut out = Vec::new();
        let summary = harness.run(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\
Arrays have been allocated
Arrays have been set
Function has been run
0, 3
6, 9
"
        );
        assert_eq!(summary.values, [0., 3., 6., 9.]);
        assert_eq!(summary.verification, None);
    }

    #[test]
    fn test_release() {
        let lib = SystemLib::with_builtins();
        let alloc = CountingAlloc::default();
        let harness = Harness::with_alloc(&lib, config("matmul_add_sys", 8), &alloc).unwrap();
        harness.run(&mut std::io::sink()).unwrap();
        assert_eq!(alloc.allocs.get(), 4);
        assert_eq!(alloc.frees.get(), 4);
        assert_eq!(alloc.bytes.get(), 4 * 8 * 8 * 4);

        let calls = Rc::new(Cell::new(0));
        let lib = SystemLib::new().register(Counted {
            calls: calls.clone(),
            fail: true,
        });
        let alloc = CountingAlloc::default();
        let harness = Harness::with_alloc(&lib, config("counted", 4), &alloc).unwrap();
        let err = harness.run(&mut std::io::sink()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExecutionFailed);
        assert_eq!(calls.get(), 1);
        assert_eq!(alloc.allocs.get(), 4);
        assert_eq!(alloc.frees.get(), 4);
    }

    #[test]
    fn test_resolve_failure() {
        let lib = SystemLib::with_builtins();
        let err = Harness::new(&lib, config("matmul_add_dyn", 4)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::SymbolNotFound);

        let alloc = CountingAlloc::default();
        let config = HarnessConfig {
            dt: DataType::F64,
            ..config("matmul_add_sys", 4)
        };
        let err = Harness::with_alloc(&lib, config, &alloc).err().unwrap();
        assert_eq!(err.kind, ErrorKind::SignatureMismatch);
        assert_eq!(alloc.allocs.get(), 0);
    }

    #[test]
    fn test_verify() {
        let lib = SystemLib::with_builtins()
            .register(MatMulAdd::new("matmul_add_copy", DataType::F32).unwrap());

        let harness = Harness::new(&lib, config("matmul_add_sys", 4))
            .unwrap()
            .with_reference(lib.get_function("matmul_add_copy").unwrap())
            .unwrap();
        let summary = harness.run(&mut std::io::sink()).unwrap();
        assert_eq!(summary.verification, Some((0, 16)));

        let harness = Harness::new(&lib, config("add3", 4))
            .unwrap()
            .with_reference(Box::new(MatMulAdd::new("ref", DataType::F32).unwrap()))
            .unwrap();
        let (outliers, total) = harness
            .run(&mut std::io::sink())
            .unwrap()
            .verification
            .unwrap();
        assert_eq!(total, 16);
        assert!(outliers > 0);

        let err = Harness::new(&lib, config("add3", 4))
            .unwrap()
            .with_reference(Box::new(Add3::new("ref", DataType::F64).unwrap()))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::SignatureMismatch);
    }

    #[test]
    fn test_profiled() {
        let calls = Rc::new(Cell::new(0));
        let lib = SystemLib::new().register(Counted {
            calls: calls.clone(),
            fail: false,
        });
        let harness = Harness::new(&lib, config("counted", 2)).unwrap();

        let mut profiler =
            Profiler::new([Device::cpu(0)], vec![Box::new(Delta::new(calls.clone()))]).unwrap();
        let mut out = Vec::new();
        let (_, report) = harness.run_profiled(&mut profiler, &mut out).unwrap();

        // 预热一次，测量一次
        assert_eq!(calls.get(), 2);
        assert_eq!(profiler.state(), ProfilerState::Stopped);
        let records = report.calls();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "counted");
        assert_eq!(records[0].device, Device::cpu(0));
        assert_eq!(records[0].metrics["delta"], Metric::Count(1));

        let out = String::from_utf8(out).unwrap();
        let lines = out.lines().take(4).collect::<Vec<_>>();
        assert_eq!(
            lines,
            [
                "Arrays have been allocated",
                "Arrays have been set",
                "Warmup performed",
                "Function has been run",
            ]
        );
    }

    #[test]
    fn test_profiled_misuse() {
        let lib = SystemLib::with_builtins();
        let harness = Harness::new(&lib, config("add3", 2)).unwrap();
        let mut profiler = Profiler::new([Device::cpu(0)], vec![]).unwrap();
        profiler.start().unwrap();
        let err = harness
            .run_profiled(&mut profiler, &mut std::io::sink())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProfilerMisuse);
    }
}
