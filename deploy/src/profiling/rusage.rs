use super::{Metric, MetricCollector, Metrics};
use crate::{execution_failed, metric_not_support, profiler_misuse, Error};
use dlpack::{Device, DeviceType};
use log::{info, warn};
use std::{io, mem::MaybeUninit, time::Duration};

/// 基于 `getrusage(RUSAGE_SELF)` 的进程级计数器。
///
/// 只支持 CPU 设备，其他设备类型的配置会被忽略。
pub struct RusageCollector {
    metrics: Vec<String>,
    enabled: bool,
    begin: Option<Usage>,
}

const METRICS: &[&str] = &[
    "rusage::USER-TIME",
    "rusage::SYSTEM-TIME",
    "rusage::MINOR-FAULTS",
    "rusage::MAJOR-FAULTS",
    "rusage::VOLUNTARY-SWITCHES",
    "rusage::INVOLUNTARY-SWITCHES",
];

impl RusageCollector {
    /// 支持的全部指标名。
    #[inline]
    pub fn supported() -> &'static [&'static str] {
        METRICS
    }

    /// 按设备类型配置指标，未知的指标名返回 [MetricNotSupport](crate::ErrorKind::MetricNotSupport)。
    pub fn new<'a>(
        config: impl IntoIterator<Item = (DeviceType, &'a [&'a str])>,
    ) -> Result<Self, Error> {
        let mut metrics = Vec::new();
        for (ty, names) in config {
            if ty != DeviceType::Cpu {
                warn!("rusage collector ignores {} metric(s) on {ty}", names.len());
                continue;
            }
            for &name in names {
                if !METRICS.contains(&name) {
                    return Err(metric_not_support(format!("{name} on {ty}")));
                }
                if !metrics.iter().any(|m| m == name) {
                    metrics.push(name.to_string())
                }
            }
        }
        Ok(Self {
            metrics,
            enabled: false,
            begin: None,
        })
    }

    #[inline]
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }
}

impl MetricCollector for RusageCollector {
    #[inline]
    fn name(&self) -> &str {
        "rusage"
    }

    fn init(&mut self, devices: &[Device]) -> Result<(), Error> {
        self.enabled = devices.iter().any(|d| d.ty == DeviceType::Cpu);
        if self.enabled {
            info!("rusage collector counts {}", self.metrics.join(", "))
        } else if !self.metrics.is_empty() {
            warn!("rusage collector has no cpu device to watch")
        }
        Ok(())
    }

    fn start(&mut self, device: Device) -> Result<bool, Error> {
        if !self.enabled || device.ty != DeviceType::Cpu || self.metrics.is_empty() {
            return Ok(false);
        }
        self.begin = Some(Usage::now()?);
        Ok(true)
    }

    fn stop(&mut self) -> Result<Metrics, Error> {
        let Some(begin) = self.begin.take() else {
            return Err(profiler_misuse("rusage collector is not started"));
        };
        let end = Usage::now()?;
        let count = |end: i64, begin: i64| Metric::Count(end.saturating_sub(begin).max(0) as _);
        Ok(self
            .metrics
            .iter()
            .map(|name| {
                let value = match name.as_str() {
                    "rusage::USER-TIME" => Metric::Duration(end.user.saturating_sub(begin.user)),
                    "rusage::SYSTEM-TIME" => {
                        Metric::Duration(end.system.saturating_sub(begin.system))
                    }
                    "rusage::MINOR-FAULTS" => count(end.minflt, begin.minflt),
                    "rusage::MAJOR-FAULTS" => count(end.majflt, begin.majflt),
                    "rusage::VOLUNTARY-SWITCHES" => count(end.nvcsw, begin.nvcsw),
                    "rusage::INVOLUNTARY-SWITCHES" => count(end.nivcsw, begin.nivcsw),
                    _ => unreachable!(),
                };
                (name.clone(), value)
            })
            .collect())
    }
}

#[derive(Clone, Copy, Debug)]
struct Usage {
    user: Duration,
    system: Duration,
    minflt: i64,
    majflt: i64,
    nvcsw: i64,
    nivcsw: i64,
}

impl Usage {
    fn now() -> Result<Self, Error> {
        fn duration(tv: libc::timeval) -> Duration {
            Duration::from_secs(tv.tv_sec as _) + Duration::from_micros(tv.tv_usec as _)
        }

        let mut ru = MaybeUninit::<libc::rusage>::zeroed();
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, ru.as_mut_ptr()) } != 0 {
            return Err(execution_failed(format!(
                "getrusage: {}",
                io::Error::last_os_error()
            )));
        }
        let ru = unsafe { ru.assume_init() };
        Ok(Self {
            user: duration(ru.ru_utime),
            system: duration(ru.ru_stime),
            minflt: ru.ru_minflt as _,
            majflt: ru.ru_majflt as _,
            nvcsw: ru.ru_nvcsw as _,
            nivcsw: ru.ru_nivcsw as _,
        })
    }
}

#[cfg(test)]
mod test {
    use super::RusageCollector;
    use crate::{
        profiling::{Metric, MetricCollector},
        ErrorKind,
    };
    use dlpack::{Device, DeviceType};

    #[test]
    fn test_config() {
        let err = RusageCollector::new([(DeviceType::Cpu, &["rusage::CYCLES"][..])])
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::MetricNotSupport);

        let collector = RusageCollector::new([
            (DeviceType::Cpu, &["rusage::USER-TIME", "rusage::USER-TIME"][..]),
            (DeviceType::Cuda, &["cuda:::event:elapsed_cycles_sm:device=0"][..]),
        ])
        .unwrap();
        assert_eq!(collector.metrics(), ["rusage::USER-TIME"]);
    }

    #[test]
    fn test_collect() {
        let mut collector = RusageCollector::new([(
            DeviceType::Cpu,
            &["rusage::USER-TIME", "rusage::MINOR-FAULTS"][..],
        )])
        .unwrap();
        collector.init(&[Device::cpu(0)]).unwrap();

        assert!(!collector.start(Device::cuda(0)).unwrap());
        assert!(collector.start(Device::cpu(0)).unwrap());
        let v = (0..1 << 16).map(|i| i as f64).collect::<Vec<_>>();
        assert!(v.iter().sum::<f64>() > 0.);
        let metrics = collector.stop().unwrap();

        assert_eq!(metrics.len(), 2);
        assert!(matches!(metrics["rusage::USER-TIME"], Metric::Duration(_)));
        assert!(matches!(metrics["rusage::MINOR-FAULTS"], Metric::Count(_)));
        assert_eq!(collector.stop().unwrap_err().kind, ErrorKind::ProfilerMisuse);
    }

    #[test]
    fn test_no_cpu() {
        let mut collector =
            RusageCollector::new([(DeviceType::Cpu, &["rusage::USER-TIME"][..])]).unwrap();
        collector.init(&[Device::cuda(0)]).unwrap();
        assert!(!collector.start(Device::cpu(0)).unwrap());
    }
}
