use crate::Error;
use dlpack::Device;
use std::{collections::BTreeMap, fmt, time::Duration};

/// 单项指标的值。
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Metric {
    Count(u64),
    Duration(Duration),
    Ratio(f64),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Duration(d) => write!(f, "{:.3}", d.as_secs_f64() * 1e6),
            Self::Ratio(r) => write!(f, "{r:.4}"),
        }
    }
}

/// 按名字排序的指标集合。
pub type Metrics = BTreeMap<String, Metric>;

/// 指标收集器。
///
/// [Profiler](super::Profiler) 在构造时调用 [init](MetricCollector::init)，
/// 在每个命名区间开始和结束时调用 [start](MetricCollector::start) 和
/// [stop](MetricCollector::stop)。区间不会嵌套。
pub trait MetricCollector {
    fn name(&self) -> &str;

    /// 告知收集器将要监控的全部设备。
    fn init(&mut self, devices: &[Device]) -> Result<(), Error>;

    /// 开始收集 `device` 上的指标。不支持该设备时返回 `false`，此时不会调用 `stop`。
    fn start(&mut self, device: Device) -> Result<bool, Error>;

    /// 结束收集，返回区间内累积的指标。
    fn stop(&mut self) -> Result<Metrics, Error>;
}

#[test]
fn test_metric_display() {
    assert_eq!(Metric::Count(42).to_string(), "42");
    assert_eq!(
        Metric::Duration(Duration::from_micros(1500)).to_string(),
        "1500.000"
    );
    assert_eq!(Metric::Ratio(0.5).to_string(), "0.5000");
}
